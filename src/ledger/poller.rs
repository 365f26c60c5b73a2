//! Background submission of fully signed outputs
//!
//! Every `interval` the loop walks all outputs of a member set and
//! broadcasts the signed transaction of each output that is ready. Outcomes
//! go out on a channel; a failed output never stops the loop.

use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{OutputPager, OutputQuery, OutputSource, RetryPolicy, TransactionBroadcaster};
use crate::client::ClientError;
use crate::multisig::MultisigUtxo;

/// Submission loop configuration
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Pause between scans
    pub interval: Duration,
    /// Page size for output reads
    pub page_limit: usize,
    /// Retry policy for output reads
    pub retry: RetryPolicy,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            page_limit: 100,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome reported by the loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitEvent {
    Submitted { utxo_id: String, hash: String },
    Failed { utxo_id: String, error: String },
    ScanFailed { error: String },
}

/// Broadcasts signed outputs of one member set until cancelled
pub struct SubmissionLoop<S> {
    source: Arc<S>,
    query: OutputQuery,
    config: PollerConfig,
}

impl<S> SubmissionLoop<S>
where
    S: OutputSource + TransactionBroadcaster + 'static,
{
    pub fn new(source: Arc<S>, query: OutputQuery, config: PollerConfig) -> Self {
        let query = query.with_limit(config.page_limit);
        Self {
            source,
            query,
            config,
        }
    }

    /// Run on the tokio runtime. Events arrive on the returned receiver.
    pub fn spawn(
        self,
        cancel: CancellationToken,
    ) -> (JoinHandle<()>, mpsc::UnboundedReceiver<SubmitEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(self.run(cancel, events));
        (handle, receiver)
    }

    /// Loop until `cancel` fires.
    ///
    /// A broadcast already in flight completes before the loop returns.
    pub async fn run(self, cancel: CancellationToken, events: mpsc::UnboundedSender<SubmitEvent>) {
        info!(
            "Submission loop started for {} (interval {:?})",
            self.query.members.description(),
            self.config.interval
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }

            let scan = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                scan = self.ready_outputs() => scan,
            };

            let ready = match scan {
                Ok(ready) => ready,
                Err(e) => {
                    warn!("Output scan failed: {}", e);
                    let _ = events.send(SubmitEvent::ScanFailed {
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            for utxo in ready {
                if cancel.is_cancelled() {
                    break;
                }
                let _ = events.send(self.submit(&utxo).await);
            }
        }

        info!("Submission loop stopped");
    }

    async fn ready_outputs(&self) -> Result<Vec<MultisigUtxo>, ClientError> {
        let outputs = OutputPager::new(self.source.as_ref(), self.query.clone())
            .with_retry(self.config.retry)
            .collect_all()
            .await?;
        let ready: Vec<MultisigUtxo> = outputs
            .into_iter()
            .filter(MultisigUtxo::is_ready_to_submit)
            .collect();
        debug!("{} outputs ready to submit", ready.len());
        Ok(ready)
    }

    async fn submit(&self, utxo: &MultisigUtxo) -> SubmitEvent {
        match self.source.broadcast(&utxo.signed_tx).await {
            Ok(receipt) => {
                info!("Submitted output {} as {}", utxo.utxo_id, receipt.hash);
                SubmitEvent::Submitted {
                    utxo_id: utxo.utxo_id.clone(),
                    hash: receipt.hash,
                }
            }
            Err(e) => {
                warn!("Broadcast of output {} failed: {}", utxo.utxo_id, e);
                SubmitEvent::Failed {
                    utxo_id: utxo.utxo_id.clone(),
                    error: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::BroadcastReceipt;
    use crate::multisig::{MemberSet, TransactionHash, UtxoState};
    use crate::network::NetworkError;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeLedger {
        outputs: Mutex<Vec<MultisigUtxo>>,
        fail_raw: String,
        scan_failures: AtomicUsize,
        broadcasts: AtomicUsize,
    }

    impl FakeLedger {
        fn new(outputs: Vec<MultisigUtxo>, fail_raw: &str) -> Self {
            Self {
                outputs: Mutex::new(outputs),
                fail_raw: fail_raw.to_string(),
                scan_failures: AtomicUsize::new(0),
                broadcasts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OutputSource for FakeLedger {
        async fn read_outputs(
            &self,
            _members: &MemberSet,
            offset: Option<DateTime<Utc>>,
            limit: usize,
        ) -> Result<Vec<MultisigUtxo>, ClientError> {
            if self.scan_failures.load(Ordering::SeqCst) > 0 {
                self.scan_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ClientError::Decode("scan broke".into()));
            }
            let outputs = self.outputs.lock().unwrap();
            Ok(outputs
                .iter()
                .filter(|u| offset.map_or(true, |o| u.updated_at > o))
                .take(limit)
                .cloned()
                .collect())
        }
    }

    #[async_trait]
    impl TransactionBroadcaster for FakeLedger {
        async fn broadcast(&self, raw: &str) -> Result<BroadcastReceipt, ClientError> {
            self.broadcasts.fetch_add(1, Ordering::SeqCst);
            if raw == self.fail_raw {
                return Err(NetworkError::Unavailable("rejected".into()).into());
            }
            let mut outputs = self.outputs.lock().unwrap();
            for utxo in outputs.iter_mut().filter(|u| u.signed_tx == raw) {
                utxo.state = UtxoState::Spent;
            }
            Ok(BroadcastReceipt {
                hash: format!("hash-{}", raw),
            })
        }
    }

    fn utxo(n: u8, state: UtxoState, signed_tx: &str) -> MultisigUtxo {
        MultisigUtxo {
            utxo_id: format!("u{}", n),
            transaction_hash: TransactionHash([n; 32]),
            output_index: 0,
            amount: Decimal::ONE,
            members: vec!["a".to_string()],
            threshold: 1,
            state,
            signed_by: if signed_tx.is_empty() { String::new() } else { "a".to_string() },
            signed_tx: signed_tx.to_string(),
            updated_at: Utc::now() + ChronoDuration::milliseconds(n as i64),
        }
    }

    fn fast_config() -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(10),
            page_limit: 2,
            retry: RetryPolicy::none(),
        }
    }

    fn query() -> OutputQuery {
        OutputQuery::new(MemberSet::new(vec!["a".to_string()], 1).unwrap())
    }

    #[tokio::test]
    async fn test_failed_output_does_not_stop_others() {
        let ledger = Arc::new(FakeLedger::new(
            vec![
                utxo(1, UtxoState::Signed, "aa"),
                utxo(2, UtxoState::Unspent, ""),
                utxo(3, UtxoState::Signed, "bb"),
                utxo(4, UtxoState::Signed, "cc"),
            ],
            "bb",
        ));
        let cancel = CancellationToken::new();
        let (handle, mut events) =
            SubmissionLoop::new(ledger.clone(), query(), fast_config()).spawn(cancel.clone());

        let mut seen = Vec::new();
        while seen.len() < 3 {
            seen.push(events.recv().await.unwrap());
        }
        cancel.cancel();
        handle.await.unwrap();

        assert!(seen.contains(&SubmitEvent::Submitted {
            utxo_id: "u1".to_string(),
            hash: "hash-aa".to_string()
        }));
        assert!(seen.contains(&SubmitEvent::Submitted {
            utxo_id: "u4".to_string(),
            hash: "hash-cc".to_string()
        }));
        assert!(seen
            .iter()
            .any(|e| matches!(e, SubmitEvent::Failed { utxo_id, .. } if utxo_id == "u3")));
    }

    #[tokio::test]
    async fn test_scan_failure_reported_and_loop_continues() {
        let ledger = Arc::new(FakeLedger::new(vec![utxo(1, UtxoState::Signed, "aa")], ""));
        ledger.scan_failures.store(1, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        let (handle, mut events) =
            SubmissionLoop::new(ledger.clone(), query(), fast_config()).spawn(cancel.clone());

        assert!(matches!(
            events.recv().await.unwrap(),
            SubmitEvent::ScanFailed { .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            SubmitEvent::Submitted { .. }
        ));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_is_prompt() {
        let ledger = Arc::new(FakeLedger::new(vec![], ""));
        let config = PollerConfig {
            interval: Duration::from_secs(3600),
            ..fast_config()
        };
        let cancel = CancellationToken::new();
        let (handle, _events) = SubmissionLoop::new(ledger.clone(), query(), config).spawn(cancel.clone());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop did not stop")
            .unwrap();
        assert_eq!(ledger.broadcasts.load(Ordering::SeqCst), 0);
    }
}
