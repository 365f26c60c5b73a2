//! Cursor pagination over multisig outputs

use chrono::{DateTime, Utc};
use log::debug;
use std::time::Duration;

use super::{OutputQuery, OutputSource, RetryPolicy, MAX_PAGE_LIMIT};
use crate::client::ClientError;
use crate::multisig::{MultisigUtxo, TransactionHash};

/// Walks the outputs of a member set page by page.
///
/// The cursor moves to the `updated_at` of the last item of each page. A
/// full page always triggers one more read; the first short page ends the
/// walk.
pub struct OutputPager<'a, S: OutputSource + ?Sized> {
    source: &'a S,
    query: OutputQuery,
    offset: Option<DateTime<Utc>>,
    retry: RetryPolicy,
    done: bool,
    requests: usize,
}

impl<'a, S: OutputSource + ?Sized> OutputPager<'a, S> {
    pub fn new(source: &'a S, query: OutputQuery) -> Self {
        Self {
            source,
            query,
            offset: None,
            retry: RetryPolicy::default(),
            done: false,
            requests: 0,
        }
    }

    /// Start after this instant instead of from the beginning
    pub fn with_offset(mut self, offset: Option<DateTime<Utc>>) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Current cursor
    pub fn offset(&self) -> Option<DateTime<Utc>> {
        self.offset
    }

    /// Reads issued so far, retries excluded
    pub fn requests_issued(&self) -> usize {
        self.requests
    }

    /// Next page, or `None` once the walk is over
    pub async fn next_page(&mut self) -> Result<Option<Vec<MultisigUtxo>>, ClientError> {
        if self.done {
            return Ok(None);
        }

        let limit = self.query.limit.clamp(1, MAX_PAGE_LIMIT);
        let members = &self.query.members;
        let offset = self.offset;
        let source = self.source;
        let page = self
            .retry
            .run(|| source.read_outputs(members, offset, limit))
            .await?;
        self.requests += 1;

        if page.len() < limit {
            self.done = true;
        }
        if let Some(last) = page.last() {
            self.offset = Some(last.updated_at);
        }

        debug!(
            "Read {} outputs for {} (page {})",
            page.len(),
            self.query.members.description(),
            self.requests
        );
        Ok(Some(page))
    }

    /// Drain every remaining page
    pub async fn collect_all(mut self) -> Result<Vec<MultisigUtxo>, ClientError> {
        let mut outputs = Vec::new();
        while let Some(page) = self.next_page().await? {
            outputs.extend(page);
        }
        Ok(outputs)
    }
}

/// Wait for an output created by `hash` to become visible.
///
/// Scans from the beginning up to `attempts` times, sleeping `interval`
/// between scans. Returns `None` if it never shows up.
pub async fn find_output<S: OutputSource + ?Sized>(
    source: &S,
    query: &OutputQuery,
    hash: &TransactionHash,
    attempts: u32,
    interval: Duration,
) -> Result<Option<MultisigUtxo>, ClientError> {
    for attempt in 1..=attempts.max(1) {
        let mut pager = OutputPager::new(source, query.clone());
        while let Some(page) = pager.next_page().await? {
            if let Some(found) = page.into_iter().find(|u| u.transaction_hash == *hash) {
                return Ok(Some(found));
            }
        }

        if attempt < attempts {
            debug!("Output of {} not visible yet, retrying", hash);
            tokio::time::sleep(interval).await;
        }
    }
    Ok(None)
}
