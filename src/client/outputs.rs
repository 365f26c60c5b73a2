//! Output reads and raw transaction broadcast

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::info;
use serde::Serialize;

use super::{Client, ClientError, RequestContext};
use crate::ledger::{BroadcastReceipt, OutputSource, TransactionBroadcaster};
use crate::multisig::{MemberSet, MultisigUtxo};

#[derive(Serialize)]
struct RawPayload<'a> {
    raw: &'a str,
}

impl Client {
    /// One page of a member set's outputs with `updated_at` strictly after
    /// `offset`, oldest first
    pub async fn read_multisig_outputs(
        &self,
        ctx: &RequestContext<'_>,
        members: &MemberSet,
        offset: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<MultisigUtxo>, ClientError> {
        let offset = offset
            .map(|o| o.to_rfc3339_opts(SecondsFormat::Nanos, true))
            .unwrap_or_default();
        let uri = format!(
            "/multisigs/outputs?members={}&threshold={}&offset={}&limit={}",
            members.members_hash(),
            members.threshold(),
            offset,
            limit
        );
        self.get(ctx, &uri).await
    }

    /// Broadcast a fully signed raw transaction
    pub async fn send_raw_transaction(
        &self,
        ctx: &RequestContext<'_>,
        raw: &str,
    ) -> Result<BroadcastReceipt, ClientError> {
        let receipt: BroadcastReceipt = self.post(ctx, "/transactions", &RawPayload { raw }).await?;
        info!("Transaction {} accepted", receipt.hash);
        Ok(receipt)
    }
}

#[async_trait]
impl OutputSource for Client {
    async fn read_outputs(
        &self,
        members: &MemberSet,
        offset: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<MultisigUtxo>, ClientError> {
        let ctx = self.request_context();
        self.read_multisig_outputs(&ctx, members, offset, limit).await
    }
}

#[async_trait]
impl TransactionBroadcaster for Client {
    async fn broadcast(&self, raw: &str) -> Result<BroadcastReceipt, ClientError> {
        let ctx = self.request_context();
        self.send_raw_transaction(&ctx, raw).await
    }
}
