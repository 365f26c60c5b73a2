//! Multisig output ledger
//!
//! Read access to the outputs of a member set, paged by `updated_at`, and
//! the background loop that broadcasts outputs once they are fully signed.

pub mod pager;
pub mod poller;
pub mod retry;

pub use pager::{find_output, OutputPager};
pub use poller::{PollerConfig, SubmissionLoop, SubmitEvent};
pub use retry::RetryPolicy;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::ClientError;
use crate::multisig::{MemberSet, MultisigUtxo};

/// Default page size for output reads
pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Largest page the service returns
pub const MAX_PAGE_LIMIT: usize = 500;

/// Which outputs to read, and how many per page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputQuery {
    pub members: MemberSet,
    pub limit: usize,
}

impl OutputQuery {
    pub fn new(members: MemberSet) -> Self {
        Self {
            members,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }

    /// Page size, clamped to `1..=MAX_PAGE_LIMIT`
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.clamp(1, MAX_PAGE_LIMIT);
        self
    }
}

/// Reads one page of outputs strictly after `offset`, oldest first
#[async_trait]
pub trait OutputSource: Send + Sync {
    async fn read_outputs(
        &self,
        members: &MemberSet,
        offset: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<MultisigUtxo>, ClientError>;
}

/// Result of a broadcast
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BroadcastReceipt {
    pub hash: String,
}

/// Submits signed raw transactions to the network
#[async_trait]
pub trait TransactionBroadcaster: Send + Sync {
    async fn broadcast(&self, raw: &str) -> Result<BroadcastReceipt, ClientError>;
}
