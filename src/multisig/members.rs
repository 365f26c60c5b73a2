//! Member sets
//!
//! A member set is the N identities and the M threshold an output is
//! locked to.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::request::{MultisigAction, MultisigState};
use crate::crypto::members_hash;

/// Errors related to multisig operations
#[derive(Error, Debug)]
pub enum MultisigError {
    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),
    #[error("Member set is empty")]
    NoMembers,
    #[error("Duplicate member: {0}")]
    DuplicateMember(String),
    #[error("Not a member of the output: {0}")]
    NotMember(String),
    #[error("Cannot {action} a request in state {state}")]
    InvalidTransition {
        action: &'static str,
        state: MultisigState,
    },
    #[error("Request action is {0}, expected the other action")]
    WrongAction(MultisigAction),
    #[error("Transaction has no inputs")]
    NoInputs,
    #[error("Inputs are locked to different member sets")]
    MixedInputs,
    #[error("Output is not spendable: {0}")]
    Unspendable(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Insufficient funds: inputs {available}, outputs {required}")]
    InsufficientFunds { available: String, required: String },
    #[error("Malformed transaction payload: {0}")]
    MalformedPayload(String),
}

/// Members and threshold of a multisig output
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberSet {
    /// Identity ids, kept in the order given
    members: Vec<String>,
    /// Minimum signatures required (M in M-of-N)
    threshold: u8,
}

impl MemberSet {
    /// Create a validated member set
    ///
    /// # Errors
    /// Returns error if the threshold is zero or above the member count, or
    /// a member appears twice
    pub fn new(members: Vec<String>, threshold: u8) -> Result<Self, MultisigError> {
        if members.is_empty() {
            return Err(MultisigError::NoMembers);
        }

        if threshold == 0 {
            return Err(MultisigError::InvalidThreshold(
                "threshold must be at least 1".to_string(),
            ));
        }

        if threshold as usize > members.len() {
            return Err(MultisigError::InvalidThreshold(format!(
                "threshold {} exceeds member count {}",
                threshold,
                members.len()
            )));
        }

        let mut sorted = members.clone();
        sorted.sort();
        if let Some(pair) = sorted.windows(2).find(|w| w[0] == w[1]) {
            return Err(MultisigError::DuplicateMember(pair[0].clone()));
        }

        Ok(Self { members, threshold })
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.members.iter().any(|m| m == identity)
    }

    /// Order-independent wire key of the member list
    pub fn members_hash(&self) -> String {
        members_hash(&self.members)
    }

    /// Whether another list names the same identities
    pub fn same_members(&self, other: &[String]) -> bool {
        let mut a = self.members.clone();
        let mut b = other.to_vec();
        a.sort();
        b.sort();
        a == b
    }

    /// Get description like "2-of-3"
    pub fn description(&self) -> String {
        format!("{}-of-{}", self.threshold, self.members.len())
    }
}
