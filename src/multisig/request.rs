//! Multisig request lifecycle
//!
//! A request is one party's handle on a spend proposal. The service is the
//! source of truth for who has signed; a client's copy is a cache refreshed
//! from every snapshot the service returns.
//!
//! ```text
//! Pending ──sign (threshold met)──▶ Signed ──unlock──▶ Unlocked
//!    │ └────────────unlock──────────────────────────▶ Unlocked
//!    └──cancel──▶ Cancelled
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::members::{MemberSet, MultisigError};

/// What the creator of a request wants done
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MultisigAction {
    /// Collect signatures until the threshold is met
    Sign,
    /// Release collected signatures so a fresh attempt can start
    Unlock,
}

impl fmt::Display for MultisigAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultisigAction::Sign => f.write_str("sign"),
            MultisigAction::Unlock => f.write_str("unlock"),
        }
    }
}

/// Lifecycle state of a request
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MultisigState {
    Pending,
    Signed,
    Unlocked,
    Cancelled,
}

impl MultisigState {
    /// Allowed transitions
    pub fn can_transition_to(self, next: MultisigState) -> bool {
        use MultisigState::*;
        matches!(
            (self, next),
            (Pending, Signed) | (Pending, Cancelled) | (Pending, Unlocked) | (Signed, Unlocked)
        )
    }

    /// No transition leaves this state
    pub fn is_final(self) -> bool {
        matches!(self, MultisigState::Unlocked | MultisigState::Cancelled)
    }
}

impl fmt::Display for MultisigState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MultisigState::Pending => "pending",
            MultisigState::Signed => "signed",
            MultisigState::Unlocked => "unlocked",
            MultisigState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Signing progress of a request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignProgress {
    /// Threshold met; the raw transaction is broadcastable
    Complete,
    /// More signatures needed. Re-poll, or request an unlock if stuck.
    ThresholdNotMet { have: usize, need: u8 },
}

/// A multisig request as seen by one client
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MultisigRequest {
    pub request_id: String,
    /// Identity that created the request
    pub user_id: String,
    pub action: MultisigAction,
    /// Hex payload of the raw transaction
    pub raw_transaction: String,
    /// SHA-256 of the raw payload
    pub transaction_hash: String,
    pub members: Vec<String>,
    pub signers: Vec<String>,
    pub threshold: u8,
    pub state: MultisigState,
    pub created_at: DateTime<Utc>,
}

impl MultisigRequest {
    /// Create a pending request with no signers
    pub fn new(
        request_id: String,
        user_id: String,
        action: MultisigAction,
        raw_transaction: String,
        transaction_hash: String,
        members: &MemberSet,
    ) -> Self {
        Self {
            request_id,
            user_id,
            action,
            raw_transaction,
            transaction_hash,
            members: members.members().to_vec(),
            signers: Vec::new(),
            threshold: members.threshold(),
            state: MultisigState::Pending,
            created_at: Utc::now(),
        }
    }

    fn transition(&mut self, next: MultisigState, action: &'static str) -> Result<(), MultisigError> {
        if !self.state.can_transition_to(next) {
            return Err(MultisigError::InvalidTransition {
                action,
                state: self.state,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Record a member's signature.
    ///
    /// Signing twice, or signing a request that is already `Signed`, leaves
    /// it unchanged.
    pub fn add_signer(&mut self, identity: &str) -> Result<SignProgress, MultisigError> {
        match self.state {
            MultisigState::Signed => return Ok(SignProgress::Complete),
            MultisigState::Unlocked | MultisigState::Cancelled => {
                return Err(MultisigError::InvalidTransition {
                    action: "sign",
                    state: self.state,
                })
            }
            MultisigState::Pending => {}
        }

        if self.action != MultisigAction::Sign {
            return Err(MultisigError::WrongAction(self.action));
        }
        if !self.members.iter().any(|m| m == identity) {
            return Err(MultisigError::NotMember(identity.to_string()));
        }

        if !self.signers.iter().any(|s| s == identity) {
            self.signers.push(identity.to_string());
        }
        if self.signers.len() >= self.threshold as usize {
            self.transition(MultisigState::Signed, "sign")?;
        }

        Ok(self.progress())
    }

    /// Cancel a pending request. Returns whether the state changed; any
    /// other state is left alone.
    pub fn cancel(&mut self) -> bool {
        if self.state == MultisigState::Pending {
            self.state = MultisigState::Cancelled;
            true
        } else {
            false
        }
    }

    /// Unlock a pending or signed request. Returns whether the state
    /// changed; requests already unlocked or cancelled are left alone.
    pub fn unlock(&mut self) -> Result<bool, MultisigError> {
        if self.state.is_final() {
            return Ok(false);
        }
        self.transition(MultisigState::Unlocked, "unlock")?;
        Ok(true)
    }

    pub fn progress(&self) -> SignProgress {
        if self.state == MultisigState::Signed {
            SignProgress::Complete
        } else {
            SignProgress::ThresholdNotMet {
                have: self.signers.len(),
                need: self.threshold,
            }
        }
    }

    pub fn is_signed(&self) -> bool {
        self.state == MultisigState::Signed
    }

    pub fn has_signed(&self, identity: &str) -> bool {
        self.signers.iter().any(|s| s == identity)
    }

    /// Replace the cached view with the service's snapshot.
    ///
    /// Returns false, leaving the cache untouched, when the snapshot is for a
    /// different request.
    pub fn refresh(&mut self, snapshot: &MultisigRequest) -> bool {
        if snapshot.request_id != self.request_id {
            return false;
        }
        self.signers = snapshot.signers.clone();
        self.threshold = snapshot.threshold;
        self.state = snapshot.state;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members() -> MemberSet {
        MemberSet::new(
            vec!["alice".to_string(), "bob".to_string(), "carol".to_string()],
            2,
        )
        .unwrap()
    }

    fn request(action: MultisigAction) -> MultisigRequest {
        MultisigRequest::new(
            "req-1".to_string(),
            "alice".to_string(),
            action,
            "00".to_string(),
            "hash".to_string(),
            &members(),
        )
    }

    #[test]
    fn test_transition_table() {
        use MultisigState::*;
        assert!(Pending.can_transition_to(Signed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Signed.can_transition_to(Unlocked));
        assert!(!Signed.can_transition_to(Cancelled));
        assert!(!Signed.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!Unlocked.can_transition_to(Signed));
    }

    #[test]
    fn test_threshold_reaches_signed() {
        let mut req = request(MultisigAction::Sign);
        assert_eq!(
            req.add_signer("alice").unwrap(),
            SignProgress::ThresholdNotMet { have: 1, need: 2 }
        );
        assert_eq!(req.state, MultisigState::Pending);

        assert_eq!(req.add_signer("bob").unwrap(), SignProgress::Complete);
        assert_eq!(req.state, MultisigState::Signed);

        // A third member cannot push signers past the threshold
        assert_eq!(req.add_signer("carol").unwrap(), SignProgress::Complete);
        assert_eq!(req.signers.len(), 2);
        assert!(req.is_signed());
    }

    #[test]
    fn test_duplicate_signature_is_idempotent() {
        let mut req = request(MultisigAction::Sign);
        req.add_signer("alice").unwrap();
        req.add_signer("alice").unwrap();
        assert_eq!(req.signers, vec!["alice".to_string()]);
        assert_eq!(req.state, MultisigState::Pending);
    }

    #[test]
    fn test_non_member_rejected() {
        let mut req = request(MultisigAction::Sign);
        assert!(matches!(
            req.add_signer("mallory"),
            Err(MultisigError::NotMember(_))
        ));
        assert!(req.signers.is_empty());
    }

    #[test]
    fn test_unlock_request_cannot_be_signed() {
        let mut req = request(MultisigAction::Unlock);
        assert!(matches!(
            req.add_signer("alice"),
            Err(MultisigError::WrongAction(MultisigAction::Unlock))
        ));
    }

    #[test]
    fn test_cancel_only_from_pending() {
        let mut req = request(MultisigAction::Sign);
        assert!(req.cancel());
        assert_eq!(req.state, MultisigState::Cancelled);
        // Second cancel is a no-op
        assert!(!req.cancel());

        let mut signed = request(MultisigAction::Sign);
        signed.add_signer("alice").unwrap();
        signed.add_signer("bob").unwrap();
        assert!(!signed.cancel());
        assert_eq!(signed.state, MultisigState::Signed);
    }

    #[test]
    fn test_signed_stays_signed_until_unlocked() {
        let mut req = request(MultisigAction::Sign);
        req.add_signer("alice").unwrap();
        req.add_signer("bob").unwrap();
        req.cancel();
        assert!(req.is_signed());

        assert!(req.unlock().unwrap());
        assert_eq!(req.state, MultisigState::Unlocked);
        assert!(!req.unlock().unwrap());
        assert!(matches!(
            req.add_signer("carol"),
            Err(MultisigError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_refresh_takes_service_view() {
        let mut local = request(MultisigAction::Sign);
        local.add_signer("alice").unwrap();

        let mut remote = local.clone();
        remote.signers = vec!["alice".to_string(), "bob".to_string()];
        remote.state = MultisigState::Signed;

        assert!(local.refresh(&remote));
        assert!(local.is_signed());
        assert!(local.has_signed("bob"));

        remote.request_id = "other".to_string();
        remote.state = MultisigState::Cancelled;
        assert!(!local.refresh(&remote));
        assert!(local.is_signed());
    }
}
