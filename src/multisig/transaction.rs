//! Multisig spend proposals
//!
//! Builds the raw transaction every co-signer signs. The payload is the hex
//! of a canonical JSON document, so every party that builds the same
//! proposal dumps byte-identical payloads.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::members::{MemberSet, MultisigError};
use super::utxo::{MultisigUtxo, TransactionHash, UtxoState};
use crate::crypto::sha256_hex;

/// Fractional digits carried by amounts
pub const AMOUNT_PRECISION: u32 = 8;

/// Current raw transaction version
pub const TX_VERSION: u8 = 1;

/// Truncate an amount to the wire precision, keeping a fixed scale
pub fn normalize_amount(amount: Decimal) -> Decimal {
    let mut truncated = amount.round_dp_with_strategy(AMOUNT_PRECISION, RoundingStrategy::ToZero);
    truncated.rescale(AMOUNT_PRECISION);
    truncated
}

/// A requested output
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionOutput {
    pub receivers: Vec<String>,
    pub threshold: u8,
    pub amount: Decimal,
}

/// Reference to a spent output
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawInput {
    pub hash: TransactionHash,
    pub index: u32,
}

/// An output as it appears in the payload
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawOutput {
    /// Sorted receiver ids
    pub receivers: Vec<String>,
    pub threshold: u8,
    pub amount: Decimal,
}

/// The transaction co-signers agree on
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawTransaction {
    pub version: u8,
    pub inputs: Vec<RawInput>,
    pub outputs: Vec<RawOutput>,
    pub memo: String,
}

impl RawTransaction {
    /// Deterministic hex payload
    pub fn dump_payload(&self) -> Result<String, MultisigError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| MultisigError::MalformedPayload(e.to_string()))?;
        Ok(hex::encode(bytes))
    }

    /// Parse a payload produced by [`RawTransaction::dump_payload`]
    pub fn from_payload(payload: &str) -> Result<Self, MultisigError> {
        let bytes =
            hex::decode(payload).map_err(|e| MultisigError::MalformedPayload(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| MultisigError::MalformedPayload(e.to_string()))
    }

    pub fn total_output(&self) -> Decimal {
        self.outputs.iter().map(|o| o.amount).sum()
    }
}

/// SHA-256 of a hex payload's bytes
pub fn payload_hash(payload: &str) -> Result<String, MultisigError> {
    let bytes = hex::decode(payload).map_err(|e| MultisigError::MalformedPayload(e.to_string()))?;
    Ok(sha256_hex(&bytes))
}

/// Builder for a spend of multisig outputs
#[derive(Clone, Debug, Default)]
pub struct TransactionInput {
    memo: String,
    inputs: Vec<MultisigUtxo>,
    outputs: Vec<TransactionOutput>,
}

impl TransactionInput {
    pub fn new(memo: impl Into<String>) -> Self {
        Self {
            memo: memo.into(),
            ..Default::default()
        }
    }

    pub fn add_input(mut self, utxo: &MultisigUtxo) -> Self {
        self.inputs.push(utxo.clone());
        self
    }

    pub fn add_output(mut self, receivers: Vec<String>, threshold: u8, amount: Decimal) -> Self {
        self.outputs.push(TransactionOutput {
            receivers,
            threshold,
            amount,
        });
        self
    }

    /// Validate and assemble the raw transaction.
    ///
    /// Whatever the outputs leave over goes back to the input member set as
    /// a change output.
    pub fn build(&self) -> Result<RawTransaction, MultisigError> {
        let first = self.inputs.first().ok_or(MultisigError::NoInputs)?;
        let owners = first.member_set()?;

        let mut total_in = Decimal::ZERO;
        let mut inputs = Vec::with_capacity(self.inputs.len());
        for utxo in &self.inputs {
            if utxo.state != UtxoState::Unspent {
                return Err(MultisigError::Unspendable(utxo.utxo_id.clone()));
            }
            if utxo.threshold != owners.threshold() || !owners.same_members(&utxo.members) {
                return Err(MultisigError::MixedInputs);
            }
            total_in += utxo.amount;
            inputs.push(RawInput {
                hash: utxo.transaction_hash,
                index: utxo.output_index,
            });
        }

        let mut total_out = Decimal::ZERO;
        let mut outputs = Vec::with_capacity(self.outputs.len() + 1);
        for output in &self.outputs {
            let receivers = MemberSet::new(output.receivers.clone(), output.threshold)?;
            let amount = normalize_amount(output.amount);
            if amount <= Decimal::ZERO {
                return Err(MultisigError::InvalidAmount(output.amount.to_string()));
            }
            total_out += amount;
            outputs.push(raw_output(&receivers, amount));
        }

        if total_out > total_in {
            return Err(MultisigError::InsufficientFunds {
                available: total_in.to_string(),
                required: total_out.to_string(),
            });
        }

        let change = normalize_amount(total_in - total_out);
        if change > Decimal::ZERO {
            outputs.push(raw_output(&owners, change));
        }

        Ok(RawTransaction {
            version: TX_VERSION,
            inputs,
            outputs,
            memo: self.memo.clone(),
        })
    }
}

fn raw_output(receivers: &MemberSet, amount: Decimal) -> RawOutput {
    let mut sorted = receivers.members().to_vec();
    sorted.sort();
    RawOutput {
        receivers: sorted,
        threshold: receivers.threshold(),
        amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;

    fn utxo(amount: &str) -> MultisigUtxo {
        MultisigUtxo {
            utxo_id: "u1".to_string(),
            transaction_hash: TransactionHash([7u8; 32]),
            output_index: 0,
            amount: Decimal::from_str(amount).unwrap(),
            members: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            threshold: 2,
            state: UtxoState::Unspent,
            signed_by: String::new(),
            signed_tx: String::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_change_goes_back_to_members() {
        let tx = TransactionInput::new("split")
            .add_input(&utxo("1"))
            .add_output(vec!["a".to_string()], 1, Decimal::from_str("0.4").unwrap())
            .build()
            .unwrap();

        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[1].amount, Decimal::from_str("0.6").unwrap());
        assert_eq!(tx.outputs[1].threshold, 2);
        assert_eq!(tx.outputs[1].receivers, vec!["a", "b", "c"]);
        assert_eq!(tx.total_output(), Decimal::ONE);
    }

    #[test]
    fn test_exact_spend_has_no_change() {
        let tx = TransactionInput::new("")
            .add_input(&utxo("0.5"))
            .add_output(vec!["a".to_string()], 1, Decimal::from_str("0.5").unwrap())
            .build()
            .unwrap();
        assert_eq!(tx.outputs.len(), 1);
    }

    #[test]
    fn test_overspend_rejected() {
        let result = TransactionInput::new("")
            .add_input(&utxo("0.5"))
            .add_output(vec!["a".to_string()], 1, Decimal::from_str("0.50000001").unwrap())
            .build();
        assert!(matches!(result, Err(MultisigError::InsufficientFunds { .. })));
    }

    #[test]
    fn test_dust_below_precision_rejected() {
        let result = TransactionInput::new("")
            .add_input(&utxo("1"))
            .add_output(vec!["a".to_string()], 1, Decimal::from_str("0.000000001").unwrap())
            .build();
        assert!(matches!(result, Err(MultisigError::InvalidAmount(_))));
    }

    #[test]
    fn test_inputs_required_and_spendable() {
        assert!(matches!(
            TransactionInput::new("").build(),
            Err(MultisigError::NoInputs)
        ));

        let mut spent = utxo("1");
        spent.state = UtxoState::Spent;
        assert!(matches!(
            TransactionInput::new("").add_input(&spent).build(),
            Err(MultisigError::Unspendable(_))
        ));
    }

    #[test]
    fn test_mixed_member_sets_rejected() {
        let mut other = utxo("1");
        other.members = vec!["x".to_string(), "y".to_string()];
        let result = TransactionInput::new("")
            .add_input(&utxo("1"))
            .add_input(&other)
            .build();
        assert!(matches!(result, Err(MultisigError::MixedInputs)));
    }

    #[test]
    fn test_payload_is_deterministic() {
        let build = || {
            TransactionInput::new("memo")
                .add_input(&utxo("2"))
                .add_output(
                    vec!["b".to_string(), "a".to_string()],
                    1,
                    Decimal::from_str("1.23456789").unwrap(),
                )
                .build()
                .unwrap()
        };

        let a = build().dump_payload().unwrap();
        let b = build().dump_payload().unwrap();
        assert_eq!(a, b);
        assert_eq!(payload_hash(&a).unwrap(), payload_hash(&b).unwrap());

        let parsed = RawTransaction::from_payload(&a).unwrap();
        assert_eq!(parsed, build());
        assert_eq!(parsed.outputs[0].receivers, vec!["a", "b"]);
    }

    #[test]
    fn test_normalize_amount() {
        let amount = normalize_amount(Decimal::from_str("0.123456789").unwrap());
        assert_eq!(amount.to_string(), "0.12345678");
        assert_eq!(normalize_amount(Decimal::ONE).to_string(), "1.00000000");
    }
}
