//! Multisig unspent outputs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::members::{MemberSet, MultisigError};

/// A 32-byte transaction digest, hex on the wire
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TransactionHash(pub [u8; 32]);

impl TransactionHash {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for TransactionHash {
    type Err = MultisigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| MultisigError::MalformedPayload(e.to_string()))?;
        let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            MultisigError::MalformedPayload(format!("hash must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(TransactionHash(arr))
    }
}

impl fmt::Display for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionHash({})", self.to_hex())
    }
}

impl Serialize for TransactionHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TransactionHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Spend state of an output
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UtxoState {
    Unspent,
    /// Enough signatures collected; `signed_tx` is broadcastable
    Signed,
    Spent,
}

/// An output locked to a member set
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MultisigUtxo {
    pub utxo_id: String,
    pub transaction_hash: TransactionHash,
    pub output_index: u32,
    pub amount: Decimal,
    pub members: Vec<String>,
    pub threshold: u8,
    pub state: UtxoState,
    /// Identity whose signature completed the threshold
    #[serde(default)]
    pub signed_by: String,
    /// Hex payload of the fully signed transaction
    #[serde(default)]
    pub signed_tx: String,
    pub updated_at: DateTime<Utc>,
}

impl MultisigUtxo {
    /// Whether the polling loop should broadcast this output
    pub fn is_ready_to_submit(&self) -> bool {
        self.state == UtxoState::Signed && !self.signed_by.is_empty() && !self.signed_tx.is_empty()
    }

    pub fn member_set(&self) -> Result<MemberSet, MultisigError> {
        MemberSet::new(self.members.clone(), self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MultisigUtxo {
        MultisigUtxo {
            utxo_id: "u1".to_string(),
            transaction_hash: TransactionHash([0xab; 32]),
            output_index: 0,
            amount: Decimal::new(150_000_000, 8),
            members: vec!["a".to_string(), "b".to_string()],
            threshold: 2,
            state: UtxoState::Unspent,
            signed_by: String::new(),
            signed_tx: String::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_hash_hex_format() {
        let hash = TransactionHash([0x01; 32]);
        assert_eq!(hash.to_hex().len(), 64);
        assert_eq!(hash.to_hex().parse::<TransactionHash>().unwrap(), hash);
        assert!("abcd".parse::<TransactionHash>().is_err());
    }

    #[test]
    fn test_json_shape() {
        let utxo = sample();
        let json = serde_json::to_value(&utxo).unwrap();
        assert_eq!(json["transaction_hash"], serde_json::json!("ab".repeat(32)));
        assert_eq!(json["state"], serde_json::json!("unspent"));
        assert_eq!(json["amount"], serde_json::json!("1.50000000"));
    }

    #[test]
    fn test_ready_to_submit() {
        let mut utxo = sample();
        assert!(!utxo.is_ready_to_submit());

        utxo.state = UtxoState::Signed;
        assert!(!utxo.is_ready_to_submit());

        utxo.signed_by = "a".to_string();
        utxo.signed_tx = "00ff".to_string();
        assert!(utxo.is_ready_to_submit());
    }
}
