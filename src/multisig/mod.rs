//! Multisig outputs and the signing lifecycle
//!
//! Outputs are locked to M-of-N member sets. Spending one takes a raw
//! transaction that enough members sign through multisig requests.
//!
//! # Example
//!
//! ```ignore
//! use multisig_custody::multisig::{MultisigAction, TransactionInput};
//!
//! let raw = TransactionInput::new("payout")
//!     .add_input(&utxo)
//!     .add_output(vec![me.clone()], 1, amount)
//!     .build()?
//!     .dump_payload()?;
//!
//! let ctx = client.request_context();
//! let request = client.create_multisig(&ctx, MultisigAction::Sign, &raw).await?;
//! let request = client.sign_multisig(&ctx, &request.request_id, pin).await?;
//! ```

pub mod members;
pub mod request;
pub mod transaction;
pub mod utxo;

pub use members::{MemberSet, MultisigError};
pub use request::{MultisigAction, MultisigRequest, MultisigState, SignProgress};
pub use transaction::{
    normalize_amount, payload_hash, RawInput, RawOutput, RawTransaction, TransactionInput,
    TransactionOutput, AMOUNT_PRECISION,
};
pub use utxo::{MultisigUtxo, TransactionHash, UtxoState};
