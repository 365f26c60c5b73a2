//! Multisig custody client
//!
//! Client-side plumbing for a custodial UTXO network whose outputs are
//! locked to M-of-N member sets:
//! - Request signing with secp256k1 (PEM) or Ed25519 keystores, bearer
//!   tokens and OAuth authorizations
//! - Response verification against the service key
//! - PIN encryption with a strictly increasing anti-replay counter
//! - Multisig request lifecycle: create, sign, cancel, unlock
//! - Paged output reads and a background loop that broadcasts signed
//!   transactions
//! - An in-process service implementing the same API for local runs
//!
//! # Example
//!
//! ```ignore
//! use multisig_custody::client::Client;
//! use multisig_custody::auth::{Keystore, KeyScheme};
//! use multisig_custody::network::MemoryNetwork;
//! use std::sync::Arc;
//!
//! let network = Arc::new(MemoryNetwork::new());
//! let keystore = Keystore::generate(KeyScheme::Ed25519)?;
//! network.register_keystore(&keystore)?;
//!
//! let client = Client::from_keystore(&keystore, network.clone())?;
//! let ctx = client.request_context();
//! client.modify_pin(&ctx, None, "123456").await?;
//! client.verify_pin(&ctx, "123456").await?;
//! ```

pub mod auth;
pub mod cli;
pub mod client;
pub mod crypto;
pub mod ledger;
pub mod multisig;
pub mod network;
pub mod pin;

// Re-export commonly used types
pub use auth::{Credential, KeyScheme, Keystore, OauthKeystore, Signer, Verifier};
pub use client::{Client, ClientConfig, ClientError, RequestContext};
pub use crypto::KeyPair;
pub use ledger::{
    OutputPager, OutputQuery, OutputSource, PollerConfig, RetryPolicy, SubmissionLoop,
    SubmitEvent, TransactionBroadcaster,
};
pub use multisig::{
    MemberSet, MultisigAction, MultisigRequest, MultisigState, MultisigUtxo, TransactionInput,
};
pub use network::{MemoryNetwork, Transport};
pub use pin::PinCipher;
