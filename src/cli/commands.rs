//! CLI commands
//!
//! Keystore management, PIN checks and a local multisig walkthrough.

use log::info;
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::auth::{Credential, KeyScheme, Keystore, Signer, TokenVerifier};
use crate::client::{Client, ClientConfig};
use crate::ledger::{
    find_output, OutputPager, OutputQuery, PollerConfig, SubmissionLoop, SubmitEvent,
};
use crate::multisig::{
    normalize_amount, MemberSet, MultisigAction, MultisigUtxo, SignProgress, TransactionHash,
    TransactionInput, UtxoState,
};
use crate::network::MemoryNetwork;
use crate::pin::validate_pin_pattern;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Generate a keystore and write it to `output`, or print it
pub fn cmd_keystore_new(scheme: KeyScheme, output: Option<&Path>) -> CliResult<()> {
    let keystore = Keystore::generate(scheme)?;

    match output {
        Some(path) => {
            keystore.save(path)?;
            println!("🔐 New {} keystore created!", scheme);
            println!("   🆔 Client ID: {}", keystore.client_id);
            println!("   📁 File: {:?}", path);
            println!("\n   ⚠️  The file holds the private key and PIN token. Keep it private.");
        }
        None => {
            println!("{}", serde_json::to_string_pretty(&keystore)?);
        }
    }

    Ok(())
}

/// Show what a keystore contains and check that its key signs
pub fn cmd_keystore_inspect(path: &Path) -> CliResult<()> {
    let keystore = Keystore::load(path)?;
    let credential = Credential::from_keystore(&keystore)?;

    println!("🔎 Keystore {:?}", path);
    println!("   ├─ Scheme: {}", credential.scheme());
    println!("   ├─ Client ID: {}", keystore.client_id);
    println!("   ├─ Session ID: {}", keystore.session_id);
    println!(
        "   ├─ Public key: {}",
        credential.public_key().unwrap_or_default()
    );
    println!(
        "   ├─ Scope: {}",
        if keystore.scope.is_empty() { "-" } else { &keystore.scope }
    );
    println!(
        "   ├─ PIN token: {}",
        if keystore.pin_token.is_empty() { "missing" } else { "present" }
    );

    let probe = b"GET/keystore/probe";
    let token = credential.sign(probe)?;
    let verified = credential
        .token_verifier()
        .map(|verifier: TokenVerifier| verifier.verify_token(probe, token.as_str()).is_ok())
        .unwrap_or(false);
    println!(
        "   └─ Signing check: {}",
        if verified { "✅ ok" } else { "❌ failed" }
    );

    Ok(())
}

/// Check a PIN against the six-digit format
pub fn cmd_pin_check(pin: &str) -> CliResult<()> {
    match validate_pin_pattern(pin) {
        Ok(()) => {
            println!("✅ PIN format is valid");
            Ok(())
        }
        Err(e) => {
            println!("❌ {}", e);
            Err(e.into())
        }
    }
}

/// Settings for [`cmd_demo`]
#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub members: usize,
    pub threshold: u8,
    pub pin: String,
    pub amount: Decimal,
    pub client: ClientConfig,
    pub poller: PollerConfig,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            members: 3,
            threshold: 2,
            pin: "123456".to_string(),
            amount: Decimal::ONE,
            client: ClientConfig::default(),
            poller: PollerConfig::default(),
        }
    }
}

async fn demo_party(
    network: &Arc<MemoryNetwork>,
    scheme: KeyScheme,
    config: &DemoConfig,
) -> CliResult<Arc<Client>> {
    let keystore = Keystore::generate(scheme)?;
    network.register_keystore(&keystore)?;
    let client = Client::from_keystore(&keystore, network.clone())?.with_config(config.client.clone());

    let ctx = client.request_context();
    client.modify_pin(&ctx, None, &config.pin).await?;
    client.verify_pin(&ctx, &config.pin).await?;
    Ok(Arc::new(client))
}

/// Half the output, or all of it when half rounds to zero
fn payout_amount(utxo: &MultisigUtxo) -> Decimal {
    let half = normalize_amount(utxo.amount / Decimal::TWO);
    if half.is_zero() {
        utxo.amount
    } else {
        half
    }
}

/// Run the full multisig flow against an in-process service
pub async fn cmd_demo(config: DemoConfig) -> CliResult<()> {
    let network = Arc::new(MemoryNetwork::new());

    println!(
        "🏦 Setting up {} members, threshold {}",
        config.members, config.threshold
    );
    let mut parties = Vec::with_capacity(config.members);
    for i in 0..config.members {
        let scheme = if i % 2 == 0 {
            KeyScheme::Ed25519
        } else {
            KeyScheme::Pem
        };
        let party = demo_party(&network, scheme, &config).await?;
        println!(
            "   └─ {} ({})",
            party.identity_id().unwrap_or("-"),
            party.credential().scheme()
        );
        parties.push(party);
    }

    let ids: Vec<String> = parties
        .iter()
        .filter_map(|p| p.identity_id().map(str::to_string))
        .collect();
    let members = MemberSet::new(ids, config.threshold)?;
    let query = OutputQuery::new(members.clone());
    let owner = parties[0].clone();
    let owner_id = owner.identity_id().unwrap_or_default().to_string();

    network.deposit(&members, config.amount);

    let cancel = CancellationToken::new();
    let (poller, mut events) =
        SubmissionLoop::new(owner.clone(), query.clone(), config.poller.clone()).spawn(cancel.clone());

    let outputs = OutputPager::new(owner.as_ref(), query.clone())
        .collect_all()
        .await?;
    let utxo = outputs
        .into_iter()
        .find(|u| u.state == UtxoState::Unspent)
        .ok_or("no unspent output for the member set")?;
    println!(
        "\n💰 Output {} holds {} ({})",
        utxo.utxo_id,
        utxo.amount,
        members.description()
    );

    let amount = payout_amount(&utxo);
    let raw = TransactionInput::new("demo payout")
        .add_input(&utxo)
        .add_output(vec![owner_id.clone()], 1, amount)
        .build()?
        .dump_payload()?;

    let owner_ctx = owner.request_context();

    if config.threshold > 1 {
        // One signature, then give up on it and release the output
        let request = owner
            .create_multisig(&owner_ctx, MultisigAction::Sign, &raw)
            .await?;
        owner
            .sign_multisig(&owner_ctx, &request.request_id, &config.pin)
            .await?;
        println!("\n✍️  {} signed request {}", owner_id, request.request_id);

        let last = &parties[parties.len() - 1];
        let last_ctx = last.request_context();
        let unlock = last
            .create_multisig(&last_ctx, MultisigAction::Unlock, &raw)
            .await?;
        let unlocked = last
            .unlock_multisig(&last_ctx, &unlock.request_id, &config.pin)
            .await?;
        println!("🔓 Request {} is {}", unlocked.request_id, unlocked.state);
    }

    let request = owner
        .create_multisig(&owner_ctx, MultisigAction::Sign, &raw)
        .await?;
    println!(
        "\n📝 Sign request {} ({} signers so far)",
        request.request_id,
        request.signers.len()
    );

    for party in &parties {
        let ctx = party.request_context();
        let snapshot = party
            .sign_multisig(&ctx, &request.request_id, &config.pin)
            .await?;
        println!("   ├─ {} signed", party.identity_id().unwrap_or("-"));
        if snapshot.progress() == SignProgress::Complete {
            println!("   └─ Threshold met");
            break;
        }
    }

    println!("\n⏳ Waiting for the submission loop...");
    let hash = loop {
        let event = tokio::time::timeout(Duration::from_secs(30), events.recv())
            .await
            .map_err(|_| "timed out waiting for submission")?
            .ok_or("submission loop ended early")?;
        match event {
            SubmitEvent::Submitted { utxo_id, hash } => {
                println!("   └─ 📤 Output {} submitted as {}", utxo_id, hash);
                break hash;
            }
            SubmitEvent::Failed { utxo_id, error } => {
                println!("   ├─ ⚠️  Output {} failed: {}", utxo_id, error)
            }
            SubmitEvent::ScanFailed { error } => println!("   ├─ ⚠️  Scan failed: {}", error),
        }
    };

    let receiver = OutputQuery::new(MemberSet::new(vec![owner_id.clone()], 1)?);
    let created = find_output(
        owner.as_ref(),
        &receiver,
        &hash.parse::<TransactionHash>()?,
        10,
        config.poller.interval,
    )
    .await?;
    match created {
        Some(output) => println!("\n✅ {} received {}", owner_id, output.amount),
        None => println!("\n⚠️  Payout output not visible yet"),
    }

    cancel.cancel();
    poller.await?;
    info!("Demo finished after {} broadcasts", network.broadcast_count());

    Ok(())
}
