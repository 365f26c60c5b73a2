//! Multisig custody CLI
//!
//! Keystore tooling and a local walkthrough of the multisig signing flow.

use clap::{Parser, Subcommand, ValueEnum};
use multisig_custody::auth::KeyScheme;
use multisig_custody::cli::{self, DemoConfig};
use multisig_custody::client::ClientConfig;
use multisig_custody::ledger::{PollerConfig, RetryPolicy};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "custody")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "Multisig custody client for UTXO networks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Keystore operations
    Keystore {
        #[command(subcommand)]
        action: KeystoreCommands,
    },

    /// PIN operations
    Pin {
        #[command(subcommand)]
        action: PinCommands,
    },

    /// Run the multisig flow against an in-process service
    Demo {
        /// Signatures required
        #[arg(short, long, default_value = "2")]
        threshold: u8,

        /// Number of members
        #[arg(short, long, default_value = "3")]
        members: usize,

        /// PIN set for every member
        #[arg(short, long, default_value = "123456")]
        pin: String,

        /// Amount deposited to the member set
        #[arg(short, long, default_value = "1")]
        amount: Decimal,

        /// Submission loop interval in milliseconds
        #[arg(long, default_value = "1000")]
        interval_ms: u64,

        /// Request token lifetime in seconds
        #[arg(long, default_value = "180", value_parser = clap::value_parser!(u64).range(1..=86400))]
        token_ttl: u64,
    },
}

#[derive(Subcommand)]
enum KeystoreCommands {
    /// Generate a new keystore
    New {
        /// Key scheme
        #[arg(short, long, value_enum, default_value = "ed25519")]
        scheme: SchemeArg,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show a keystore's identity and check its key
    Inspect {
        /// Keystore file
        #[arg(short, long)]
        keystore: PathBuf,
    },
}

#[derive(Subcommand)]
enum PinCommands {
    /// Check a PIN's format
    Check {
        /// PIN to check
        pin: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SchemeArg {
    Ed25519,
    Pem,
}

impl From<SchemeArg> for KeyScheme {
    fn from(arg: SchemeArg) -> Self {
        match arg {
            SchemeArg::Ed25519 => KeyScheme::Ed25519,
            SchemeArg::Pem => KeyScheme::Pem,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Keystore { action } => match action {
            KeystoreCommands::New { scheme, output } => {
                cli::cmd_keystore_new(scheme.into(), output.as_deref())?;
            }
            KeystoreCommands::Inspect { keystore } => {
                cli::cmd_keystore_inspect(&keystore)?;
            }
        },

        Commands::Pin { action } => match action {
            PinCommands::Check { pin } => {
                cli::cmd_pin_check(&pin)?;
            }
        },

        Commands::Demo {
            threshold,
            members,
            pin,
            amount,
            interval_ms,
            token_ttl,
        } => {
            let config = DemoConfig {
                members,
                threshold,
                pin,
                amount,
                client: ClientConfig {
                    token_ttl: Duration::from_secs(token_ttl),
                },
                poller: PollerConfig {
                    interval: Duration::from_millis(interval_ms),
                    page_limit: 100,
                    retry: RetryPolicy::default(),
                },
            };

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cli::cmd_demo(config))?;
        }
    }

    Ok(())
}
