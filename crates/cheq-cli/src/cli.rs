use std::path::PathBuf;

use cheq_types::KeyFormat;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cheq-indexer",
    about = "Cheq indexer: projects payment-instrument events into a queryable store",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Store log path (overrides the config file)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Instrument key format for a new store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum KeyFormatArg {
    /// `0x7`
    Hex,
    /// `7`
    Decimal,
}

impl From<KeyFormatArg> for KeyFormat {
    fn from(arg: KeyFormatArg) -> Self {
        match arg {
            KeyFormatArg::Hex => KeyFormat::Hex,
            KeyFormatArg::Decimal => KeyFormat::Decimal,
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Project every event in a JSON-lines file
    Ingest(IngestArgs),
    /// Tail a JSON-lines file and project events as they are appended
    Follow(FollowArgs),
    /// Look up projected entities
    Show(ShowArgs),
    /// Show an instrument's net escrow
    Balance(BalanceArgs),
    /// Audit the store for counter, ownership, escrow and handshake drift
    Check(CheckArgs),
    /// Print the effective configuration
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct IngestArgs {
    /// Event file, or `-` for stdin
    pub input: PathBuf,
    /// Instrument key format; must match an existing store
    #[arg(long)]
    pub key_format: Option<KeyFormatArg>,
    /// Rewrite the store log as a single snapshot afterwards
    #[arg(long)]
    pub compact: bool,
}

#[derive(Args)]
pub struct FollowArgs {
    pub input: PathBuf,
    /// Poll interval in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,
    #[arg(long)]
    pub key_format: Option<KeyFormatArg>,
}

#[derive(Args)]
pub struct ShowArgs {
    #[command(subcommand)]
    pub target: ShowTarget,
}

#[derive(Subcommand)]
pub enum ShowTarget {
    /// An account by address
    Account { address: String },
    /// An instrument by on-chain id
    Instrument { id: String },
    /// The instruments an account holds in one role
    Holdings {
        address: String,
        #[arg(long, default_value = "owned")]
        role: String,
    },
    /// An instrument's escrow and transfer journal
    Journal { id: String },
    /// The handshake between a user and an auditor
    Handshake { user: String, auditor: String },
    /// Token metadata for a currency contract
    Currency { address: String },
    /// The stream cursor
    Cursor,
}

#[derive(Args)]
pub struct BalanceArgs {
    pub id: String,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Exit with an error when violations are found
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Write the effective configuration to the config path
    #[arg(long)]
    pub write: bool,
}
