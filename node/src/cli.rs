//! # CLI Interface
//!
//! Defines the command-line argument structure for `light-indexer` using
//! `clap` derive. Supports four subcommands: `run`, `checkpoint`, `roots`,
//! and `version`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Helper-trie indexing node.
///
/// Watches a header chain database and builds Canonical Hash Trie and
/// Bloom Trie sections once they are confirmed, publishing their roots
/// for light clients.
#[derive(Parser, Debug)]
#[command(
    name = "light-indexer",
    about = "CHT and Bloom Trie indexer for light clients",
    version,
    propagate_version = true
)]
pub struct LightIndexerCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the indexers against the chain database until interrupted.
    Run(RunArgs),
    /// Print the trusted checkpoint of a chain.
    Checkpoint(CheckpointArgs),
    /// Look up stored CHT and Bloom Trie roots.
    Roots(RootsArgs),
    /// Print version information and exit.
    Version,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    /// Light client geometry: 32768-block sections, deep confirmations.
    Client,
    /// Serving node geometry: 4096-block CHT sections, shallow confirmations.
    Server,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory holding the chain and index database.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "LIGHT_DATA_DIR", default_value = "./light-data")]
    pub data_dir: PathBuf,

    /// Section geometry to index with.
    #[arg(long, value_enum, env = "LIGHT_MODE", default_value_t = ModeArg::Server)]
    pub mode: ModeArg,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "LIGHT_METRICS_PORT", default_value_t = 9752)]
    pub metrics_port: u16,

    /// Milliseconds between polls of the chain head.
    #[arg(long, env = "LIGHT_POLL_INTERVAL_MS", default_value_t = 100)]
    pub poll_interval_ms: u64,

    /// Extra trusted checkpoints (JSON), merged over the built-in ones.
    ///
    /// In client mode the checkpoint of the indexed chain, if any, is
    /// installed before indexing starts.
    #[arg(long, env = "LIGHT_CHECKPOINTS")]
    pub checkpoints: Option<PathBuf>,

    #[arg(long, value_enum, env = "LIGHT_LOG_FORMAT", default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,
}

/// Arguments for the `checkpoint` subcommand.
#[derive(Parser, Debug)]
pub struct CheckpointArgs {
    /// Chain name, e.g. `mainnet` or `ropsten`.
    #[arg(long, conflicts_with = "genesis", required_unless_present = "genesis")]
    pub network: Option<String>,

    /// Genesis hash (hex, optional `0x`).
    #[arg(long)]
    pub genesis: Option<String>,

    /// Extra trusted checkpoints (JSON), merged over the built-in ones.
    #[arg(long, env = "LIGHT_CHECKPOINTS")]
    pub checkpoints: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    Cht,
    BloomTrie,
}

/// Arguments for the `roots` subcommand.
#[derive(Parser, Debug)]
pub struct RootsArgs {
    #[arg(long, short = 'd', env = "LIGHT_DATA_DIR", default_value = "./light-data")]
    pub data_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = RootKind::Cht)]
    pub kind: RootKind,

    /// Section index.
    #[arg(long)]
    pub section: u64,

    /// Hash of the section's last header (hex, optional `0x`).
    #[arg(long)]
    pub head: String,

    /// Read a current-size (32768) CHT section through the legacy
    /// (4096) record ending on the same block.
    #[arg(long)]
    pub v2: bool,
}
