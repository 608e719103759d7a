// Copyright (c) 2026 Light Index Developers. MIT License.
// See LICENSE for details.

//! # Light Indexer Node
//!
//! Entry point for the `light-indexer` binary. Parses CLI arguments,
//! initializes logging and metrics, runs the section indexers over the
//! chain database and serves Prometheus metrics.
//!
//! The binary supports four subcommands:
//!
//! - `run`       : index the chain until interrupted
//! - `checkpoint`: print the trusted checkpoint of a chain
//! - `roots`     : look up a stored CHT or Bloom Trie root
//! - `version`   : print build version information

mod cli;
mod logging;
mod metrics;
mod service;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use light_index::config::{BLOOM_TRIE_FREQUENCY, CHT_FREQUENCY, CHT_V1_FREQUENCY};
use light_index::crypto::hash_from_hex;
use light_index::storage::roots::{bloom_trie_root, cht_root, cht_v2_root};
use light_index::storage::{IndexDb, SharedStore};
use light_index::{CheckpointTable, IndexMode, IndexerConfig};

use cli::{Commands, LightIndexerCli, ModeArg, RootKind};
use logging::{LogFormat, DEFAULT_FILTER};
use metrics::NodeMetrics;
use service::{Geometry, IndexService};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = LightIndexerCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Checkpoint(args) => show_checkpoint(args),
        Commands::Roots(args) => show_root(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Runs the indexers and the metrics endpoint until a shutdown signal.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(DEFAULT_FILTER, LogFormat::from(args.log_format))
        .context("failed to initialize logging")?;

    let mode = match args.mode {
        ModeArg::Client => IndexMode::Client,
        ModeArg::Server => IndexMode::Server,
    };
    let config = IndexerConfig {
        mode,
        poll_interval: Duration::from_millis(args.poll_interval_ms),
    };

    tracing::info!(
        mode = ?config.mode,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        "starting light-indexer"
    );

    // --- Persistent storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = Arc::new(
        IndexDb::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?,
    );
    let store: SharedStore = db.clone();
    tracing::info!(path = %db_path.display(), "database opened");

    // --- Metrics ---
    let node_metrics =
        Arc::new(NodeMetrics::new().context("failed to create metrics registry")?);

    // --- Indexers ---
    let checkpoints = load_checkpoints(args.checkpoints.as_deref())?;
    let mut service = IndexService::new(store, Geometry::from(&config), Arc::clone(&node_metrics))
        .context("failed to set up indexers")?;
    if mode == IndexMode::Client {
        service
            .install_checkpoint(&checkpoints)
            .context("failed to install trusted checkpoint")?;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let worker = {
        let shutdown = Arc::clone(&shutdown);
        let poll_interval = config.poll_interval;
        tokio::task::spawn_blocking(move || service.run(poll_interval, &shutdown))
    };

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, finishing current section");
        }
    }

    shutdown.store(true, Ordering::Relaxed);
    worker.await.context("indexing thread panicked")?;
    db.flush().context("failed to flush database")?;
    tracing::info!("light-indexer stopped");
    Ok(())
}

/// Built-in checkpoints, overridden by entries from `path` when given.
fn load_checkpoints(path: Option<&Path>) -> Result<CheckpointTable> {
    let table = CheckpointTable::builtin();
    let Some(path) = path else {
        return Ok(table);
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read checkpoints from {}", path.display()))?;
    let extra = CheckpointTable::from_json(&json)
        .with_context(|| format!("invalid checkpoint file {}", path.display()))?;
    tracing::debug!(count = extra.len(), "loaded extra checkpoints");
    Ok(table.extend(extra))
}

/// Prints the trusted checkpoint of a chain as JSON.
fn show_checkpoint(args: cli::CheckpointArgs) -> Result<()> {
    let table = load_checkpoints(args.checkpoints.as_deref())?;

    let (genesis, checkpoint) = match (&args.network, &args.genesis) {
        (Some(network), _) => table
            .by_name(network)
            .map(|(genesis, checkpoint)| (*genesis, checkpoint))
            .ok_or_else(|| anyhow!("no trusted checkpoint for network {network}"))?,
        (None, Some(genesis)) => {
            let genesis = hash_from_hex(genesis).context("invalid genesis hash")?;
            let checkpoint = table.get(&genesis).ok_or_else(|| {
                anyhow!("no trusted checkpoint for genesis 0x{}", hex::encode(genesis))
            })?;
            (genesis, checkpoint)
        }
        (None, None) => bail!("either --network or --genesis is required"),
    };

    let mut value = serde_json::to_value(checkpoint)?;
    if let Some(object) = value.as_object_mut() {
        object.insert(
            "genesis".into(),
            serde_json::Value::String(format!("0x{}", hex::encode(genesis))),
        );
        object.insert(
            "last_indexed_block".into(),
            serde_json::Value::from(checkpoint.last_indexed_block()),
        );
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Prints a stored root record, failing when none is stored.
fn show_root(args: cli::RootsArgs) -> Result<()> {
    let head = hash_from_hex(&args.head).context("invalid section head hash")?;
    let db_path = args.data_dir.join("db");
    let db = IndexDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;

    let root = match (args.kind, args.v2) {
        (RootKind::Cht, false) => cht_root(&db, args.section, &head)?,
        (RootKind::Cht, true) => cht_v2_root(&db, args.section, &head)?,
        (RootKind::BloomTrie, false) => bloom_trie_root(&db, args.section, &head)?,
        (RootKind::BloomTrie, true) => bail!("--v2 only applies to CHT roots"),
    };

    match root {
        Some(root) => {
            println!("0x{}", hex::encode(root));
            Ok(())
        }
        None => bail!(
            "no {:?} root stored for section {} with head 0x{}",
            args.kind,
            args.section,
            hex::encode(head)
        ),
    }
}

/// Prints version information to stdout.
fn print_version() {
    println!("light-indexer {}", env!("CARGO_PKG_VERSION"));
    println!("cht sections  {} (legacy {})", CHT_FREQUENCY, CHT_V1_FREQUENCY);
    println!("bloom trie    {}", BLOOM_TRIE_FREQUENCY);
    println!("rustc         {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. A handler that cannot
/// be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
