//! # Logging
//!
//! Sets up the `tracing` subscriber for the node. Output goes to stderr so
//! that stdout carries only command output (checkpoints, roots).
//!
//! `RUST_LOG` takes precedence over the built-in directives, e.g.:
//!
//! ```text
//! RUST_LOG=light_indexer=debug,light_index=debug
//! ```

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::LogFormatArg;

/// Directives used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "light_indexer=info,light_index=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Colored, multi-field lines for a terminal.
    Pretty,
    /// One JSON object per event.
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
///
/// Section progress is logged from the indexing thread and the metrics
/// server from tokio workers, so events carry the thread name.
pub fn init_logging(default_directives: &str, format: LogFormat) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_thread_names(true)
                    .with_target(true)
                    .with_line_number(true),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_thread_names(true)
                    .with_current_span(false),
            )
            .try_init()?,
    }

    tracing::debug!(?format, "logging initialized");
    Ok(())
}
