//! # Prometheus Metrics
//!
//! Exposes indexing progress. Scraped by Prometheus at the `/metrics` HTTP
//! endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers. Per-indexer
//! series carry an `indexer` label (`cht`, `bloombits`, `bloomtrie`).

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Sections committed since startup.
    pub sections_committed_total: IntCounterVec,
    /// Headers fed to a backend as part of a committed section.
    pub headers_processed_total: IntCounterVec,
    /// Recoverable indexing failures.
    pub index_errors_total: IntCounterVec,
    /// Sections stored, including those from checkpoints.
    pub stored_sections: IntGaugeVec,
    /// Number of the chain head last seen.
    pub chain_head: IntGauge,
    /// Cumulative Bloom Trie leaf bytes after compression.
    pub bloom_trie_compressed_bytes: IntGauge,
    /// Cumulative Bloom Trie leaf bytes before compression.
    pub bloom_trie_decompressed_bytes: IntGauge,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("light".into()), None)?;

        let sections_committed_total = IntCounterVec::new(
            Opts::new("sections_committed_total", "Sections committed since startup"),
            &["indexer"],
        )?;
        registry.register(Box::new(sections_committed_total.clone()))?;

        let headers_processed_total = IntCounterVec::new(
            Opts::new(
                "headers_processed_total",
                "Headers folded into committed sections",
            ),
            &["indexer"],
        )?;
        registry.register(Box::new(headers_processed_total.clone()))?;

        let index_errors_total = IntCounterVec::new(
            Opts::new("index_errors_total", "Recoverable indexing failures"),
            &["indexer"],
        )?;
        registry.register(Box::new(index_errors_total.clone()))?;

        let stored_sections = IntGaugeVec::new(
            Opts::new("stored_sections", "Sections stored per indexer"),
            &["indexer"],
        )?;
        registry.register(Box::new(stored_sections.clone()))?;

        let chain_head = IntGauge::new("chain_head", "Number of the latest known header")?;
        registry.register(Box::new(chain_head.clone()))?;

        let bloom_trie_compressed_bytes = IntGauge::new(
            "bloom_trie_compressed_bytes",
            "Cumulative compressed size of Bloom Trie leaves",
        )?;
        registry.register(Box::new(bloom_trie_compressed_bytes.clone()))?;

        let bloom_trie_decompressed_bytes = IntGauge::new(
            "bloom_trie_decompressed_bytes",
            "Cumulative raw size of Bloom Trie leaves",
        )?;
        registry.register(Box::new(bloom_trie_decompressed_bytes.clone()))?;

        Ok(Self {
            registry,
            sections_committed_total,
            headers_processed_total,
            index_errors_total,
            stored_sections,
            chain_head,
            bloom_trie_compressed_bytes,
            bloom_trie_decompressed_bytes,
        })
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
