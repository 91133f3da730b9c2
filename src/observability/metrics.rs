//! Prometheus-style counters for the three flows.
//!
//! Recording is always on; an exporter is only installed when
//! `HARVEST_METRICS_PORT` is set, otherwise the macros are no-ops.

use std::net::SocketAddr;
use tracing::{info, warn};

use crate::constants::ENV_METRICS_PORT;

/// Install the Prometheus HTTP listener if a port is configured.
pub fn init_metrics() {
    let port: u16 = match std::env::var(ENV_METRICS_PORT).ok().and_then(|s| s.parse().ok()) {
        Some(port) => port,
        None => return,
    };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => info!("Prometheus exporter listening on http://{}/metrics", addr),
        Err(e) => warn!("Prometheus exporter install failed: {}", e),
    }
}

// ============================================================================
// Harvest loop
// ============================================================================

pub mod harvest {
    pub fn page_fetched(candidates: usize) {
        ::metrics::counter!("harvest_pages_total").increment(1);
        ::metrics::counter!("harvest_candidates_total").increment(candidates as u64);
    }

    pub fn skipped_seen() {
        ::metrics::counter!("harvest_skipped_seen_total").increment(1);
    }

    pub fn submitted() {
        ::metrics::counter!("harvest_submitted_total").increment(1);
    }

    pub fn download_success(secs: f64, bytes: u64) {
        ::metrics::counter!("harvest_downloads_success_total").increment(1);
        ::metrics::histogram!("harvest_download_duration_seconds").record(secs);
        ::metrics::counter!("harvest_downloaded_bytes_total").increment(bytes);
    }

    pub fn download_failure(kind: &'static str) {
        ::metrics::counter!("harvest_downloads_failed_total", "kind" => kind).increment(1);
    }

    pub fn history_error(op: &'static str) {
        ::metrics::counter!("harvest_history_errors_total", "op" => op).increment(1);
    }

    pub fn listing_failed() {
        ::metrics::counter!("harvest_listing_failures_total").increment(1);
    }
}

// ============================================================================
// Profile sync
// ============================================================================

pub mod profile_sync {
    pub fn post_saved() {
        ::metrics::counter!("profile_sync_posts_saved_total").increment(1);
    }

    pub fn composite_created() {
        ::metrics::counter!("profile_sync_composites_total").increment(1);
    }

    pub fn post_failed() {
        ::metrics::counter!("profile_sync_post_failures_total").increment(1);
    }

    pub fn rate_limited() {
        ::metrics::counter!("profile_sync_rate_limited_total").increment(1);
    }
}

// ============================================================================
// Repost
// ============================================================================

pub mod repost {
    pub fn posted() {
        ::metrics::counter!("repost_posted_total").increment(1);
    }

    pub fn archived() {
        ::metrics::counter!("repost_archived_total").increment(1);
    }

    pub fn failed() {
        ::metrics::counter!("repost_failures_total").increment(1);
    }

    pub fn reply_failed() {
        ::metrics::counter!("repost_reply_failures_total").increment(1);
    }
}
