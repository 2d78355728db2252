//! # Brutal Digest
//!
//! Harvests the brutalist.report tech listing, screenshots articles from
//! selected sources and serves the grouped result.
//!
//! ## Architecture
//!
//! - **models**: Articles, generations, grouped views
//! - **browser**: Headless browser abstraction over Chromium
//! - **harvest**: Aggregator page fetch and article extraction
//! - **artifacts**: Screenshot storage backends and tag purge
//! - **enrich**: Batched screenshot capture
//! - **storage**: Filesystem data layout and the article store
//! - **pipeline**: Run orchestration and periodic scheduling
//! - **read**: Grouped read path with last-known-good fallback
//! - **api**: REST API endpoints
//! - **config**: Configuration loading and validation

pub mod api;
pub mod artifacts;
pub mod browser;
pub mod config;
pub mod enrich;
pub mod harvest;
pub mod models;
pub mod pipeline;
pub mod read;
pub mod storage;

pub use models::*;

use std::time::Duration;

/// Parse a human-friendly duration string (e.g., "6h", "30m", "90s").
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('h') {
        (n, 3600)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1)
    } else {
        // Default to seconds
        (s, 1)
    };

    let num: u64 = num_str.parse().ok()?;
    Some(Duration::from_secs(num * multiplier))
}
