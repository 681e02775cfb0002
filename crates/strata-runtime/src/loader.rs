//! Artifact path resolution.
//!
//! Published artifacts live as `<task>.<timestamp_ms>.cache` next to a
//! `<task>.cache.timestamp.latest` readiness marker. Readers resolve the
//! marker, never directory listings: the marker is written last by both the
//! writer and the downloader.

use std::path::{Path, PathBuf};

use strata_types::constants::{CACHE_FILE_SUFFIX, LATEST_TIMESTAMP_SUFFIX};
use strata_types::{CacheError, Result};

/// `<destination>/<task>.<timestamp>.cache`
pub fn timestamped_cache_path(destination: &Path, task: &str, timestamp: u64) -> PathBuf {
    destination.join(format!("{task}.{timestamp}{CACHE_FILE_SUFFIX}"))
}

/// `<destination>/<task>.cache`
pub fn untimestamped_cache_path(destination: &Path, task: &str) -> PathBuf {
    destination.join(format!("{task}{CACHE_FILE_SUFFIX}"))
}

/// `<destination>/<task>.cache.timestamp.latest`
pub fn latest_timestamp_path(destination: &Path, task: &str) -> PathBuf {
    destination.join(format!("{task}{CACHE_FILE_SUFFIX}{LATEST_TIMESTAMP_SUFFIX}"))
}

/// Read and parse the readiness marker.
pub fn read_latest_timestamp(destination: &Path, task: &str) -> Result<u64> {
    let path = latest_timestamp_path(destination, task);
    let content = std::fs::read_to_string(&path)?;
    content.trim().parse().map_err(|err| {
        CacheError::decode(format!(
            "cannot parse timestamp from {}: {err}",
            path.display()
        ))
    })
}
