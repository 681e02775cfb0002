//! Retain-N garbage collection of downloaded artifact groups.
//!
//! Files carry their timestamp in the name, in one of two shapes:
//! `<basename>.<ts>.<ext>` sidecars and `<task>.<ts>.cache` artifacts.
//! Cleanup groups everything by timestamp, keeps the newest N groups, and
//! separately reaps stray temp files. Individual removal failures are
//! logged and skipped; a sweep never aborts the update loop.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::storage::Storage;

/// Temp-file name fragments reaped on every sweep.
const TEMP_PATTERNS: [&str; 2] = [".latest.tmp", ".http_download_tmp"];

fn basename_task(basename: &str) -> Option<&str> {
    let task = basename.split('.').next().unwrap_or(basename);
    let ext = &basename[task.len()..];
    // Only the artifact naming schemes flip the extension behind the
    // timestamp; other basenames have no second shape.
    matches!(ext, ".cache" | ".mmap").then_some(task)
}

/// Timestamp present in a filename of either shape, if any.
fn timestamp_of(name: &str) -> Option<u64> {
    let mut tokens = name.split('.');
    let _first = tokens.next()?;
    let second = tokens.next()?;
    if let Ok(ts) = second.parse() {
        return Some(ts);
    }
    tokens.next()?.parse().ok()
}

/// All timestamps present in `dir` for `basename`, ascending.
pub fn sorted_timestamps(storage: &dyn Storage, dir: &Path, basename: &str) -> Vec<u64> {
    let prefix = format!("{basename}.");
    let task_prefix = basename_task(basename).map(|task| format!("{task}."));
    let matcher = move |name: &str| {
        name.starts_with(&prefix)
            || task_prefix
                .as_ref()
                .is_some_and(|p| name.starts_with(p.as_str()))
    };

    let paths = match storage.list(dir, &matcher) {
        Ok(paths) => paths,
        Err(err) => {
            warn!(dir = %dir.display(), %err, "listing for cleanup failed");
            return Vec::new();
        }
    };

    let mut timestamps = BTreeSet::new();
    for path in paths {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if let Some(ts) = timestamp_of(name) {
                timestamps.insert(ts);
            }
        }
    }
    timestamps.into_iter().collect()
}

/// Every file belonging to the `timestamp` group.
pub fn fetched_files(
    storage: &dyn Storage,
    dir: &Path,
    basename: &str,
    timestamp: u64,
) -> Vec<PathBuf> {
    let sidecar_prefix = format!("{basename}.{timestamp}");
    let artifact_prefix = basename_task(basename).map(|task| {
        let ext = &basename[task.len() + 1..];
        format!("{task}.{timestamp}.{ext}")
    });
    let matcher = move |name: &str| {
        name.starts_with(&sidecar_prefix)
            || artifact_prefix
                .as_ref()
                .is_some_and(|p| name.starts_with(p.as_str()))
    };
    storage.list(dir, &matcher).unwrap_or_default()
}

/// Stray temp files left by crashed or restarted runs.
pub fn temp_files(storage: &dyn Storage, dir: &Path, basename: &str) -> Vec<PathBuf> {
    let prefix = format!("{basename}.");
    let matcher = move |name: &str| {
        name.starts_with(&prefix) && TEMP_PATTERNS.iter().any(|pattern| name.contains(pattern))
    };
    storage.list(dir, &matcher).unwrap_or_default()
}

fn remove_all(storage: &dyn Storage, paths: &[PathBuf]) {
    for path in paths {
        debug!(path = %path.display(), "removing");
        if let Err(err) = storage.remove(path) {
            warn!(path = %path.display(), %err, "error removing file");
        }
    }
}

/// Keep the newest `retain` timestamp groups, drop the rest, reap temp
/// files.
pub fn remove_old_files(storage: &dyn Storage, dir: &Path, basename: &str, retain: usize) {
    remove_all(storage, &temp_files(storage, dir, basename));

    let timestamps = sorted_timestamps(storage, dir, basename);
    debug!(count = timestamps.len(), ?timestamps, "timestamps on disk");
    if timestamps.len() <= retain {
        debug!("no old files to remove");
        return;
    }

    for &timestamp in &timestamps[..timestamps.len() - retain] {
        let group = fetched_files(storage, dir, basename, timestamp);
        info!(timestamp, files = group.len(), "removing old download group");
        remove_all(storage, &group);
    }
}

/// After a failed download, drop temp files and whatever part of the
/// attempted group made it to disk.
pub fn remove_after_error(
    storage: &dyn Storage,
    dir: &Path,
    basename: &str,
    timestamp: Option<u64>,
) {
    remove_all(storage, &temp_files(storage, dir, basename));

    let Some(timestamp) = timestamp else {
        debug!("nothing to clean, no valid timestamp for the failed attempt");
        return;
    };
    let group = fetched_files(storage, dir, basename, timestamp);
    info!(timestamp, files = group.len(), "removing files of failed download");
    remove_all(storage, &group);
}
