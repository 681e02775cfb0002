//! Artifact synchronization: mirror probing, verified download, retain-N
//! cleanup, and the per-reader update loop.
//!
//! The downloader talks to mirrors through the [`fetch::Fetcher`]
//! capability; HTTP and local-file implementations are built in, and object
//! stores plug in the same way. Everything that lands on disk is published
//! with temp-name + rename, and the `timestamp.latest` marker is always
//! written last, so a reader that sees it will find the data.

pub mod cleanup;
pub mod download;
pub mod fetch;
pub mod storage;
pub mod updater;
pub mod verify;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use strata_runtime::{Reader, ReaderOptions, UpdateCallback};
use strata_types::constants::DEFAULT_UPDATE_PERIOD_MS;
use strata_types::Result;

pub use download::{DownloadReason, DownloadStats, Downloader, DownloaderOptions};
pub use updater::{CancelToken, Updater};

/// Options for [`open_reader`]: a runtime reader plus its update loop.
#[derive(Clone)]
pub struct SyncReaderOptions {
    pub task: String,
    pub destination: PathBuf,
    /// Poll period of the update loop.
    pub update_period: Duration,
    /// Comma-separated mirror base URLs; empty disables downloading.
    pub base_urls: String,
    /// Run one synchronous download before the first open.
    pub download_at_init: bool,
    pub update_callback: Option<UpdateCallback>,
    /// Pin to one artifact; also disables the update loop.
    pub timestamp: Option<u64>,
    pub preload: bool,
}

impl SyncReaderOptions {
    pub fn new(task: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        SyncReaderOptions {
            task: task.into(),
            destination: destination.into(),
            update_period: Duration::from_millis(DEFAULT_UPDATE_PERIOD_MS),
            base_urls: String::new(),
            download_at_init: false,
            update_callback: None,
            timestamp: None,
            preload: false,
        }
    }
}

/// A reader bound to its background update task.
pub struct SyncedReader {
    reader: Arc<Reader>,
    updater: Option<Updater>,
}

impl SyncedReader {
    pub fn reader(&self) -> &Arc<Reader> {
        &self.reader
    }

    /// Stop the update loop and retire the reader. Idempotent.
    pub fn delete(&self) {
        if let Some(updater) = &self.updater {
            updater.shutdown();
        }
        self.reader.delete();
    }
}

impl std::ops::Deref for SyncedReader {
    type Target = Reader;

    fn deref(&self) -> &Reader {
        &self.reader
    }
}

impl Drop for SyncedReader {
    fn drop(&mut self) {
        self.delete();
    }
}

/// Open a reader, optionally downloading first, and start its update loop
/// unless the reader is pinned to a fixed timestamp.
pub fn open_reader(options: SyncReaderOptions) -> Result<SyncedReader> {
    std::fs::create_dir_all(&options.destination)?;

    let downloader = if options.base_urls.is_empty() {
        None
    } else {
        let mut downloader_options = DownloaderOptions::new(
            format!("{}.cache", options.task),
            options.destination.clone(),
            options.base_urls.clone(),
        );
        downloader_options.retain_downloads = 1;
        Some(Arc::new(Downloader::new(&downloader_options)?))
    };

    if options.download_at_init {
        if let Some(downloader) = &downloader {
            downloader.run()?;
        }
    }

    let reader = Reader::open(&ReaderOptions {
        task: options.task.clone(),
        destination: options.destination.clone(),
        timestamp: options.timestamp,
        preload: options.preload,
        update_callback: options.update_callback.clone(),
    })?;

    // A pinned reader never follows newer artifacts.
    let updater = if options.timestamp.is_none() {
        Some(Updater::spawn(
            reader.clone(),
            downloader,
            options.update_period,
        ))
    } else {
        None
    };

    Ok(SyncedReader { reader, updater })
}
