//! Configuration for the writer builder and the reader engine.

use std::path::PathBuf;
use std::sync::Arc;

use strata_types::constants::{DEFAULT_KEY_SLOTS, DEFAULT_MAX_LOAD_FACTOR, DEFAULT_OFFSET_BITS};
use strata_types::CacheKind;

/// Invoked after every successful generation swap, with the reader already
/// serving the new mapping.
pub type UpdateCallback = Arc<dyn Fn(&crate::reader::Reader) + Send + Sync>;

/// Options for [`crate::Builder::open`].
#[derive(Clone, Debug)]
pub struct WriterOptions {
    /// Task name; becomes the artifact basename and the header cache name.
    pub task: String,
    /// Directory the artifact is published into.
    pub destination: PathBuf,
    /// Properties file controlling destination/kind/offset-bits. When
    /// `None`, one is materialized as `<destination>/<task>.properties` so
    /// readers of the artifact can discover the build parameters.
    pub settings_location: Option<PathBuf>,
    /// Key-slot count. SHOULD be at least ~2x the expected key count for the
    /// linear-probe kinds.
    pub num_slots: u64,
    /// Write `<task>.cache.timestamp.latest` after publication.
    pub generate_timestamp_file: bool,
    /// Rename the published artifact to `<task>.<timestamp>.cache`.
    pub rename_cache_file: bool,
    pub cache_kind: CacheKind,
    /// Width of the arena-offset field in each slot, [16, 38].
    pub offset_bits: u16,
    /// Entry ceiling as a fraction of slots; capped at 0.8 for linear kinds.
    pub max_load_factor: f64,
}

impl WriterOptions {
    pub fn new(task: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        WriterOptions {
            task: task.into(),
            destination: destination.into(),
            settings_location: None,
            num_slots: DEFAULT_KEY_SLOTS,
            generate_timestamp_file: true,
            rename_cache_file: true,
            cache_kind: CacheKind::default(),
            offset_bits: DEFAULT_OFFSET_BITS,
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
        }
    }
}

/// Options for [`crate::Reader::open`].
#[derive(Clone)]
pub struct ReaderOptions {
    pub task: String,
    pub destination: PathBuf,
    /// Pin to a specific artifact instead of following `timestamp.latest`.
    pub timestamp: Option<u64>,
    /// Ask the OS to page in the whole mapping up front.
    pub preload: bool,
    /// Invoked after each successful generation swap.
    pub update_callback: Option<UpdateCallback>,
}

impl ReaderOptions {
    pub fn new(task: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        ReaderOptions {
            task: task.into(),
            destination: destination.into(),
            timestamp: None,
            preload: false,
            update_callback: None,
        }
    }
}

impl std::fmt::Debug for ReaderOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderOptions")
            .field("task", &self.task)
            .field("destination", &self.destination)
            .field("timestamp", &self.timestamp)
            .field("preload", &self.preload)
            .field("update_callback", &self.update_callback.is_some())
            .finish()
    }
}
