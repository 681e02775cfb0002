//! Reader engine: generations and the atomic swap.
//!
//! A [`Generation`] is one loaded artifact. The [`Reader`] keeps the active
//! generation in an `ArcSwapOption`; lookups pin a snapshot for one call, so
//! a concurrent update never invalidates bytes a caller is still reading.
//! The previous mapping is unmapped when its last snapshot drops.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::{info, warn};

use strata_types::constants::{HEADER_SIZE, SLOT_WIDTH};
use strata_types::{CacheError, CacheHeader, CacheKind, Result, ValueKind};
use strata_wire::pool::decode_pool;

use crate::loader::{read_latest_timestamp, timestamped_cache_path};
use crate::mapped::MappedCache;
use crate::options::{ReaderOptions, UpdateCallback};
use crate::probe::{BucketProbe, LinearProbe};
use crate::view::{CacheView, TableProbe};

/// One mapped artifact plus everything derived from its header.
///
/// Zero-copy views borrow from the generation; holding the `Arc` keeps the
/// mapping alive even after the reader swaps to a newer generation.
#[derive(Debug)]
pub struct Generation {
    mapped: MappedCache,
    kind: CacheKind,
    table: TableProbe,
    pool: Vec<(usize, usize)>,
    timestamp: u64,
}

impl Generation {
    /// Map and validate the artifact at `path`.
    pub fn load(path: &Path, timestamp: u64, preload: bool) -> Result<Generation> {
        let mapped = MappedCache::open(path, preload)?;
        let header = mapped.header();
        let kind = header.kind()?;

        let table = match kind {
            CacheKind::BucketChain => {
                TableProbe::Bucket(BucketProbe::from_rounded(header.number_of_key_slots)?)
            }
            _ => TableProbe::Linear(
                LinearProbe::new(header.offset_bits, header.number_of_key_slots)
                    .map_err(|err| CacheError::decode(err.to_string()))?,
            ),
        };

        let data = mapped.data();
        let keyspace = header.number_of_key_slots as usize * SLOT_WIDTH;
        if data.len() < keyspace {
            return Err(CacheError::decode(format!(
                "data region {} shorter than keyspace {keyspace}",
                data.len()
            )));
        }
        let body = header.size as usize - HEADER_SIZE;
        if data.len() < body {
            return Err(CacheError::decode(format!(
                "data region {} shorter than header claims ({body})",
                data.len()
            )));
        }

        let pool = if kind.is_dedup() {
            decode_pool(data)?
        } else {
            Vec::new()
        };

        Ok(Generation {
            mapped,
            kind,
            table,
            pool,
            timestamp,
        })
    }

    /// Zero-copy view over this generation's data.
    pub fn view(&self) -> CacheView<'_> {
        CacheView::new(
            self.mapped.data(),
            self.kind,
            self.table,
            &self.pool,
            self.mapped.header().number_of_entries,
        )
    }

    pub fn header(&self) -> &CacheHeader {
        self.mapped.header()
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn path(&self) -> &Path {
        self.mapped.path()
    }
}

/// Read handle bound to a task and destination folder.
///
/// Thread-safe: any number of threads may call getters while one updater
/// swaps generations. `delete` is idempotent and callable from any thread.
pub struct Reader {
    task: String,
    destination: PathBuf,
    preload: bool,
    callback: Option<UpdateCallback>,
    active: ArcSwapOption<Generation>,
    /// Millisecond timestamp of the serving generation; 0 = uninitialized.
    most_recent_ts: AtomicU64,
    deleted: AtomicBool,
}

impl Reader {
    /// Open a reader and load its first generation, from the pinned
    /// timestamp when one is configured, otherwise from the local
    /// `timestamp.latest` marker.
    pub fn open(options: &ReaderOptions) -> Result<Arc<Reader>> {
        std::fs::create_dir_all(&options.destination)?;
        let reader = Arc::new(Reader {
            task: options.task.clone(),
            destination: options.destination.clone(),
            preload: options.preload,
            callback: options.update_callback.clone(),
            active: ArcSwapOption::empty(),
            most_recent_ts: AtomicU64::new(0),
            deleted: AtomicBool::new(false),
        });

        let timestamp = match options.timestamp {
            Some(pinned) => pinned,
            None => read_latest_timestamp(&options.destination, &options.task)?,
        };
        reader.update(timestamp)?;
        Ok(reader)
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Load the artifact published under `timestamp` and swap it in. On
    /// failure the previously loaded generation keeps serving.
    pub fn update(&self, timestamp: u64) -> Result<()> {
        if self.deleted.load(Ordering::Acquire) {
            return Err(CacheError::Uninitialized);
        }
        let path = timestamped_cache_path(&self.destination, &self.task, timestamp);
        let generation = Generation::load(&path, timestamp, self.preload)?;
        info!(
            task = %self.task,
            timestamp,
            entries = generation.header().number_of_entries,
            "switching to new cache generation"
        );
        self.active.store(Some(Arc::new(generation)));
        self.most_recent_ts.store(timestamp, Ordering::Release);
        if let Some(callback) = &self.callback {
            callback(self);
        }
        Ok(())
    }

    /// Retire the reader. Further lookups and updates report
    /// `Uninitialized`. Safe to call repeatedly and from any thread.
    pub fn delete(&self) {
        if self.deleted.swap(true, Ordering::AcqRel) {
            return;
        }
        self.most_recent_ts.store(0, Ordering::Release);
        self.active.store(None);
        info!(task = %self.task, "reader retired");
    }

    pub fn is_initialized(&self) -> bool {
        self.most_recent_ts.load(Ordering::Acquire) > 0
    }

    /// Timestamp of the serving generation.
    pub fn most_recent_timestamp(&self) -> Option<u64> {
        match self.most_recent_ts.load(Ordering::Acquire) {
            0 => None,
            ts => Some(ts),
        }
    }

    /// Pin the current generation. Zero-copy callers hold the `Arc` and
    /// take views from it; the mapping stays valid while they do.
    pub fn snapshot(&self) -> Option<Arc<Generation>> {
        self.active.load_full()
    }

    fn generation(&self) -> Result<Arc<Generation>> {
        if !self.is_initialized() {
            return Err(CacheError::Uninitialized);
        }
        self.active.load_full().ok_or(CacheError::Uninitialized)
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        self.generation()?.view().contains(key)
    }

    /// Stored tag of `key`.
    pub fn get_type(&self, key: &[u8]) -> Result<ValueKind> {
        self.generation()?.view().get_type(key)
    }

    /// String value. The stored bytes must be UTF-8; use
    /// [`Reader::snapshot`] and [`CacheView::get_string`] for raw bytes.
    pub fn get_string(&self, key: &[u8]) -> Result<String> {
        let generation = self.generation()?;
        let bytes = generation.view().get_string(key)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CacheError::decode("string value is not UTF-8"))
    }

    pub fn get_bool(&self, key: &[u8]) -> Result<bool> {
        self.generation()?.view().get_bool(key)
    }

    /// Narrowing read of an `Int64` record.
    pub fn get_int(&self, key: &[u8]) -> Result<i32> {
        Ok(self.generation()?.view().get_i64(key)? as i32)
    }

    pub fn get_long(&self, key: &[u8]) -> Result<i64> {
        self.generation()?.view().get_i64(key)
    }

    pub fn get_double(&self, key: &[u8]) -> Result<f64> {
        self.generation()?.view().get_f64(key)
    }

    pub fn get_string_list(&self, key: &[u8]) -> Result<Vec<String>> {
        let generation = self.generation()?;
        let items = generation.view().get_string_list(key)?;
        items
            .into_iter()
            .map(|item| {
                String::from_utf8(item.to_vec())
                    .map_err(|_| CacheError::decode("list element is not UTF-8"))
            })
            .collect()
    }

    pub fn get_float_list(&self, key: &[u8]) -> Result<Vec<f32>> {
        self.generation()?.view().get_float_list(key)
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        if !self.deleted.load(Ordering::Acquire) && self.is_initialized() {
            warn!(task = %self.task, "reader dropped without delete");
        }
    }
}
