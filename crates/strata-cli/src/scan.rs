//! Line-oriented key-value file scanner.
//!
//! Input files are `key=value` records separated by the ASCII record
//! separator (0x1E). A key starting with 0x01 is a vector key whose value
//! is `|`-separated. Producers may emit the same key several times within
//! one query-id run; with deduplication enabled, repeats inside a run are
//! skipped (first occurrence wins) and the seen-set resets when the
//! query-id prefix changes.

use std::collections::HashSet;
use std::path::Path;

use memmap2::Mmap;
use strata_types::{CacheError, Result};

/// Record separator between `key=value` lines.
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// First key byte marking a vector (string-list) record.
pub const VECTOR_KEY_FLAG: u8 = 0x01;

/// Aggregate statistics over scanned records.
#[derive(Debug, Default, Clone)]
pub struct ScanStats {
    pub keys_count: u64,
    pub min_key_length: usize,
    pub max_key_length: usize,
    pub min_value_length: usize,
    pub max_value_length: usize,
    pub key_space_size: u64,
    pub value_space_size: u64,
}

/// Scanner with optional per-run key deduplication.
pub struct KeyValueScanner {
    deduplicate: bool,
    unique_keys: HashSet<Vec<u8>>,
    unique_keys_without_query_id: HashSet<Vec<u8>>,
    current_query_id: Option<Vec<u8>>,
    pub stats: ScanStats,
}

impl KeyValueScanner {
    pub fn new(deduplicate: bool) -> KeyValueScanner {
        KeyValueScanner {
            deduplicate,
            unique_keys: HashSet::new(),
            unique_keys_without_query_id: HashSet::new(),
            current_query_id: None,
            stats: ScanStats {
                min_key_length: usize::MAX,
                min_value_length: usize::MAX,
                ..ScanStats::default()
            },
        }
    }

    /// Scan `path`, invoking `visit` for each surviving record.
    pub fn for_each_in_file(
        &mut self,
        path: &Path,
        mut visit: impl FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        let file = std::fs::File::open(path)?;
        // Safety: input files are produced offline and not mutated during
        // a scan.
        let mapped = unsafe { Mmap::map(&file)? };
        self.for_each(&mapped, &mut visit)
    }

    /// Scan an in-memory byte region.
    pub fn for_each(
        &mut self,
        data: &[u8],
        visit: &mut impl FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        for line in data.split(|&b| b == RECORD_SEPARATOR) {
            if line.is_empty() {
                continue;
            }
            let eq = line.iter().position(|&b| b == b'=').ok_or_else(|| {
                CacheError::ConfigInvalid(format!(
                    "invalid line '{}' missing = separator, format should be key=value",
                    String::from_utf8_lossy(line)
                ))
            })?;
            let (key, value) = (&line[..eq], &line[eq + 1..]);

            if self.deduplicate && self.is_duplicate(key) {
                continue;
            }
            self.update_stats(key, value);
            visit(key, value)?;
        }
        Ok(())
    }

    /// Query-id prefix of a key: digits before the first `.`, vector flag
    /// skipped.
    fn query_id(key: &[u8]) -> Option<&[u8]> {
        let key = key.strip_prefix(&[VECTOR_KEY_FLAG]).unwrap_or(key);
        let dot = key.iter().position(|&b| b == b'.')?;
        Some(&key[..dot])
    }

    fn is_duplicate(&mut self, key: &[u8]) -> bool {
        let Some(query_id) = Self::query_id(key) else {
            // Rare keys without a query id get their own persistent set.
            return !self.unique_keys_without_query_id.insert(key.to_vec());
        };
        if query_id.is_empty() {
            return false;
        }

        if self.current_query_id.as_deref() != Some(query_id) {
            if self.current_query_id.is_some() {
                self.unique_keys.clear();
            }
            self.current_query_id = Some(query_id.to_vec());
        }
        !self.unique_keys.insert(key.to_vec())
    }

    fn update_stats(&mut self, key: &[u8], value: &[u8]) {
        let stats = &mut self.stats;
        stats.keys_count += 1;
        stats.key_space_size += key.len() as u64;
        stats.value_space_size += value.len() as u64;
        stats.min_key_length = stats.min_key_length.min(key.len());
        stats.max_key_length = stats.max_key_length.max(key.len());
        stats.min_value_length = stats.min_value_length.min(value.len());
        stats.max_value_length = stats.max_value_length.max(value.len());
    }
}
