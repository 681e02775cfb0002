//! Shared helpers for the strata end-to-end tests.

use std::path::Path;

use strata_runtime::{Builder, WriterOptions};
use strata_types::CacheKind;

/// Build and publish an artifact with `count` `key_i -> val_i` records.
/// Returns the publication timestamp.
pub fn publish_counted(
    dir: &Path,
    task: &str,
    kind: CacheKind,
    slots: u64,
    count: usize,
) -> u64 {
    let mut options = WriterOptions::new(task, dir);
    options.cache_kind = kind;
    options.num_slots = slots;
    let mut builder = Builder::open(&options).unwrap();
    for i in 0..count {
        let key = format!("key_{i}");
        let value = format!("val_{i}");
        builder
            .insert_string(key.as_bytes(), value.as_bytes())
            .unwrap();
    }
    builder.finalize().unwrap()
}
