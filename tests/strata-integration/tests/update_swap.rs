//! Generation-swap scenarios with a live reader.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use strata_integration::publish_counted;
use strata_runtime::{Builder, Reader, ReaderOptions, WriterOptions};
use strata_sync::{open_reader, SyncReaderOptions};
use strata_types::{CacheError, CacheKind};

fn publish_single(dir: &std::path::Path, task: &str, key: &[u8], value: &[u8]) -> u64 {
    let mut options = WriterOptions::new(task, dir);
    options.num_slots = 64;
    let mut builder = Builder::open(&options).unwrap();
    builder.insert_string(key, value).unwrap();
    builder.finalize().unwrap()
}

#[test]
fn explicit_update_moves_to_new_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let ts1 = publish_counted(dir.path(), "t", CacheKind::LinearProbe, 256, 10);
    let reader = Reader::open(&ReaderOptions::new("t", dir.path())).unwrap();
    assert_eq!(reader.most_recent_timestamp(), Some(ts1));

    std::thread::sleep(Duration::from_millis(5));
    let ts2 = publish_counted(dir.path(), "t", CacheKind::LinearProbe, 256, 20);
    assert!(ts2 > ts1);
    reader.update(ts2).unwrap();
    assert_eq!(reader.most_recent_timestamp(), Some(ts2));
    assert_eq!(reader.get_string(b"key_15").unwrap(), "val_15");
    reader.delete();
}

#[test]
fn failed_update_keeps_previous_generation_serving() {
    let dir = tempfile::tempdir().unwrap();
    let ts = publish_single(dir.path(), "t", b"key", b"value");
    let reader = Reader::open(&ReaderOptions::new("t", dir.path())).unwrap();

    assert!(reader.update(ts + 12345).is_err());
    assert_eq!(reader.most_recent_timestamp(), Some(ts));
    assert_eq!(reader.get_string(b"key").unwrap(), "value");
    reader.delete();
}

#[test]
fn delete_semantics_are_total() {
    let dir = tempfile::tempdir().unwrap();
    let ts = publish_single(dir.path(), "t", b"key", b"value");
    let reader = Reader::open(&ReaderOptions::new("t", dir.path())).unwrap();
    reader.delete();

    assert!(matches!(reader.get_string(b"key"), Err(CacheError::Uninitialized)));
    assert!(matches!(reader.get_bool(b"key"), Err(CacheError::Uninitialized)));
    assert!(matches!(reader.get_long(b"key"), Err(CacheError::Uninitialized)));
    assert!(matches!(reader.get_double(b"key"), Err(CacheError::Uninitialized)));
    assert!(matches!(
        reader.get_string_list(b"key"),
        Err(CacheError::Uninitialized)
    ));
    assert!(matches!(
        reader.get_float_list(b"key"),
        Err(CacheError::Uninitialized)
    ));
    assert!(matches!(reader.get_type(b"key"), Err(CacheError::Uninitialized)));
    assert!(matches!(reader.contains(b"key"), Err(CacheError::Uninitialized)));
    assert!(matches!(reader.update(ts), Err(CacheError::Uninitialized)));
    assert_eq!(reader.most_recent_timestamp(), None);

    reader.delete(); // still idempotent
}

#[test]
fn live_swap_observed_within_one_period() {
    let dir = tempfile::tempdir().unwrap();
    publish_single(dir.path(), "swap", b"key_333", b"val_333");

    let swaps = Arc::new(AtomicU64::new(0));
    let counted = swaps.clone();
    let mut options = SyncReaderOptions::new("swap", dir.path());
    options.update_period = Duration::from_millis(25);
    options.update_callback = Some(Arc::new(move |_: &Reader| {
        counted.fetch_add(1, Ordering::SeqCst);
    }));
    let reader = open_reader(options).unwrap();
    assert_eq!(reader.get_string(b"key_333").unwrap(), "val_333");

    // An external agent publishes a second artifact and moves the marker.
    std::thread::sleep(Duration::from_millis(5));
    publish_single(dir.path(), "swap", b"key_333", b"val_331");

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if reader.get_string(b"key_333").unwrap() == "val_331" {
            break;
        }
        assert!(Instant::now() < deadline, "swap not observed within the period");
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(swaps.load(Ordering::SeqCst) >= 2);
    reader.delete();
}

#[test]
fn snapshot_survives_generation_retirement() {
    let dir = tempfile::tempdir().unwrap();
    publish_single(dir.path(), "pin", b"k", b"old");
    let reader = Reader::open(&ReaderOptions::new("pin", dir.path())).unwrap();
    let pinned = reader.snapshot().unwrap();

    std::thread::sleep(Duration::from_millis(5));
    let ts2 = publish_single(dir.path(), "pin", b"k", b"new");
    reader.update(ts2).unwrap();

    // In-flight consumers of the old generation keep their bytes.
    assert_eq!(pinned.view().get_string(b"k").unwrap(), b"old");
    assert_eq!(reader.get_string(b"k").unwrap(), "new");
    drop(pinned);
    reader.delete();
}
