//! Build-then-read scenarios across cache kinds and value types.

use strata_integration::publish_counted;
use strata_runtime::{Builder, Reader, ReaderOptions, WriterOptions};
use strata_types::{CacheError, CacheKind, ValueKind};

fn open(dir: &std::path::Path, task: &str) -> std::sync::Arc<Reader> {
    Reader::open(&ReaderOptions::new(task, dir)).unwrap()
}

#[test]
fn thousand_records_linear_probe() {
    let dir = tempfile::tempdir().unwrap();
    publish_counted(dir.path(), "linear", CacheKind::LinearProbe, 4096, 1000);

    let reader = open(dir.path(), "linear");
    assert_eq!(reader.get_string(b"key_1").unwrap(), "val_1");
    for i in (0..1000).step_by(97) {
        let key = format!("key_{i}");
        assert_eq!(reader.get_string(key.as_bytes()).unwrap(), format!("val_{i}"));
        assert!(reader.contains(key.as_bytes()).unwrap());
    }
    assert!(matches!(
        reader.get_string(b"key_1000"),
        Err(CacheError::NotFound)
    ));
    reader.delete();
}

#[test]
fn thousand_records_bucket_chain() {
    let dir = tempfile::tempdir().unwrap();
    publish_counted(dir.path(), "chained", CacheKind::BucketChain, 4096, 1000);

    let reader = open(dir.path(), "chained");
    assert_eq!(reader.get_string(b"key_1").unwrap(), "val_1");
    for i in (0..1000).step_by(89) {
        let key = format!("key_{i}");
        assert_eq!(reader.get_string(key.as_bytes()).unwrap(), format!("val_{i}"));
    }
    assert!(!reader.contains(b"nope").unwrap());
    reader.delete();
}

#[test]
fn typed_fixture_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = WriterOptions::new("fast_cache", dir.path());
    options.num_slots = 256;
    let mut builder = Builder::open(&options).unwrap();

    builder.insert_string(b"267.bar", b"bar").unwrap();
    builder.insert_bool(b"992.yyy", true).unwrap();
    builder.insert_f64(b"1401.xxx", 123.456).unwrap();
    builder.insert_i64(b"1690.xxx", 1234567890).unwrap();
    builder
        .insert_string_list(b"999.vec1", &[b"slot0".as_slice(), b"slot1", b"slot2"])
        .unwrap();
    builder
        .insert_float_list(b"1909.xxx", &[1.0, 2.5, -3.75])
        .unwrap();
    builder.finalize().unwrap();

    let reader = open(dir.path(), "fast_cache");
    assert_eq!(reader.get_string(b"267.bar").unwrap(), "bar");
    assert!(reader.get_bool(b"992.yyy").unwrap());
    assert_eq!(reader.get_double(b"1401.xxx").unwrap(), 123.456);
    assert_eq!(reader.get_long(b"1690.xxx").unwrap(), 1234567890);
    assert_eq!(
        reader.get_string_list(b"999.vec1").unwrap(),
        vec!["slot0", "slot1", "slot2"]
    );
    assert_eq!(reader.get_float_list(b"1909.xxx").unwrap(), vec![1.0, 2.5, -3.75]);
    assert_eq!(reader.get_type(b"1909.xxx").unwrap(), ValueKind::FloatList);
    assert_eq!(reader.get_type(b"1909.xxx").unwrap().as_str(), "FloatList");

    // Strict type policing: every cross-tag combination is NotFound.
    assert!(matches!(reader.get_bool(b"267.bar"), Err(CacheError::NotFound)));
    assert!(matches!(reader.get_long(b"1401.xxx"), Err(CacheError::NotFound)));
    assert!(matches!(reader.get_double(b"1690.xxx"), Err(CacheError::NotFound)));
    assert!(matches!(
        reader.get_string_list(b"267.bar"),
        Err(CacheError::NotFound)
    ));
    assert!(matches!(
        reader.get_float_list(b"999.vec1"),
        Err(CacheError::NotFound)
    ));
    reader.delete();
}

#[test]
fn textual_insert_api_parses_scalars() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = WriterOptions::new("typed_text", dir.path());
    options.num_slots = 64;
    let mut builder = Builder::open(&options).unwrap();

    builder.insert(b"b", b"true", ValueKind::Bool as u8).unwrap();
    builder.insert(b"i", b"1234567890", ValueKind::Int64 as u8).unwrap();
    builder.insert(b"d", b"123.456", ValueKind::Double as u8).unwrap();
    builder.insert(b"f", b"1.5:2.5", ValueKind::FloatList as u8).unwrap();
    builder.insert(b"v", b"beta|alpha", ValueKind::StringList as u8).unwrap();
    builder.finalize().unwrap();

    let reader = open(dir.path(), "typed_text");
    assert!(reader.get_bool(b"b").unwrap());
    assert_eq!(reader.get_long(b"i").unwrap(), 1234567890);
    assert_eq!(reader.get_double(b"d").unwrap(), 123.456);
    assert_eq!(reader.get_float_list(b"f").unwrap(), vec![1.5, 2.5]);
    // `|`-separated list input is stored sorted.
    assert_eq!(reader.get_string_list(b"v").unwrap(), vec!["alpha", "beta"]);
    reader.delete();
}

#[test]
fn duplicate_pool_serves_shared_values() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = WriterOptions::new("dedup", dir.path());
    options.cache_kind = CacheKind::LinearProbeDedupTyped;
    options.num_slots = 2048;
    let mut builder = Builder::open(&options).unwrap();

    // 300 pool entries exercise both the 1-byte and 2-byte index forms.
    for i in 0..300 {
        let value = format!("shared_value_{i}");
        builder
            .add_duplicate_value(value.as_bytes(), ValueKind::String as u8)
            .unwrap();
    }
    builder.finish_duplicates().unwrap();

    for i in 0..600 {
        let key = format!("key_{i}");
        let value = format!("shared_value_{}", i % 300);
        builder
            .insert_string(key.as_bytes(), value.as_bytes())
            .unwrap();
    }
    // A value outside the pool is stored inline.
    builder.insert_string(b"solo", b"not_pooled").unwrap();
    builder.finalize().unwrap();

    let reader = open(dir.path(), "dedup");
    assert_eq!(reader.get_string(b"key_0").unwrap(), "shared_value_0");
    assert_eq!(reader.get_string(b"key_299").unwrap(), "shared_value_299");
    assert_eq!(reader.get_string(b"key_300").unwrap(), "shared_value_0");
    assert_eq!(reader.get_string(b"key_599").unwrap(), "shared_value_299");
    assert_eq!(reader.get_string(b"solo").unwrap(), "not_pooled");
    reader.delete();
}

#[test]
fn duplicate_key_policy() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = WriterOptions::new("dups", dir.path());
    options.num_slots = 64;
    let mut builder = Builder::open(&options).unwrap();

    // Consecutive duplicates collapse: the first value wins.
    builder.insert_string(b"run", b"first").unwrap();
    builder.insert_string(b"run", b"second").unwrap();
    builder.insert_string(b"run", b"third").unwrap();

    // Non-consecutive duplicates overwrite: the last value wins.
    builder.insert_string(b"later", b"one").unwrap();
    builder.insert_string(b"other", b"x").unwrap();
    builder.insert_string(b"later", b"two").unwrap();
    builder.finalize().unwrap();

    let reader = open(dir.path(), "dups");
    assert_eq!(reader.get_string(b"run").unwrap(), "first");
    assert_eq!(reader.get_string(b"later").unwrap(), "two");
    reader.delete();
}

#[test]
fn offset_bits_exhaustion_prevents_publication() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = WriterOptions::new("tiny_offsets", dir.path());
    options.cache_kind = CacheKind::LinearProbe;
    options.num_slots = 16384;
    options.offset_bits = 16;
    let mut builder = Builder::open(&options).unwrap();

    let mut failure = None;
    for i in 0..5000 {
        let key = format!("key_{i}");
        let value = format!("val_{i}");
        if let Err(err) = builder.insert_string(key.as_bytes(), value.as_bytes()) {
            failure = Some(err);
            break;
        }
    }
    match failure {
        Some(CacheError::OffsetBitsExhausted { offset_bits }) => assert_eq!(offset_bits, 16),
        other => panic!("expected OffsetBitsExhausted, got {other:?}"),
    }

    // The artifact was never emitted.
    assert!(std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .all(|e| !e.file_name().to_string_lossy().ends_with(".cache")));
}

#[test]
fn keyspace_saturation_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = WriterOptions::new("small_table", dir.path());
    options.cache_kind = CacheKind::LinearProbe;
    options.num_slots = 1000;
    let mut builder = Builder::open(&options).unwrap();

    let mut failure = None;
    for i in 0..5000 {
        let key = format!("key_{i}");
        if let Err(err) = builder.insert_string(key.as_bytes(), b"v") {
            failure = Some(err);
            break;
        }
    }
    assert!(matches!(failure, Some(CacheError::KeyspaceFull { .. })));
}

#[test]
fn empty_key_and_empty_values() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = WriterOptions::new("edges", dir.path());
    options.num_slots = 64;
    let mut builder = Builder::open(&options).unwrap();

    assert!(matches!(
        builder.insert(b"", b"v", ValueKind::String as u8),
        Err(CacheError::EmptyKey)
    ));
    // Empty value for a non-string type is skipped by contract.
    builder.insert(b"skipped", b"", ValueKind::Int64 as u8).unwrap();
    builder.insert_string(b"present", b"").unwrap();
    builder.finalize().unwrap();

    let reader = open(dir.path(), "edges");
    assert!(matches!(
        reader.get_long(b"skipped"),
        Err(CacheError::NotFound)
    ));
    assert!(!reader.contains(b"skipped").unwrap());
    assert_eq!(reader.get_string(b"present").unwrap(), "");
    reader.delete();
}

#[test]
fn legacy_no_terminator_tag_truncates() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = WriterOptions::new("legacy", dir.path());
    options.num_slots = 64;
    let mut builder = Builder::open(&options).unwrap();
    builder.insert(b"k", b"value\0trailing-junk", 127).unwrap();
    builder.finalize().unwrap();

    let reader = open(dir.path(), "legacy");
    assert_eq!(reader.get_string(b"k").unwrap(), "value");
    assert_eq!(reader.get_type(b"k").unwrap(), ValueKind::String);
    reader.delete();
}
