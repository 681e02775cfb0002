//! Mirror-to-reader pipeline over `file://` mirrors: publish, compress,
//! download, verify, swap.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use strata_runtime::{Builder, WriterOptions};
use strata_sync::verify::{hash_file, ChecksumKind};
use strata_sync::{
    open_reader, DownloadReason, Downloader, DownloaderOptions, SyncReaderOptions,
};
use strata_types::CacheError;

/// Build an artifact and publish the full group on a mirror directory:
/// `.zst` body, settings, size, checksum, and the remote timestamp file.
fn publish_to_mirror(mirror: &Path, task: &str, pairs: &[(&[u8], &[u8])]) -> u64 {
    let staging = tempfile::tempdir().unwrap();
    let mut options = WriterOptions::new(task, staging.path());
    options.num_slots = 256;
    options.generate_timestamp_file = false;
    let mut builder = Builder::open(&options).unwrap();
    for (key, value) in pairs {
        builder.insert_string(key, value).unwrap();
    }
    let timestamp = builder.finalize().unwrap();

    let artifact = staging.path().join(format!("{task}.{timestamp}.cache"));
    let raw = fs::read(&artifact).unwrap();
    let compressed = zstd::stream::encode_all(raw.as_slice(), 3).unwrap();
    let basename = format!("{task}.cache");

    fs::write(mirror.join(format!("{basename}.{timestamp}.zst")), compressed).unwrap();
    fs::write(
        mirror.join(format!("{basename}.{timestamp}.settings")),
        "checksum.extension=xxh3\ncompression.method=zst\ndownload.method=http\n",
    )
    .unwrap();
    fs::write(
        mirror.join(format!("{basename}.{timestamp}.size")),
        raw.len().to_string(),
    )
    .unwrap();
    fs::write(
        mirror.join(format!("{basename}.{timestamp}.xxh3")),
        hash_file(&artifact, ChecksumKind::Xxh3).unwrap(),
    )
    .unwrap();
    fs::write(
        mirror.join(format!("{basename}.inputs")),
        format!("inputs@{timestamp}"),
    )
    .unwrap();
    // The remote timestamp goes last, mirroring real publication order.
    fs::write(
        mirror.join(format!("{basename}.timestamp")),
        timestamp.to_string(),
    )
    .unwrap();
    timestamp
}

#[test]
fn download_then_serve() {
    let mirror = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    let ts = publish_to_mirror(mirror.path(), "fast_cache", &[(b"key_1", b"val_1")]);

    let mut options = SyncReaderOptions::new("fast_cache", dest.path());
    options.base_urls = format!("file://{}", mirror.path().display());
    options.download_at_init = true;
    options.update_period = Duration::from_secs(300);
    let reader = open_reader(options).unwrap();

    assert_eq!(reader.most_recent_timestamp(), Some(ts));
    assert_eq!(reader.get_string(b"key_1").unwrap(), "val_1");

    // The downloaded group is complete on disk.
    assert!(dest.path().join(format!("fast_cache.{ts}.cache")).exists());
    assert!(dest
        .path()
        .join(format!("fast_cache.cache.{ts}.xxh3"))
        .exists());
    assert_eq!(
        fs::read_to_string(dest.path().join("fast_cache.cache.timestamp.latest")).unwrap(),
        ts.to_string()
    );
    reader.delete();
}

#[test]
fn updater_downloads_new_generation_from_mirror() {
    let mirror = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    publish_to_mirror(mirror.path(), "fast_cache", &[(b"key_333", b"val_333")]);

    let mut options = SyncReaderOptions::new("fast_cache", dest.path());
    options.base_urls = format!("file://{}", mirror.path().display());
    options.download_at_init = true;
    options.update_period = Duration::from_millis(30);
    let reader = open_reader(options).unwrap();
    assert_eq!(reader.get_string(b"key_333").unwrap(), "val_333");

    std::thread::sleep(Duration::from_millis(5));
    publish_to_mirror(mirror.path(), "fast_cache", &[(b"key_333", b"val_331")]);

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if reader.get_string(b"key_333").unwrap() == "val_331" {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "mirror update not observed in time"
        );
        std::thread::sleep(Duration::from_millis(20));
    }
    reader.delete();
}

#[test]
fn tampered_mirror_checksum_keeps_old_generation() {
    let mirror = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    let ts1 = publish_to_mirror(mirror.path(), "fast_cache", &[(b"k", b"good")]);

    let downloader = Downloader::new(&DownloaderOptions::new(
        "fast_cache.cache",
        dest.path(),
        format!("file://{}", mirror.path().display()),
    ))
    .unwrap();
    downloader.run().unwrap().unwrap();

    let mut options = SyncReaderOptions::new("fast_cache", dest.path());
    options.update_period = Duration::from_secs(300);
    let reader = open_reader(options).unwrap();
    assert_eq!(reader.get_string(b"k").unwrap(), "good");

    // Publish a second generation with a corrupted digest.
    std::thread::sleep(Duration::from_millis(5));
    let ts2 = publish_to_mirror(mirror.path(), "fast_cache", &[(b"k", b"evil")]);
    fs::write(
        mirror.path().join(format!("fast_cache.cache.{ts2}.xxh3")),
        "0000000000000000",
    )
    .unwrap();

    let err = downloader.run().unwrap_err();
    assert!(matches!(err, CacheError::ChecksumMismatch { .. }));

    // Nothing of the bad group landed; the reader still serves ts1.
    assert!(!dest.path().join(format!("fast_cache.{ts2}.cache")).exists());
    assert_eq!(
        fs::read_to_string(dest.path().join("fast_cache.cache.timestamp.latest")).unwrap(),
        ts1.to_string()
    );
    assert_eq!(reader.get_string(b"k").unwrap(), "good");
    reader.delete();
}

#[test]
fn retain_policy_removes_oldest_groups() {
    let mirror = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();

    let downloader = Downloader::new(&DownloaderOptions::new(
        "fast_cache.cache",
        dest.path(),
        format!("file://{}", mirror.path().display()),
    ))
    .unwrap();

    let ts1 = publish_to_mirror(mirror.path(), "fast_cache", &[(b"k", b"one")]);
    downloader.run().unwrap().unwrap();
    std::thread::sleep(Duration::from_millis(5));
    let ts2 = publish_to_mirror(mirror.path(), "fast_cache", &[(b"k", b"two")]);
    downloader.run().unwrap().unwrap();

    assert!(ts2 > ts1);
    assert!(!dest.path().join(format!("fast_cache.{ts1}.cache")).exists());
    assert!(dest.path().join(format!("fast_cache.{ts2}.cache")).exists());

    let (needs, reason) = downloader.should_download();
    assert!(!needs);
    // The inputs manifest changed with ts2, so equality comes from the
    // timestamp itself.
    assert_eq!(reason, DownloadReason::UpToDate);
}
