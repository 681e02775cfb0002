//! Decompress-while-checksumming.
//!
//! The compressed body streams through a zstd decoder; decoded bytes are
//! tee'd into a buffered temp-file writer and a running hash in one pass.
//! Only after the computed digest matches the published one is the temp
//! file renamed into place.

use std::fs;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::{info, warn};

use strata_types::{CacheError, Result};

/// Checksum algorithm, selected by the sidecar extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChecksumKind {
    Xxh64,
    Xxh3,
}

impl ChecksumKind {
    pub fn from_extension(extension: &str) -> Result<ChecksumKind> {
        match extension {
            "xxh" => Ok(ChecksumKind::Xxh64),
            "xxh3" => Ok(ChecksumKind::Xxh3),
            other => Err(CacheError::ConfigInvalid(format!(
                "unsupported checksum extension '{other}'"
            ))),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ChecksumKind::Xxh64 => "xxh",
            ChecksumKind::Xxh3 => "xxh3",
        }
    }
}

/// Streaming hasher over either algorithm.
pub enum StreamingHash {
    Xxh64(xxhash_rust::xxh64::Xxh64),
    Xxh3(xxhash_rust::xxh3::Xxh3),
}

impl StreamingHash {
    pub fn new(kind: ChecksumKind) -> StreamingHash {
        match kind {
            ChecksumKind::Xxh64 => StreamingHash::Xxh64(xxhash_rust::xxh64::Xxh64::new(0)),
            ChecksumKind::Xxh3 => StreamingHash::Xxh3(xxhash_rust::xxh3::Xxh3::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            StreamingHash::Xxh64(h) => h.update(data),
            StreamingHash::Xxh3(h) => h.update(data),
        }
    }

    /// Lowercase hex digest, the sidecar format.
    pub fn hex_digest(&self) -> String {
        match self {
            StreamingHash::Xxh64(h) => format!("{:x}", h.digest()),
            StreamingHash::Xxh3(h) => format!("{:x}", h.digest()),
        }
    }
}

/// Hash a whole file, for sidecar generation and operator checks.
pub fn hash_file(path: &Path, kind: ChecksumKind) -> Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = StreamingHash::new(kind);
    let mut buf = vec![0u8; 1 << 16];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.hex_digest())
}

/// Stream `body` through zstd into `final_path`, verifying against
/// `published_cksum` on the way. Returns the decompressed size.
///
/// The destination is written as `<final_path>.tmp.<rand>` (preallocated
/// when the size is known) and renamed only after verification; on mismatch
/// the temp file is removed and nothing else changes.
pub fn write_decompressed(
    body: impl Read,
    final_path: &Path,
    compression_method: &str,
    checksum: ChecksumKind,
    published_cksum: &str,
    uncompressed_size: Option<u64>,
) -> Result<(PathBuf, u64)> {
    if compression_method != "zst" {
        return Err(CacheError::ConfigInvalid(format!(
            "unsupported compression method '{compression_method}'"
        )));
    }

    let tmp_path = final_path.with_file_name(format!(
        "{}.tmp.{}",
        final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        rand::thread_rng().gen::<u32>()
    ));

    let file = fs::File::create(&tmp_path)?;
    if let Some(size) = uncompressed_size {
        // Reserve the destination up front so the streamed write cannot
        // fragment or run the disk out halfway through.
        if let Err(err) = file.set_len(size) {
            warn!(path = %tmp_path.display(), %err, "preallocation failed");
        }
    }

    let result = decompress_into(body, &file, checksum);
    let (written, computed) = match result {
        Ok(ok) => ok,
        Err(err) => {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }
    };

    if let Some(size) = uncompressed_size {
        if written != size {
            warn!(written, expected = size, "decompressed size mismatch");
        }
        if written < size {
            // Trim the preallocation when the stream came up short; the
            // checksum decides whether that was corruption.
            let _ = file.set_len(written);
        }
    }
    drop(file);

    if computed != published_cksum.trim() {
        let _ = fs::remove_file(&tmp_path);
        return Err(CacheError::ChecksumMismatch {
            computed,
            published: published_cksum.trim().to_string(),
        });
    }

    fs::rename(&tmp_path, final_path)?;
    info!(path = %final_path.display(), bytes = written, "decompressed and verified");
    Ok((final_path.to_path_buf(), written))
}

fn decompress_into(
    body: impl Read,
    file: &fs::File,
    checksum: ChecksumKind,
) -> Result<(u64, String)> {
    let mut decoder = zstd::stream::read::Decoder::new(body)
        .map_err(|err| CacheError::decode(format!("zstd init failed: {err}")))?;
    let mut writer = BufWriter::new(file);
    let mut hasher = StreamingHash::new(checksum);
    let mut buf = vec![0u8; 1 << 16];
    let mut written = 0u64;
    loop {
        let n = decoder
            .read(&mut buf)
            .map_err(|err| CacheError::decode(format!("zstd decode failed: {err}")))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n])?;
        written += n as u64;
    }
    writer.flush()?;
    file.sync_all()?;
    Ok((written, hasher.hex_digest()))
}
