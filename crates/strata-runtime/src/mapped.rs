//! Memory-mapped artifact region.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use tracing::{debug, warn};

use strata_types::constants::HEADER_SIZE;
use strata_types::{CacheError, CacheHeader, Result};

/// One artifact mapped read-only. The data region starts after the header
/// and contains keyspace, arena, and (for dedup kinds) the pool trailer.
#[derive(Debug)]
pub struct MappedCache {
    mmap: Mmap,
    header: CacheHeader,
    path: PathBuf,
}

impl MappedCache {
    /// Open and map `path`. With `preload` the mapping is populated eagerly
    /// and marked will-need; this is advisory and correctness never depends
    /// on it.
    pub fn open(path: &Path, preload: bool) -> Result<MappedCache> {
        let file = File::open(path).map_err(|err| {
            CacheError::decode(format!("opening cache {} failed: {err}", path.display()))
        })?;
        let file_size = file.metadata()?.len();
        if file_size <= HEADER_SIZE as u64 {
            return Err(CacheError::decode(format!(
                "cache {} has invalid size {file_size}",
                path.display()
            )));
        }

        let mut opts = MmapOptions::new();
        #[cfg(target_os = "linux")]
        if preload {
            opts.populate();
        }
        // Safety: the artifact is sealed; nothing remaps or truncates a
        // published file, and the publication protocol renames whole files.
        let mmap = unsafe { opts.map(&file) }.map_err(|err| {
            CacheError::decode(format!("mmap of {} failed: {err}", path.display()))
        })?;
        #[cfg(unix)]
        if preload {
            if let Err(err) = mmap.advise(memmap2::Advice::WillNeed) {
                warn!(path = %path.display(), %err, "madvise(WILLNEED) failed");
            }
        }

        let header = CacheHeader::decode(&mmap)?;
        header.check_version()?;
        if header.size > file_size {
            return Err(CacheError::decode(format!(
                "header claims {} bytes but the file has {file_size}",
                header.size
            )));
        }

        debug!(
            path = %path.display(),
            entries = header.number_of_entries,
            slots = header.number_of_key_slots,
            kind = header.cache_kind,
            "opened cache"
        );

        Ok(MappedCache {
            mmap,
            header,
            path: path.to_path_buf(),
        })
    }

    pub fn header(&self) -> &CacheHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Data region: keyspace + arena (+ pool trailer).
    pub fn data(&self) -> &[u8] {
        &self.mmap[HEADER_SIZE..]
    }
}
