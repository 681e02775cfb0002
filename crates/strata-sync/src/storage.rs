//! Storage capability for cleanup sweeps.
//!
//! Old-artifact reaping needs three operations: list a directory by
//! filename predicate, remove a file, copy a file. The local filesystem is
//! built in; a bucket-backed implementation satisfies the same trait.

use std::path::{Path, PathBuf};

use strata_types::Result;

/// Minimal file-management capability.
pub trait Storage: Send + Sync {
    /// Paths in `dir` whose file name satisfies `predicate`.
    fn list(&self, dir: &Path, predicate: &dyn Fn(&str) -> bool) -> Result<Vec<PathBuf>>;

    fn remove(&self, path: &Path) -> Result<()>;

    fn copy(&self, src: &Path, dst: &Path) -> Result<()>;
}

/// Local-filesystem storage.
pub struct LocalStorage;

impl Storage for LocalStorage {
    fn list(&self, dir: &Path, predicate: &dyn Fn(&str) -> bool) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if predicate(name) {
                out.push(entry.path());
            }
        }
        out.sort();
        Ok(out)
    }

    fn remove(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    fn copy(&self, src: &Path, dst: &Path) -> Result<()> {
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(src, dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_filters_by_name() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.cache", "a.timestamp", "b.cache"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let storage = LocalStorage;
        let caches = storage
            .list(dir.path(), &|name| name.ends_with(".cache"))
            .unwrap();
        assert_eq!(caches.len(), 2);
        let a_files = storage
            .list(dir.path(), &|name| name.starts_with("a."))
            .unwrap();
        assert_eq!(a_files.len(), 2);
    }

    #[test]
    fn remove_and_copy() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        std::fs::write(&src, b"content").unwrap();
        let storage = LocalStorage;
        let dst = dir.path().join("nested/dst.txt");
        storage.copy(&src, &dst).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"content");
        storage.remove(&src).unwrap();
        assert!(!src.exists());
    }
}
