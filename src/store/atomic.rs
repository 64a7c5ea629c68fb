//! Crash-safe file writes.
//!
//! Every record is first written to a temporary file in the destination
//! directory and then renamed into place, so readers observe either the old
//! record, the new record, or nothing; never a partial write.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::StoreError;

fn temp_in_parent(path: &Path, bytes: &[u8]) -> io::Result<NamedTempFile> {
    let dir = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no parent directory", path.display()),
        )
    })?;
    let mut tmp = tempfile::Builder::new().prefix(".tmp-").tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

/// Atomically replaces the contents of `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = temp_in_parent(path, bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Atomically creates `path` if it does not exist yet.
///
/// Returns `Ok(false)` without touching the existing file when `path` is
/// already present, which makes write-once records idempotent.
pub fn create_atomic(path: &Path, bytes: &[u8]) -> io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    let tmp = temp_in_parent(path, bytes)?;
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error),
    }
}

/// Serializes `value` as pretty JSON and atomically replaces `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)?;
    Ok(())
}

/// Serializes `value` and creates `path` only if absent.
pub fn create_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<bool, StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    Ok(create_atomic(path, &bytes)?)
}

/// Reads a JSON record, returning `None` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Returns true for names that are in-flight temporaries rather than records.
pub fn is_temporary(name: &str) -> bool {
    name.starts_with(".tmp-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("record.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
    }

    #[test]
    fn test_create_atomic_is_write_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("marker");
        assert!(create_atomic(&path, b"first").unwrap());
        assert!(!create_atomic(&path, b"second").unwrap());
        assert_eq!(fs::read(&path).unwrap(), b"first");
    }

    #[test]
    fn test_no_temporaries_left_behind() {
        let dir = TempDir::new().unwrap();
        write_atomic(&dir.path().join("a"), b"x").unwrap();
        create_atomic(&dir.path().join("b"), b"y").unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| is_temporary(&e.file_name().to_string_lossy()))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_read_json_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let value: Option<serde_json::Value> = read_json(&dir.path().join("missing.json")).unwrap();
        assert!(value.is_none());
    }
}
