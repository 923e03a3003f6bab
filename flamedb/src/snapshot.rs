//! Whole-store snapshots written on close and restored on open.
//!
//! A snapshot is the `postcard` encoding of [`Snapshot`], compressed with
//! `zstd`. Writes go to a temporary file that is renamed into place, so a
//! crash mid-write leaves the previous snapshot intact.

use crate::store::Timestamp;
use flamedb_parse::{ProfileTree, StorageKey};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the snapshot inside the data directory.
pub const SNAPSHOT_FILE: &str = "segments.snapshot";

/// Current snapshot layout version.
pub const SNAPSHOT_VERSION: u32 = 1;

const ZSTD_LEVEL: i32 = 3;

/// Errors that can occur while reading or writing a snapshot.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] postcard::Error),

    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
}

/// Result type for snapshot operations.
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Every segment of every key, plus the bucket width they were cut with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub bucket_width: i64,
    pub series: Vec<SeriesSnapshot>,
}

/// The segments of a single key, ordered by bucket start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSnapshot {
    pub key: StorageKey,
    pub segments: Vec<(Timestamp, ProfileTree)>,
}

impl Snapshot {
    pub fn new(bucket_width: i64) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            bucket_width,
            series: Vec::new(),
        }
    }
}

/// Path of the snapshot file inside `data_dir`.
pub fn path_in(data_dir: &Path) -> PathBuf {
    data_dir.join(SNAPSHOT_FILE)
}

/// Write `snapshot` to `path`, replacing any previous file atomically.
pub fn write(path: &Path, snapshot: &Snapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let raw = postcard::to_allocvec(snapshot)?;
    let compressed = zstd::encode_all(&raw[..], ZSTD_LEVEL)?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, compressed)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a snapshot previously written by [`write`].
pub fn read(path: &Path) -> Result<Snapshot> {
    let compressed = fs::read(path)?;
    let raw = zstd::decode_all(&compressed[..])?;
    let snapshot: Snapshot = postcard::from_bytes(&raw)?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(snapshot.version));
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_snapshot() -> Snapshot {
        let mut snapshot = Snapshot::new(10);
        snapshot.series.push(SeriesSnapshot {
            key: StorageKey::parse("app{env=dev}").unwrap(),
            segments: vec![
                (0, ProfileTree::from_iter([("foo;bar", 2)])),
                (10, ProfileTree::from_iter([("foo;baz", 3)])),
            ],
        });
        snapshot
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = path_in(dir.path());

        write(&path, &sample_snapshot()).unwrap();
        let back = read(&path).unwrap();

        assert_eq!(back, sample_snapshot());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn write_creates_missing_directories() {
        let dir = TempDir::new().unwrap();
        let path = path_in(&dir.path().join("nested").join("store"));

        write(&path, &Snapshot::new(60)).unwrap();

        assert_eq!(read(&path).unwrap().bucket_width, 60);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = path_in(dir.path());
        let mut snapshot = Snapshot::new(10);
        snapshot.version = 99;

        write(&path, &snapshot).unwrap();

        assert!(matches!(read(&path), Err(SnapshotError::UnsupportedVersion(99))));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = path_in(dir.path());
        fs::write(&path, b"not a snapshot").unwrap();

        assert!(read(&path).is_err());
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();

        assert!(matches!(read(&path_in(dir.path())), Err(SnapshotError::Io(_))));
    }
}
