//! Persisted identity snapshot.
//!
//! The whole gallery is written as one bincode blob. Writes go to a sibling
//! `.tmp` file which is fsynced and renamed over the target, so a reader (or a
//! crash) only ever sees the previous or the next complete snapshot.

use crate::types::Gallery;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File};
use bincode::Options;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding: {0}")]
    Codec(#[from] bincode::Error),
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    records: &'a Gallery,
}

#[derive(Deserialize)]
struct SnapshotOwned {
    version: u32,
    records: Gallery,
}

/// Identifies one on-disk version of the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotMarker {
    modified: SystemTime,
    len: u64,
}

impl SnapshotMarker {
    /// Marker of the file at `path`, or `None` if it does not exist.
    pub fn read(path: &Path) -> std::io::Result<Option<Self>> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(Self::from_metadata(&meta)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn from_metadata(meta: &fs::Metadata) -> std::io::Result<Self> {
        Ok(Self {
            modified: meta.modified()?,
            len: meta.len(),
        })
    }
}

/// Read a complete snapshot.
///
/// The file is decoded from memory with a limit of its own length, so a
/// corrupt length prefix is a decode error rather than a huge allocation.
pub fn load(path: &Path) -> Result<Gallery, SnapshotError> {
    let bytes = fs::read(path)?;
    let snapshot: SnapshotOwned = bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(bytes.len() as u64)
        .deserialize(&bytes)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(snapshot.version));
    }
    Ok(snapshot.records)
}

/// Atomically replace the snapshot at `path` with `gallery`.
///
/// Returns the marker of the written file, taken before the rename so it
/// can never describe a file from another writer.
pub fn save(path: &Path, gallery: &Gallery) -> Result<SnapshotMarker, SnapshotError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = temp_path(path);
    let result = write_file(&tmp, gallery).and_then(|marker| {
        fs::rename(&tmp, path)?;
        Ok(marker)
    });
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_file(tmp: &Path, gallery: &Gallery) -> Result<SnapshotMarker, SnapshotError> {
    let mut writer = BufWriter::new(File::create(tmp)?);
    bincode::serialize_into(
        &mut writer,
        &SnapshotRef {
            version: SNAPSHOT_VERSION,
            records: gallery,
        },
    )?;
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(SnapshotMarker::from_metadata(&file.metadata()?)?)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Embedding;

    fn sample() -> Gallery {
        let mut g = Gallery::new();
        g.insert("alice".into(), Embedding::new(vec![0.1, -0.25, 3.5e-7]));
        g.insert("bob".into(), Embedding::new(vec![f32::MIN_POSITIVE, 1.0, -1.0]));
        g
    }

    #[test]
    fn test_roundtrip_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.db");
        let g = sample();
        save(&path, &g).unwrap();
        assert_eq!(load(&path).unwrap(), g);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/faces.db");
        save(&path, &sample()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.db");
        fs::write(&path, b"\x01\x00\x00\x00garbage").unwrap();
        assert!(load(&path).is_err());
    }

    #[test]
    fn test_oversized_length_prefix_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.db");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&(1u64 << 62).to_le_bytes());
        bytes.extend_from_slice(b"al");
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(load(&path), Err(SnapshotError::Codec(_))));

        fs::write(&path, b"definitely not a snapshot").unwrap();
        assert!(load(&path).is_err());
    }

    #[test]
    fn test_save_returns_marker_of_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.db");
        let marker = save(&path, &sample()).unwrap();
        assert_eq!(SnapshotMarker::read(&path).unwrap(), Some(marker));
    }

    #[test]
    fn test_marker_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(SnapshotMarker::read(&dir.path().join("nope")).unwrap(), None);
    }

    #[test]
    fn test_marker_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.db");
        save(&path, &Gallery::new()).unwrap();
        let before = SnapshotMarker::read(&path).unwrap().unwrap();
        save(&path, &sample()).unwrap();
        let after = SnapshotMarker::read(&path).unwrap().unwrap();
        assert_ne!(before, after);
    }
}
