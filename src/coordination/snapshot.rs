//! Durable snapshot files
//!
//! Layout: `[MAGIC][CRC32][LEN][JSON PAYLOAD]`, integers little-endian.
//! Writes go to a sibling temp file which is fsynced and renamed over the
//! target, so a crash never leaves a half-written snapshot behind.

use crate::common::{crc32, Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const SNAPSHOT_MAGIC: &[u8; 8] = b"MCSNAP01";
const HEADER_LEN: usize = 8 + 4 + 8;

#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Atomically replace the snapshot with `value`
    pub fn save<V: Serialize>(&self, value: &V) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let temp = self.temp_path();
        {
            let file = File::create(&temp)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(SNAPSHOT_MAGIC)?;
            writer.write_all(&crc32(&payload).to_le_bytes())?;
            writer.write_all(&(payload.len() as u64).to_le_bytes())?;
            writer.write_all(&payload)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        std::fs::rename(&temp, &self.path)?;

        // Persist the rename itself where the platform allows it.
        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }

    /// Read the snapshot; `Ok(None)` when no snapshot has been written
    pub fn load<V: DeserializeOwned>(&self) -> Result<Option<V>> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        if bytes.len() < HEADER_LEN {
            return Err(Error::Corrupted(format!(
                "snapshot {} truncated",
                self.path.display()
            )));
        }
        if &bytes[..8] != SNAPSHOT_MAGIC {
            return Err(Error::Corrupted("Invalid snapshot magic".into()));
        }

        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&bytes[8..12]);
        let expected_crc = u32::from_le_bytes(crc_bytes);
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&bytes[12..20]);
        let len = u64::from_le_bytes(len_bytes) as usize;

        let payload = &bytes[HEADER_LEN..];
        if payload.len() != len {
            return Err(Error::Corrupted(format!(
                "snapshot {} payload is {} bytes, header says {}",
                self.path.display(),
                payload.len(),
                len
            )));
        }
        if crc32(payload) != expected_crc {
            return Err(Error::Corrupted(format!(
                "snapshot {} checksum mismatch",
                self.path.display()
            )));
        }

        Ok(Some(serde_json::from_slice(payload)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let snapshot = SnapshotFile::new(dir.path().join("nested/hosts.snapshot"));

        let mut value = HashMap::new();
        value.insert("h1".to_string(), 1u32);
        snapshot.save(&value).unwrap();

        let loaded: HashMap<String, u32> = snapshot.load().unwrap().unwrap();
        assert_eq!(loaded, value);
        assert!(!dir.path().join("nested/hosts.snapshot.tmp").exists());
    }

    #[test]
    fn test_missing_is_none() {
        let dir = tempdir().unwrap();
        let snapshot = SnapshotFile::new(dir.path().join("absent"));
        assert!(snapshot.load::<Vec<u8>>().unwrap().is_none());
    }

    #[test]
    fn test_truncated_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hosts.snapshot");
        let snapshot = SnapshotFile::new(&path);
        snapshot.save(&vec!["a".to_string(), "b".to_string()]).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        assert!(matches!(
            snapshot.load::<Vec<String>>(),
            Err(Error::Corrupted(_))
        ));

        std::fs::write(&path, b"MCSNAP").unwrap();
        assert!(matches!(
            snapshot.load::<Vec<String>>(),
            Err(Error::Corrupted(_))
        ));
    }

    #[test]
    fn test_flipped_byte_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hosts.snapshot");
        let snapshot = SnapshotFile::new(&path);
        snapshot.save(&"payload".to_string()).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 2;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();
        assert!(snapshot.load::<String>().is_err());
    }
}
