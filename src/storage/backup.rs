//! Snapshot backups of the data directory.
//!
//! A backup is a tar.gz of the whole data directory (message database plus
//! `nodes.json`) with a SHA-256 checksum recorded in `backups.json` next to
//! the archives. Restore refuses to unpack an archive whose checksum no
//! longer matches.

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub checksum: String,
    pub path: PathBuf,
}

pub struct BackupManager {
    data_dir: PathBuf,
    backup_dir: PathBuf,
    snapshots: HashMap<String, SnapshotMetadata>,
}

impl BackupManager {
    pub fn new(data_dir: PathBuf, backup_dir: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&backup_dir)?;
        let mut manager = Self {
            data_dir,
            backup_dir,
            snapshots: HashMap::new(),
        };
        manager.load_metadata()?;
        Ok(manager)
    }

    fn metadata_path(&self) -> PathBuf {
        self.backup_dir.join("backups.json")
    }

    fn load_metadata(&mut self) -> io::Result<()> {
        let path = self.metadata_path();
        if path.exists() {
            let contents = fs::read_to_string(&path)?;
            self.snapshots = serde_json::from_str(&contents)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        }
        Ok(())
    }

    fn save_metadata(&self) -> io::Result<()> {
        let contents = serde_json::to_string_pretty(&self.snapshots)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(self.metadata_path(), contents)
    }

    /// Snapshot the data directory into a new tar.gz archive.
    pub fn create_snapshot(&mut self) -> io::Result<SnapshotMetadata> {
        let timestamp = Utc::now();
        let id = format!("snapshot_{}", timestamp.format("%Y%m%d_%H%M%S_%3f"));
        let filename = format!("{}.tar.gz", id);
        let archive_path = self.backup_dir.join(&filename);

        info!("creating backup {}", id);

        let tar_gz = File::create(&archive_path)?;
        let enc = GzEncoder::new(tar_gz, Compression::default());
        let mut tar = Builder::new(enc);
        tar.append_dir_all("data", &self.data_dir)?;
        // Flush the whole archive before hashing it.
        let enc = tar.into_inner()?;
        enc.finish()?;

        let checksum = file_checksum(&archive_path)?;
        let size_bytes = fs::metadata(&archive_path)?.len();

        let metadata = SnapshotMetadata {
            id: id.clone(),
            created_at: timestamp,
            size_bytes,
            checksum,
            path: PathBuf::from(filename),
        };
        self.snapshots.insert(id.clone(), metadata.clone());
        self.save_metadata()?;

        info!("backup {} written ({} bytes)", id, size_bytes);
        Ok(metadata)
    }

    /// Check a snapshot's archive against its recorded checksum.
    pub fn verify_snapshot(&self, id: &str) -> io::Result<bool> {
        let metadata = self
            .snapshots
            .get(id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "backup not found"))?;
        let archive_path = self.backup_dir.join(&metadata.path);
        if !archive_path.exists() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "backup file missing"));
        }
        Ok(file_checksum(&archive_path)? == metadata.checksum)
    }

    /// Unpack a snapshot into `restore_path`. Fails when the archive does
    /// not match its recorded checksum.
    pub fn restore_snapshot(&self, id: &str, restore_path: &Path) -> io::Result<()> {
        let metadata = self
            .snapshots
            .get(id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "backup not found"))?;
        let archive_path = self.backup_dir.join(&metadata.path);
        if file_checksum(&archive_path)? != metadata.checksum {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "backup checksum mismatch",
            ));
        }

        info!("restoring backup {} into {}", id, restore_path.display());
        fs::create_dir_all(restore_path)?;
        let tar_gz = File::open(&archive_path)?;
        let mut archive = Archive::new(GzDecoder::new(tar_gz));
        archive.unpack(restore_path)?;
        Ok(())
    }

    /// Snapshots on disk, newest first.
    pub fn list_snapshots(&self) -> Vec<SnapshotMetadata> {
        let mut snapshots: Vec<_> = self.snapshots.values().cloned().collect();
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshots
    }
}

fn file_checksum(path: &Path) -> io::Result<String> {
    use sha2::{Digest, Sha256};
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed_data_dir(path: &Path) {
        fs::create_dir_all(path).unwrap();
        fs::write(path.join("nodes.json"), b"{\"nodes\":{}}").unwrap();
        fs::write(path.join("marker.txt"), b"board state").unwrap();
    }

    #[test]
    fn snapshot_and_verify() {
        let temp = TempDir::new().unwrap();
        let data_dir = temp.path().join("data");
        seed_data_dir(&data_dir);

        let mut manager =
            BackupManager::new(data_dir, temp.path().join("backups")).unwrap();
        let metadata = manager.create_snapshot().unwrap();
        assert!(metadata.size_bytes > 0);
        assert!(manager.verify_snapshot(&metadata.id).unwrap());
    }

    #[test]
    fn restore_reproduces_files() {
        let temp = TempDir::new().unwrap();
        let data_dir = temp.path().join("data");
        seed_data_dir(&data_dir);

        let mut manager =
            BackupManager::new(data_dir, temp.path().join("backups")).unwrap();
        let metadata = manager.create_snapshot().unwrap();

        let restore_path = temp.path().join("restore");
        manager.restore_snapshot(&metadata.id, &restore_path).unwrap();
        assert!(restore_path.join("data/nodes.json").exists());
        assert!(restore_path.join("data/marker.txt").exists());
    }

    #[test]
    fn tampered_archive_fails_verification() {
        let temp = TempDir::new().unwrap();
        let data_dir = temp.path().join("data");
        seed_data_dir(&data_dir);

        let backup_dir = temp.path().join("backups");
        let mut manager = BackupManager::new(data_dir, backup_dir.clone()).unwrap();
        let metadata = manager.create_snapshot().unwrap();

        fs::write(backup_dir.join(&metadata.path), b"corrupted").unwrap();
        assert!(!manager.verify_snapshot(&metadata.id).unwrap());
        assert!(manager
            .restore_snapshot(&metadata.id, &temp.path().join("restore"))
            .is_err());
    }

    #[test]
    fn listing_is_newest_first() {
        let temp = TempDir::new().unwrap();
        let data_dir = temp.path().join("data");
        seed_data_dir(&data_dir);

        let mut manager =
            BackupManager::new(data_dir, temp.path().join("backups")).unwrap();
        manager.create_snapshot().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let second = manager.create_snapshot().unwrap();

        let listed = manager.list_snapshots();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
    }
}
