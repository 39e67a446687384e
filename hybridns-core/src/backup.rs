//! Backup Store (C3)
//!
//! Content-addressed snapshots of resolver files, kept under
//! `backup_root/{backup_type}/{backup_id}/`. A single JSON document at
//! `backup_root/index.json` holds every [`Backup`](crate::store::model::Backup)'s
//! metadata; writes to it go through a process-wide [`tokio::sync::Mutex`]
//! so concurrent `create`/`prune` calls never interleave a read-modify-write.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::model::{Backup, BackupType};

/// Manages the on-disk backup archive under a configured root directory.
pub struct BackupStore {
    root: PathBuf,
    index_lock: Mutex<()>,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index_lock: Mutex::new(()),
        }
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn backup_dir(&self, backup_type: BackupType, backup_id: &str) -> PathBuf {
        self.root.join(type_dir(backup_type)).join(backup_id)
    }

    async fn load_index(&self) -> Result<Vec<Backup>> {
        let path = self.index_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| Error::BackupFailed(format!("corrupt backup index: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(Error::FilesystemFailed(e)),
        }
    }

    async fn save_index(&self, backups: &[Backup]) -> Result<()> {
        let path = self.index_path();
        tokio::fs::create_dir_all(&self.root).await?;
        let bytes = serde_json::to_vec_pretty(backups).map_err(|e| Error::BackupFailed(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Snapshot the given files into a new backup, recording their SHA-256
    /// checksums alongside copies under the content-addressed directory.
    pub async fn create(&self, backup_type: BackupType, original_paths: Vec<PathBuf>, description: impl Into<String>) -> Result<Backup> {
        let backup_id = Uuid::new_v4().to_string();
        let dest_dir = self.backup_dir(backup_type, &backup_id);
        tokio::fs::create_dir_all(&dest_dir).await?;

        let mut stored_paths = Vec::with_capacity(original_paths.len());
        let mut sha256 = Vec::with_capacity(original_paths.len());

        for original in &original_paths {
            let bytes = tokio::fs::read(original)
                .await
                .map_err(|e| Error::BackupFailed(format!("reading '{}': {e}", original.display())))?;
            let digest = hex_digest(&bytes);

            let file_name = original
                .file_name()
                .ok_or_else(|| Error::BackupFailed(format!("'{}' has no file name", original.display())))?;
            let dest = dest_dir.join(file_name);
            tokio::fs::write(&dest, &bytes).await?;

            stored_paths.push(dest.to_string_lossy().into_owned());
            sha256.push(digest);
        }

        let backup = Backup {
            backup_id,
            backup_type,
            created_at: Utc::now(),
            original_paths: original_paths.iter().map(|p| p.to_string_lossy().into_owned()).collect(),
            stored_paths,
            sha256,
            description: description.into(),
            related_files: Vec::new(),
        };

        let _guard = self.index_lock.lock().await;
        let mut index = self.load_index().await?;
        index.push(backup.clone());
        self.save_index(&index).await?;

        Ok(backup)
    }

    pub async fn list(&self, backup_type: Option<BackupType>) -> Result<Vec<Backup>> {
        let index = self.load_index().await?;
        Ok(index.into_iter().filter(|b| backup_type.map(|t| t == b.backup_type).unwrap_or(true)).collect())
    }

    pub async fn get(&self, backup_id: &str) -> Result<Option<Backup>> {
        let index = self.load_index().await?;
        Ok(index.into_iter().find(|b| b.backup_id == backup_id))
    }

    /// Recompute every stored file's SHA-256 and compare against the index.
    pub async fn verify(&self, backup_id: &str) -> Result<bool> {
        let backup = self
            .get(backup_id)
            .await?
            .ok_or_else(|| Error::not_found("backup", backup_id))?;

        for (stored_path, expected) in backup.stored_paths.iter().zip(backup.sha256.iter()) {
            let bytes = tokio::fs::read(stored_path)
                .await
                .map_err(|e| Error::BackupFailed(format!("reading stored copy '{stored_path}': {e}")))?;
            if &hex_digest(&bytes) != expected {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Restore a backup's files to their original paths. Always creates a
    /// `pre_restore` backup of whatever currently sits at those paths first,
    /// tagged via `description` rather than a distinct [`BackupType`] — it's
    /// a regular entry of the same type being restored, so `prune` treats it
    /// like any other. Returns that pre-restore backup, or `None` if none of
    /// the original paths existed yet to snapshot.
    pub async fn restore(&self, backup_id: &str) -> Result<Option<Backup>> {
        let backup = self
            .get(backup_id)
            .await?
            .ok_or_else(|| Error::not_found("backup", backup_id))?;

        if !self.verify(backup_id).await? {
            return Err(Error::BackupFailed(format!("backup '{backup_id}' failed checksum verification")));
        }

        let mut existing_paths = Vec::new();
        for original in &backup.original_paths {
            if tokio::fs::try_exists(original).await? {
                existing_paths.push(PathBuf::from(original));
            }
        }

        let pre_restore = if existing_paths.is_empty() {
            None
        } else {
            Some(
                self.create(backup.backup_type, existing_paths, format!("pre_restore snapshot before restoring '{backup_id}'"))
                    .await?,
            )
        };

        for (stored, original) in backup.stored_paths.iter().zip(backup.original_paths.iter()) {
            let bytes = tokio::fs::read(stored).await?;
            if let Some(parent) = Path::new(original).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(original, bytes).await?;
        }
        Ok(pre_restore)
    }

    /// Remove backups older than `retain_days`, keeping at least
    /// `retain_per_type` of the most recent per [`BackupType`] regardless of
    /// age.
    pub async fn prune(&self, retain_per_type: usize, retain_days: i64) -> Result<u32> {
        let _guard = self.index_lock.lock().await;
        let mut index = self.load_index().await?;
        index.sort_by_key(|b| std::cmp::Reverse(b.created_at));

        let cutoff = Utc::now() - chrono::Duration::days(retain_days);
        let mut kept: Vec<Backup> = Vec::new();
        let mut per_type_count = std::collections::HashMap::new();
        let mut removed = Vec::new();

        for backup in index {
            let count = per_type_count.entry(backup.backup_type).or_insert(0usize);
            *count += 1;
            if *count <= retain_per_type || backup.created_at >= cutoff {
                kept.push(backup);
            } else {
                removed.push(backup);
            }
        }

        for backup in &removed {
            let dir = self.backup_dir(backup.backup_type, &backup.backup_id);
            let _ = tokio::fs::remove_dir_all(&dir).await;
        }

        self.save_index(&kept).await?;
        Ok(removed.len() as u32)
    }
}

fn type_dir(backup_type: BackupType) -> &'static str {
    match backup_type {
        BackupType::ZoneFile => "zone_file",
        BackupType::RpzFile => "rpz_file",
        BackupType::Configuration => "configuration",
        BackupType::FullConfig => "full_config",
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        tokio::fs::write(&path, content).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_create_and_get_backup() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("backups"));
        let src_dir = tempdir().unwrap();
        let file = write_file(src_dir.path(), "example.com.zone", "; zone data\n").await;

        let backup = store.create(BackupType::ZoneFile, vec![file], "pre-edit snapshot").await.unwrap();
        let fetched = store.get(&backup.backup_id).await.unwrap().unwrap();
        assert_eq!(fetched.sha256.len(), 1);
        assert_eq!(fetched.description, "pre-edit snapshot");
    }

    #[tokio::test]
    async fn test_verify_detects_tampering() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("backups"));
        let src_dir = tempdir().unwrap();
        let file = write_file(src_dir.path(), "example.com.zone", "; zone data\n").await;

        let backup = store.create(BackupType::ZoneFile, vec![file], "snapshot").await.unwrap();
        assert!(store.verify(&backup.backup_id).await.unwrap());

        tokio::fs::write(&backup.stored_paths[0], "tampered").await.unwrap();
        assert!(!store.verify(&backup.backup_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_restore_writes_back_to_original_path() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("backups"));
        let src_dir = tempdir().unwrap();
        let file = write_file(src_dir.path(), "example.com.zone", "original\n").await;

        let backup = store.create(BackupType::ZoneFile, vec![file.clone()], "snapshot").await.unwrap();
        tokio::fs::write(&file, "modified\n").await.unwrap();

        store.restore(&backup.backup_id).await.unwrap();
        let restored = tokio::fs::read_to_string(&file).await.unwrap();
        assert_eq!(restored, "original\n");
    }

    #[tokio::test]
    async fn test_restore_creates_pre_restore_backup_of_current_state() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("backups"));
        let src_dir = tempdir().unwrap();
        let file = write_file(src_dir.path(), "example.com.zone", "original\n").await;

        let backup = store.create(BackupType::ZoneFile, vec![file.clone()], "snapshot").await.unwrap();
        tokio::fs::write(&file, "modified\n").await.unwrap();

        let pre_restore = store.restore(&backup.backup_id).await.unwrap();
        let pre_restore = pre_restore.expect("current file existed, so a pre-restore backup should be made");
        assert!(pre_restore.description.starts_with("pre_restore"));
        assert_eq!(pre_restore.backup_type, BackupType::ZoneFile);

        let preserved = tokio::fs::read_to_string(&pre_restore.stored_paths[0]).await.unwrap();
        assert_eq!(preserved, "modified\n");

        assert_eq!(store.list(Some(BackupType::ZoneFile)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_restore_with_no_current_file_skips_pre_restore_backup() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("backups"));
        let src_dir = tempdir().unwrap();
        let file = write_file(src_dir.path(), "example.com.zone", "original\n").await;

        let backup = store.create(BackupType::ZoneFile, vec![file.clone()], "snapshot").await.unwrap();
        tokio::fs::remove_file(&file).await.unwrap();

        let pre_restore = store.restore(&backup.backup_id).await.unwrap();
        assert!(pre_restore.is_none());
        let restored = tokio::fs::read_to_string(&file).await.unwrap();
        assert_eq!(restored, "original\n");
    }

    #[tokio::test]
    async fn test_prune_keeps_minimum_per_type() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("backups"));
        let src_dir = tempdir().unwrap();

        for i in 0..5 {
            let file = write_file(src_dir.path(), &format!("zone{i}.zone"), "data").await;
            store.create(BackupType::ZoneFile, vec![file], "snapshot").await.unwrap();
        }

        let removed = store.prune(2, 0).await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.list(Some(BackupType::ZoneFile)).await.unwrap().len(), 2);
    }
}
