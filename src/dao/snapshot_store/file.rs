use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::future::BoxFuture;
use time::{OffsetDateTime, macros::format_description};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dao::{
    migration::decode_document,
    models::{SnapshotDocument, StoredDocument},
    snapshot_store::{SnapshotStore, encode},
    storage::{StorageError, StorageResult},
};

const BACKUP_PREFIX: &str = "snapshot-";

/// JSON snapshot on the local filesystem with rotated backups.
#[derive(Clone, Debug)]
pub struct FileSnapshotStore {
    path: Arc<PathBuf>,
    backup_dir: Arc<PathBuf>,
    keep: usize,
}

impl FileSnapshotStore {
    /// Store writing `path` and keeping the `keep` most recent backups in `backup_dir`.
    pub fn new(path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>, keep: usize) -> Self {
        Self {
            path: Arc::new(path.into()),
            backup_dir: Arc::new(backup_dir.into()),
            keep,
        }
    }

    async fn read(path: &Path) -> StorageResult<Option<StoredDocument>> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(StorageError::unavailable(
                    format!("failed to read {}", path.display()),
                    err,
                ));
            }
        };
        decode_document(&bytes, &path.display().to_string()).map(Some)
    }

    /// Backup files, newest first.
    async fn backups(&self) -> StorageResult<Vec<PathBuf>> {
        let mut entries = match fs::read_dir(self.backup_dir.as_path()).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(StorageError::unavailable(
                    format!("failed to list {}", self.backup_dir.display()),
                    err,
                ));
            }
        };

        let mut backups = Vec::new();
        loop {
            let entry = entries.next_entry().await.map_err(|err| {
                StorageError::unavailable(
                    format!("failed to list {}", self.backup_dir.display()),
                    err,
                )
            })?;
            let Some(entry) = entry else { break };
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(BACKUP_PREFIX) && name.ends_with(".json") {
                backups.push(entry.path());
            }
        }
        backups.sort();
        backups.reverse();
        Ok(backups)
    }

    async fn rotate(&self, revision: u64) -> StorageResult<()> {
        if fs::metadata(self.path.as_path()).await.is_err() {
            return Ok(());
        }
        fs::create_dir_all(self.backup_dir.as_path())
            .await
            .map_err(|err| {
                StorageError::unavailable(
                    format!("failed to create {}", self.backup_dir.display()),
                    err,
                )
            })?;

        let stamp = OffsetDateTime::now_utc()
            .format(format_description!(
                "[year][month][day]T[hour][minute][second]"
            ))
            .unwrap_or_else(|_| "unknown".to_string());
        let target = self
            .backup_dir
            .join(format!("{BACKUP_PREFIX}{stamp}-r{revision:012}.json"));
        fs::copy(self.path.as_path(), &target)
            .await
            .map_err(|err| {
                StorageError::unavailable(format!("failed to back up to {}", target.display()), err)
            })?;

        for stale in self.backups().await?.into_iter().skip(self.keep) {
            if let Err(err) = fs::remove_file(&stale).await {
                warn!(path = %stale.display(), error = %err, "failed to prune old backup");
            }
        }
        Ok(())
    }

    async fn write_atomically(&self, bytes: &[u8]) -> StorageResult<()> {
        let unavailable = |what: &str, err: std::io::Error| {
            StorageError::unavailable(format!("{what} {}", self.path.display()), err)
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| unavailable("failed to create directory for", err))?;
        }

        let temp = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        let result: std::io::Result<()> = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp, self.path.as_path()).await
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&temp).await;
            return Err(unavailable("failed to write", err));
        }
        Ok(())
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> BoxFuture<'static, StorageResult<Option<StoredDocument>>> {
        let store = self.clone();
        Box::pin(async move { Self::read(store.path.as_path()).await })
    }

    fn load_backup(&self) -> BoxFuture<'static, StorageResult<Option<StoredDocument>>> {
        let store = self.clone();
        Box::pin(async move {
            for path in store.backups().await? {
                match Self::read(&path).await {
                    Ok(Some(document)) => {
                        debug!(path = %path.display(), "using backup snapshot");
                        return Ok(Some(document));
                    }
                    Ok(None) => continue,
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "skipping unreadable backup");
                    }
                }
            }
            Ok(None)
        })
    }

    fn save(&self, snapshot: Arc<SnapshotDocument>) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let bytes = encode(&snapshot)?;
            store.rotate(snapshot.revision).await?;
            store.write_atomically(&bytes).await
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let dir = store
                .path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."))
                .to_path_buf();
            fs::create_dir_all(&dir).await.map_err(|err| {
                StorageError::unavailable(format!("failed to create {}", dir.display()), err)
            })?;
            let metadata = fs::metadata(&dir).await.map_err(|err| {
                StorageError::unavailable(format!("failed to stat {}", dir.display()), err)
            })?;
            if metadata.permissions().readonly() {
                return Err(StorageError::unavailable(
                    format!("{} is read-only", dir.display()),
                    std::io::Error::from(ErrorKind::PermissionDenied),
                ));
            }
            Ok(())
        })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
