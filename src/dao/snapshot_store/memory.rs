use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use futures::future::BoxFuture;

use crate::dao::{
    migration::decode_document,
    models::{SnapshotDocument, StoredDocument},
    snapshot_store::{SnapshotStore, encode},
    storage::{StorageError, StorageResult},
};

#[derive(Default)]
struct Inner {
    primary: Mutex<Option<Vec<u8>>>,
    backups: Mutex<Vec<Vec<u8>>>,
    failing: AtomicBool,
    saves: AtomicUsize,
}

/// Process-local store holding encoded snapshots, for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct MemorySnapshotStore {
    inner: Arc<Inner>,
    keep: usize,
}

impl MemorySnapshotStore {
    /// Empty store retaining `keep` backups.
    pub fn new(keep: usize) -> Self {
        Self {
            inner: Arc::default(),
            keep,
        }
    }

    /// Seed the primary slot with raw bytes, e.g. a legacy document.
    pub fn with_primary(self, bytes: impl Into<Vec<u8>>) -> Self {
        *self
            .inner
            .primary
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(bytes.into());
        self
    }

    /// Make subsequent loads, saves and health checks fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.inner.saves.load(Ordering::SeqCst)
    }

    /// Decoded primary snapshot, if any.
    pub fn current(&self) -> Option<SnapshotDocument> {
        let primary = self
            .inner
            .primary
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()?;
        match decode_document(&primary, "memory").ok()? {
            StoredDocument::Current(snapshot) => Some(snapshot),
            StoredDocument::Legacy(_) => None,
        }
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(
                "memory store switched off".into(),
                std::io::Error::from(std::io::ErrorKind::Other),
            ));
        }
        Ok(())
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> BoxFuture<'static, StorageResult<Option<StoredDocument>>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_available()?;
            let primary = store
                .inner
                .primary
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            primary
                .map(|bytes| decode_document(&bytes, "memory"))
                .transpose()
        })
    }

    fn load_backup(&self) -> BoxFuture<'static, StorageResult<Option<StoredDocument>>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_available()?;
            let backups = store
                .inner
                .backups
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            Ok(backups
                .iter()
                .rev()
                .find_map(|bytes| decode_document(bytes, "memory backup").ok()))
        })
    }

    fn save(&self, snapshot: Arc<SnapshotDocument>) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.check_available()?;
            let bytes = encode(&snapshot)?;
            let previous = store
                .inner
                .primary
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .replace(bytes);
            if let Some(previous) = previous {
                let mut backups = store
                    .inner
                    .backups
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                backups.push(previous);
                let excess = backups.len().saturating_sub(store.keep);
                backups.drain(..excess);
            }
            store.inner.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.check_available() })
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}
