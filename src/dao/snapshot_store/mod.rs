mod file;
mod memory;

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::dao::{
    models::{SnapshotDocument, StoredDocument},
    storage::StorageResult,
};

pub use self::file::FileSnapshotStore;
pub use self::memory::MemorySnapshotStore;

/// Durable home of the engine snapshot.
pub trait SnapshotStore: Send + Sync {
    /// Read the primary snapshot; `None` when nothing was ever saved.
    fn load(&self) -> BoxFuture<'static, StorageResult<Option<StoredDocument>>>;
    /// Read the newest backup that still parses.
    fn load_backup(&self) -> BoxFuture<'static, StorageResult<Option<StoredDocument>>>;
    /// Atomically replace the primary snapshot, rotating the previous one into the backups.
    fn save(&self, snapshot: Arc<SnapshotDocument>) -> BoxFuture<'static, StorageResult<()>>;
    /// Check that the medium is reachable and writable.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Human readable location, for logs.
    fn describe(&self) -> String;
}

fn encode(snapshot: &SnapshotDocument) -> StorageResult<Vec<u8>> {
    serde_json::to_vec_pretty(snapshot)
        .map_err(|err| crate::dao::storage::StorageError::Encode(Box::new(err)))
}
