/// Upgrade of legacy single-session snapshots.
pub mod migration;
/// Persisted snapshot document definitions.
pub mod models;
/// Snapshot store backends.
pub mod snapshot_store;
/// Storage errors shared by the backends.
pub mod storage;
