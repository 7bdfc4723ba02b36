mod redb_storage;
mod stats;
mod traits;

pub use redb_storage::{RedbReadTxn, RedbStorage, RedbTxn, CURRENT_SCHEMA_VERSION};
pub use stats::StorageStats;
pub use traits::{Storage, StoreRead, StoreTxn};
