use crate::error::{Result, StitchError};
use crate::keys::StitchKey;
use crate::storage::stats::StorageStats;
use crate::types::{DataSource, EdgeId, Entity, EntityId, Stitch, StitchEdge, StitchId};
use crate::value::Scalar;

/// Graph store collaborator. Every mutation goes through a [`StoreTxn`].
pub trait Storage: Send + Sync {
    type Txn: StoreTxn;
    type ReadTxn: StoreRead;

    /// Open a read-write transaction. Dropping it without `commit` rolls back.
    /// Only one may be open at a time.
    fn begin(&self) -> Result<Self::Txn>;

    /// Open a snapshot for reading. Never waits on an open writer.
    fn begin_read(&self) -> Result<Self::ReadTxn>;

    /// Database statistics
    fn stats(&self) -> Result<StorageStats>;

    /// Run `f` inside one transaction: commit on `Ok`, roll back on `Err`.
    fn with_txn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self::Txn) -> Result<T>,
        Self: Sized,
    {
        let mut txn = self.begin()?;
        let out = f(&mut txn)?;
        txn.commit()?;
        Ok(out)
    }
}

/// Read access shared by snapshots and write transactions.
pub trait StoreRead {
    // === Entity Operations ===

    /// Retrieve an entity by ID
    fn get_entity(&self, id: EntityId) -> Result<Option<Entity>>;

    /// Retrieve an entity that must exist
    fn entity(&self, id: EntityId) -> Result<Entity> {
        self.get_entity(id)?.ok_or(StitchError::EntityNotFound(id))
    }

    // === Labels ===

    fn has_label(&self, id: EntityId, label: &str) -> Result<bool>;

    /// All entities carrying `label`, sorted by id
    fn labeled(&self, label: &str) -> Result<Vec<EntityId>>;

    /// Every entity id, ascending
    fn entity_ids(&self) -> Result<Vec<EntityId>>;

    // === Edge Operations ===

    /// Every edge incident to `id`, in either direction
    fn edges_of(&self, id: EntityId) -> Result<Vec<StitchEdge>>;

    /// Edges of one key incident to `id`
    fn edges_of_key(&self, id: EntityId, key: StitchKey) -> Result<Vec<StitchEdge>> {
        Ok(self
            .edges_of(id)?
            .into_iter()
            .filter(|e| e.key == key)
            .collect())
    }

    /// Entities indexed under `(key, value)`, sorted by id
    fn index_lookup(&self, key: StitchKey, value: &Scalar) -> Result<Vec<EntityId>>;

    fn get_data_source(&self, key: &str) -> Result<Option<DataSource>>;

    fn data_source(&self, key: &str) -> Result<DataSource> {
        self.get_data_source(key)?
            .ok_or_else(|| StitchError::DataSourceNotFound(key.to_string()))
    }

    /// Source payload by (source, record id)
    fn get_payload(&self, source: &str, record_id: &str) -> Result<Option<serde_json::Value>>;

    fn get_stitch(&self, id: StitchId) -> Result<Option<Stitch>>;

    fn get_metadata(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// One read-write transaction against the graph store.
pub trait StoreTxn: StoreRead {
    /// Store an entity (insert or update)
    fn put_entity(&mut self, entity: &Entity) -> Result<()>;

    fn add_label(&mut self, id: EntityId, label: &str) -> Result<()>;

    fn remove_label(&mut self, id: EntityId, label: &str) -> Result<()>;

    /// Store an edge (insert or update)
    fn put_edge(&mut self, edge: &StitchEdge) -> Result<()>;

    /// Delete an edge (hard delete)
    fn delete_edge(&mut self, id: EdgeId) -> Result<()>;

    // === Stitch Index: (key, value) -> entities ===

    fn index_insert(&mut self, key: StitchKey, value: &Scalar, id: EntityId) -> Result<()>;

    fn index_remove(&mut self, key: StitchKey, value: &Scalar, id: EntityId) -> Result<()>;

    // === DataSource Registry ===

    fn put_data_source(&mut self, source: &DataSource) -> Result<()>;

    fn put_payload(&mut self, source: &str, record_id: &str, payload: &serde_json::Value)
        -> Result<()>;

    fn put_stitch(&mut self, stitch: &Stitch) -> Result<()>;

    fn put_metadata(&mut self, key: &str, value: &[u8]) -> Result<()>;

    /// Make every change of this transaction durable
    fn commit(self) -> Result<()>
    where
        Self: Sized;
}
