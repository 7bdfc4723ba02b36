use crate::error::{Result, StitchError};
use crate::keys::StitchKey;
use crate::storage::stats::StorageStats;
use crate::storage::traits::{Storage, StoreRead, StoreTxn};
use crate::types::{
    DataSource, EdgeId, Entity, EntityId, Stitch, StitchEdge, StitchId, ROOT_LABEL,
};
use crate::value::Scalar;
use redb::backends::InMemoryBackend;
use redb::{
    Database, MultimapTableDefinition, ReadTransaction, ReadableMultimapTable, ReadableTable,
    TableDefinition, WriteTransaction,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

// Table definitions
const ENTITIES: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("entities");
const EDGES: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("stitch_edges");
const STITCHES: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("stitches");
const DATA_SOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("data_sources");
const PAYLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("payloads");

// Secondary indexes
const EDGES_BY_FROM: MultimapTableDefinition<&[u8; 16], &[u8; 16]> =
    MultimapTableDefinition::new("edges_by_from");
const EDGES_BY_TO: MultimapTableDefinition<&[u8; 16], &[u8; 16]> =
    MultimapTableDefinition::new("edges_by_to");
const STITCH_INDEX: MultimapTableDefinition<&str, &[u8; 16]> =
    MultimapTableDefinition::new("stitch_index");
const LABELS: MultimapTableDefinition<&str, &[u8; 16]> = MultimapTableDefinition::new("labels");
const ENTITY_LABELS: MultimapTableDefinition<&[u8; 16], &str> =
    MultimapTableDefinition::new("entity_labels");

// Metadata table
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;
const SCHEMA_VERSION_KEY: &str = "schema_version";
const STATS_ENTITY_COUNT_KEY: &str = "stats:entity_count";
const STATS_EDGE_COUNT_KEY: &str = "stats:edge_count";
const STATS_STITCH_COUNT_KEY: &str = "stats:stitch_count";

/// Separator for composite string keys; never appears in identifiers.
const SEP: char = '\u{1f}';

fn id_bytes(id: &Uuid) -> [u8; 16] {
    *id.as_bytes()
}

fn bytes_id(bytes: &[u8; 16]) -> Uuid {
    Uuid::from_bytes(*bytes)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(StitchError::from)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(StitchError::from)
}

fn index_key(key: StitchKey, value: &Scalar) -> String {
    format!("{}{}{}", key.as_str(), SEP, value.index_token())
}

fn payload_key(source: &str, record_id: &str) -> String {
    format!("{}{}{}", source, SEP, record_id)
}

fn read_counter(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    if bytes.len() == 8 {
        buf.copy_from_slice(bytes);
    }
    u64::from_le_bytes(buf)
}

/// Redb-based graph store
pub struct RedbStorage {
    db: Arc<Database>,
    path: Option<PathBuf>,
}

impl RedbStorage {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StitchError::Validation(format!("Failed to create directory: {}", e))
            })?;
        }

        let is_new = !path.exists();
        let db = Database::create(&path)?;

        if !is_new {
            Self::check_schema_version(&db)?;
        }
        Self::init_tables(&db, is_new)?;

        Ok(Self {
            db: Arc::new(db),
            path: Some(path),
        })
    }

    /// Create a database that lives only in memory. Used by tests and
    /// throwaway resolution runs.
    pub fn in_memory() -> Result<Self> {
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::init_tables(&db, true)?;
        Ok(Self {
            db: Arc::new(db),
            path: None,
        })
    }

    fn init_tables(db: &Database, write_version: bool) -> Result<()> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ENTITIES)?;
            let _ = write_txn.open_table(EDGES)?;
            let _ = write_txn.open_table(STITCHES)?;
            let _ = write_txn.open_table(DATA_SOURCES)?;
            let _ = write_txn.open_table(PAYLOADS)?;
            let _ = write_txn.open_multimap_table(EDGES_BY_FROM)?;
            let _ = write_txn.open_multimap_table(EDGES_BY_TO)?;
            let _ = write_txn.open_multimap_table(STITCH_INDEX)?;
            let _ = write_txn.open_multimap_table(LABELS)?;
            let _ = write_txn.open_multimap_table(ENTITY_LABELS)?;
            let mut meta = write_txn.open_table(META)?;
            if write_version {
                meta.insert(SCHEMA_VERSION_KEY, CURRENT_SCHEMA_VERSION.to_string().as_bytes())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Check schema version. Returns error if the file was written by a
    /// different schema.
    fn check_schema_version(db: &Database) -> Result<()> {
        let read_txn = db.begin_read()?;
        let version = {
            let table = read_txn.open_table(META).ok();
            table
                .and_then(|t| {
                    t.get(SCHEMA_VERSION_KEY).ok().flatten().and_then(|v| {
                        std::str::from_utf8(v.value())
                            .ok()
                            .and_then(|s| s.parse::<u32>().ok())
                    })
                })
                .unwrap_or(CURRENT_SCHEMA_VERSION)
        };

        match version.cmp(&CURRENT_SCHEMA_VERSION) {
            std::cmp::Ordering::Equal => Ok(()),
            std::cmp::Ordering::Less => Err(StitchError::Validation(format!(
                "Database schema v{} is older than current v{}",
                version, CURRENT_SCHEMA_VERSION
            ))),
            std::cmp::Ordering::Greater => Err(StitchError::Validation(format!(
                "Database schema v{} is newer than this build v{}",
                version, CURRENT_SCHEMA_VERSION
            ))),
        }
    }

    /// Database file path, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Storage for RedbStorage {
    type Txn = RedbTxn;
    type ReadTxn = RedbReadTxn;

    fn begin(&self) -> Result<RedbTxn> {
        Ok(RedbTxn {
            txn: self.db.begin_write()?,
        })
    }

    fn begin_read(&self) -> Result<RedbReadTxn> {
        Ok(RedbReadTxn {
            txn: self.db.begin_read()?,
        })
    }

    fn stats(&self) -> Result<StorageStats> {
        let read_txn = self.db.begin_read()?;

        let (entity_count, edge_count, stitch_count) = {
            let meta = read_txn.open_table(META)?;
            let counter = |key: &str| -> Result<u64> {
                Ok(meta.get(key)?.map(|v| read_counter(v.value())).unwrap_or(0))
            };
            (
                counter(STATS_ENTITY_COUNT_KEY)?,
                counter(STATS_EDGE_COUNT_KEY)?,
                counter(STATS_STITCH_COUNT_KEY)?,
            )
        };

        let component_count = {
            let labels = read_txn.open_multimap_table(LABELS)?;
            labels.get(ROOT_LABEL)?.count() as u64
        };

        let data_source_count = {
            let sources = read_txn.open_table(DATA_SOURCES)?;
            sources.iter()?.count() as u64
        };

        let mut edge_counts_by_key = HashMap::new();
        {
            let edges = read_txn.open_table(EDGES)?;
            for item in edges.iter()? {
                let (_, value) = item?;
                let edge: StitchEdge = decode(value.value())?;
                *edge_counts_by_key.entry(edge.key).or_insert(0) += 1;
            }
        }

        let db_size_bytes = self
            .path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(StorageStats {
            entity_count,
            edge_count,
            stitch_count,
            component_count,
            data_source_count,
            edge_counts_by_key,
            db_size_bytes,
        })
    }
}

/// Write transaction over a [`RedbStorage`]. Aborted on drop unless committed.
pub struct RedbTxn {
    txn: WriteTransaction,
}

/// Read-only snapshot over a [`RedbStorage`].
pub struct RedbReadTxn {
    txn: ReadTransaction,
}

/// Read operations are identical over both transaction kinds; only the
/// table handle types differ.
macro_rules! impl_store_read {
    ($ty:ty) => {
        impl $ty {
            fn edge_ids(&self, id: EntityId) -> Result<BTreeSet<EdgeId>> {
                let bytes = id_bytes(&id);
                let mut ids = BTreeSet::new();
                {
                    let from_index = self.txn.open_multimap_table(EDGES_BY_FROM)?;
                    for item in from_index.get(&bytes)? {
                        ids.insert(bytes_id(item?.value()));
                    }
                }
                {
                    let to_index = self.txn.open_multimap_table(EDGES_BY_TO)?;
                    for item in to_index.get(&bytes)? {
                        ids.insert(bytes_id(item?.value()));
                    }
                }
                Ok(ids)
            }

            fn get_edge(&self, id: EdgeId) -> Result<Option<StitchEdge>> {
                let edges = self.txn.open_table(EDGES)?;
                let bytes = edges.get(&id_bytes(&id))?.map(|g| g.value().to_vec());
                bytes.map(|b| decode(&b)).transpose()
            }
        }

        impl StoreRead for $ty {
            fn get_entity(&self, id: EntityId) -> Result<Option<Entity>> {
                let table = self.txn.open_table(ENTITIES)?;
                let bytes = table.get(&id_bytes(&id))?.map(|g| g.value().to_vec());
                bytes.map(|b| decode(&b)).transpose()
            }

            fn has_label(&self, id: EntityId, label: &str) -> Result<bool> {
                let entity_labels = self.txn.open_multimap_table(ENTITY_LABELS)?;
                for item in entity_labels.get(&id_bytes(&id))? {
                    if item?.value() == label {
                        return Ok(true);
                    }
                }
                Ok(false)
            }

            fn labeled(&self, label: &str) -> Result<Vec<EntityId>> {
                let labels = self.txn.open_multimap_table(LABELS)?;
                let mut ids = Vec::new();
                for item in labels.get(label)? {
                    ids.push(bytes_id(item?.value()));
                }
                ids.sort();
                Ok(ids)
            }

            fn entity_ids(&self) -> Result<Vec<EntityId>> {
                let table = self.txn.open_table(ENTITIES)?;
                let mut ids = Vec::new();
                for item in table.iter()? {
                    let (key, _) = item?;
                    ids.push(bytes_id(key.value()));
                }
                Ok(ids)
            }

            fn edges_of(&self, id: EntityId) -> Result<Vec<StitchEdge>> {
                let ids = self.edge_ids(id)?;
                let mut edges = Vec::with_capacity(ids.len());
                for edge_id in ids {
                    if let Some(edge) = self.get_edge(edge_id)? {
                        edges.push(edge);
                    }
                }
                Ok(edges)
            }

            fn index_lookup(&self, key: StitchKey, value: &Scalar) -> Result<Vec<EntityId>> {
                let index = self.txn.open_multimap_table(STITCH_INDEX)?;
                let mut ids = Vec::new();
                for item in index.get(index_key(key, value).as_str())? {
                    ids.push(bytes_id(item?.value()));
                }
                ids.sort();
                Ok(ids)
            }

            fn get_data_source(&self, key: &str) -> Result<Option<DataSource>> {
                let table = self.txn.open_table(DATA_SOURCES)?;
                let bytes = table.get(key)?.map(|g| g.value().to_vec());
                bytes.map(|b| decode(&b)).transpose()
            }

            fn get_payload(
                &self,
                source: &str,
                record_id: &str,
            ) -> Result<Option<serde_json::Value>> {
                let table = self.txn.open_table(PAYLOADS)?;
                let bytes = table
                    .get(payload_key(source, record_id).as_str())?
                    .map(|g| g.value().to_vec());
                match bytes {
                    Some(b) => Ok(Some(serde_json::from_slice(&b)?)),
                    None => Ok(None),
                }
            }

            fn get_stitch(&self, id: StitchId) -> Result<Option<Stitch>> {
                let table = self.txn.open_table(STITCHES)?;
                let bytes = table.get(&id_bytes(&id))?.map(|g| g.value().to_vec());
                bytes.map(|b| decode(&b)).transpose()
            }

            fn get_metadata(&self, key: &str) -> Result<Option<Vec<u8>>> {
                let meta = self.txn.open_table(META)?;
                let value = meta.get(key)?.map(|v| v.value().to_vec());
                Ok(value)
            }
        }
    };
}

impl_store_read!(RedbTxn);
impl_store_read!(RedbReadTxn);

impl RedbTxn {
    fn bump_counter(&self, key: &str, delta: i64) -> Result<()> {
        let mut meta = self.txn.open_table(META)?;
        let current = meta.get(key)?.map(|v| read_counter(v.value())).unwrap_or(0);
        let next = if delta >= 0 {
            current.saturating_add(delta as u64)
        } else {
            current.saturating_sub(delta.unsigned_abs())
        };
        meta.insert(key, next.to_le_bytes().as_slice())?;
        Ok(())
    }
}

impl StoreTxn for RedbTxn {
    fn put_entity(&mut self, entity: &Entity) -> Result<()> {
        entity.validate().map_err(StitchError::Validation)?;

        let key = id_bytes(&entity.id);
        let data = encode(entity)?;
        let existed = {
            let mut table = self.txn.open_table(ENTITIES)?;
            let old = table.insert(&key, data.as_slice())?;
            old.is_some()
        };
        if !existed {
            self.bump_counter(STATS_ENTITY_COUNT_KEY, 1)?;
        }
        Ok(())
    }

    fn add_label(&mut self, id: EntityId, label: &str) -> Result<()> {
        let key = id_bytes(&id);
        {
            let mut labels = self.txn.open_multimap_table(LABELS)?;
            labels.insert(label, &key)?;
        }
        {
            let mut entity_labels = self.txn.open_multimap_table(ENTITY_LABELS)?;
            entity_labels.insert(&key, label)?;
        }
        Ok(())
    }

    fn remove_label(&mut self, id: EntityId, label: &str) -> Result<()> {
        let key = id_bytes(&id);
        {
            let mut labels = self.txn.open_multimap_table(LABELS)?;
            labels.remove(label, &key)?;
        }
        {
            let mut entity_labels = self.txn.open_multimap_table(ENTITY_LABELS)?;
            entity_labels.remove(&key, label)?;
        }
        Ok(())
    }

    fn put_edge(&mut self, edge: &StitchEdge) -> Result<()> {
        edge.validate().map_err(StitchError::Validation)?;

        // Both endpoints must exist
        for endpoint in [edge.from, edge.to] {
            if self.get_entity(endpoint)?.is_none() {
                return Err(StitchError::EntityNotFound(endpoint));
            }
        }

        let edge_key = id_bytes(&edge.id);
        let data = encode(edge)?;
        let existed = {
            let mut edges = self.txn.open_table(EDGES)?;
            let old = edges.insert(&edge_key, data.as_slice())?;
            old.is_some()
        };
        {
            let mut from_index = self.txn.open_multimap_table(EDGES_BY_FROM)?;
            from_index.insert(&id_bytes(&edge.from), &edge_key)?;
        }
        {
            let mut to_index = self.txn.open_multimap_table(EDGES_BY_TO)?;
            to_index.insert(&id_bytes(&edge.to), &edge_key)?;
        }
        if !existed {
            self.bump_counter(STATS_EDGE_COUNT_KEY, 1)?;
        }
        Ok(())
    }

    fn delete_edge(&mut self, id: EdgeId) -> Result<()> {
        let edge = match self.get_edge(id)? {
            Some(edge) => edge,
            None => return Ok(()),
        };
        let edge_key = id_bytes(&id);

        // Remove from indexes first
        {
            let mut from_index = self.txn.open_multimap_table(EDGES_BY_FROM)?;
            from_index.remove(&id_bytes(&edge.from), &edge_key)?;
        }
        {
            let mut to_index = self.txn.open_multimap_table(EDGES_BY_TO)?;
            to_index.remove(&id_bytes(&edge.to), &edge_key)?;
        }
        {
            let mut edges = self.txn.open_table(EDGES)?;
            edges.remove(&edge_key)?;
        }
        self.bump_counter(STATS_EDGE_COUNT_KEY, -1)
    }

    fn index_insert(&mut self, key: StitchKey, value: &Scalar, id: EntityId) -> Result<()> {
        let mut index = self.txn.open_multimap_table(STITCH_INDEX)?;
        index.insert(index_key(key, value).as_str(), &id_bytes(&id))?;
        Ok(())
    }

    fn index_remove(&mut self, key: StitchKey, value: &Scalar, id: EntityId) -> Result<()> {
        let mut index = self.txn.open_multimap_table(STITCH_INDEX)?;
        index.remove(index_key(key, value).as_str(), &id_bytes(&id))?;
        Ok(())
    }

    fn put_data_source(&mut self, source: &DataSource) -> Result<()> {
        source.validate().map_err(StitchError::Validation)?;
        let data = encode(source)?;
        let mut table = self.txn.open_table(DATA_SOURCES)?;
        table.insert(source.key.as_str(), data.as_slice())?;
        Ok(())
    }

    fn put_payload(
        &mut self,
        source: &str,
        record_id: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let data = serde_json::to_vec(payload)?;
        let mut table = self.txn.open_table(PAYLOADS)?;
        table.insert(payload_key(source, record_id).as_str(), data.as_slice())?;
        Ok(())
    }

    fn put_stitch(&mut self, stitch: &Stitch) -> Result<()> {
        let data = encode(stitch)?;
        let existed = {
            let mut table = self.txn.open_table(STITCHES)?;
            let old = table.insert(&id_bytes(&stitch.id), data.as_slice())?;
            old.is_some()
        };
        if !existed {
            self.bump_counter(STATS_STITCH_COUNT_KEY, 1)?;
        }
        Ok(())
    }

    fn put_metadata(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let mut meta = self.txn.open_table(META)?;
        meta.insert(key, value)?;
        Ok(())
    }

    fn commit(self) -> Result<()> {
        self.txn.commit()?;
        Ok(())
    }
}
