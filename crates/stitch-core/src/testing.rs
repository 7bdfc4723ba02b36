//! Shared fixtures for unit tests.

use crate::graph::ComponentGraph;
use crate::keys::StitchKey;
use crate::linker::Linker;
use crate::storage::{RedbStorage, Storage, StoreTxn};
use crate::types::{Entity, EntityId, ROOT_LABEL};
use crate::value::Value;
use uuid::Uuid;

pub(crate) fn id(n: u128) -> EntityId {
    Uuid::from_u128(n)
}

/// In-memory store plus a linker; entities get small, ordered ids.
pub(crate) struct Fixture {
    pub storage: RedbStorage,
    pub linker: Linker,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            storage: RedbStorage::in_memory().unwrap(),
            linker: Linker::new(),
        }
    }

    /// Create entity `n` and stitch every given value.
    pub fn add(&self, n: u128, values: &[(StitchKey, Value)]) -> EntityId {
        let entity = Entity::with_id(id(n), "test", format!("r{}", n));
        self.storage
            .with_txn(|txn| {
                txn.put_entity(&entity)?;
                txn.add_label(entity.id, ROOT_LABEL)?;
                for (key, value) in values {
                    self.linker.stitch(txn, entity.id, *key, value)?;
                }
                Ok(())
            })
            .unwrap();
        entity.id
    }

    pub fn graph(&self, seed: EntityId) -> ComponentGraph {
        let txn = self.storage.begin_read().unwrap();
        ComponentGraph::load(&txn, seed).unwrap()
    }
}

pub(crate) fn v(s: &str) -> Value {
    Value::single(s)
}
