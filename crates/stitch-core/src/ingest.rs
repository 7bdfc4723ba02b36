use crate::error::{Result, StitchError};
use crate::linker::{Linker, SourceMapping};
use crate::storage::{StoreRead, StoreTxn};
use crate::types::{source_label, Entity, EntityId, ROOT_LABEL};

/// Result of ingesting one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub entity: EntityId,
    pub record_id: String,
    /// Stitch edges created while linking the new entity.
    pub edges: usize,
}

/// Turns source payloads into linked entities.
///
/// Every step runs in the caller's transaction: payload registration,
/// entity creation, projection through the mapping and linking.
pub struct Ingestor<'a> {
    linker: &'a Linker,
    mapping: &'a SourceMapping,
}

impl<'a> Ingestor<'a> {
    pub fn new(linker: &'a Linker, mapping: &'a SourceMapping) -> Self {
        Self { linker, mapping }
    }

    pub fn ingest<T: StoreTxn>(
        &self,
        txn: &mut T,
        source: &str,
        payload: &serde_json::Value,
    ) -> Result<Ingested> {
        let data_source = txn.data_source(source)?;
        let mut entity = Entity::new(source, String::new());
        entity.record_id = match &data_source.id_field {
            Some(field) => record_id(payload, field).ok_or_else(|| {
                StitchError::Validation(format!(
                    "payload for {} has no usable id field '{}'",
                    source, field
                ))
            })?,
            None => entity.id.to_string(),
        };

        if txn.get_payload(source, &entity.record_id)?.is_some() {
            return Err(StitchError::Validation(format!(
                "record {} already ingested from {}",
                entity.record_id, source
            )));
        }

        txn.put_payload(source, &entity.record_id, payload)?;
        txn.put_entity(&entity)?;
        txn.add_label(entity.id, ROOT_LABEL)?;
        txn.add_label(entity.id, &source_label(source))?;

        let mut edges = 0;
        for (key, value) in self.mapping.project(payload) {
            edges += self.linker.stitch(txn, entity.id, key, &value)?;
        }

        log::debug!(
            "Ingested {}:{} as {} ({} edges)",
            source,
            entity.record_id,
            entity.id,
            edges
        );
        Ok(Ingested {
            entity: entity.id,
            record_id: entity.record_id,
            edges,
        })
    }
}

fn record_id(payload: &serde_json::Value, field: &str) -> Option<String> {
    match payload.get(field)? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
