use crate::keys::StitchKey;
use crate::value::{Scalar, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Type alias for entity identifiers. UUIDv7, so a smaller id is an older node.
pub type EntityId = Uuid;

/// Type alias for stitch edge identifiers
pub type EdgeId = Uuid;

/// Deterministic id of a connected component (hash of its sorted member ids)
pub type ComponentId = Uuid;

/// Deterministic id of a materialized stitch
pub type StitchId = Uuid;

/// Namespace for every deterministic (v5) id minted by this crate.
pub const STITCH_NAMESPACE: Uuid = Uuid::from_u128(0x5f1c_8e2a_4b7d_4c39_9a61_0d3e_7b24_c851);

/// Label carried by every entity that is currently a union-find root.
pub const ROOT_LABEL: &str = "COMPONENT";

/// Label carried by every entity ingested from a source.
pub fn source_label(source_key: &str) -> String {
    format!("S_{}", source_key)
}

/// Component id for a set of member ids. Order of the input does not matter.
pub fn component_id<'a, I>(members: I) -> ComponentId
where
    I: IntoIterator<Item = &'a EntityId>,
{
    let sorted: BTreeSet<&EntityId> = members.into_iter().collect();
    let mut bytes = Vec::with_capacity(sorted.len() * 16);
    for id in sorted {
        bytes.extend_from_slice(id.as_bytes());
    }
    Uuid::new_v5(&STITCH_NAMESPACE, &bytes)
}

/// Stitch id for a (data source, component) pair.
pub fn stitch_id(source_key: &str, component: ComponentId) -> StitchId {
    let key = format!("{}:{}", source_key, component);
    Uuid::new_v5(&STITCH_NAMESPACE, key.as_bytes())
}

/// One source record (or resolved aggregate) taking part in stitching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub id: EntityId,

    /// Key of the DataSource this record came from.
    pub source: String,

    /// Record id inside its source payload set.
    pub record_id: String,

    /// Current stitch values per key.
    pub stitches: BTreeMap<StitchKey, Value>,

    /// Union-find parent. A root points at itself.
    pub parent: Option<EntityId>,

    /// Union-find rank; on a root it is the size of the component.
    pub rank: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(source: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self::with_id(Uuid::now_v7(), source, record_id)
    }

    pub fn with_id(id: EntityId, source: impl Into<String>, record_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Entity {
            id,
            source: source.into(),
            record_id: record_id.into(),
            stitches: BTreeMap::new(),
            parent: Some(id),
            rank: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn value(&self, key: StitchKey) -> Option<&Value> {
        self.stitches.get(&key)
    }

    pub fn is_root(&self) -> bool {
        self.parent == Some(self.id)
    }

    pub fn payload_ref(&self) -> PayloadRef {
        PayloadRef {
            source: self.source.clone(),
            record_id: self.record_id.clone(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.source.is_empty() {
            return Err("Entity source key is empty".to_string());
        }
        if self.record_id.is_empty() {
            return Err("Entity record id is empty".to_string());
        }
        if self.rank == 0 {
            return Err(format!("Entity {} has rank 0", self.id));
        }
        for (key, value) in &self.stitches {
            if value.check_type(key.as_str(), key.value_type()).is_err() {
                return Err(format!("Entity {} has mistyped value for {}", self.id, key));
            }
        }
        Ok(())
    }
}

/// A typed, valued stitch link between two entities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StitchEdge {
    pub id: EdgeId,
    pub from: EntityId,
    pub to: EntityId,
    pub key: StitchKey,
    pub value: Scalar,
    pub created_at: DateTime<Utc>,
}

impl StitchEdge {
    pub fn new(from: EntityId, to: EntityId, key: StitchKey, value: Scalar) -> Self {
        StitchEdge {
            id: Uuid::now_v7(),
            from,
            to,
            key,
            value,
            created_at: Utc::now(),
        }
    }

    /// The endpoint that is not `id`.
    pub fn other(&self, id: EntityId) -> EntityId {
        if self.from == id {
            self.to
        } else {
            self.from
        }
    }

    pub fn touches(&self, id: EntityId) -> bool {
        self.from == id || self.to == id
    }

    /// Same key and value between the same pair, in either direction.
    pub fn links(&self, a: EntityId, b: EntityId, key: StitchKey, value: &Scalar) -> bool {
        self.key == key
            && &self.value == value
            && ((self.from == a && self.to == b) || (self.from == b && self.to == a))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.from == self.to {
            return Err("Self-edges are not allowed".to_string());
        }
        if self.value.value_type() != self.key.value_type() {
            return Err(format!(
                "Edge value {} does not match {} type {}",
                self.value,
                self.key,
                self.key.value_type()
            ));
        }
        Ok(())
    }
}

/// Registry entry for one ingestion batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataSource {
    pub key: String,
    pub name: String,

    /// Payload field holding the record id.
    pub id_field: Option<String>,

    /// Payload field holding the display name.
    pub name_field: Option<String>,

    /// Payload field holding the structure, if any.
    pub structure_field: Option<String>,

    /// Number of instances materialized under this source.
    pub instances: u64,

    pub created_at: DateTime<Utc>,
}

impl DataSource {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        DataSource {
            key: key.into(),
            name: name.into(),
            id_field: None,
            name_field: None,
            structure_field: None,
            instances: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = Some(field.into());
        self
    }

    pub fn with_name_field(mut self, field: impl Into<String>) -> Self {
        self.name_field = Some(field.into());
        self
    }

    pub fn with_structure_field(mut self, field: impl Into<String>) -> Self {
        self.structure_field = Some(field.into());
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.key.is_empty() {
            return Err("DataSource key is empty".to_string());
        }
        if !self
            .key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(format!("DataSource key '{}' contains invalid characters", self.key));
        }
        Ok(())
    }
}

/// Pointer to a member's originating payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct PayloadRef {
    pub source: String,
    pub record_id: String,
}

/// Canonical aggregate for one resolved group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stitch {
    pub id: StitchId,

    /// Key of the DataSource that owns this stitch.
    pub source_key: String,

    pub component_id: ComponentId,

    /// Elected canonical member.
    pub root: EntityId,

    /// Sorted member ids.
    pub members: Vec<EntityId>,

    pub payloads: Vec<PayloadRef>,

    /// Names of every contributing DataSource.
    pub labels: BTreeSet<String>,

    pub created_at: DateTime<Utc>,
}

impl Stitch {
    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.members.binary_search(&id).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entity_is_root() {
        let e = Entity::new("src", "r1");
        assert!(e.is_root());
        assert_eq!(e.rank, 1);
        assert!(e.validate().is_ok());
    }

    #[test]
    fn test_component_id_ignores_order() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let c = Uuid::from_u128(3);
        assert_eq!(component_id(&[a, b, c]), component_id(&[c, a, b]));
        assert_ne!(component_id(&[a, b]), component_id(&[a, c]));
    }

    #[test]
    fn test_stitch_id_is_deterministic() {
        let comp = component_id(&[Uuid::from_u128(7)]);
        assert_eq!(stitch_id("stitch_v1", comp), stitch_id("stitch_v1", comp));
        assert_ne!(stitch_id("stitch_v1", comp), stitch_id("stitch_v2", comp));
    }

    #[test]
    fn test_edge_validation() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        assert!(StitchEdge::new(a, a, StitchKey::Name, "x".into()).validate().is_err());
        assert!(StitchEdge::new(a, b, StitchKey::Cid, "x".into()).validate().is_err());
        assert!(StitchEdge::new(a, b, StitchKey::Cid, 5i64.into()).validate().is_ok());
    }

    #[test]
    fn test_data_source_validation() {
        assert!(DataSource::new("g-srs_2024", "G-SRS").validate().is_ok());
        assert!(DataSource::new("bad key", "x").validate().is_err());
    }
}
