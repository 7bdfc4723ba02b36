use crate::keys::StitchKey;
use crate::types::{EntityId, StitchId};
use crate::value::{Scalar, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StitchError>;

/// Fatal errors. Anything returned as `Err` aborts the current operation
/// (and, inside the untangler, the current component run).
#[derive(Debug, Error)]
pub enum StitchError {
    #[error("Storage error: {0}")]
    Storage(#[from] redb::Error),

    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Storage operation error: {0}")]
    StorageOperation(#[from] redb::StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Payload encoding error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("Data source not found: {0}")]
    DataSourceNotFound(String),

    /// A node lacks the parent attribute the union-find tracker relies on.
    /// Indicates upstream graph corruption.
    #[error("Entity {id} has no parent; component forest is corrupt")]
    MissingParentInvariant { id: EntityId },

    #[error("Incompatible value type for {key}: expected {expected}, found {found}")]
    IncompatibleValueType {
        key: String,
        expected: ValueType,
        found: ValueType,
    },

    #[error("Validation error: {0}")]
    Validation(String),
}

impl StitchError {
    pub(crate) fn incompatible(key: impl Into<String>, expected: ValueType, found: ValueType) -> Self {
        StitchError::IncompatibleValueType {
            key: key.into(),
            expected,
            found,
        }
    }
}

/// Recoverable data-quality findings. These never surface as `Err`; the
/// untangler logs them and carries on, degrading to singleton output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Anomaly {
    /// Two classes whose root members disagree on canonical identity were
    /// about to be merged. The merge was refused.
    ConflictingRootIdentity {
        left: EntityId,
        right: EntityId,
        left_identity: Scalar,
        right_identity: Scalar,
    },

    /// A clique whose value support did not cover every member pair.
    SpuriousClique {
        key: StitchKey,
        members: BTreeSet<EntityId>,
    },

    /// A node that survived every resolution stage unmerged and was emitted
    /// as a singleton stitch.
    UnassignedResidual {
        entity: EntityId,
        stitch: Option<StitchId>,
    },
}

impl std::fmt::Display for Anomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Anomaly::ConflictingRootIdentity {
                left,
                right,
                left_identity,
                right_identity,
            } => write!(
                f,
                "refused merge of {} ({}) with {} ({}): conflicting root identity",
                left, left_identity, right, right_identity
            ),
            Anomaly::SpuriousClique { key, members } => {
                write!(f, "spurious {} clique over {} members", key, members.len())
            }
            Anomaly::UnassignedResidual { entity, .. } => {
                write!(f, "entity {} left unassigned", entity)
            }
        }
    }
}
