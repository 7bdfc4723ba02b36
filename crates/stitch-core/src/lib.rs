pub mod types;
pub mod keys;
pub mod value;
pub mod storage;
pub mod error;
pub mod union_find;
pub mod graph;
pub mod linker;
pub mod clique;
pub mod untangle;
pub mod materialize;
pub mod ingest;
pub mod api;

#[cfg(test)]
mod testing;

pub use error::{Anomaly, Result, StitchError};
pub use types::*;
pub use keys::StitchKey;
pub use value::{Delta, Scalar, Value, ValueType};
pub use storage::{
    RedbReadTxn, RedbStorage, RedbTxn, Storage, StorageStats, StoreRead, StoreTxn,
    CURRENT_SCHEMA_VERSION,
};
pub use api::{Stitcher, StitcherConfig};
pub use union_find::{DisjointSet, Forest, ForestMut, StoreForest, StoreView};
pub use graph::{ComponentGraph, HasNeighbors, HasStitchKeys};
pub use linker::{
    Blacklist, BlacklistEntry, DirectMapper, FieldMapper, Linker, MappingConfig, PrefixMapper,
    RegexMapper, SourceMapping,
};
pub use clique::{cliques, Clique, CliqueEnumerator, CliqueStats};
pub use untangle::{
    canonical_identity, root_identity, CliqueFilter, Partition, StereoFilter, StereoRule, SuspectReason,
    UntangleConfig, UntangleMetrics, UntangleReport, Untangler,
};
pub use materialize::{Materialized, Materializer};
pub use ingest::{Ingested, Ingestor};
