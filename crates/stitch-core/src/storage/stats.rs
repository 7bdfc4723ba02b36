use crate::keys::StitchKey;
use std::collections::HashMap;

/// Storage statistics
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub entity_count: u64,
    pub edge_count: u64,
    pub stitch_count: u64,
    /// Entities currently carrying the root label
    pub component_count: u64,
    pub data_source_count: u64,
    pub edge_counts_by_key: HashMap<StitchKey, u64>,
    pub db_size_bytes: u64,
}
