use crate::keys::StitchKey;
use crate::types::{EntityId, StitchEdge};
use crate::value::Value;
use std::collections::BTreeSet;

/// Read access to the stitch values carried by nodes.
pub trait HasStitchKeys {
    fn stitch_value(&self, id: EntityId, key: StitchKey) -> Option<&Value>;

    fn has_key(&self, id: EntityId, key: StitchKey) -> bool {
        self.stitch_value(id, key).map(|v| !v.is_empty()).unwrap_or(false)
    }
}

/// Read access to stitch edges around nodes.
pub trait HasNeighbors {
    /// Every edge incident to `id`, in either direction.
    fn incident(&self, id: EntityId) -> Vec<&StitchEdge>;

    /// Distinct nodes linked to `id` through `key`.
    fn neighbors(&self, id: EntityId, key: StitchKey) -> BTreeSet<EntityId> {
        self.incident(id)
            .into_iter()
            .filter(|e| e.key == key)
            .map(|e| e.other(id))
            .collect()
    }
}
