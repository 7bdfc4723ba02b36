use crate::error::Result;
use crate::keys::StitchKey;
use crate::linker::blacklist::Blacklist;
use crate::storage::{StoreRead, StoreTxn};
use crate::types::{Entity, EntityId, StitchEdge};
use crate::union_find::{self, StoreForest};
use crate::value::{Delta, Scalar, Value};

/// Creates and removes stitch edges and keeps the `(key, value)` index in
/// step with them. Every call works inside the caller's transaction.
#[derive(Debug, Clone, Default)]
pub struct Linker {
    blacklist: Blacklist,
}

impl Linker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blacklist(mut self, blacklist: Blacklist) -> Self {
        self.blacklist = blacklist;
        self
    }

    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    /// Link `entity` to every other entity indexed under `(key, v)` for each
    /// element `v` of `value`, then index the entity itself. Returns the
    /// number of edges created; re-stitching a present value creates none.
    pub fn stitch<T: StoreTxn>(
        &self,
        txn: &mut T,
        entity: EntityId,
        key: StitchKey,
        value: &Value,
    ) -> Result<usize> {
        value.check_type(key.as_str(), key.value_type())?;

        let mut created = 0;
        for scalar in value.iter() {
            if self.blacklist.contains(key, scalar) {
                log::debug!("Skipping blacklisted {}={} on {}", key, scalar, entity);
                continue;
            }

            for other in txn.index_lookup(key, scalar)? {
                if other != entity && self.link(txn, entity, other, key, scalar)? {
                    created += 1;
                }
            }

            self.store_value(txn, entity, key, scalar)?;
            txn.index_insert(key, scalar, entity)?;
        }
        Ok(created)
    }

    /// Explicit link between two entities. Returns false when an edge of
    /// `key` carrying `value` already joins them.
    pub fn stitch_pair<T: StoreTxn>(
        &self,
        txn: &mut T,
        a: EntityId,
        b: EntityId,
        key: StitchKey,
        value: &Scalar,
    ) -> Result<bool> {
        Value::single(value.clone()).check_type(key.as_str(), key.value_type())?;

        let created = self.link(txn, a, b, key, value)?;
        for id in [a, b] {
            self.store_value(txn, id, key, value)?;
            txn.index_insert(key, value, id)?;
        }
        Ok(created)
    }

    /// Remove every `key` edge incident to `entity`, drop its index entries
    /// and clear the stored value. Components are not split. Returns the
    /// number of edges deleted.
    pub fn unstitch<T: StoreTxn>(&self, txn: &mut T, entity: EntityId, key: StitchKey) -> Result<usize> {
        let mut node = txn.entity(entity)?;

        let edges = txn.edges_of_key(entity, key)?;
        for edge in &edges {
            txn.delete_edge(edge.id)?;
        }

        if let Some(value) = node.stitches.remove(&key) {
            for scalar in value.iter() {
                txn.index_remove(key, scalar, entity)?;
            }
            node.touch();
            txn.put_entity(&node)?;
        }
        Ok(edges.len())
    }

    /// Apply a value change for `key`.
    ///
    /// - remove-only (`new` is `None`): unstitch, then re-stitch what is left
    ///   after removing `old`.
    /// - append-only (`old` is `None`): stitch only the elements the current
    ///   value lacks. Nothing is removed, so nothing is unstitched.
    /// - replace: compute `(current - old) + new`; when it differs from the
    ///   current value, unstitch and re-stitch the result.
    ///
    /// Returns the number of edges created.
    pub fn update<T: StoreTxn>(
        &self,
        txn: &mut T,
        entity: EntityId,
        key: StitchKey,
        old: Option<&Value>,
        new: Option<&Value>,
    ) -> Result<usize> {
        let current = txn.entity(entity)?.stitches.get(&key).cloned();

        match (old, new) {
            (None, None) => Ok(0),
            (None, Some(new)) => match Value::delta(new, current.as_ref())? {
                Delta::NoChange => Ok(0),
                Delta::Changed(delta) => self.stitch(txn, entity, key, &delta),
            },
            (Some(old), None) => {
                let Some(current) = current else {
                    return Ok(0);
                };
                match current.without(old) {
                    Some(rest) if rest == current => Ok(0),
                    rest => {
                        self.unstitch(txn, entity, key)?;
                        match rest {
                            Some(rest) => self.stitch(txn, entity, key, &rest),
                            None => Ok(0),
                        }
                    }
                }
            }
            (Some(old), Some(new)) => {
                let kept = current.as_ref().and_then(|c| c.without(old));
                let result = match kept {
                    Some(kept) => kept.merge(new)?,
                    None => new.clone(),
                };
                if current.as_ref() == Some(&result) {
                    return Ok(0);
                }
                self.unstitch(txn, entity, key)?;
                self.stitch(txn, entity, key, &result)
            }
        }
    }

    /// Create the edge between `a` and `b` unless present, and union their
    /// components. Returns whether an edge was created.
    fn link<T: StoreTxn>(
        &self,
        txn: &mut T,
        a: EntityId,
        b: EntityId,
        key: StitchKey,
        value: &Scalar,
    ) -> Result<bool> {
        let exists = txn
            .edges_of_key(a, key)?
            .iter()
            .any(|e| e.links(a, b, key, value));
        if exists {
            return Ok(false);
        }

        let (from, to) = if key.is_directed() {
            let left = txn.entity(a)?;
            let right = txn.entity(b)?;
            directed_endpoints(&left, &right, key, value)
        } else {
            (a, b)
        };

        txn.put_edge(&StitchEdge::new(from, to, key, value.clone()))?;
        let mut forest = StoreForest::new(txn);
        union_find::union(&mut forest, a, b)?;
        Ok(true)
    }

    /// Merge `scalar` into the stored value of `key` on `id`.
    fn store_value<T: StoreTxn>(
        &self,
        txn: &mut T,
        id: EntityId,
        key: StitchKey,
        scalar: &Scalar,
    ) -> Result<()> {
        let mut node = txn.entity(id)?;
        let merged = match node.stitches.get(&key) {
            Some(existing) if existing.contains(scalar) => return Ok(()),
            Some(existing) => existing.merge(&Value::single(scalar.clone()))?,
            None => Value::single(scalar.clone()),
        };
        node.stitches.insert(key, merged);
        node.touch();
        txn.put_entity(&node)
    }
}

/// A directed edge points at the endpoint whose reference-key value carries
/// the edge value. Without such an endpoint it runs from `left` to `right`.
fn directed_endpoints(
    left: &Entity,
    right: &Entity,
    key: StitchKey,
    value: &Scalar,
) -> (EntityId, EntityId) {
    let carries = |e: &Entity| {
        key.reference_key()
            .and_then(|rk| e.value(rk))
            .map(|v| v.contains(value))
            .unwrap_or(false)
    };

    if carries(right) || !carries(left) {
        (left.id, right.id)
    } else {
        (right.id, left.id)
    }
}
