//! Union-find component tracking.
//!
//! Membership lives in node attributes (`parent`, `rank`) rather than in a
//! separate structure. `find` walks parents iteratively and never compresses
//! paths, so chains stay exactly as `union` left them. On a root, `rank` is
//! the number of nodes that resolve to it.
//!
//! The algorithms are generic over [`Forest`] (reads) and [`ForestMut`]
//! (writes). [`StoreForest`] updates persisted entities inside one write
//! transaction, [`StoreView`] follows them through a read snapshot, and
//! [`DisjointSet`] is the in-memory arena the untangler works on.

use crate::error::{Result, StitchError};
use crate::storage::{StoreRead, StoreTxn};
use crate::types::{EntityId, ROOT_LABEL};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Parent/rank attribute access for a set of nodes.
pub trait Forest {
    /// Parent of `id`. A root is its own parent. A node without a parent
    /// attribute is reported as [`StitchError::MissingParentInvariant`].
    fn parent(&self, id: EntityId) -> Result<EntityId>;

    fn rank(&self, id: EntityId) -> Result<u64>;
}

/// A [`Forest`] that `union` can restructure.
pub trait ForestMut: Forest {
    fn set_parent(&mut self, id: EntityId, parent: EntityId) -> Result<()>;

    fn set_rank(&mut self, id: EntityId, rank: u64) -> Result<()>;

    /// Called on a root after it has been placed under another root.
    fn subsumed(&mut self, _id: EntityId) -> Result<()> {
        Ok(())
    }
}

/// Root of the component containing `id`.
pub fn find<F: Forest + ?Sized>(forest: &F, id: EntityId) -> Result<EntityId> {
    let mut current = id;
    loop {
        let parent = forest.parent(current)?;
        if parent == current {
            return Ok(current);
        }
        current = parent;
    }
}

/// Merge the components of `a` and `b`, returning the surviving root.
///
/// The lower-ranked root goes under the higher one; on equal rank the
/// smaller (older) id survives. The survivor's rank becomes the sum.
pub fn union<F: ForestMut + ?Sized>(forest: &mut F, a: EntityId, b: EntityId) -> Result<EntityId> {
    let root_a = find(forest, a)?;
    let root_b = find(forest, b)?;
    if root_a == root_b {
        return Ok(root_a);
    }

    let rank_a = forest.rank(root_a)?;
    let rank_b = forest.rank(root_b)?;
    let (root, child) = match rank_a.cmp(&rank_b) {
        Ordering::Greater => (root_a, root_b),
        Ordering::Less => (root_b, root_a),
        Ordering::Equal if root_a < root_b => (root_a, root_b),
        Ordering::Equal => (root_b, root_a),
    };

    forest.set_parent(child, root)?;
    forest.set_rank(root, rank_a + rank_b)?;
    forest.subsumed(child)?;
    Ok(root)
}

pub fn connected<F: Forest + ?Sized>(forest: &F, a: EntityId, b: EntityId) -> Result<bool> {
    Ok(find(forest, a)? == find(forest, b)?)
}

fn stored_parent<T: StoreRead + ?Sized>(txn: &T, id: EntityId) -> Result<EntityId> {
    txn.entity(id)?
        .parent
        .ok_or(StitchError::MissingParentInvariant { id })
}

/// Read-only forest over persisted entities.
pub struct StoreView<'t, T: StoreRead + ?Sized> {
    txn: &'t T,
}

impl<'t, T: StoreRead + ?Sized> StoreView<'t, T> {
    pub fn new(txn: &'t T) -> Self {
        Self { txn }
    }
}

impl<T: StoreRead + ?Sized> Forest for StoreView<'_, T> {
    fn parent(&self, id: EntityId) -> Result<EntityId> {
        stored_parent(self.txn, id)
    }

    fn rank(&self, id: EntityId) -> Result<u64> {
        Ok(self.txn.entity(id)?.rank)
    }
}

/// Forest over persisted entities. A subsumed root loses the root label.
pub struct StoreForest<'t, T: StoreTxn> {
    txn: &'t mut T,
}

impl<'t, T: StoreTxn> StoreForest<'t, T> {
    pub fn new(txn: &'t mut T) -> Self {
        Self { txn }
    }
}

impl<T: StoreTxn> Forest for StoreForest<'_, T> {
    fn parent(&self, id: EntityId) -> Result<EntityId> {
        stored_parent(&*self.txn, id)
    }

    fn rank(&self, id: EntityId) -> Result<u64> {
        Ok(self.txn.entity(id)?.rank)
    }
}

impl<T: StoreTxn> ForestMut for StoreForest<'_, T> {
    fn set_parent(&mut self, id: EntityId, parent: EntityId) -> Result<()> {
        let mut entity = self.txn.entity(id)?;
        entity.parent = Some(parent);
        entity.touch();
        self.txn.put_entity(&entity)
    }

    fn set_rank(&mut self, id: EntityId, rank: u64) -> Result<()> {
        let mut entity = self.txn.entity(id)?;
        entity.rank = rank;
        entity.touch();
        self.txn.put_entity(&entity)
    }

    fn subsumed(&mut self, id: EntityId) -> Result<()> {
        self.txn.remove_label(id, ROOT_LABEL)
    }
}

/// In-memory arena forest keyed by entity id.
#[derive(Debug, Clone, Default)]
pub struct DisjointSet {
    index: BTreeMap<EntityId, usize>,
    ids: Vec<EntityId>,
    parent: Vec<usize>,
    rank: Vec<u64>,
}

impl DisjointSet {
    /// Every id starts as its own singleton root.
    pub fn new<I: IntoIterator<Item = EntityId>>(ids: I) -> Self {
        let mut set = Self::default();
        for id in ids {
            set.insert(id);
        }
        set
    }

    /// Add `id` as a singleton. No-op if already present.
    pub fn insert(&mut self, id: EntityId) {
        if self.index.contains_key(&id) {
            return;
        }
        let slot = self.ids.len();
        self.index.insert(id, slot);
        self.ids.push(id);
        self.parent.push(slot);
        self.rank.push(1);
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.index.keys().copied()
    }

    fn slot(&self, id: EntityId) -> Result<usize> {
        self.index
            .get(&id)
            .copied()
            .ok_or(StitchError::EntityNotFound(id))
    }

    /// Size of the class containing `id`.
    pub fn class_size(&self, id: EntityId) -> Result<u64> {
        let root = find(self, id)?;
        self.rank(root)
    }

    pub fn is_singleton(&self, id: EntityId) -> Result<bool> {
        Ok(self.class_size(id)? == 1)
    }

    /// Every class keyed by its root, members sorted ascending.
    pub fn classes(&self) -> Result<BTreeMap<EntityId, Vec<EntityId>>> {
        let mut classes: BTreeMap<EntityId, Vec<EntityId>> = BTreeMap::new();
        for id in self.ids() {
            classes.entry(find(self, id)?).or_default().push(id);
        }
        Ok(classes)
    }
}

impl Forest for DisjointSet {
    fn parent(&self, id: EntityId) -> Result<EntityId> {
        let slot = self.slot(id)?;
        Ok(self.ids[self.parent[slot]])
    }

    fn rank(&self, id: EntityId) -> Result<u64> {
        Ok(self.rank[self.slot(id)?])
    }
}

impl ForestMut for DisjointSet {
    fn set_parent(&mut self, id: EntityId, parent: EntityId) -> Result<()> {
        let slot = self.slot(id)?;
        self.parent[slot] = self.slot(parent)?;
        Ok(())
    }

    fn set_rank(&mut self, id: EntityId, rank: u64) -> Result<()> {
        let slot = self.slot(id)?;
        self.rank[slot] = rank;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{RedbStorage, Storage, StoreRead};
    use crate::types::Entity;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn id(n: u128) -> EntityId {
        Uuid::from_u128(n)
    }

    #[test]
    fn test_chained_unions_connect_ends() {
        let mut set = DisjointSet::new((1..=4).map(id));
        union(&mut set, id(1), id(2)).unwrap();
        union(&mut set, id(3), id(4)).unwrap();
        union(&mut set, id(2), id(3)).unwrap();

        assert_eq!(find(&set, id(1)).unwrap(), find(&set, id(4)).unwrap());
        assert_eq!(set.class_size(id(4)).unwrap(), 4);
    }

    #[test]
    fn test_tie_keeps_smaller_id() {
        let mut set = DisjointSet::new([id(9), id(3)]);
        assert_eq!(union(&mut set, id(9), id(3)).unwrap(), id(3));
        assert_eq!(set.parent(id(9)).unwrap(), id(3));
        assert_eq!(set.rank(id(3)).unwrap(), 2);
    }

    #[test]
    fn test_lower_rank_goes_under_higher() {
        let mut set = DisjointSet::new((1..=4).map(id));
        union(&mut set, id(3), id(4)).unwrap();
        union(&mut set, id(2), id(3)).unwrap();
        // {2,3,4} is rooted at 3 with rank 3, so the older 1 goes under it
        let root = union(&mut set, id(1), id(4)).unwrap();
        assert_eq!(root, id(3));
        assert_eq!(set.rank(root).unwrap(), 4);
    }

    #[test]
    fn test_union_is_noop_within_class() {
        let mut set = DisjointSet::new([id(1), id(2)]);
        union(&mut set, id(1), id(2)).unwrap();
        let root = union(&mut set, id(2), id(1)).unwrap();
        assert_eq!(set.rank(root).unwrap(), 2);
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let set = DisjointSet::new([id(1)]);
        assert!(matches!(find(&set, id(2)), Err(StitchError::EntityNotFound(_))));
    }

    #[test]
    fn test_store_forest_moves_root_label() {
        let storage = RedbStorage::in_memory().unwrap();
        let a = Entity::with_id(id(1), "test", "a");
        let b = Entity::with_id(id(2), "test", "b");

        storage
            .with_txn(|txn| {
                for e in [&a, &b] {
                    txn.put_entity(e)?;
                    txn.add_label(e.id, ROOT_LABEL)?;
                }
                let mut forest = StoreForest::new(txn);
                union(&mut forest, b.id, a.id)
            })
            .unwrap();

        let txn = storage.begin_read().unwrap();
        assert_eq!(txn.labeled(ROOT_LABEL).unwrap(), vec![a.id]);
        assert_eq!(txn.entity(a.id).unwrap().rank, 2);
        let view = StoreView::new(&txn);
        assert!(connected(&view, a.id, b.id).unwrap());
    }

    #[test]
    fn test_missing_parent_is_fatal() {
        let storage = RedbStorage::in_memory().unwrap();
        let mut orphan = Entity::new("test", "orphan");
        orphan.parent = None;

        storage.with_txn(|txn| txn.put_entity(&orphan)).unwrap();

        let txn = storage.begin_read().unwrap();
        assert!(matches!(
            find(&StoreView::new(&txn), orphan.id),
            Err(StitchError::MissingParentInvariant { id }) if id == orphan.id
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn unions_are_sound(
            pairs in prop::collection::vec((0u128..24, 0u128..24), 0..60),
        ) {
            let mut set = DisjointSet::new((0..24).map(id));
            for (a, b) in &pairs {
                union(&mut set, id(*a), id(*b)).unwrap();
            }

            for (a, b) in &pairs {
                prop_assert!(connected(&set, id(*a), id(*b)).unwrap());
            }

            let classes = set.classes().unwrap();
            let total: usize = classes.values().map(Vec::len).sum();
            prop_assert_eq!(total, 24);
            for (root, members) in &classes {
                prop_assert_eq!(set.rank(*root).unwrap(), members.len() as u64);
            }
        }
    }
}
