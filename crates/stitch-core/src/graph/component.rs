use crate::error::Result;
use crate::graph::traits::{HasNeighbors, HasStitchKeys};
use crate::keys::StitchKey;
use crate::storage::StoreRead;
use crate::types::{component_id, ComponentId, EdgeId, Entity, EntityId, StitchEdge};
use crate::value::{Scalar, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// In-memory snapshot of one connected component: its entities and every
/// stitch edge between them.
#[derive(Debug, Clone, Default)]
pub struct ComponentGraph {
    entities: BTreeMap<EntityId, Entity>,
    edges: Vec<StitchEdge>,
    incident: BTreeMap<EntityId, Vec<usize>>,
}

impl ComponentGraph {
    /// Load the component reachable from `seed` over stitch edges.
    pub fn load<T: StoreRead + ?Sized>(txn: &T, seed: EntityId) -> Result<Self> {
        let mut entities = BTreeMap::new();
        let mut edges: BTreeMap<EdgeId, StitchEdge> = BTreeMap::new();
        let mut queue = VecDeque::new();

        entities.insert(seed, txn.entity(seed)?);
        queue.push_back(seed);

        while let Some(id) = queue.pop_front() {
            for edge in txn.edges_of(id)? {
                let next = edge.other(id);
                if !entities.contains_key(&next) {
                    entities.insert(next, txn.entity(next)?);
                    queue.push_back(next);
                }
                edges.entry(edge.id).or_insert(edge);
            }
        }

        log::debug!(
            "Loaded component of {}: {} entities, {} edges",
            seed,
            entities.len(),
            edges.len()
        );
        Ok(Self::from_parts(entities.into_values(), edges.into_values()))
    }

    /// Build a snapshot from loose parts. Edges with an endpoint outside
    /// `entities` are dropped.
    pub fn from_parts<E, L>(entities: E, edges: L) -> Self
    where
        E: IntoIterator<Item = Entity>,
        L: IntoIterator<Item = StitchEdge>,
    {
        let entities: BTreeMap<EntityId, Entity> =
            entities.into_iter().map(|e| (e.id, e)).collect();

        let mut kept: Vec<StitchEdge> = edges
            .into_iter()
            .filter(|e| entities.contains_key(&e.from) && entities.contains_key(&e.to))
            .collect();
        kept.sort_by_key(|e| e.id);

        let mut incident: BTreeMap<EntityId, Vec<usize>> = BTreeMap::new();
        for (i, edge) in kept.iter().enumerate() {
            incident.entry(edge.from).or_default().push(i);
            incident.entry(edge.to).or_default().push(i);
        }

        Self {
            entities,
            edges: kept,
            incident,
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Node ids in ascending order.
    pub fn nodes(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.keys().copied()
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn edges(&self) -> &[StitchEdge] {
        &self.edges
    }

    pub fn component_id(&self) -> ComponentId {
        component_id(self.entities.keys())
    }

    /// Directed edges on which `id` is the referring side: the other
    /// endpoint carries the edge value under the key's reference key and
    /// `id` does not. Links between two siblings of the same parent count
    /// for neither, whatever order they were stored in.
    pub fn out_degree(&self, id: EntityId) -> usize {
        self.incident(id)
            .into_iter()
            .filter(|e| {
                e.key.is_directed()
                    && self.refers_to(e, e.other(id))
                    && !self.refers_to(e, id)
            })
            .count()
    }

    /// Whether `node` carries `edge.value` under the edge key's reference key.
    fn refers_to(&self, edge: &StitchEdge, node: EntityId) -> bool {
        edge.key
            .reference_key()
            .and_then(|rk| self.stitch_value(node, rk))
            .map(|v| v.contains(&edge.value))
            .unwrap_or(false)
    }

    /// Nodes reachable from `start` over edges of `key`, `start` included.
    pub fn closure(&self, start: EntityId, key: StitchKey) -> BTreeSet<EntityId> {
        self.reach(start, |e| e.key == key)
    }

    /// For every `(key, value)` on an edge incident to `node`, the nodes
    /// reachable from `node` over edges carrying that same key and value.
    pub fn expand(&self, node: EntityId) -> BTreeMap<(StitchKey, Scalar), Vec<EntityId>> {
        let mut out = BTreeMap::new();
        for edge in self.incident(node) {
            let pair = (edge.key, edge.value.clone());
            if out.contains_key(&pair) {
                continue;
            }
            let reached: Vec<EntityId> = self
                .reach(node, |e| e.key == pair.0 && e.value == pair.1)
                .into_iter()
                .filter(|id| *id != node)
                .collect();
            out.insert(pair, reached);
        }
        out
    }

    fn reach<F>(&self, start: EntityId, follow: F) -> BTreeSet<EntityId>
    where
        F: Fn(&StitchEdge) -> bool,
    {
        let mut seen = BTreeSet::new();
        if !self.contains(start) {
            return seen;
        }
        let mut queue = VecDeque::from([start]);
        seen.insert(start);
        while let Some(id) = queue.pop_front() {
            for edge in self.incident(id) {
                if !follow(edge) {
                    continue;
                }
                let next = edge.other(id);
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// Distinct values of `key` on edges among this component.
    pub fn edge_values(&self, key: StitchKey) -> BTreeSet<Scalar> {
        self.edges
            .iter()
            .filter(|e| e.key == key)
            .map(|e| e.value.clone())
            .collect()
    }
}

impl HasStitchKeys for ComponentGraph {
    fn stitch_value(&self, id: EntityId, key: StitchKey) -> Option<&Value> {
        self.entities.get(&id).and_then(|e| e.value(key))
    }
}

impl HasNeighbors for ComponentGraph {
    fn incident(&self, id: EntityId) -> Vec<&StitchEdge> {
        self.incident
            .get(&id)
            .map(|slots| slots.iter().map(|i| &self.edges[*i]).collect())
            .unwrap_or_default()
    }
}
