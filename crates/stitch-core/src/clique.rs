//! Maximal clique enumeration over stitch keys.
//!
//! Each key is searched on its own adjacency graph, restricted to the given
//! nodes (and optionally to one edge value), with Bron-Kerbosch and
//! pivoting. A clique is reported with the values that define it: for each
//! key, the values carried by an edge on every one of its member pairs.

use crate::error::Anomaly;
use crate::graph::HasNeighbors;
use crate::keys::StitchKey;
use crate::types::EntityId;
use crate::value::{Scalar, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Weight of the key count against clique size in [`Clique::score`].
pub const KEY_WEIGHT: f64 = 0.7;

/// A set of at least two nodes pairwise linked by shared values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clique {
    members: BTreeSet<EntityId>,
    values: BTreeMap<StitchKey, Value>,
    score: f64,
}

impl Clique {
    fn new(members: BTreeSet<EntityId>, values: BTreeMap<StitchKey, Value>) -> Self {
        let score = score(&members, &values);
        Self {
            members,
            values,
            score,
        }
    }

    pub fn members(&self) -> &BTreeSet<EntityId> {
        &self.members
    }

    /// Defining value per key.
    pub fn values(&self) -> &BTreeMap<StitchKey, Value> {
        &self.values
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.members.contains(&id)
    }

    pub fn keys(&self) -> impl Iterator<Item = StitchKey> + '_ {
        self.values.keys().copied()
    }

    pub fn has_key(&self, key: StitchKey) -> bool {
        self.values.contains_key(&key)
    }

    pub fn max_priority(&self) -> u8 {
        self.keys().map(StitchKey::priority).max().unwrap_or(0)
    }

    pub fn overlaps(&self, other: &Clique) -> bool {
        self.members.intersection(&other.members).next().is_some()
    }

    /// Smallest member id.
    pub fn first(&self) -> Option<EntityId> {
        self.members.iter().next().copied()
    }

    /// Ranking used for disjoint selection: score, then size, descending;
    /// then smallest member id ascending.
    pub fn rank_cmp(&self, other: &Clique) -> std::cmp::Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.size().cmp(&self.size()))
            .then_with(|| self.first().cmp(&other.first()))
    }
}

/// `maxPriority * size^(1-w) * keys^w`
fn score(members: &BTreeSet<EntityId>, values: &BTreeMap<StitchKey, Value>) -> f64 {
    let priority = values.keys().map(|k| k.priority()).max().unwrap_or(0) as f64;
    let size = members.len() as f64;
    let keys = values.len() as f64;
    priority * size.powf(1.0 - KEY_WEIGHT) * keys.powf(KEY_WEIGHT)
}

/// Counters for one enumeration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliqueStats {
    /// Bron-Kerbosch invocations, including the top-level one per key.
    pub calls: u64,
    /// Maximal cliques found, before filtering.
    pub maximal: u64,
    /// Cliques handed to the visitor.
    pub reported: u64,
    /// Keys whose search stopped early because a clique covered every
    /// vertex of the key.
    pub short_circuits: u64,
    /// Cliques dropped for lack of any defining value.
    pub spurious: Vec<Anomaly>,
}

enum Flow {
    Continue,
    /// Stop searching the current key.
    Done,
    /// The visitor asked to stop everything.
    Abort,
}

/// Per-key adjacency over indexed nodes.
struct KeyGraph {
    key: StitchKey,
    nodes: Vec<EntityId>,
    adj: Vec<BTreeSet<usize>>,
}

/// Clique search over one node set.
pub struct CliqueEnumerator<'g, G: HasNeighbors> {
    graph: &'g G,
    nodes: BTreeSet<EntityId>,
    value: Option<Scalar>,
    evidence: Vec<StitchKey>,
    /// Values per unordered member pair, per key.
    pairs: BTreeMap<StitchKey, BTreeMap<(EntityId, EntityId), BTreeSet<Scalar>>>,
    seen: BTreeSet<BTreeSet<EntityId>>,
    stats: CliqueStats,
}

impl<'g, G: HasNeighbors> CliqueEnumerator<'g, G> {
    pub fn new<I: IntoIterator<Item = EntityId>>(graph: &'g G, nodes: I) -> Self {
        Self {
            graph,
            nodes: nodes.into_iter().collect(),
            value: None,
            evidence: Vec::new(),
            pairs: BTreeMap::new(),
            seen: BTreeSet::new(),
            stats: CliqueStats::default(),
        }
    }

    /// Only follow edges carrying `value` when building adjacency.
    /// Defining values are still computed over every value.
    pub fn with_value(mut self, value: Scalar) -> Self {
        self.value = Some(value);
        self
    }

    pub fn set_value(&mut self, value: Option<Scalar>) {
        self.value = value;
    }

    /// Also compute defining values over `keys`, without searching them.
    pub fn with_evidence(mut self, keys: &[StitchKey]) -> Self {
        self.evidence = keys.to_vec();
        self
    }

    pub fn stats(&self) -> &CliqueStats {
        &self.stats
    }

    pub fn into_stats(self) -> CliqueStats {
        self.stats
    }

    /// Enumerate cliques for each key in turn, handing each distinct member
    /// set to `visitor` once. Returns false if the visitor aborted.
    pub fn enumerate<V>(&mut self, keys: &[StitchKey], mut visitor: V) -> bool
    where
        V: FnMut(&Clique) -> bool,
    {
        let mut value_keys = keys.to_vec();
        for key in &self.evidence {
            if !value_keys.contains(key) {
                value_keys.push(*key);
            }
        }
        self.index_pairs(&value_keys);

        for &key in keys {
            let kg = self.key_graph(key);
            if kg.nodes.len() < 2 {
                continue;
            }

            let p: BTreeSet<usize> = (0..kg.nodes.len()).collect();
            let flow = self.bron_kerbosch(
                &kg,
                &value_keys,
                Vec::new(),
                p,
                BTreeSet::new(),
                &mut visitor,
            );
            match flow {
                Flow::Abort => return false,
                Flow::Done => {
                    self.stats.short_circuits += 1;
                    log::debug!(
                        "{} clique covers all {} vertices; search stopped",
                        key,
                        kg.nodes.len()
                    );
                }
                Flow::Continue => {}
            }
        }
        true
    }

    /// Convenience: collect every clique.
    pub fn collect(&mut self, keys: &[StitchKey]) -> Vec<Clique> {
        let mut out = Vec::new();
        self.enumerate(keys, |c| {
            out.push(c.clone());
            true
        });
        out
    }

    fn index_pairs(&mut self, keys: &[StitchKey]) {
        for &key in keys {
            if self.pairs.contains_key(&key) {
                continue;
            }
            let mut pairs: BTreeMap<(EntityId, EntityId), BTreeSet<Scalar>> = BTreeMap::new();
            for &id in &self.nodes {
                for edge in self.graph.incident(id) {
                    let other = edge.other(id);
                    if edge.key != key || other <= id || !self.nodes.contains(&other) {
                        continue;
                    }
                    pairs.entry((id, other)).or_default().insert(edge.value.clone());
                }
            }
            self.pairs.insert(key, pairs);
        }
    }

    fn key_graph(&self, key: StitchKey) -> KeyGraph {
        let mut links: BTreeSet<(EntityId, EntityId)> = BTreeSet::new();
        if let Some(pairs) = self.pairs.get(&key) {
            for (pair, values) in pairs {
                let admitted = match &self.value {
                    Some(v) => values.contains(v),
                    None => true,
                };
                if admitted {
                    links.insert(*pair);
                }
            }
        }

        // Vertex set: nodes with at least one edge of this key
        let vertices: BTreeSet<EntityId> = links.iter().flat_map(|(a, b)| [*a, *b]).collect();
        let nodes: Vec<EntityId> = vertices.into_iter().collect();
        let slot = |id: &EntityId| nodes.binary_search(id).ok();

        let mut adj = vec![BTreeSet::new(); nodes.len()];
        for (a, b) in &links {
            if let (Some(i), Some(j)) = (slot(a), slot(b)) {
                adj[i].insert(j);
                adj[j].insert(i);
            }
        }
        KeyGraph { key, nodes, adj }
    }

    fn bron_kerbosch<V>(
        &mut self,
        kg: &KeyGraph,
        keys: &[StitchKey],
        r: Vec<usize>,
        mut p: BTreeSet<usize>,
        mut x: BTreeSet<usize>,
        visitor: &mut V,
    ) -> Flow
    where
        V: FnMut(&Clique) -> bool,
    {
        self.stats.calls += 1;

        if p.is_empty() && x.is_empty() {
            self.stats.maximal += 1;
            if r.len() < 2 {
                return Flow::Continue;
            }
            let members: BTreeSet<EntityId> = r.iter().map(|i| kg.nodes[*i]).collect();
            if let Some(clique) = self.evaluate(kg.key, members, keys) {
                self.stats.reported += 1;
                if !visitor(&clique) {
                    return Flow::Abort;
                }
            }
            if r.len() == kg.nodes.len() {
                return Flow::Done;
            }
            return Flow::Continue;
        }

        // Pivot: the vertex of P ∪ X with most neighbors in P, smallest on ties
        let pivot = p
            .iter()
            .chain(x.iter())
            .copied()
            .max_by(|a, b| {
                let na = kg.adj[*a].intersection(&p).count();
                let nb = kg.adj[*b].intersection(&p).count();
                na.cmp(&nb).then_with(|| b.cmp(a))
            });
        let candidates: Vec<usize> = match pivot {
            Some(u) => p.difference(&kg.adj[u]).copied().collect(),
            None => p.iter().copied().collect(),
        };

        for v in candidates {
            let mut next_r = r.clone();
            next_r.push(v);
            let next_p: BTreeSet<usize> = p.intersection(&kg.adj[v]).copied().collect();
            let next_x: BTreeSet<usize> = x.intersection(&kg.adj[v]).copied().collect();

            match self.bron_kerbosch(kg, keys, next_r, next_p, next_x, visitor) {
                Flow::Continue => {}
                stop => return stop,
            }

            p.remove(&v);
            x.insert(v);
        }
        Flow::Continue
    }

    /// Defining values of `members` over `keys`; `None` for a repeat or a
    /// spurious clique.
    fn evaluate(
        &mut self,
        found_by: StitchKey,
        members: BTreeSet<EntityId>,
        keys: &[StitchKey],
    ) -> Option<Clique> {
        if self.seen.contains(&members) {
            return None;
        }

        let n = members.len();
        let expected = n * (n - 1) / 2;
        let list: Vec<EntityId> = members.iter().copied().collect();

        let mut values = BTreeMap::new();
        for &key in keys {
            let Some(pairs) = self.pairs.get(&key) else {
                continue;
            };
            let mut support: BTreeMap<Scalar, usize> = BTreeMap::new();
            for (i, a) in list.iter().enumerate() {
                for b in &list[i + 1..] {
                    if let Some(vals) = pairs.get(&(*a, *b)) {
                        for s in vals {
                            *support.entry(s.clone()).or_insert(0) += 1;
                        }
                    }
                }
            }
            let defining: Vec<(Scalar, usize)> =
                support.into_iter().filter(|(_, c)| *c == expected).collect();
            if !defining.is_empty() {
                values.insert(key, Value::ranked(defining));
            }
        }

        self.seen.insert(members.clone());

        if values.is_empty() {
            let anomaly = Anomaly::SpuriousClique {
                key: found_by,
                members,
            };
            log::warn!("{}", anomaly);
            self.stats.spurious.push(anomaly);
            return None;
        }
        Some(Clique::new(members, values))
    }
}

/// Enumerate cliques of `nodes` over `keys`, calling `visitor` for each.
/// Returns false if the visitor aborted.
pub fn cliques<G, I, V>(graph: &G, nodes: I, keys: &[StitchKey], visitor: V) -> bool
where
    G: HasNeighbors,
    I: IntoIterator<Item = EntityId>,
    V: FnMut(&Clique) -> bool,
{
    CliqueEnumerator::new(graph, nodes).enumerate(keys, visitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{id, v, Fixture};

    #[test]
    fn test_triangle_single_clique() {
        let fx = Fixture::new();
        for n in 1..=3 {
            fx.add(n, &[(StitchKey::InChIKey, v("K1"))]);
        }
        let graph = fx.graph(id(1));

        let mut e = CliqueEnumerator::new(&graph, graph.nodes());
        let found = e.collect(&[StitchKey::InChIKey]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].members(), &BTreeSet::from([id(1), id(2), id(3)]));
        assert_eq!(
            found[0].values(),
            &BTreeMap::from([(StitchKey::InChIKey, v("K1"))])
        );
    }

    #[test]
    fn test_complete_graph_stops_after_first_clique() {
        let fx = Fixture::new();
        let n = 8u128;
        for i in 1..=n {
            fx.add(i, &[(StitchKey::Cas, v("50-78-2"))]);
        }
        let graph = fx.graph(id(1));

        let mut e = CliqueEnumerator::new(&graph, graph.nodes());
        let found = e.collect(&[StitchKey::Cas]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].size(), n as usize);
        // One call per level of the single pivoted branch
        assert_eq!(e.stats().calls, n as u64 + 1);
        assert_eq!(e.stats().short_circuits, 1);
    }

    #[test]
    fn test_two_overlapping_cliques() {
        // {1,2,3} share Name A; {3,4} share Name B
        let fx = Fixture::new();
        fx.add(1, &[(StitchKey::Name, v("A"))]);
        fx.add(2, &[(StitchKey::Name, v("A"))]);
        fx.add(3, &[(StitchKey::Name, Value::list(["A", "B"]))]);
        fx.add(4, &[(StitchKey::Name, v("B"))]);
        let graph = fx.graph(id(1));

        let mut found = CliqueEnumerator::new(&graph, graph.nodes()).collect(&[StitchKey::Name]);
        found.sort_by(|a, b| a.rank_cmp(b));
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].members(), &BTreeSet::from([id(1), id(2), id(3)]));
        assert_eq!(found[1].members(), &BTreeSet::from([id(3), id(4)]));
        assert_eq!(found[1].values()[&StitchKey::Name], v("B"));
    }

    #[test]
    fn test_value_filter_and_multi_key_values() {
        // 1,2 share Cas and Name; 2,3 share Name only
        let fx = Fixture::new();
        fx.add(1, &[(StitchKey::Cas, v("C")), (StitchKey::Name, v("N"))]);
        fx.add(2, &[(StitchKey::Cas, v("C")), (StitchKey::Name, v("N"))]);
        fx.add(3, &[(StitchKey::Name, v("N"))]);
        let graph = fx.graph(id(1));
        let keys = [StitchKey::Cas, StitchKey::Name];

        let found = CliqueEnumerator::new(&graph, graph.nodes())
            .with_value(Scalar::from("C"))
            .collect(&keys);
        assert_eq!(found.len(), 1);
        let pair = &found[0];
        assert_eq!(pair.members(), &BTreeSet::from([id(1), id(2)]));
        assert_eq!(pair.values().len(), 2);

        let expected = 5.0 * 2f64.powf(0.3) * 2f64.powf(0.7);
        assert!((pair.score() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_mixed_values_are_spurious() {
        // Triangle where each pair shares a different name
        let fx = Fixture::new();
        fx.add(1, &[(StitchKey::Name, Value::list(["X", "Y"]))]);
        fx.add(2, &[(StitchKey::Name, Value::list(["Y", "Z"]))]);
        fx.add(3, &[(StitchKey::Name, Value::list(["Z", "X"]))]);
        let graph = fx.graph(id(1));

        let mut e = CliqueEnumerator::new(&graph, graph.nodes());
        assert!(e.collect(&[StitchKey::Name]).is_empty());
        assert_eq!(e.stats().spurious.len(), 1);
    }

    #[test]
    fn test_visitor_abort() {
        let fx = Fixture::new();
        fx.add(1, &[(StitchKey::Name, Value::list(["A", "B"]))]);
        fx.add(2, &[(StitchKey::Name, v("A"))]);
        fx.add(3, &[(StitchKey::Name, v("B"))]);
        let graph = fx.graph(id(1));

        let mut seen = 0;
        let completed = cliques(&graph, graph.nodes(), &[StitchKey::Name], |_| {
            seen += 1;
            false
        });
        assert!(!completed);
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_restricted_node_set() {
        let fx = Fixture::new();
        for n in 1..=4 {
            fx.add(n, &[(StitchKey::Unii, v("U"))]);
        }
        let graph = fx.graph(id(1));
        let subset = [id(2), id(4)];

        let found = CliqueEnumerator::new(&graph, subset).collect(&[StitchKey::Unii]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].members(), &BTreeSet::from(subset));
    }
}
