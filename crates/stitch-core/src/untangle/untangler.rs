use crate::clique::{Clique, CliqueEnumerator};
use crate::error::{Anomaly, Result};
use crate::graph::{ComponentGraph, HasNeighbors, HasStitchKeys};
use crate::keys::StitchKey;
use crate::materialize::{Materialized, Materializer};
use crate::storage::StoreTxn;
use crate::types::{ComponentId, EntityId, Stitch};
use crate::union_find::{self, DisjointSet};
use crate::untangle::config::UntangleConfig;
use crate::untangle::filter::{CliqueFilter, StereoFilter};
use crate::untangle::metrics::UntangleMetrics;
use crate::value::Scalar;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

/// Why a node was held back from automatic merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SuspectReason {
    /// Overlapping cliques split evenly between seeds.
    Tie,
    /// Pulled toward different seeds by two or more keys.
    KeyConflict,
    /// The conflict involves a top-priority key. Only the canonical-key
    /// closure may still place the node.
    TopPriority,
}

/// Resolved groups of one component, before materialization.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    /// Disjoint groups, members ascending, ordered by smallest member.
    pub groups: Vec<Vec<EntityId>>,
    pub suspects: BTreeMap<EntityId, SuspectReason>,
    /// Nodes that had several candidate parents.
    pub unsure: BTreeSet<EntityId>,
    pub anomalies: Vec<Anomaly>,
    pub metrics: UntangleMetrics,
}

/// Outcome of resolving and materializing one component.
#[derive(Debug, Clone)]
pub struct UntangleReport {
    pub component: ComponentId,
    /// One stitch per group, in group order.
    pub stitches: Vec<Stitch>,
    pub anomalies: Vec<Anomaly>,
    pub metrics: UntangleMetrics,
}

impl UntangleReport {
    /// Stitch membership as sorted groups.
    pub fn groups(&self) -> Vec<Vec<EntityId>> {
        self.stitches.iter().map(|s| s.members.clone()).collect()
    }
}

/// Canonical identity of `id` if it qualifies as a root: exactly one value
/// for the root key, and no terminal-key value other than that identity.
pub fn root_identity<G: HasStitchKeys + ?Sized>(
    graph: &G,
    config: &UntangleConfig,
    id: EntityId,
) -> Option<Scalar> {
    let value = graph.stitch_value(id, config.root_key)?;
    if value.len() != 1 {
        return None;
    }
    let identity = value.first()?.clone();
    let foreign_parent = config.terminal_keys.iter().any(|key| {
        graph
            .stitch_value(id, *key)
            .map(|v| v.iter().any(|s| *s != identity))
            .unwrap_or(false)
    });
    if foreign_parent {
        None
    } else {
        Some(identity)
    }
}

/// Identity the merge guard defends for `id`. A node whose terminal keys
/// name exactly one parent takes that parent's identity, whether or not the
/// parent is in view. A node with no parent reference falls back to
/// [`root_identity`]. Several parents leave it without one.
pub fn canonical_identity<G: HasStitchKeys + ?Sized>(
    graph: &G,
    config: &UntangleConfig,
    id: EntityId,
) -> Option<Scalar> {
    let mut parents = BTreeSet::new();
    for key in &config.terminal_keys {
        if let Some(value) = graph.stitch_value(id, *key) {
            parents.extend(value.iter().cloned());
        }
    }

    match parents.len() {
        0 => root_identity(graph, config, id),
        1 => parents.into_iter().next(),
        _ => None,
    }
}

/// Key with the single highest count, if any count is positive and no
/// other key ties it.
fn dominant<K: Ord + Clone>(tally: &BTreeMap<K, usize>) -> Option<K> {
    let best = tally.values().copied().max().filter(|m| *m > 0)?;
    let mut winners = tally.iter().filter(|(_, c)| **c == best);
    let (winner, _) = winners.next()?;
    if winners.next().is_some() {
        return None;
    }
    Some(winner.clone())
}

/// Multi-stage resolution of one component into disjoint groups
pub struct Untangler {
    config: UntangleConfig,
    filters: Vec<Box<dyn CliqueFilter>>,
}

impl Untangler {
    /// Build an untangler with a stereo filter per configured rule.
    pub fn new(config: UntangleConfig) -> Result<Self> {
        config.validate()?;
        let filters = config
            .stereo_rules
            .iter()
            .map(|rule| Box::new(StereoFilter::from(*rule)) as Box<dyn CliqueFilter>)
            .collect();
        Ok(Self { config, filters })
    }

    pub fn with_filter(mut self, filter: impl CliqueFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn config(&self) -> &UntangleConfig {
        &self.config
    }

    /// Run every stage over `graph`. Pure: nothing is written.
    pub fn partition(&self, graph: &ComponentGraph) -> Result<Partition> {
        let mut run = Run::new(graph, &self.config, &self.filters);
        run.seed_collapse()?;
        run.exact_stitching()?;
        let (seeds, rest) = run.disjoint_cliques()?;
        run.partition_cliques(&seeds, &rest)?;
        run.residuals()?;
        run.salvage()?;
        run.multi_parent()?;
        run.finish()
    }

    /// Load the component of `seed`, partition it and materialize one stitch
    /// per group inside `txn`.
    pub fn resolve<T: StoreTxn>(&self, txn: &mut T, seed: EntityId) -> Result<UntangleReport> {
        let started = Instant::now();
        let graph = ComponentGraph::load(txn, seed)?;
        let Partition {
            groups,
            mut anomalies,
            mut metrics,
            ..
        } = self.partition(&graph)?;

        let materializer = Materializer::new(&self.config);
        let mut stitches = Vec::with_capacity(groups.len());
        for group in &groups {
            let stitch = match materializer.materialize(txn, &graph, group)? {
                Materialized::Created(stitch) => {
                    metrics.stitches_created += 1;
                    stitch
                }
                Materialized::Existing(stitch) => {
                    metrics.stitches_reused += 1;
                    stitch
                }
            };

            if let [entity] = group.as_slice() {
                let anomaly = Anomaly::UnassignedResidual {
                    entity: *entity,
                    stitch: Some(stitch.id),
                };
                log::warn!("{}", anomaly);
                anomalies.push(anomaly);
            }
            stitches.push(stitch);
        }

        metrics.duration = started.elapsed();
        log::info!("{}", metrics.summary());

        Ok(UntangleReport {
            component: graph.component_id(),
            stitches,
            anomalies,
            metrics,
        })
    }
}

/// State of one untangle run.
struct Run<'a> {
    graph: &'a ComponentGraph,
    config: &'a UntangleConfig,
    filters: &'a [Box<dyn CliqueFilter>],
    set: DisjointSet,
    /// Canonical identity per class root. See [`canonical_identity`].
    identity: BTreeMap<EntityId, Scalar>,
    /// Candidate parents of each unsure node, per parent identity.
    parents: BTreeMap<EntityId, BTreeMap<Scalar, BTreeSet<EntityId>>>,
    unsure: BTreeSet<EntityId>,
    suspects: BTreeMap<EntityId, SuspectReason>,
    anomalies: Vec<Anomaly>,
    metrics: UntangleMetrics,
}

impl<'a> Run<'a> {
    fn new(
        graph: &'a ComponentGraph,
        config: &'a UntangleConfig,
        filters: &'a [Box<dyn CliqueFilter>],
    ) -> Self {
        let identity = graph
            .nodes()
            .filter_map(|id| canonical_identity(graph, config, id).map(|s| (id, s)))
            .collect();
        let metrics = UntangleMetrics {
            nodes: graph.len() as u64,
            edges: graph.edges().len() as u64,
            ..UntangleMetrics::default()
        };

        Self {
            graph,
            config,
            filters,
            set: DisjointSet::new(graph.nodes()),
            identity,
            parents: BTreeMap::new(),
            unsure: BTreeSet::new(),
            suspects: BTreeMap::new(),
            anomalies: Vec::new(),
            metrics,
        }
    }

    /// Nodes taking part in stages 2 to 6.
    fn active(&self) -> Vec<EntityId> {
        self.graph
            .nodes()
            .filter(|id| !self.unsure.contains(id))
            .collect()
    }

    fn find(&self, id: EntityId) -> Result<EntityId> {
        union_find::find(&self.set, id)
    }

    /// Union refusing to join classes with different canonical identities.
    /// Returns whether two classes were joined.
    fn merge(&mut self, a: EntityId, b: EntityId) -> Result<bool> {
        let root_a = self.find(a)?;
        let root_b = self.find(b)?;
        if root_a == root_b {
            return Ok(false);
        }

        if let (Some(left), Some(right)) = (self.identity.get(&root_a), self.identity.get(&root_b)) {
            if left != right {
                let anomaly = Anomaly::ConflictingRootIdentity {
                    left: a,
                    right: b,
                    left_identity: left.clone(),
                    right_identity: right.clone(),
                };
                log::warn!("{}", anomaly);
                self.anomalies.push(anomaly);
                self.metrics.refused_merges += 1;
                return Ok(false);
            }
        }

        let left = self.identity.remove(&root_a);
        let right = self.identity.remove(&root_b);
        let root = union_find::union(&mut self.set, root_a, root_b)?;
        if let Some(identity) = left.or(right) {
            self.identity.insert(root, identity);
        }
        Ok(true)
    }

    fn flag_suspect(&mut self, id: EntityId, reason: SuspectReason) {
        let slot = self.suspects.entry(id).or_insert(reason);
        if reason > *slot {
            *slot = reason;
        }
    }

    fn admitted(&self, clique: &Clique) -> bool {
        self.filters.iter().all(|f| f.admit(clique, self.graph))
    }

    /// Stage 1: fold each child into its only parent; defer children with
    /// several.
    fn seed_collapse(&mut self) -> Result<()> {
        let graph = self.graph;
        for id in graph.nodes() {
            let own = root_identity(graph, self.config, id);
            let mut candidates: BTreeMap<Scalar, BTreeSet<EntityId>> = BTreeMap::new();

            for edge in graph.incident(id) {
                if !self.config.is_terminal(edge.key) || own.as_ref() == Some(&edge.value) {
                    continue;
                }
                let Some(reference) = edge.key.reference_key() else {
                    continue;
                };
                let other = edge.other(id);
                let is_parent = graph
                    .stitch_value(other, reference)
                    .map(|v| v.contains(&edge.value))
                    .unwrap_or(false);
                if is_parent {
                    candidates.entry(edge.value.clone()).or_default().insert(other);
                }
            }

            match candidates.len() {
                0 => {}
                1 => {
                    for parent in candidates.into_values().flatten() {
                        if self.merge(id, parent)? {
                            self.metrics.seed_merges += 1;
                        }
                    }
                }
                _ => {
                    log::debug!("{} has {} candidate parents; deferred", id, candidates.len());
                    self.unsure.insert(id);
                    self.parents.insert(id, candidates);
                }
            }
        }
        self.metrics.unsure = self.unsure.len() as u64;
        Ok(())
    }

    /// Stage 2: merge nodes sharing one exact high-priority value.
    fn exact_stitching(&mut self) -> Result<()> {
        let (graph, config) = (self.graph, self.config);
        for &key in &config.exact_keys {
            let mut groups: BTreeMap<Scalar, Vec<EntityId>> = BTreeMap::new();
            for id in self.active() {
                let Some(value) = graph.stitch_value(id, key) else {
                    continue;
                };
                let edge_values: BTreeSet<&Scalar> = graph
                    .incident(id)
                    .into_iter()
                    .filter(|e| e.key == key)
                    .map(|e| &e.value)
                    .collect();
                if value.is_multiple() || edge_values.len() > 1 {
                    self.metrics.promiscuous += 1;
                    continue;
                }
                if let Some(scalar) = value.first() {
                    groups.entry(scalar.clone()).or_default().push(id);
                }
            }

            for members in groups.values() {
                for pair in members.windows(2) {
                    if self.merge(pair[0], pair[1])? {
                        self.metrics.exact_merges += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Stage 3: enumerate cliques per (key, value) over the clique span,
    /// prune, rank, and greedily pick a pairwise-disjoint seed set. The
    /// selection is first-fit by rank, not an optimal packing.
    fn disjoint_cliques(&mut self) -> Result<(Vec<Clique>, Vec<Clique>)> {
        let graph = self.graph;
        let keys = self.config.clique_keys.clone();
        let mut candidates: BTreeMap<BTreeSet<EntityId>, Clique> = BTreeMap::new();

        let mut enumerator = CliqueEnumerator::new(graph, self.active()).with_evidence(&keys);
        for &key in &keys {
            for value in graph.edge_values(key) {
                enumerator.set_value(Some(value));
                enumerator.enumerate(&[key], |clique| {
                    candidates
                        .entry(clique.members().clone())
                        .or_insert_with(|| clique.clone());
                    true
                });
            }
        }
        let stats = enumerator.into_stats();
        self.metrics.spurious_cliques += stats.spurious.len() as u64;
        self.anomalies.extend(stats.spurious);

        let mut ranked: Vec<Clique> = candidates
            .into_values()
            .filter(|c| self.admitted(c))
            .collect();
        ranked.sort_by(|a, b| a.rank_cmp(b));
        self.metrics.cliques = ranked.len() as u64;

        let mut seeds: Vec<Clique> = Vec::new();
        let mut rest = Vec::new();
        for clique in ranked {
            if seeds.iter().any(|s| s.overlaps(&clique)) {
                rest.push(clique);
            } else {
                seeds.push(clique);
            }
        }
        self.metrics.disjoint_cliques = seeds.len() as u64;

        for seed in &seeds {
            let mut members = seed.members().iter().copied();
            let Some(anchor) = members.next() else {
                continue;
            };
            for member in members {
                if self.merge(anchor, member)? {
                    self.metrics.clique_merges += 1;
                }
            }
        }

        log::debug!(
            "Selected {} disjoint of {} cliques",
            seeds.len(),
            seeds.len() + rest.len()
        );
        Ok((seeds, rest))
    }

    /// Stage 4: pull members of overlapping cliques into the seed they
    /// favor; flag those pulled several ways.
    fn partition_cliques(&mut self, seeds: &[Clique], rest: &[Clique]) -> Result<()> {
        let mapped: BTreeMap<EntityId, usize> = seeds
            .iter()
            .enumerate()
            .flat_map(|(i, s)| s.members().iter().map(move |m| (*m, i)))
            .collect();

        let mut votes: BTreeMap<EntityId, BTreeMap<usize, BTreeSet<StitchKey>>> = BTreeMap::new();
        for clique in rest {
            let mut overlap: BTreeMap<usize, usize> = BTreeMap::new();
            for member in clique.members() {
                if let Some(i) = mapped.get(member) {
                    *overlap.entry(*i).or_insert(0) += 1;
                }
            }
            let unmapped: Vec<EntityId> = clique
                .members()
                .iter()
                .filter(|m| !mapped.contains_key(m))
                .copied()
                .collect();
            if overlap.is_empty() || unmapped.is_empty() {
                continue;
            }

            match dominant(&overlap) {
                Some(seed) => {
                    for member in unmapped {
                        votes
                            .entry(member)
                            .or_default()
                            .entry(seed)
                            .or_default()
                            .extend(clique.keys());
                    }
                }
                None => {
                    let reason = if clique.max_priority() >= 5 {
                        SuspectReason::TopPriority
                    } else {
                        SuspectReason::Tie
                    };
                    for member in unmapped {
                        self.flag_suspect(member, reason);
                    }
                }
            }
        }

        for (member, by_seed) in votes {
            if self.suspects.contains_key(&member) {
                continue;
            }
            let counts: BTreeMap<usize, usize> =
                by_seed.iter().map(|(i, keys)| (*i, keys.len())).collect();
            let best = dominant(&counts);
            let conflicting: BTreeSet<StitchKey> = by_seed
                .iter()
                .filter(|(i, _)| Some(**i) != best)
                .flat_map(|(_, keys)| keys.iter().copied())
                .collect();

            match best {
                Some(seed) if conflicting.len() < 2 => {
                    if let Some(anchor) = seeds[seed].first() {
                        if self.merge(anchor, member)? {
                            self.metrics.clique_merges += 1;
                        }
                    }
                }
                _ => {
                    let reason = if conflicting.iter().any(|k| k.priority() >= 5) {
                        SuspectReason::TopPriority
                    } else {
                        SuspectReason::KeyConflict
                    };
                    self.flag_suspect(member, reason);
                }
            }
        }

        self.metrics.suspects = self.suspects.len() as u64;
        Ok(())
    }

    /// Stage 5: place leftover singletons by canonical-key closure, then by
    /// their best secondary clique.
    fn residuals(&mut self) -> Result<()> {
        let graph = self.graph;
        let active = self.active();

        let mut secondary: Vec<Clique> = CliqueEnumerator::new(graph, active.iter().copied())
            .collect(&self.config.secondary_keys)
            .into_iter()
            .filter(|c| self.admitted(c))
            .collect();
        secondary.sort_by(|a, b| a.rank_cmp(b));

        for id in active {
            if !self.set.is_singleton(id)? {
                continue;
            }
            let reason = self.suspects.get(&id).copied();

            let reached: Vec<EntityId> = graph
                .closure(id, self.config.closure_key)
                .into_iter()
                .filter(|n| *n != id && !self.unsure.contains(n))
                .collect();
            if !reached.is_empty() {
                if reason == Some(SuspectReason::TopPriority) {
                    let mut merged = false;
                    for node in &reached {
                        merged |= self.merge(id, *node)?;
                    }
                    if merged {
                        self.metrics.closure_merges += 1;
                        continue;
                    }
                } else {
                    let classes = reached
                        .iter()
                        .map(|n| self.find(*n))
                        .collect::<Result<BTreeSet<EntityId>>>()?;
                    if classes.len() == 1 && self.merge(id, reached[0])? {
                        self.metrics.closure_merges += 1;
                        continue;
                    }
                }
            }

            if reason.is_some() {
                continue;
            }

            if let Some(best) = secondary.iter().find(|c| c.contains(id)) {
                let mut tally: BTreeMap<EntityId, usize> = BTreeMap::new();
                for member in best.members().iter().filter(|m| **m != id) {
                    *tally.entry(self.find(*member)?).or_insert(0) += 1;
                }
                if let Some(target) = dominant(&tally) {
                    if self.merge(id, target)? {
                        self.metrics.secondary_merges += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Stage 6: each remaining singleton polls its neighbors' classes, one
    /// vote per key; a unique winner absorbs it.
    fn salvage(&mut self) -> Result<()> {
        let (graph, config) = (self.graph, self.config);
        for id in self.active() {
            if self.suspects.contains_key(&id) || !self.set.is_singleton(id)? {
                continue;
            }

            let mut votes: BTreeMap<EntityId, usize> = BTreeMap::new();
            for &key in &config.salvage_keys {
                let mut classes = BTreeSet::new();
                for neighbor in graph.neighbors(id, key) {
                    if self.unsure.contains(&neighbor) {
                        continue;
                    }
                    let root = self.find(neighbor)?;
                    if root != id && !self.set.is_singleton(root)? {
                        classes.insert(root);
                    }
                }
                for class in classes {
                    *votes.entry(class).or_insert(0) += 1;
                }
            }

            if let Some(winner) = dominant(&votes) {
                if self.merge(id, winner)? {
                    self.metrics.salvage_merges += 1;
                }
            }
        }
        Ok(())
    }

    /// Stage 7: each deferred node joins the candidate parent class it shares
    /// the most non-terminal keys with. Ties leave it alone.
    fn multi_parent(&mut self) -> Result<()> {
        let graph = self.graph;
        let parents = std::mem::take(&mut self.parents);

        for (id, candidates) in &parents {
            let mut roots: BTreeMap<&Scalar, EntityId> = BTreeMap::new();
            for (value, nodes) in candidates {
                if let Some(first) = nodes.iter().next() {
                    roots.insert(value, self.find(*first)?);
                }
            }

            let mut evidence: BTreeMap<&Scalar, BTreeSet<StitchKey>> = BTreeMap::new();
            for edge in graph.incident(*id) {
                if self.config.is_terminal(edge.key) {
                    continue;
                }
                let other_root = self.find(edge.other(*id))?;
                for (value, root) in &roots {
                    if *root == other_root {
                        evidence.entry(*value).or_default().insert(edge.key);
                    }
                }
            }

            let tally: BTreeMap<&Scalar, usize> =
                evidence.iter().map(|(v, keys)| (*v, keys.len())).collect();
            match dominant(&tally).and_then(|v| roots.get(v)) {
                Some(root) => {
                    if self.merge(*id, *root)? {
                        self.metrics.multi_parent_merges += 1;
                    }
                }
                None => log::debug!("{} left alone: no single parent wins", id),
            }
        }

        self.parents = parents;
        Ok(())
    }

    fn finish(self) -> Result<Partition> {
        let mut groups: Vec<Vec<EntityId>> = self.set.classes()?.into_values().collect();
        groups.sort();

        let mut metrics = self.metrics;
        metrics.groups = groups.len() as u64;
        metrics.singletons = groups.iter().filter(|g| g.len() == 1).count() as u64;

        Ok(Partition {
            groups,
            suspects: self.suspects,
            unsure: self.unsure,
            anomalies: self.anomalies,
            metrics,
        })
    }
}
