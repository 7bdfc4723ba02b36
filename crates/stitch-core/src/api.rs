use crate::clique::{Clique, CliqueEnumerator};
use crate::error::{Result, StitchError};
use crate::graph::ComponentGraph;
use crate::ingest::{Ingested, Ingestor};
use crate::keys::StitchKey;
use crate::linker::{Blacklist, BlacklistEntry, Linker, SourceMapping};
use crate::storage::{RedbStorage, Storage, StorageStats, StoreRead, StoreTxn};
use crate::types::{
    source_label, DataSource, Entity, EntityId, Stitch, StitchId, ROOT_LABEL,
};
use crate::union_find::{self, StoreView};
use crate::untangle::{UntangleConfig, UntangleReport, Untangler};
use crate::value::{Scalar, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

/// Config for embedded library mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StitcherConfig {
    /// Untangler stages and output source. Default: [`UntangleConfig::default`].
    pub untangle: UntangleConfig,
    /// Values the linker never links on.
    pub blacklist: Vec<BlacklistEntry>,
}

impl StitcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document with optional `[untangle]` and `[[blacklist]]`
    /// sections.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_untangle(mut self, untangle: UntangleConfig) -> Self {
        self.untangle = untangle;
        self
    }

    pub fn with_blacklisted<I, S>(mut self, key: StitchKey, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blacklist.push(BlacklistEntry {
            key,
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.untangle.validate()
    }
}

/// High-level, embedded stitching API.
///
/// # Example
/// ```rust,no_run
/// use stitch_core::{DataSource, StitchKey, Stitcher, StitcherConfig, Value};
///
/// let stitcher = Stitcher::open("./stitch.redb", StitcherConfig::default()).unwrap();
/// stitcher.register_source(DataSource::new("gsrs", "GSRS")).unwrap();
/// let a = stitcher.add_entity("gsrs", "r1", &[(StitchKey::Unii, Value::single("X1"))]).unwrap();
/// let report = stitcher.resolve_component(a, |s| println!("{}", s.id)).unwrap();
/// println!("{}", report.metrics.summary());
/// ```
pub struct Stitcher<S: Storage = RedbStorage> {
    storage: Arc<S>,
    linker: Linker,
    untangler: Untangler,
}

impl Stitcher<RedbStorage> {
    /// Open (or create) a stitch database at the given path.
    pub fn open(path: impl AsRef<Path>, config: StitcherConfig) -> Result<Self> {
        let storage = Arc::new(RedbStorage::open(path.as_ref())?);
        Self::with_storage(storage, config)
    }

    /// A throwaway in-memory database.
    pub fn in_memory(config: StitcherConfig) -> Result<Self> {
        Self::with_storage(Arc::new(RedbStorage::in_memory()?), config)
    }
}

impl<S: Storage> Stitcher<S> {
    pub fn with_storage(storage: Arc<S>, config: StitcherConfig) -> Result<Self> {
        config.validate()?;
        let linker = Linker::new().with_blacklist(Blacklist::from(config.blacklist.as_slice()));
        let untangler = Untangler::new(config.untangle)?;
        Ok(Self {
            storage,
            linker,
            untangler,
        })
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn linker(&self) -> &Linker {
        &self.linker
    }

    pub fn untangler(&self) -> &Untangler {
        &self.untangler
    }

    // --- Sources and entities ---

    /// Register or rename a data source. The instance count of an already
    /// registered source is kept.
    pub fn register_source(&self, mut source: DataSource) -> Result<()> {
        source.validate().map_err(StitchError::Validation)?;
        self.storage.with_txn(|txn| {
            if let Some(existing) = txn.get_data_source(&source.key)? {
                source.instances = existing.instances;
                source.created_at = existing.created_at;
            }
            txn.put_data_source(&source)
        })
    }

    pub fn data_source(&self, key: &str) -> Result<Option<DataSource>> {
        self.storage.begin_read()?.get_data_source(key)
    }

    /// Create an entity under a registered source and stitch its values.
    pub fn add_entity(
        &self,
        source: &str,
        record_id: &str,
        values: &[(StitchKey, Value)],
    ) -> Result<EntityId> {
        let entity = Entity::new(source, record_id);
        entity.validate().map_err(StitchError::Validation)?;
        self.storage.with_txn(|txn| {
            txn.data_source(source)?;
            txn.put_entity(&entity)?;
            txn.add_label(entity.id, ROOT_LABEL)?;
            txn.add_label(entity.id, &source_label(source))?;
            for (key, value) in values {
                self.linker.stitch(txn, entity.id, *key, value)?;
            }
            Ok(entity.id)
        })
    }

    /// Ingest one payload through `mapping`.
    pub fn ingest(
        &self,
        source: &str,
        payload: &serde_json::Value,
        mapping: &SourceMapping,
    ) -> Result<Ingested> {
        let ingestor = Ingestor::new(&self.linker, mapping);
        self.storage
            .with_txn(|txn| ingestor.ingest(txn, source, payload))
    }

    pub fn get_entity(&self, id: EntityId) -> Result<Option<Entity>> {
        self.storage.begin_read()?.get_entity(id)
    }

    // --- Linking ---

    /// Link `a` and `b` on `(key, value)`. Returns false if the link existed.
    pub fn stitch(&self, a: EntityId, b: EntityId, key: StitchKey, value: impl Into<Scalar>) -> Result<bool> {
        let value = value.into();
        self.storage
            .with_txn(|txn| self.linker.stitch_pair(txn, a, b, key, &value))
    }

    /// Apply a value change for `key` on `entity`. See [`Linker::update`].
    pub fn update(
        &self,
        entity: EntityId,
        key: StitchKey,
        old: Option<&Value>,
        new: Option<&Value>,
    ) -> Result<usize> {
        self.storage
            .with_txn(|txn| self.linker.update(txn, entity, key, old, new))
    }

    pub fn unstitch(&self, entity: EntityId, key: StitchKey) -> Result<usize> {
        self.storage
            .with_txn(|txn| self.linker.unstitch(txn, entity, key))
    }

    // --- Components ---

    // Reads go through snapshots so they never queue behind a writer.

    pub fn find(&self, id: EntityId) -> Result<EntityId> {
        let txn = self.storage.begin_read()?;
        union_find::find(&StoreView::new(&txn), id)
    }

    pub fn connected(&self, a: EntityId, b: EntityId) -> Result<bool> {
        let txn = self.storage.begin_read()?;
        union_find::connected(&StoreView::new(&txn), a, b)
    }

    /// Current union-find roots, sorted by id.
    pub fn component_roots(&self) -> Result<Vec<EntityId>> {
        self.storage.begin_read()?.labeled(ROOT_LABEL)
    }

    /// Snapshot of everything reachable from `seed` over stitch edges.
    pub fn component(&self, seed: EntityId) -> Result<ComponentGraph> {
        let txn = self.storage.begin_read()?;
        ComponentGraph::load(&txn, seed)
    }

    /// Neighbors of `node` per `(key, value)`, from its component snapshot.
    pub fn expand(&self, node: EntityId) -> Result<BTreeMap<(StitchKey, Scalar), Vec<EntityId>>> {
        Ok(self.component(node)?.expand(node))
    }

    /// Enumerate cliques among `nodes` over `keys`. Only edges between the
    /// given nodes count. Returns false if the visitor aborted.
    pub fn cliques<V>(&self, nodes: &[EntityId], keys: &[StitchKey], visitor: V) -> Result<bool>
    where
        V: FnMut(&Clique) -> bool,
    {
        let txn = self.storage.begin_read()?;
        let mut entities = Vec::with_capacity(nodes.len());
        let mut edges = BTreeMap::new();
        for id in nodes.iter().collect::<BTreeSet<_>>() {
            entities.push(txn.entity(*id)?);
            for edge in txn.edges_of(*id)? {
                edges.insert(edge.id, edge);
            }
        }
        drop(txn);
        let graph = ComponentGraph::from_parts(entities, edges.into_values());
        Ok(CliqueEnumerator::new(&graph, nodes.iter().copied()).enumerate(keys, visitor))
    }

    /// Untangle the component of `seed` and persist one stitch per group.
    /// `on_stitch` sees each stitch once the transaction has committed.
    pub fn resolve_component<F>(&self, seed: EntityId, mut on_stitch: F) -> Result<UntangleReport>
    where
        F: FnMut(&Stitch),
    {
        let report = self
            .storage
            .with_txn(|txn| self.untangler.resolve(txn, seed))?;
        for stitch in &report.stitches {
            on_stitch(stitch);
        }
        Ok(report)
    }

    /// Resolve every entity: roots first, then any entity no earlier run
    /// reached. `unstitch` removes edges without splitting union-find trees,
    /// so a tree can hold members its root no longer reaches.
    pub fn resolve_all(&self) -> Result<Vec<UntangleReport>> {
        let (roots, all) = {
            let txn = self.storage.begin_read()?;
            (txn.labeled(ROOT_LABEL)?, txn.entity_ids()?)
        };

        let mut reports = Vec::new();
        let mut done = BTreeSet::new();
        for seed in roots.into_iter().chain(all) {
            if done.contains(&seed) {
                continue;
            }
            let report = self.resolve_component(seed, |_| {})?;
            done.extend(report.stitches.iter().flat_map(|s| s.members.iter().copied()));
            reports.push(report);
        }
        log::info!("Resolved {} components", reports.len());
        Ok(reports)
    }

    pub fn get_stitch(&self, id: StitchId) -> Result<Option<Stitch>> {
        self.storage.begin_read()?.get_stitch(id)
    }

    pub fn stats(&self) -> Result<StorageStats> {
        self.storage.stats()
    }
}
