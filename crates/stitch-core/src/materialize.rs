//! Persisting resolved groups as stitches.

use crate::error::Result;
use crate::graph::ComponentGraph;
use crate::storage::{StoreRead, StoreTxn};
use crate::types::{component_id, stitch_id, DataSource, EntityId, PayloadRef, Stitch};
use crate::untangle::{root_identity, UntangleConfig};
use chrono::Utc;
use std::collections::BTreeSet;

/// Result of materializing one group.
#[derive(Debug, Clone, PartialEq)]
pub enum Materialized {
    Created(Stitch),
    /// The group was already materialized; nothing was written.
    Existing(Stitch),
}

impl Materialized {
    pub fn stitch(&self) -> &Stitch {
        match self {
            Materialized::Created(s) | Materialized::Existing(s) => s,
        }
    }

    pub fn into_stitch(self) -> Stitch {
        match self {
            Materialized::Created(s) | Materialized::Existing(s) => s,
        }
    }
}

pub struct Materializer<'a> {
    config: &'a UntangleConfig,
}

impl<'a> Materializer<'a> {
    pub fn new(config: &'a UntangleConfig) -> Self {
        Self { config }
    }

    /// Canonical member of a group: members with a root identity first,
    /// then fewest parent references (see [`ComponentGraph::out_degree`]),
    /// then smallest id.
    pub fn elect_root(&self, graph: &ComponentGraph, members: &[EntityId]) -> Option<EntityId> {
        members.iter().copied().min_by_key(|id| {
            (
                root_identity(graph, self.config, *id).is_none(),
                graph.out_degree(*id),
                *id,
            )
        })
    }

    /// Write the stitch for `members` unless one with the same id exists.
    /// The owning DataSource is registered on first use and its instance
    /// count tracks created stitches only.
    pub fn materialize<T: StoreTxn>(
        &self,
        txn: &mut T,
        graph: &ComponentGraph,
        members: &[EntityId],
    ) -> Result<Materialized> {
        let mut sorted = members.to_vec();
        sorted.sort();
        sorted.dedup();

        let component = component_id(&sorted);
        let id = stitch_id(&self.config.source_key, component);
        if let Some(existing) = txn.get_stitch(id)? {
            log::debug!("Stitch {} already materialized", id);
            return Ok(Materialized::Existing(existing));
        }

        let mut payloads = Vec::with_capacity(sorted.len());
        let mut sources = BTreeSet::new();
        for member in &sorted {
            let entity = match graph.entity(*member) {
                Some(e) => e.clone(),
                None => txn.entity(*member)?,
            };
            payloads.push(PayloadRef {
                source: entity.source.clone(),
                record_id: entity.record_id.clone(),
            });
            sources.insert(entity.source);
        }

        let mut labels = BTreeSet::new();
        for source in sources {
            let label = match txn.get_data_source(&source)? {
                Some(ds) => ds.name,
                None => source,
            };
            labels.insert(label);
        }

        let root = self.elect_root(graph, &sorted).unwrap_or(component);
        let stitch = Stitch {
            id,
            source_key: self.config.source_key.clone(),
            component_id: component,
            root,
            members: sorted,
            payloads,
            labels,
            created_at: Utc::now(),
        };
        txn.put_stitch(&stitch)?;

        let mut owner = match txn.get_data_source(&self.config.source_key)? {
            Some(ds) => ds,
            None => DataSource::new(&self.config.source_key, &self.config.source_name),
        };
        owner.instances += 1;
        txn.put_data_source(&owner)?;

        log::debug!(
            "Materialized stitch {} with {} members (root {})",
            stitch.id,
            stitch.size(),
            stitch.root
        );
        Ok(Materialized::Created(stitch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::StitchKey;
    use crate::storage::Storage;
    use crate::testing::{id, v, Fixture};

    #[test]
    fn test_materialize_is_idempotent() {
        let fx = Fixture::new();
        fx.add(1, &[(StitchKey::Name, v("ASPIRIN"))]);
        fx.add(2, &[(StitchKey::Name, v("ASPIRIN"))]);
        let graph = fx.graph(id(1));
        let config = UntangleConfig::default();
        let materializer = Materializer::new(&config);

        let mut txn = fx.storage.begin().unwrap();
        let first = materializer.materialize(&mut txn, &graph, &[id(2), id(1)]).unwrap();
        let again = materializer.materialize(&mut txn, &graph, &[id(1), id(2)]).unwrap();
        txn.commit().unwrap();

        assert!(matches!(first, Materialized::Created(_)));
        assert!(matches!(again, Materialized::Existing(_)));
        assert_eq!(first.stitch(), again.stitch());
        assert_eq!(first.stitch().members, vec![id(1), id(2)]);
        assert_eq!(first.stitch().labels, BTreeSet::from(["test".to_string()]));

        let txn = fx.storage.begin_read().unwrap();
        let owner = txn.data_source("stitch_v1").unwrap();
        assert_eq!(owner.instances, 1);
        assert_eq!(owner.name, "Stitch v1");
        assert!(txn.get_stitch(first.stitch().id).unwrap().is_some());
    }

    #[test]
    fn test_labels_use_registered_source_names() {
        let fx = Fixture::new();
        fx.add(1, &[(StitchKey::Cas, v("50-78-2"))]);
        fx.storage
            .with_txn(|txn| txn.put_data_source(&DataSource::new("test", "Test Source")))
            .unwrap();
        let graph = fx.graph(id(1));
        let config = UntangleConfig::default();

        let mut txn = fx.storage.begin().unwrap();
        let out = Materializer::new(&config)
            .materialize(&mut txn, &graph, &[id(1)])
            .unwrap()
            .into_stitch();
        assert_eq!(out.labels, BTreeSet::from(["Test Source".to_string()]));
        assert_eq!(out.payloads[0].record_id, "r1");
    }

    #[test]
    fn test_root_election_prefers_identity_then_out_degree() {
        let fx = Fixture::new();
        // 1 and 2 refer to parent 3; 4 refers to nothing
        fx.add(1, &[(StitchKey::Unii, v("SALT")), (StitchKey::ActiveMoiety, v("P"))]);
        fx.add(2, &[(StitchKey::Name, v("N")), (StitchKey::ActiveMoiety, v("P"))]);
        fx.add(3, &[
            (StitchKey::Unii, v("P")),
            (StitchKey::ActiveMoiety, v("P")),
            (StitchKey::Name, v("N")),
        ]);
        fx.add(4, &[(StitchKey::Name, v("N"))]);
        let graph = fx.graph(id(1));
        let config = UntangleConfig::default();
        let materializer = Materializer::new(&config);

        assert_eq!(materializer.elect_root(&graph, &[id(1), id(2), id(3)]), Some(id(3)));
        // The 1-2 sibling link counts for neither
        assert_eq!(graph.out_degree(id(1)), 1);
        assert_eq!(graph.out_degree(id(2)), 1);
        assert_eq!(graph.out_degree(id(4)), 0);
        assert_eq!(materializer.elect_root(&graph, &[id(2), id(1)]), Some(id(1)));
        assert_eq!(materializer.elect_root(&graph, &[id(2), id(4)]), Some(id(4)));
        assert_eq!(materializer.elect_root(&graph, &[]), None);
    }
}
