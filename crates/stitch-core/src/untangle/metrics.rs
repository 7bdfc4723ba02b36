use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Counters for one untangle run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UntangleMetrics {
    /// Nodes in the component.
    pub nodes: u64,

    /// Edges in the component.
    pub edges: u64,

    /// Children merged into their only parent.
    pub seed_merges: u64,

    /// Nodes deferred for having several parents.
    pub unsure: u64,

    /// Merges on exact high-priority values.
    pub exact_merges: u64,

    /// Nodes skipped by exact stitching for carrying several values.
    pub promiscuous: u64,

    /// Candidate cliques after filtering.
    pub cliques: u64,

    /// Cliques selected into the disjoint seed set.
    pub disjoint_cliques: u64,

    /// Merges from selected cliques and the nodes they pulled in.
    pub clique_merges: u64,

    /// Nodes flagged as suspect.
    pub suspects: u64,

    pub closure_merges: u64,

    pub secondary_merges: u64,

    pub salvage_merges: u64,

    pub multi_parent_merges: u64,

    /// Merges refused for conflicting root identity.
    pub refused_merges: u64,

    pub spurious_cliques: u64,

    /// Groups in the final partition.
    pub groups: u64,

    pub singletons: u64,

    pub stitches_created: u64,

    pub stitches_reused: u64,

    /// Wall time of the run.
    #[serde(with = "duration_serializer")]
    pub duration: Duration,
}

impl UntangleMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total merges performed across every stage.
    pub fn merges(&self) -> u64 {
        self.seed_merges
            + self.exact_merges
            + self.clique_merges
            + self.closure_merges
            + self.secondary_merges
            + self.salvage_merges
            + self.multi_parent_merges
    }

    /// Get a summary string for logging
    pub fn summary(&self) -> String {
        format!(
            "Untangled {} nodes / {} edges into {} groups ({} singletons): {} merges \
             (seed {}, exact {}, clique {}, closure {}, secondary {}, salvage {}, multi-parent {}), \
             {} disjoint of {} cliques, {} refused, {} suspect, {} unsure | \
             stitches: {} new, {} reused in {:?}",
            self.nodes,
            self.edges,
            self.groups,
            self.singletons,
            self.merges(),
            self.seed_merges,
            self.exact_merges,
            self.clique_merges,
            self.closure_merges,
            self.secondary_merges,
            self.salvage_merges,
            self.multi_parent_merges,
            self.disjoint_cliques,
            self.cliques,
            self.refused_merges,
            self.suspects,
            self.unsure,
            self.stitches_created,
            self.stitches_reused,
            self.duration
        )
    }
}

// Durations are stored as milliseconds
mod duration_serializer {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
