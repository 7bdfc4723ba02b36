use crate::clique::Clique;
use crate::graph::{ComponentGraph, HasStitchKeys};
use crate::keys::StitchKey;
use crate::untangle::config::StereoRule;

/// Domain pruning applied to candidate cliques before disjoint selection
pub trait CliqueFilter: Send + Sync {
    fn admit(&self, clique: &Clique, graph: &ComponentGraph) -> bool;
}

/// Drops cliques held together only by a weak structure key (salt or
/// stereo-insensitive hash) unless some member lacks the strong key, which
/// means its stereochemistry is missing and the weak match is the best
/// evidence available.
#[derive(Debug, Clone, Copy)]
pub struct StereoFilter {
    weak: StitchKey,
    strong: StitchKey,
}

impl StereoFilter {
    pub fn new(weak: StitchKey, strong: StitchKey) -> Self {
        Self { weak, strong }
    }
}

impl From<StereoRule> for StereoFilter {
    fn from(rule: StereoRule) -> Self {
        Self::new(rule.weak, rule.strong)
    }
}

impl CliqueFilter for StereoFilter {
    fn admit(&self, clique: &Clique, graph: &ComponentGraph) -> bool {
        let weak_only = clique.keys().all(|k| k == self.weak);
        if !weak_only {
            return true;
        }
        clique
            .members()
            .iter()
            .any(|id| !graph.has_key(*id, self.strong))
    }
}
