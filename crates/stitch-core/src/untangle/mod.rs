//! Component untangling.
//!
//! Splits one connected component into groups that each stand for a single
//! substance. Stages run in a fixed order over an in-memory union-find:
//!
//! 1. seed collapse of children into their only parent
//! 2. exact stitching on high-priority keys
//! 3. disjoint clique selection
//! 4. partitioning of overlapping cliques around the selected seeds
//! 5. residual placement by closure and secondary cliques
//! 6. salvage of singletons by neighbor vote
//! 7. multi-parent resolution
//!
//! Every merge is guarded: two classes whose roots carry different canonical
//! identities are never joined.

mod config;
mod filter;
mod metrics;
mod untangler;

#[cfg(test)]
mod tests;

pub use config::{StereoRule, UntangleConfig};
pub use filter::{CliqueFilter, StereoFilter};
pub use metrics::UntangleMetrics;
pub use untangler::{
    canonical_identity, root_identity, Partition, SuspectReason, UntangleReport,
    Untangler,
};
