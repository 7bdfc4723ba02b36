mod component;
mod traits;

pub use component::ComponentGraph;
pub use traits::{HasNeighbors, HasStitchKeys};
