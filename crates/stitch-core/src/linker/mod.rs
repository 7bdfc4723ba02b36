//! StitchKey linker: typed, valued edges between entities.
//!
//! - `Linker` creates and removes stitch edges, unions components as edges
//!   appear and keeps the `(key, value)` index consistent
//! - `Blacklist` drops uninformative values before they link anything
//! - `mapper` projects source payload fields onto stitch keys

mod blacklist;
mod key_linker;
pub mod mapper;


pub use blacklist::{Blacklist, BlacklistEntry};
pub use key_linker::Linker;
pub use mapper::{
    DirectMapper, FieldMapper, MappingConfig, PrefixMapper, RegexMapper, SourceMapping,
};
