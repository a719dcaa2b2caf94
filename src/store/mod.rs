// src/store/mod.rs
//
// The container primitive layer: an in-memory tree of groups, datasets and
// attributes, a single-file binary encoding, and strided hyperslab access.
// The layout codec in `crate::layout` only ever talks to this API.
pub mod file;
pub mod hyperslab;
pub mod node;

pub use file::ContainerFile;
pub use hyperslab::Hyperslab;
pub use node::{Dataset, Group, Node, Payload, ScalarType, Value};
