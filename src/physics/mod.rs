//! Scene-wide collision data: merged world-space triangles and the flattened
//! partition tree over them.

mod merge;
mod tree;

pub use merge::{PhysicsMesh, PhysicsOptions, TriangleMerger};
pub use tree::{Axis, Side, SpatialNode, SpatialTree, build_tree};
