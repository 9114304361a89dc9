//! Flattening of per-input vertex streams into one welded, cleaned and
//! attribute-complete mesh with 16-bit indices.

mod attributes;
mod channel;
mod clean;
mod triangle;
mod weld;

use thiserror::Error;

pub use attributes::{
    GenerationFailure, GenerationMode, GenerationOptions, generate_attributes, weld_and_generate,
};
pub use channel::{
    ChannelFilter, FilterMode, IndexStream, Primitive, RawChannel, Usage, VertexChannel,
    VertexLayout,
};
pub use clean::{CleanOptions, CleanStats, clean_triangles, compact_vertices};
pub use triangle::{Aabb, Triangle, canonical_corners};
pub use weld::{
    LayoutPlan, MAX_VERTICES, MeshStats, PointWelder, WeldOptions, WeldedMesh, plan_layout, weld,
    weld_vertices,
};

/// Structural errors of one primitive. Fatal for the document.
#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("primitive \"{primitive}\": index streams differ in length ({expected} vs {found})")]
    IndexCountMismatch {
        primitive: String,
        expected: usize,
        found: usize,
    },

    #[error("primitive \"{primitive}\": {count} indices do not form whole triangles")]
    NotTriangles { primitive: String, count: usize },

    #[error("primitive \"{primitive}\": {usage:?} channel has {components} components (1 to 4 supported)")]
    InvalidComponents {
        primitive: String,
        usage: Usage,
        components: usize,
    },

    #[error("primitive \"{primitive}\": index {index} is out of range for {usage:?} data with {len} elements")]
    IndexOutOfRange {
        primitive: String,
        usage: Usage,
        index: u32,
        len: usize,
    },

    #[error("primitive \"{primitive}\" has no position channel")]
    MissingPosition { primitive: String },

    #[error("primitive \"{primitive}\" welds to more than {limit} vertices")]
    VertexBudgetExceeded { primitive: String, limit: usize },

    #[error(transparent)]
    Generation(#[from] GenerationFailure),
}
