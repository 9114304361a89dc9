//! Offline COLLADA scene baker.
//!
//! Documents are loaded into a shared element graph whose references are
//! resolved lazily across files. Every drawable is welded into one
//! interleaved vertex buffer with `u16` indices, skins are reduced to four
//! influences per vertex, and the world-space triangles of the whole scene
//! are partitioned into a flattened tree for collision queries.

pub mod convert;
pub mod diagnostics;
pub mod document;
pub mod geometry;
pub mod physics;
pub mod skin;

pub use convert::{BakedScene, ConversionReport, ConvertOptions, bake_scene, convert_document};
pub use diagnostics::{Diagnostics, Severity, ValidationIssue};
pub use document::{DocumentError, DocumentSource, FileSource, MemorySource, Session};
