//! Document graph with deferred reference resolution.
//!
//! Every loaded file lands in one [`ElementGraph`] arena owned by a
//! [`Session`]. References between elements are queued as requests and
//! resolved to a fixed point once the documents they need are loaded.

mod graph;
mod kind;
mod loader;
mod resolver;
mod uri;

use thiserror::Error;

pub use graph::{DocumentId, DocumentInfo, Element, ElementGraph, ElementId};
pub use kind::ElementKind;
pub use resolver::{DocumentSource, FileSource, MemorySource, RefSlot, Session, SidPath};
pub use uri::{AbsoluteId, normalize_path, resolve_document_path};

/// Structural document errors. Any of these aborts the conversion of the
/// document being processed.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read document {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse XML in {path}: {message}")]
    Xml { path: String, message: String },

    #[error("duplicate id \"{id}\" in {path}")]
    DuplicateId { id: String, path: String },

    #[error("malformed reference \"{reference}\" in {path}")]
    MalformedReference { reference: String, path: String },

    #[error("invalid number \"{value}\" in {element}")]
    InvalidNumber { value: String, element: String },

    #[error("{element} is missing required child <{child}>")]
    MissingChild { element: String, child: String },

    #[error("{element} is missing required attribute \"{attribute}\"")]
    MissingAttribute { element: String, attribute: String },
}
