//! tc-results: hierarchical result document and its persistence.
//!
//! This crate provides:
//! - `ResultDocument`: `solutions → solution-group → solution` tree,
//!   append-only, with empty groups pruned
//! - deck content digest and deterministic group ids
//! - document sinks that rewrite the whole document on every persist

pub mod document;
pub mod hash;
pub mod store;
pub mod types;

pub use document::ResultDocument;
pub use hash::{deck_digest, group_id};
pub use store::{DocumentSink, FileSink, NullSink, load_document};
pub use types::*;

pub type ResultsResult<T> = Result<T, ResultsError>;

#[derive(thiserror::Error, Debug)]
pub enum ResultsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Solution group not found: {index}")]
    GroupNotFound { index: usize },

    #[error("Document not found: {path}")]
    DocumentNotFound { path: String },
}
