//! Mesh error types.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    #[error("Unsupported mesh generator type: {kind}")]
    UnsupportedGenerator { kind: String },

    #[error("A mesh generator already exists for this run ({existing})")]
    GeneratorExists { existing: String },

    #[error("Mesh is not prepared (broadcast has not completed)")]
    NotPrepared,

    #[error("No mesh is available")]
    NoMesh,

    #[error("Invalid mesh input: {what}")]
    InvalidInput { what: String },

    #[error("Cell {cell} references node {node} but the mesh has {len} nodes")]
    NodeOob { cell: usize, node: usize, len: usize },

    #[error("Cell {cell} references region {region} but the mesh has {len} regions")]
    RegionOob {
        cell: usize,
        region: usize,
        len: usize,
    },

    #[error("Refinement requires at least one flagging policy")]
    NoFlagPolicy,

    #[error("Flag vector length {flags} does not match cell count {cells}")]
    FlagLength { flags: usize, cells: usize },

    #[error("Unsupported mesh operation: {what}")]
    UnsupportedOperation { what: String },

    #[error("Worker communication failed: {what}")]
    Communication { what: String },

    #[error("Deck error: {message}")]
    Deck { message: String },
}

pub type MeshResult<T> = Result<T, MeshError>;

impl From<tc_deck::DeckError> for MeshError {
    fn from(e: tc_deck::DeckError) -> Self {
        MeshError::Deck {
            message: e.to_string(),
        }
    }
}
