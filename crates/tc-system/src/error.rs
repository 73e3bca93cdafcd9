//! Simulation system error types.

use tc_deck::DeckError;
use tc_interp::InterpError;
use tc_mesh::MeshError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SystemError {
    #[error("Simulation system has not been built on a prepared mesh")]
    NotBuilt,

    #[error("Region {name} can't be found in mesh regions")]
    UnknownRegion { name: String },

    #[error("Boundary {name} can't be found in device structure")]
    UnknownBoundary { name: String },

    #[error("Boundary {name} is not an electrode")]
    NotElectrode { name: String },

    #[error("Variable {variable} is not defined for {owner}")]
    UnknownVariable { owner: String, variable: String },

    #[error("Source {name} has not been defined")]
    UnknownSource { name: String },

    #[error("Material {name} is not supported")]
    UnknownMaterial { name: String },

    #[error("Duplicate {what} name: {name}")]
    Duplicate { what: &'static str, name: String },

    #[error("Invalid region pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Region pattern '{pattern}' matches no mesh region")]
    NoMatch { pattern: String },

    #[error("Invalid unit expression '{expr}'")]
    InvalidUnit { expr: String },

    #[error("Invalid input: {what}")]
    InvalidInput { what: String },

    #[error("Mesh error: {0}")]
    Mesh(#[from] MeshError),

    #[error("Interpolation error: {0}")]
    Interp(#[from] InterpError),

    #[error("Deck error: {0}")]
    Deck(#[from] DeckError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SystemResult<T> = Result<T, SystemError>;
