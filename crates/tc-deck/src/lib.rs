//! tc-deck: command deck model, file loading and validation.
//!
//! A deck is an ordered list of cards. Each card has a key (`MESH`, `SOLVE`,
//! `REFINE.CONFORM`, ...), the location it was read from, and named
//! parameters. Decks are written as YAML (or JSON) lists:
//!
//! ```yaml
//! - key: SOLVE
//!   line: 14
//!   params: { type: dcsweep, vscan: anode, vstop: 1.0 }
//! ```

pub mod card;
pub mod deck;
pub mod format;
pub mod validate;

pub use card::{Card, ParamValue, Parameter};
pub use deck::Deck;
pub use validate::{ValidationError, known_key, unknown_keys, validate_deck};

use std::path::Path;
use tc_core::SourceLocation;

pub type DeckResult<T> = Result<T, DeckError>;

#[derive(thiserror::Error, Debug)]
pub enum DeckError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("{location}: parameter '{name}' must be {expected}")]
    InvalidType {
        location: SourceLocation,
        name: String,
        expected: &'static str,
    },

    #[error("{location}: missing required parameter '{name}'")]
    MissingParameter {
        location: SourceLocation,
        name: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeckError {
    /// Source location of the offending card, when the error has one.
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            DeckError::InvalidType { location, .. } | DeckError::MissingParameter { location, .. } => {
                Some(location)
            }
            DeckError::Validation(v) => v.location(),
            _ => None,
        }
    }
}

fn deck_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn load_yaml(path: &Path) -> DeckResult<Deck> {
    let content = std::fs::read_to_string(path)?;
    let deck = format::parse_yaml(&deck_name(path), &content)?;
    validate_deck(&deck)?;
    Ok(deck)
}

pub fn load_json(path: &Path) -> DeckResult<Deck> {
    let content = std::fs::read_to_string(path)?;
    let deck = format::parse_json(&deck_name(path), &content)?;
    validate_deck(&deck)?;
    Ok(deck)
}

/// Load a deck choosing the format from the file extension (`.json` is
/// JSON, anything else YAML).
pub fn load(path: &Path) -> DeckResult<Deck> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => load_json(path),
        _ => load_yaml(path),
    }
}

pub fn save_yaml(path: &Path, deck: &Deck) -> DeckResult<()> {
    validate_deck(deck)?;
    let content = serde_yaml::to_string(&format::to_raw(deck))?;
    std::fs::write(path, content)?;
    Ok(())
}
