//! Deck-level validation.
//!
//! Only structural problems are checked here; references to regions,
//! electrodes and sources are resolved (and reported) when the card runs.

use crate::card::ParamValue;
use crate::deck::Deck;
use tc_core::SourceLocation;

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("{location}: card has an empty key")]
    EmptyKey { location: SourceLocation },

    #[error("{second}: a second MESH card is not allowed (first at {first})")]
    MultipleMesh {
        first: SourceLocation,
        second: SourceLocation,
    },

    #[error("{location}: {key} requires parameter '{name}'")]
    MissingParameter {
        location: SourceLocation,
        key: String,
        name: String,
    },

    #[error("{location}: invalid value {name} = {value} ({reason})")]
    InvalidValue {
        location: SourceLocation,
        name: String,
        value: String,
        reason: String,
    },
}

impl ValidationError {
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            ValidationError::EmptyKey { location }
            | ValidationError::MissingParameter { location, .. }
            | ValidationError::InvalidValue { location, .. } => Some(location),
            ValidationError::MultipleMesh { second, .. } => Some(second),
        }
    }
}

/// Keys understood by the solver control loop and its collaborators.
const KNOWN_KEYS: &[&str] = &[
    "MESH",
    "X.MESH",
    "Y.MESH",
    "Z.MESH",
    "REGION",
    "FACE",
    "BOUNDARY",
    "PROFILE",
    "MOLE",
    "VSOURCE",
    "ISOURCE",
    "LIGHT",
    "PARTICLE",
    "MODEL",
    "METHOD",
    "HOOK",
    "SOLVE",
    "EXPORT",
    "IMPORT",
    "NODESET",
    "REFINE.CONFORM",
    "REFINE.HIERARCHICAL",
    "REFINE.UNIFORM",
    "REGIONSET",
    "BOUNDARYSET",
    "PMI",
    "SOURCEAPPLY",
    "ATTACH",
    "EXTEND",
    "ROTATE",
];

pub fn known_key(key: &str) -> bool {
    KNOWN_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

/// Keys the control loop will skip, with their locations.
pub fn unknown_keys(deck: &Deck) -> Vec<(String, SourceLocation)> {
    deck.cards
        .iter()
        .filter(|c| !known_key(&c.key))
        .map(|c| (c.key.clone(), c.location.clone()))
        .collect()
}

/// Parameters that must be present for a given key.
fn required(key: &str) -> &'static [&'static str] {
    match key {
        "SOLVE" => &["type"],
        "PMI" => &["type"],
        "REGIONSET" => &["region", "variable", "value"],
        "BOUNDARYSET" => &["boundary", "variable", "value"],
        _ => &[],
    }
}

pub fn validate_deck(deck: &Deck) -> Result<(), ValidationError> {
    let mut first_mesh: Option<&SourceLocation> = None;

    for card in &deck.cards {
        if card.key.trim().is_empty() {
            return Err(ValidationError::EmptyKey {
                location: card.location.clone(),
            });
        }

        if card.key == "MESH" {
            if let Some(first) = first_mesh {
                return Err(ValidationError::MultipleMesh {
                    first: first.clone(),
                    second: card.location.clone(),
                });
            }
            first_mesh = Some(&card.location);
        }

        for name in required(&card.key) {
            if !card.is_parameter_exist(name) {
                return Err(ValidationError::MissingParameter {
                    location: card.location.clone(),
                    key: card.key.clone(),
                    name: name.to_string(),
                });
            }
        }

        for p in &card.parameters {
            if let ParamValue::Real(v) = p.value
                && !v.is_finite()
            {
                return Err(ValidationError::InvalidValue {
                    location: card.location.clone(),
                    name: p.name.clone(),
                    value: v.to_string(),
                    reason: "must be finite".to_string(),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::Card;

    fn loc(line: u32) -> SourceLocation {
        SourceLocation::new("v.yaml", line)
    }

    #[test]
    fn second_mesh_is_rejected() {
        let deck = Deck::new(
            "v",
            vec![Card::new("MESH", loc(1)), Card::new("MESH", loc(7))],
        );
        let err = validate_deck(&deck).unwrap_err();
        assert!(matches!(err, ValidationError::MultipleMesh { .. }));
        assert_eq!(err.location().map(|l| l.line), Some(7));
    }

    #[test]
    fn solve_without_type_is_rejected() {
        let deck = Deck::new("v", vec![Card::new("SOLVE", loc(3))]);
        let err = validate_deck(&deck).unwrap_err();
        assert!(err.to_string().contains("'type'"));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let deck = Deck::new(
            "v",
            vec![Card::new("SOLVE", loc(3)).with("type", "op").with("vstep", f64::NAN)],
        );
        assert!(matches!(
            validate_deck(&deck),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn unknown_keys_are_listed_not_rejected() {
        let deck = Deck::new(
            "v",
            vec![Card::new("PLOTMESH", loc(2)), Card::new("METHOD", loc(3))],
        );
        assert!(validate_deck(&deck).is_ok());
        let unknown = unknown_keys(&deck);
        assert_eq!(unknown.len(), 1);
        assert_eq!(unknown[0].0, "PLOTMESH");
    }
}
