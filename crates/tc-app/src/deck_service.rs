//! Deck loading, validation and introspection.

use std::collections::BTreeMap;
use std::path::Path;
use tc_deck::Deck;

use crate::error::AppResult;

/// Overview of a deck for listing.
#[derive(Debug, Clone)]
pub struct DeckSummary {
    pub name: String,
    pub card_count: usize,
    /// Card count per key, in key order.
    pub keys: BTreeMap<String, usize>,
    pub solve_count: usize,
    pub has_mesh: bool,
    /// Keys without a handler, as `KEY at file:line`.
    pub unknown: Vec<String>,
}

/// Load and validate a deck (YAML, or JSON by extension).
pub fn load_deck(path: &Path) -> AppResult<Deck> {
    Ok(tc_deck::load(path)?)
}

/// Check a deck built in memory.
pub fn validate_deck(deck: &Deck) -> AppResult<()> {
    tc_deck::validate_deck(deck).map_err(tc_deck::DeckError::Validation)?;
    Ok(())
}

pub fn summarize_deck(deck: &Deck) -> DeckSummary {
    let mut keys = BTreeMap::new();
    for card in deck.cards() {
        *keys.entry(card.key().to_string()).or_insert(0) += 1;
    }
    DeckSummary {
        name: deck.name.clone(),
        card_count: deck.len(),
        solve_count: keys.get("SOLVE").copied().unwrap_or(0),
        has_mesh: deck.is_card_exist("MESH"),
        keys,
        unknown: tc_deck::unknown_keys(deck)
            .into_iter()
            .map(|(key, location)| format!("{key} at {location}"))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use tc_core::SourceLocation;
    use tc_deck::Card;

    #[test]
    fn summary_counts_keys_and_flags_unknown_ones() {
        let deck = Deck::new(
            "d.yaml",
            vec![
                Card::new("MESH", SourceLocation::new("d.yaml", 1)).with("type", "s_tri3"),
                Card::new("SOLVE", SourceLocation::new("d.yaml", 2)).with("type", "equilibrium"),
                Card::new("SOLVE", SourceLocation::new("d.yaml", 3)).with("type", "op"),
                Card::new("PLOT", SourceLocation::new("d.yaml", 4)),
            ],
        );
        let s = summarize_deck(&deck);
        assert_eq!(s.card_count, 4);
        assert_eq!(s.solve_count, 2);
        assert!(s.has_mesh);
        assert_eq!(s.unknown, vec!["PLOT at d.yaml:4"]);
    }

    #[test]
    fn validation_errors_are_located() {
        let deck = Deck::new("d.yaml", vec![Card::new("SOLVE", SourceLocation::new("d.yaml", 9))]);
        let err = validate_deck(&deck).unwrap_err();
        assert!(matches!(err, AppError::Config { .. }));
        assert_eq!(err.location(), Some(&SourceLocation::new("d.yaml", 9)));
    }
}
