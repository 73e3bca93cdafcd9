use crate::card::Card;
use serde::{Deserialize, Serialize};

/// An ordered, read-only sequence of command cards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deck {
    pub name: String,
    pub cards: Vec<Card>,
}

impl Deck {
    pub fn new(name: impl Into<String>, cards: Vec<Card>) -> Self {
        Self {
            name: name.into(),
            cards,
        }
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn is_card_exist(&self, key: &str) -> bool {
        self.cards.iter().any(|c| c.key.eq_ignore_ascii_case(key))
    }

    /// First card with `key`.
    pub fn find(&self, key: &str) -> Option<&Card> {
        self.cards.iter().find(|c| c.key.eq_ignore_ascii_case(key))
    }

    pub fn cards_with_key<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Card> + 'a {
        self.cards
            .iter()
            .filter(move |c| c.key.eq_ignore_ascii_case(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_core::SourceLocation;

    #[test]
    fn key_queries_ignore_case() {
        let deck = Deck::new(
            "d",
            vec![
                Card::new("mesh", SourceLocation::default()),
                Card::new("REGION", SourceLocation::default()),
                Card::new("region", SourceLocation::default()),
            ],
        );
        assert!(deck.is_card_exist("MESH"));
        assert!(!deck.is_card_exist("SOLVE"));
        assert_eq!(deck.cards_with_key("Region").count(), 2);
        assert_eq!(deck.find("mesh").map(|c| c.key.as_str()), Some("MESH"));
    }
}
