//! On-disk deck format (serde) and conversion to [`Deck`].

use crate::card::{Card, ParamValue};
use crate::deck::Deck;
use crate::DeckResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tc_core::SourceLocation;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawCard {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, ParamValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub user: BTreeMap<String, ParamValue>,
}

fn from_raw(name: &str, raw: Vec<RawCard>) -> Deck {
    let cards = raw
        .into_iter()
        .enumerate()
        .map(|(i, rc)| {
            let line = rc.line.unwrap_or((i + 1) as u32);
            let mut card = Card::new(&rc.key, SourceLocation::new(name, line));
            for (k, v) in rc.params {
                card.set(&k, v, false);
            }
            for (k, v) in rc.user {
                card.set(&k, v, true);
            }
            card
        })
        .collect();
    Deck::new(name, cards)
}

pub fn to_raw(deck: &Deck) -> Vec<RawCard> {
    deck.cards
        .iter()
        .map(|c| {
            let mut params = BTreeMap::new();
            let mut user = BTreeMap::new();
            for p in &c.parameters {
                let target = if p.user_defined { &mut user } else { &mut params };
                target.insert(p.name.clone(), p.value.clone());
            }
            RawCard {
                key: c.key.clone(),
                line: Some(c.location.line),
                params,
                user,
            }
        })
        .collect()
}

pub fn parse_yaml(name: &str, content: &str) -> DeckResult<Deck> {
    let raw: Vec<RawCard> = serde_yaml::from_str(content)?;
    Ok(from_raw(name, raw))
}

pub fn parse_json(name: &str, content: &str) -> DeckResult<Deck> {
    let raw: Vec<RawCard> = serde_json::from_str(content)?;
    Ok(from_raw(name, raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DECK: &str = r#"
- key: mesh
  line: 2
  params: { type: s_quad4 }
- key: HOOK
  params: { load: probe, id: p1 }
  user: { x: 0.5, y: 0.25 }
- key: SOLVE
  params:
    type: dcsweep
    vscan: [anode]
    vstop: 1
"#;

    #[test]
    fn yaml_cards_keep_order_and_locations() {
        let deck = parse_yaml("pn.yaml", DECK).unwrap();
        assert_eq!(deck.len(), 3);
        assert_eq!(deck.cards[0].key, "MESH");
        assert_eq!(deck.cards[0].location.line, 2);
        // missing line numbers fall back to the card ordinal
        assert_eq!(deck.cards[1].location.line, 2);
        assert_eq!(deck.cards[1].location.file, "pn.yaml");
        assert_eq!(deck.cards[1].user_parameters().count(), 2);
        assert_eq!(deck.cards[2].get_real("vstop", 0.0).unwrap(), 1.0);
        assert_eq!(deck.cards[2].get_strings("vscan").unwrap(), vec!["anode"]);
    }

    #[test]
    fn raw_round_trip_preserves_user_flag() {
        let deck = parse_yaml("pn.yaml", DECK).unwrap();
        let text = serde_json::to_string(&to_raw(&deck)).unwrap();
        let again = parse_json("pn.yaml", &text).unwrap();
        assert_eq!(deck.cards[1].parameters.len(), again.cards[1].parameters.len());
        assert_eq!(again.cards[1].user_parameters().count(), 2);
    }
}
