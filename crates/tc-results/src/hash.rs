//! Content digests and group ids.

use sha2::{Digest, Sha256};
use tc_deck::Deck;

/// SHA-256 of the deck's canonical JSON form.
pub fn deck_digest(deck: &Deck) -> String {
    let mut hasher = Sha256::new();
    let deck_json = serde_json::to_string(deck).unwrap_or_default();
    hasher.update(deck_json.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Version 4 layout UUID derived from the deck digest and the group's
/// ordinal, so that workers running the same deck agree on every id.
pub fn group_id(digest: &str, ordinal: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(digest.as_bytes());
    hasher.update(ordinal.to_le_bytes());
    let hash = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);
    uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_core::SourceLocation;
    use tc_deck::Card;

    #[test]
    fn digest_stability() {
        let deck = Deck::new("d", vec![Card::new("SOLVE", SourceLocation::new("d.yaml", 1)).with("type", "op")]);
        assert_eq!(deck_digest(&deck), deck_digest(&deck.clone()));
        assert_eq!(deck_digest(&deck).len(), 64);
    }

    #[test]
    fn digest_differs_for_different_decks() {
        let a = Deck::new("d", vec![Card::new("SOLVE", SourceLocation::new("d.yaml", 1)).with("type", "op")]);
        let b = Deck::new("d", vec![Card::new("SOLVE", SourceLocation::new("d.yaml", 1)).with("type", "dcsweep")]);
        assert_ne!(deck_digest(&a), deck_digest(&b));
    }

    #[test]
    fn group_ids_are_deterministic_v4() {
        let id = group_id("abc", 0);
        assert_eq!(id, group_id("abc", 0));
        assert_ne!(id, group_id("abc", 1));
        let parsed = uuid::Uuid::parse_str(&id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }
}
