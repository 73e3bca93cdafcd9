//! Shared fixtures: a generated pn diode and helpers to extend its deck.

#![allow(dead_code)]

use std::path::PathBuf;
use tc_core::SourceLocation;
use tc_deck::{Card, Deck};

pub const DECK: &str = "diode.yaml";

pub fn at(line: u32) -> SourceLocation {
    SourceLocation::new(DECK, line)
}

/// Device cards of an 8x2 quad diode spanning `x0..x0 + 2`, p side on the
/// left. Lines 1 to 12 (10 without profiles).
pub fn device(x0: f64, profiles: bool) -> Vec<Card> {
    let mut cards = vec![
        Card::new("MESH", at(1)).with("type", "s_quad4"),
        Card::new("X.MESH", at(2))
            .with("x.min", x0)
            .with("x.max", x0 + 2.0)
            .with("n.spaces", 8_i64),
        Card::new("Y.MESH", at(3)).with("y.max", 1.0).with("n.spaces", 2_i64),
        Card::new("REGION", at(4))
            .with("label", "pside")
            .with("material", "Si")
            .with("x.max", x0 + 1.0),
        Card::new("REGION", at(5))
            .with("label", "nside")
            .with("material", "Si")
            .with("x.min", x0 + 1.0),
        Card::new("FACE", at(6)).with("label", "anode").with("location", "left"),
        Card::new("FACE", at(7)).with("label", "cathode").with("location", "right"),
        Card::new("BOUNDARY", at(8)).with("id", "anode").with("type", "ohmic"),
        Card::new("BOUNDARY", at(9)).with("id", "cathode").with("type", "ohmic"),
        Card::new("VSOURCE", at(10))
            .with("id", "vs")
            .with("type", "vsin")
            .with("vamp", 1.0)
            .with("freq", 1e6),
    ];
    if profiles {
        cards.push(
            Card::new("PROFILE", at(11))
                .with("region", "pside")
                .with("ion", "acceptor")
                .with("n.peak", 1e18),
        );
        cards.push(
            Card::new("PROFILE", at(12))
                .with("region", "nside")
                .with("ion", "donor")
                .with("n.peak", 1e16),
        );
    }
    cards
}

/// The doped diode followed by `commands`.
pub fn diode(commands: Vec<Card>) -> Deck {
    let mut cards = device(0.0, true);
    cards.extend(commands);
    Deck::new(DECK, cards)
}

/// Scratch location for hook output, unique per test binary and name.
pub fn scratch(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("tc-app-{}-{name}", std::process::id()))
}

/// A SOLVE card writing its hook output under `scratch(name)`.
pub fn solve(line: u32, kind: &str, name: &str) -> Card {
    let prefix = scratch(name).join(kind);
    Card::new("SOLVE", at(line))
        .with("type", kind)
        .with("out.prefix", prefix.display().to_string().as_str())
}
