use tc_deck::{DeckError, load, save_yaml};

const PN_DECK: &str = r#"
- key: MESH
  params: { type: s_quad4 }
- key: X.MESH
  params: { x.min: 0.0, x.max: 2.0, n.spaces: 4 }
- key: SOLVE
  line: 30
  params: { type: op }
"#;

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("tc_deck_{}_{}", std::process::id(), name))
}

#[test]
fn load_yaml_and_save_round_trip() {
    let path = temp_path("pn.yaml");
    std::fs::write(&path, PN_DECK).unwrap();

    let deck = load(&path).unwrap();
    assert_eq!(deck.len(), 3);
    assert!(deck.is_card_exist("mesh"));
    assert_eq!(deck.cards[2].location.line, 30);
    assert!(deck.cards[2].location.file.ends_with("pn.yaml"));

    let out = temp_path("pn_out.yaml");
    save_yaml(&out, &deck).unwrap();
    let again = load(&out).unwrap();
    assert_eq!(again.len(), deck.len());
    assert_eq!(
        again.cards[1].get_real("x.max", 0.0).unwrap(),
        deck.cards[1].get_real("x.max", 0.0).unwrap()
    );

    let _ = std::fs::remove_file(path);
    let _ = std::fs::remove_file(out);
}

#[test]
fn invalid_deck_fails_validation_on_load() {
    let path = temp_path("bad.yaml");
    std::fs::write(&path, "- key: SOLVE\n  line: 9\n  params: { vstep: 0.1 }\n").unwrap();
    let err = load(&path).unwrap_err();
    assert!(matches!(err, DeckError::Validation(_)));
    assert_eq!(err.location().map(|l| l.line), Some(9));
    let _ = std::fs::remove_file(path);
}

#[test]
fn missing_file_is_io_error() {
    let err = load(&temp_path("does_not_exist.yaml")).unwrap_err();
    assert!(matches!(err, DeckError::Io(_)));
}
