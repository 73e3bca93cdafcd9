use std::collections::BTreeMap;
use tc_results::{
    Admittance, DocumentSink, FileSink, ResultDocument, ResultsError, SolutionRecord, SweepValue, load_document,
};

fn scratch(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("tc-results-{}-{name}", std::process::id()))
}

#[test]
fn file_sink_rewrites_the_document() {
    let path = scratch("doc.json");
    let mut sink = FileSink::new(&path);
    let mut doc = ResultDocument::new("digest");
    let g = doc.begin_group("cv", "acsweep");
    sink.persist(&doc).unwrap();
    assert!(load_document(&path).unwrap().solutions.is_empty());

    doc.record(
        g,
        SolutionRecord {
            index: 0,
            sweep: Some(SweepValue {
                name: "frequency".into(),
                value: 1e6,
            }),
            bias: BTreeMap::new(),
            currents: BTreeMap::new(),
            temperature: None,
            iterations: 0,
            admittance: BTreeMap::from([(
                "anode".to_string(),
                Admittance {
                    conductance: 1e-6,
                    capacitance: 2e-15,
                },
            )]),
        },
    )
    .unwrap();
    sink.persist(&doc).unwrap();
    let back = load_document(&path).unwrap();
    assert_eq!(back.solutions, doc.solutions);
    assert_eq!(back.deck_digest, "digest");
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn missing_document_is_reported() {
    assert!(matches!(
        load_document(&scratch("absent.json")),
        Err(ResultsError::DocumentNotFound { .. })
    ));
}
