//! Multi-worker runs, result persistence and progress reporting.

mod common;

use common::{at, diode, scratch, solve};
use tc_app::{AppError, RunOptions, RunStage, load_solution, run_deck, run_deck_with_progress, run_workers};
use tc_deck::Card;
use tc_solver::SolverRegistry;

fn commands(name: &str) -> Vec<Card> {
    vec![
        solve(20, "op", name),
        Card::new("REFINE.HIERARCHICAL", at(21))
            .with("variable", "doping")
            .with("cell.refine.fraction", 0.25),
        solve(22, "dcsweep", name)
            .with("vscan", "cathode")
            .with("vstep", 0.25)
            .with("vstop", 0.5),
    ]
}

#[test]
fn workers_agree_on_every_solution() {
    let options = RunOptions {
        workers: 3,
        ..RunOptions::default()
    };
    let outcomes = run_workers(&diode(commands("lockstep")), &options, SolverRegistry::with_defaults).unwrap();
    assert_eq!(outcomes.len(), 3);
    let primary = &outcomes[0];
    assert_eq!(primary.document.groups().len(), 2);
    assert_eq!(primary.report.rank, 0);
    for (rank, outcome) in outcomes.iter().enumerate().skip(1) {
        assert_eq!(outcome.report.rank, rank);
        assert_eq!(outcome.document.groups(), primary.document.groups());
    }
}

#[test]
fn worker_failures_are_reported() {
    let options = RunOptions {
        workers: 2,
        ..RunOptions::default()
    };
    let deck = diode(vec![Card::new("REFINE.UNIFORM", at(20)).with("step", -1_i64)]);
    let err = run_workers(&deck, &options, SolverRegistry::with_defaults).unwrap_err();
    assert!(matches!(err, AppError::Config { .. }));
    assert_eq!(err.location(), Some(&at(20)));
}

/// A plain file under `scratch(name)`; paths below it cannot be created.
fn blocked(name: &str) -> std::path::PathBuf {
    let dir = scratch(name);
    std::fs::create_dir_all(&dir).unwrap();
    let file = dir.join("blocker");
    std::fs::write(&file, "").unwrap();
    file
}

#[test]
fn failed_export_on_the_primary_ends_every_worker() {
    let options = RunOptions {
        workers: 2,
        ..RunOptions::default()
    };
    let target = blocked("export").join("bc.txt");
    let deck = diode(vec![
        Card::new("EXPORT", at(20)).with("bcinfo", target.display().to_string().as_str()),
        Card::new("REFINE.UNIFORM", at(21)),
    ]);
    let err = run_workers(&deck, &options, SolverRegistry::with_defaults).unwrap_err();
    assert!(matches!(err, AppError::Io(_)), "{err}");
}

#[test]
fn hook_failure_on_the_primary_degrades_every_worker() {
    let options = RunOptions {
        workers: 2,
        ..RunOptions::default()
    };
    let prefix = blocked("hooks").join("op");
    let deck = diode(vec![
        Card::new("SOLVE", at(20))
            .with("type", "op")
            .with("out.prefix", prefix.display().to_string().as_str()),
        Card::new("REFINE.UNIFORM", at(21)),
        solve(22, "op", "hooks-after"),
    ]);
    let outcomes = run_workers(&deck, &options, SolverRegistry::with_defaults).unwrap();
    for outcome in &outcomes {
        assert_eq!(outcome.report.degraded.len(), 1);
        assert_eq!(outcome.report.degraded[0].location, "diode.yaml:20");
        assert_eq!(outcome.document.groups().len(), 1);
    }
    assert_eq!(outcomes[0].document.groups(), outcomes[1].document.groups());
}

#[test]
fn primary_persists_the_document() {
    let dir = scratch("persist");
    std::fs::create_dir_all(&dir).unwrap();
    let out = dir.join("solution.json");
    let options = RunOptions {
        solution_out: Some(out.clone()),
        workers: 1,
    };
    let outcome = run_deck(&diode(commands("persist")), &options).unwrap();
    let saved = load_solution(&out).unwrap();
    assert_eq!(saved.groups(), outcome.document.groups());
    assert_eq!(saved.solution_count(), outcome.document.solution_count());
    assert_eq!(saved.deck_digest, outcome.document.deck_digest);
}

#[test]
fn progress_runs_from_mesh_to_completion() {
    let mut stages = Vec::new();
    let mut on_event = |e: tc_app::RunProgressEvent| stages.push(e.stage);
    run_deck_with_progress(&diode(commands("progress")), &RunOptions::default(), Some(&mut on_event)).unwrap();
    assert_eq!(stages.first(), Some(&RunStage::GeneratingMesh));
    assert_eq!(stages.last(), Some(&RunStage::Completed));
    assert!(stages.contains(&RunStage::BuildingSystem));
    assert!(stages.contains(&RunStage::Refining));
    assert_eq!(stages.iter().filter(|s| **s == RunStage::Solving).count(), 2);
}
