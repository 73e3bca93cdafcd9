//! Running a deck on one or more workers.

use crate::control::SolverControl;
use crate::error::{AppError, AppResult};
use crate::progress::RunProgressEvent;
use crate::report::RunReport;
use std::path::PathBuf;
use std::sync::Arc;
use tc_deck::Deck;
use tc_mesh::LocalGroup;
use tc_results::{DocumentSink, FileSink, ResultDocument};
use tc_solver::SolverRegistry;
use tracing::info;

/// Options for running a deck.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Result document written by the primary after every solution.
    pub solution_out: Option<PathBuf>,
    /// In-process workers running the deck in lockstep.
    pub workers: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            solution_out: None,
            workers: 1,
        }
    }
}

/// Outcome of one worker.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub document: ResultDocument,
    pub report: RunReport,
}

fn primary_sink(options: &RunOptions) -> Option<Box<dyn DocumentSink>> {
    options
        .solution_out
        .as_ref()
        .map(|p| Box::new(FileSink::new(p.clone())) as Box<dyn DocumentSink>)
}

/// Run `deck` with the default solver registry and return the primary's
/// outcome.
pub fn run_deck(deck: &Deck, options: &RunOptions) -> AppResult<RunOutcome> {
    run_deck_with_progress(deck, options, None)
}

/// Like [`run_deck`], streaming progress events. Multi-worker runs do not
/// report progress; the callback is only driven on a single worker.
pub fn run_deck_with_progress(
    deck: &Deck,
    options: &RunOptions,
    progress_cb: Option<&mut dyn FnMut(RunProgressEvent)>,
) -> AppResult<RunOutcome> {
    if options.workers > 1 {
        let mut outcomes = run_workers(deck, options, SolverRegistry::with_defaults)?;
        return Ok(outcomes.swap_remove(0));
    }
    let mut control = SolverControl::new(deck.clone());
    if let Some(sink) = primary_sink(options) {
        control = control.with_sink(sink);
    }
    control.run_with_progress(progress_cb)?;
    let (document, report) = control.into_parts();
    Ok(RunOutcome { document, report })
}

/// Run `deck` on `options.workers` threads connected by a local group.
/// Every worker builds its own system and solver registry; the primary
/// (rank 0) alone writes the result document. Outcomes are returned in
/// rank order. When workers fail, the primary's error is reported.
pub fn run_workers(
    deck: &Deck,
    options: &RunOptions,
    registry: impl Fn() -> SolverRegistry + Sync,
) -> AppResult<Vec<RunOutcome>> {
    let workers = LocalGroup::new(options.workers);
    info!(workers = workers.len(), deck = %deck.name, "starting workers");
    let registry = &registry;
    let results: Vec<AppResult<RunOutcome>> = std::thread::scope(|s| {
        let handles: Vec<_> = workers
            .into_iter()
            .enumerate()
            .map(|(rank, worker)| {
                let deck = deck.clone();
                let sink = if rank == 0 { primary_sink(options) } else { None };
                s.spawn(move || -> AppResult<RunOutcome> {
                    let mut control = SolverControl::with_comm(deck, Arc::new(worker)).with_registry(registry());
                    if let Some(sink) = sink {
                        control = control.with_sink(sink);
                    }
                    control.run()?;
                    let (document, report) = control.into_parts();
                    Ok(RunOutcome { document, report })
                })
            })
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(rank, h)| {
                h.join().unwrap_or_else(|_| {
                    Err(AppError::Worker {
                        rank,
                        message: "worker thread panicked".to_string(),
                    })
                })
            })
            .collect()
    });
    results.into_iter().collect()
}
