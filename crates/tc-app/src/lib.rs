//! Application layer for tcadctl.
//!
//! This crate provides the command dispatcher shared by the CLI and the
//! integration tests: deck loading and validation, the card-by-card
//! `SolverControl` loop (mesh pre-pass, model and method settings, hooks,
//! solves, refinement, geometric transforms, import/export), multi-worker
//! runs, and result-document queries.

pub mod control;
pub mod deck_service;
pub mod error;
pub mod progress;
pub mod query;
mod refine;
pub mod report;
pub mod run_service;

// Re-export key types for convenience
pub use control::SolverControl;
pub use deck_service::{DeckSummary, load_deck, summarize_deck, validate_deck};
pub use error::{AppError, AppResult};
pub use progress::{RunProgressEvent, RunStage};
pub use query::{GroupSummary, current_series, load_solution, summarize_document, summarize_group};
pub use report::{RunReport, SolveRecord};
pub use run_service::{RunOptions, RunOutcome, run_deck, run_deck_with_progress, run_workers};
