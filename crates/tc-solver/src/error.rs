//! Error types for solver operations.

use tc_system::SystemError;
use thiserror::Error;

/// Errors that can occur while building or solving a device network.
#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Problem setup error: {what}")]
    ProblemSetup { what: String },

    #[error("Convergence failed: {what}")]
    ConvergenceFailed { what: String },

    #[error("Invalid state: {what}")]
    InvalidState { what: String },

    #[error("Numeric error: {what}")]
    Numeric { what: String },

    #[error("Unknown solver type {tag}")]
    UnknownFormulation { tag: String },

    #[error("Solver {tag} is not available in this build")]
    Unavailable { tag: String },

    #[error("Solver {tag} does not support {solve} solves")]
    Unsupported { tag: String, solve: String },

    #[error("Solver has not been created")]
    NotCreated,

    #[error("Simulation system error: {0}")]
    System(#[from] SystemError),

    #[error("Deck error: {0}")]
    Deck(#[from] tc_deck::DeckError),
}

impl SolverError {
    /// Failures a continuation strategy may retry with a smaller step or a
    /// convergence aid.
    pub fn is_convergence_failure(&self) -> bool {
        matches!(
            self,
            SolverError::ConvergenceFailed { .. } | SolverError::Numeric { .. }
        )
    }
}

pub type SolverResult<T> = Result<T, SolverError>;
