//! Error types for solve orchestration.

use tc_core::SourceLocation;
use thiserror::Error;

/// Errors raised while configuring or running a solve.
#[derive(Error, Debug)]
pub enum SimError {
    /// Missing, contradictory or dangling SOLVE input.
    #[error("{location}: {message}")]
    Config { location: SourceLocation, message: String },

    /// Continuation exhausted its retries.
    #[error("{location}: {message}")]
    ConvergenceFailed { location: SourceLocation, message: String },

    #[error("hook {hook} failed: {message}")]
    Hook { hook: String, message: String },

    #[error("Solver error: {0}")]
    Solver(#[from] tc_solver::SolverError),

    #[error("System error: {0}")]
    System(#[from] tc_system::SystemError),

    #[error("Results error: {0}")]
    Results(#[from] tc_results::ResultsError),

    #[error("Deck error: {0}")]
    Deck(#[from] tc_deck::DeckError),

    #[error("Worker group error: {0}")]
    Group(#[from] tc_mesh::MeshError),
}

impl SimError {
    pub fn config(location: &SourceLocation, message: impl Into<String>) -> Self {
        SimError::Config {
            location: location.clone(),
            message: message.into(),
        }
    }

    /// The solve stopped but the run may continue with the next command.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            SimError::Hook { .. }
                | SimError::Solver(
                    tc_solver::SolverError::Unavailable { .. } | tc_solver::SolverError::Unsupported { .. }
                )
        )
    }
}

pub type SimResult<T> = Result<T, SimError>;
