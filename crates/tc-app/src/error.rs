//! Error types for the tc-app control layer.

use tc_core::SourceLocation;

/// Fatal run error.
///
/// Configuration, numerical and unsupported-operation errors carry the
/// source location of the card that raised them. Backend errors without a
/// location are attached to the running card by [`AppError::at`].
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{location}: {message}")]
    Config { location: SourceLocation, message: String },

    #[error("{location}: {message}")]
    Numerical { location: SourceLocation, message: String },

    #[error("{location}: unsupported {what}")]
    Unsupported { location: SourceLocation, what: String },

    #[error("Deck error: {0}")]
    Deck(String),

    #[error("Mesh error: {0}")]
    Mesh(String),

    #[error("System error: {0}")]
    System(String),

    #[error("Solver error: {0}")]
    Solver(String),

    #[error("Simulation error: {0}")]
    Simulation(String),

    #[error("Results error: {0}")]
    Results(String),

    #[error("Worker {rank} failed: {message}")]
    Worker { rank: usize, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for tc-app operations.
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn config(location: &SourceLocation, message: impl Into<String>) -> Self {
        AppError::Config {
            location: location.clone(),
            message: message.into(),
        }
    }

    pub fn unsupported(location: &SourceLocation, what: impl Into<String>) -> Self {
        AppError::Unsupported {
            location: location.clone(),
            what: what.into(),
        }
    }

    /// Located diagnostic for an error raised while running the card at
    /// `location`. Bad references and invalid values reported by the
    /// backends become configuration errors of that card.
    pub fn at(self, location: &SourceLocation) -> Self {
        let unset = |l: &SourceLocation| l.file.is_empty() && l.line == 0;
        match self {
            AppError::Config { location: l, message } if unset(&l) => AppError::config(location, message),
            AppError::Numerical { location: l, message } if unset(&l) => AppError::Numerical {
                location: location.clone(),
                message,
            },
            AppError::Unsupported { location: l, what } if unset(&l) => AppError::unsupported(location, what),
            AppError::Deck(message)
            | AppError::Mesh(message)
            | AppError::System(message)
            | AppError::Solver(message)
            | AppError::Simulation(message) => {
                let prefix = format!("{location}: ");
                let message = message.strip_prefix(&prefix).map(str::to_string).unwrap_or(message);
                AppError::config(location, message)
            }
            other => other,
        }
    }

    /// Source location of the diagnostic, when it has one.
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            AppError::Config { location, .. }
            | AppError::Numerical { location, .. }
            | AppError::Unsupported { location, .. } => Some(location),
            _ => None,
        }
    }
}

// Conversions from backend error types

impl From<tc_deck::DeckError> for AppError {
    fn from(err: tc_deck::DeckError) -> Self {
        match err {
            tc_deck::DeckError::Io(e) => AppError::Io(e),
            other => match other.location() {
                Some(location) => {
                    let text = other.to_string();
                    let prefix = format!("{location}: ");
                    let message = text.strip_prefix(&prefix).unwrap_or(&text).to_string();
                    AppError::config(location, message)
                }
                None => AppError::Deck(other.to_string()),
            },
        }
    }
}

impl From<tc_mesh::MeshError> for AppError {
    fn from(err: tc_mesh::MeshError) -> Self {
        use tc_mesh::MeshError;
        match err {
            MeshError::UnsupportedGenerator { .. } | MeshError::UnsupportedOperation { .. } => AppError::Unsupported {
                location: SourceLocation::default(),
                what: err.to_string(),
            },
            other => AppError::Mesh(other.to_string()),
        }
    }
}

impl From<tc_system::SystemError> for AppError {
    fn from(err: tc_system::SystemError) -> Self {
        use tc_system::SystemError;
        match err {
            SystemError::Io(e) => AppError::Io(e),
            SystemError::Mesh(e) => e.into(),
            other => AppError::System(other.to_string()),
        }
    }
}

impl From<tc_solver::SolverError> for AppError {
    fn from(err: tc_solver::SolverError) -> Self {
        AppError::Solver(err.to_string())
    }
}

impl From<tc_sim::SimError> for AppError {
    fn from(err: tc_sim::SimError) -> Self {
        use tc_sim::SimError;
        match err {
            SimError::Config { location, message } => AppError::Config { location, message },
            SimError::ConvergenceFailed { location, message } => AppError::Numerical { location, message },
            SimError::System(e) => e.into(),
            SimError::Results(e) => e.into(),
            SimError::Group(e) => e.into(),
            other => AppError::Simulation(other.to_string()),
        }
    }
}

impl From<tc_results::ResultsError> for AppError {
    fn from(err: tc_results::ResultsError) -> Self {
        match err {
            tc_results::ResultsError::Io(e) => AppError::Io(e),
            other => AppError::Results(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_take_the_card_location() {
        let card = SourceLocation::new("deck.yaml", 12);
        let err: AppError = tc_system::SystemError::UnknownRegion { name: "gate".into() }.into();
        let located = err.at(&card);
        assert!(matches!(located, AppError::Config { .. }));
        assert_eq!(located.to_string(), "deck.yaml:12: Region gate can't be found in mesh regions");
    }

    #[test]
    fn existing_locations_are_kept() {
        let solve = SourceLocation::new("deck.yaml", 3);
        let err: AppError = tc_sim::SimError::config(&solve, "vstep must not be zero").into();
        let located = err.at(&SourceLocation::new("other.yaml", 9));
        assert_eq!(located.location(), Some(&solve));
    }

    #[test]
    fn unsupported_generator_is_unsupported() {
        let err: AppError = tc_mesh::MeshError::UnsupportedGenerator { kind: "c_3d".into() }.into();
        let located = err.at(&SourceLocation::new("deck.yaml", 1));
        assert!(matches!(located, AppError::Unsupported { .. }));
    }

    #[test]
    fn io_errors_stay_io() {
        let err: AppError = tc_system::SystemError::Io(std::io::Error::other("gone")).into();
        assert!(matches!(err.at(&SourceLocation::default()), AppError::Io(_)));
    }
}
