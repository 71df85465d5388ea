use thiserror::Error;

use crate::managed::Action;

/// Failure reported by the service manager for one unit operation.
///
/// Carries rendered messages rather than the underlying `io::Error` so the
/// same result can be handed to more than one waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("failed to run {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{program} {verb} {unit} failed (status {status}): {output}")]
    Failed {
        program: String,
        verb: String,
        unit: String,
        status: String,
        output: String,
    },
}

/// Error surface of a [`ManagedProcess`](crate::ManagedProcess).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// A later request replaced this one while the namespace was absent.
    #[error("{action} on {unit} was superseded by a later request")]
    Superseded { unit: String, action: Action },

    /// The supervisor went away before the action could run.
    #[error("supervisor for {unit} was released before the action ran")]
    Terminated { unit: String },

    #[error("failed to start supervisor for {unit}: {message}")]
    Spawn { unit: String, message: String },
}
