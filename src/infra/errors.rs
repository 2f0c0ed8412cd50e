// src/infra/errors.rs — Error types for cadloop

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CadLoopError {
    // Oracle / transport errors (retriable when flagged)
    #[error("Provider '{provider}' error: {message}")]
    Provider {
        provider: String,
        message: String,
        retriable: bool,
    },

    #[error("Rate limited by '{provider}', retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("{step} timed out after {seconds}s")]
    Timeout { step: String, seconds: u64 },

    #[error("Command '{command}' failed: {message}")]
    Subprocess { command: String, message: String },

    // Infrastructure exhaustion (fatal for the session)
    #[error("Generator unavailable after {attempts} attempt(s): {message}")]
    GenerationFailed { attempts: u32, message: String },

    /// The executor itself could not run, as opposed to the candidate failing.
    #[error("Executor unavailable after {attempts} attempt(s): {message}")]
    ExecutionUnavailable { attempts: u32, message: String },

    #[error("{step} unavailable after {attempts} attempt(s): {message}")]
    EvaluationFailed {
        step: String,
        attempts: u32,
        message: String,
    },

    // Store contract violations
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Iteration '{iteration_id}' already has feedback attached")]
    FeedbackConflict { iteration_id: String },

    #[error("Session '{session_id}' already has iterations and can no longer be edited")]
    SessionLocked { session_id: String },

    #[error("Setting '{parent_id}' as parent of '{session_id}' would create a cycle")]
    CycleDetected {
        session_id: String,
        parent_id: String,
    },

    #[error("Session '{session_id}' is already being driven by another writer")]
    SessionBusy { session_id: String },

    #[error("Session '{session_id}' was cancelled")]
    Cancelled { session_id: String },

    // Infra
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CadLoopError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            CadLoopError::Provider {
                retriable: true,
                ..
            } | CadLoopError::RateLimited { .. }
                | CadLoopError::Timeout { .. }
                | CadLoopError::Subprocess { .. }
        )
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CadLoopError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type Result<T, E = CadLoopError> = std::result::Result<T, E>;
