//! Error types for the ledger and the repositories

use thiserror::Error;

use crate::status::PollStatus;
use crate::types::{OptionId, PollId, MIN_OPTIONS};

/// Failures raised by a [`crate::repository::PollRepository`]
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Mutation attempted by a caller, reported with [`LedgerError::InvalidState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    AddOption,
    RemoveOption,
    CastVote,
    EditPoll,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::AddOption => write!(f, "adding an option"),
            Action::RemoveOption => write!(f, "removing an option"),
            Action::CastVote => write!(f, "voting"),
            Action::EditPoll => write!(f, "editing the poll"),
        }
    }
}

/// Broad category of a [`LedgerError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    OptionCountFloor,
    Validation,
    StorageUnavailable,
}

/// Errors surfaced by ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("poll {0} does not exist")]
    PollNotFound(PollId),

    #[error("option {option} does not exist in poll {poll}")]
    OptionNotFound { poll: PollId, option: OptionId },

    #[error("{action} is not allowed while the poll is {status}")]
    InvalidState { action: Action, status: PollStatus },

    #[error("a poll must keep at least {} options (it has {count})", MIN_OPTIONS)]
    OptionCountFloor { count: usize },

    #[error("invalid poll: {0}")]
    Validation(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::PollNotFound(_) | LedgerError::OptionNotFound { .. } => {
                ErrorKind::NotFound
            }
            LedgerError::InvalidState { .. } => ErrorKind::InvalidState,
            LedgerError::OptionCountFloor { .. } => ErrorKind::OptionCountFloor,
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
        }
    }

    /// Retrying without a state change repeats the same failure for everything
    /// except storage outages
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::StorageUnavailable
    }
}
