use desk_classifier::ClassifierError;
use desk_platform::PlatformError;
use desk_store::StoreError;
use desk_transcript::TranscriptError;
use desk_types::{RatingError, TransitionError};
use thiserror::Error;

pub const GENERIC_FAILURE_TEXT: &str = "Something went wrong, please try again later.";

/// Failure of a desk action, classified by how the actor should be told.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeskError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{operation} failed transiently: {detail}")]
    Transient { operation: String, detail: String },
    #[error("fatal: {0}")]
    Fatal(String),
}

impl DeskError {
    pub fn transient(operation: impl Into<String>, detail: impl ToString) -> Self {
        Self::Transient {
            operation: operation.into(),
            detail: detail.to_string(),
        }
    }

    pub fn timeout(operation: &str, timeout_ms: u64) -> Self {
        Self::transient(operation, format!("timed out after {timeout_ms}ms"))
    }

    pub fn invalid_ticket() -> Self {
        Self::NotFound("This is not a valid ticket.".to_string())
    }

    /// Text shown to the actor. Transient and fatal failures stay generic.
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthorized(message)
            | Self::NotFound(message)
            | Self::Validation(message)
            | Self::Conflict(message) => message.clone(),
            Self::Transient { .. } | Self::Fatal(_) => GENERIC_FAILURE_TEXT.to_string(),
        }
    }

    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Fatal(_))
    }

    /// Classifies a platform failure of an operation the action cannot skip.
    pub fn from_platform(operation: &str, error: PlatformError) -> Self {
        match error {
            PlatformError::NotFound { resource } => {
                Self::NotFound(format!("The {resource} could not be found."))
            }
            PlatformError::Transient { .. } | PlatformError::InvalidResponse { .. } => {
                Self::transient(operation, error)
            }
            PlatformError::PermissionDenied { .. } | PlatformError::Rejected { .. } => {
                Self::Fatal(format!("{operation}: {error}"))
            }
        }
    }
}

impl From<StoreError> for DeskError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::TicketNotFound(_) => Self::invalid_ticket(),
            StoreError::RatingAlreadyExists(_) => {
                Self::Validation("You have already reviewed this ticket!".to_string())
            }
            StoreError::TranscriptAlreadyExists(_) => {
                Self::Conflict("A transcript for this ticket already exists.".to_string())
            }
            StoreError::StateConflict { .. } => Self::Conflict(
                "This ticket was just updated by someone else, please try again.".to_string(),
            ),
            StoreError::ChannelAlreadyBound(channel_id) => {
                Self::Fatal(format!("channel {channel_id} is already bound to a ticket"))
            }
            StoreError::InvalidPersistedValue { .. } => Self::Fatal(error.to_string()),
            other => Self::transient("ticket store", other),
        }
    }
}

impl From<TransitionError> for DeskError {
    fn from(error: TransitionError) -> Self {
        match error {
            TransitionError::AlreadyClosed { .. } => {
                Self::Validation("This ticket is already closed.".to_string())
            }
            TransitionError::NotClosed { .. } => {
                Self::Validation("This ticket is not closed.".to_string())
            }
        }
    }
}

impl From<RatingError> for DeskError {
    fn from(_: RatingError) -> Self {
        Self::Validation("Your rating must be a number between 1 and 5!".to_string())
    }
}

impl From<ClassifierError> for DeskError {
    fn from(error: ClassifierError) -> Self {
        Self::transient("classify ticket", error)
    }
}

impl From<TranscriptError> for DeskError {
    fn from(error: TranscriptError) -> Self {
        match error {
            TranscriptError::Store(store) => store.into(),
            TranscriptError::TicketNotFound(_) => Self::invalid_ticket(),
            other if other.is_transient() => Self::transient("save transcript", other),
            other => Self::Fatal(other.to_string()),
        }
    }
}
