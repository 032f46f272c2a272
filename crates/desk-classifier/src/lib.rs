//! Category and severity classification of a customer's problem description.

use async_trait::async_trait;
use desk_types::Classification;
use thiserror::Error;

mod openai;

pub use openai::{OpenAiClassifier, OpenAiClassifierConfig, DEFAULT_CLASSIFIER_MODEL};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Transport(String),
    #[error("classifier returned status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("classifier response could not be decoded: {0}")]
    InvalidResponse(String),
    #[error("classifier returned no usable classification")]
    Empty,
}

impl ClassifierError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => desk_core::is_retryable_status(*status),
            Self::InvalidResponse(_) | Self::Empty => false,
        }
    }
}

/// Assigns a ticket category and a 1..=10 severity to free text.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError>;
}
