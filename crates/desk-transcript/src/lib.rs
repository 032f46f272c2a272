//! Transcript capture: channel history, attachment rehosting and archival.

use desk_platform::PlatformError;
use desk_store::StoreError;
use thiserror::Error;

mod builder;
mod history;
mod token;
mod upload;

pub use builder::{
    archive_entry_draft, transcript_url, ArchiveSettings, CapturedTranscript, TranscriptBuilder,
    TranscriptSettings,
};
pub use history::{read_channel_history, DEFAULT_PAGE_SIZE};
pub use token::generate_transcript_id;
pub use upload::{
    rehost_attachments, HttpUploadClient, UploadClientConfig, UploadError, UploadService,
};

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("failed to read channel history: {0}")]
    History(#[source] PlatformError),
    #[error("failed to post archive entry: {0}")]
    Archive(#[source] PlatformError),
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },
    #[error("no ticket is bound to channel '{0}'")]
    TicketNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TranscriptError {
    /// True when retrying the capture later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::History(error) | Self::Archive(error) => error.is_transient(),
            Self::Timeout { .. } => true,
            Self::TicketNotFound(_) | Self::Store(_) => false,
        }
    }
}
