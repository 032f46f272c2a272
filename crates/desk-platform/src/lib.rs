//! Chat platform surface used by the ticket desk.

use async_trait::async_trait;
use thiserror::Error;

mod discord_client;
mod draft;
mod memory;

pub use discord_client::{DiscordClientConfig, DiscordRestClient};
pub use draft::{
    colors, role_mention, user_mention, Button, ButtonRow, ButtonStyle, ButtonTarget,
    ChannelInfo, ChannelRequest, Embed, EmbedAuthor, EmbedField, EmbedFooter, Member,
    MessageAttachment, MessageAuthor, MessageDraft, PlatformMessage, Tone,
};
pub use memory::{InMemoryPlatform, BOT_USER_ID};

pub type PlatformResult<T> = Result<T, PlatformError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("{resource} not found")]
    NotFound { resource: String },
    #[error("missing permission for {operation}")]
    PermissionDenied { operation: String },
    #[error("{operation} failed transiently: {detail}")]
    Transient { operation: String, detail: String },
    #[error("{operation} rejected with status {status}: {detail}")]
    Rejected {
        operation: String,
        status: u16,
        detail: String,
    },
    #[error("{operation} returned an unreadable response: {detail}")]
    InvalidResponse { operation: String, detail: String },
}

impl PlatformError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Cleanup-style callers treat a missing target as already done.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Operations the desk performs against the chat platform.
///
/// Identifiers are opaque platform snowflakes carried as strings.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Posts a message and returns its id.
    async fn send_message(&self, channel_id: &str, draft: &MessageDraft) -> PlatformResult<String>;
    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        draft: &MessageDraft,
    ) -> PlatformResult<()>;
    async fn delete_message(&self, channel_id: &str, message_id: &str) -> PlatformResult<()>;
    async fn fetch_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> PlatformResult<PlatformMessage>;
    /// Returns up to `limit` messages strictly older than `before`, newest first.
    async fn fetch_messages(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> PlatformResult<Vec<PlatformMessage>>;

    async fn fetch_channel(&self, channel_id: &str) -> PlatformResult<ChannelInfo>;
    async fn rename_channel(&self, channel_id: &str, name: &str) -> PlatformResult<()>;
    async fn create_channel(&self, request: &ChannelRequest) -> PlatformResult<ChannelInfo>;
    async fn delete_channel(&self, channel_id: &str) -> PlatformResult<()>;
    async fn grant_member_access(&self, channel_id: &str, user_id: &str) -> PlatformResult<()>;
    async fn revoke_member_access(&self, channel_id: &str, user_id: &str) -> PlatformResult<()>;

    /// Resolves a community member; `None` when they are no longer present.
    async fn fetch_member(&self, user_id: &str) -> PlatformResult<Option<Member>>;
    async fn send_direct_message(&self, user_id: &str, draft: &MessageDraft)
        -> PlatformResult<String>;
}
