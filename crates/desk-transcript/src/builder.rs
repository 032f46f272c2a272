use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use desk_platform::{
    user_mention, Button, ButtonRow, ChatPlatform, Embed, MessageDraft, PlatformMessage,
    PlatformResult, Tone,
};
use desk_store::TicketStore;
use desk_types::{StatusSlot, Ticket, TicketUpdate, Transcript, TranscriptAttachment, TranscriptMessage};
use tokio::task::JoinHandle;

use crate::history::{read_channel_history, DEFAULT_PAGE_SIZE};
use crate::token::generate_transcript_id;
use crate::upload::{rehost_attachments, UploadService};
use crate::TranscriptError;

/// Where archive entries are posted and how transcript links are formed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSettings {
    pub channel_id: String,
    pub transcript_base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptSettings {
    pub page_size: usize,
    pub call_timeout: Duration,
    pub archive: Option<ArchiveSettings>,
}

impl Default for TranscriptSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            call_timeout: Duration::from_secs(30),
            archive: None,
        }
    }
}

#[derive(Debug)]
pub struct CapturedTranscript {
    pub transcript_id: String,
    pub message_count: usize,
    pub attachment_count: usize,
    pub rehosted_count: usize,
    /// Background archive-log post; `None` when no archive channel is configured.
    pub archive_task: Option<JoinHandle<()>>,
}

pub fn transcript_url(base_url: &str, transcript_id: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), transcript_id)
}

/// Archive-channel entry summarising a saved transcript, authored as the customer.
pub fn archive_entry_draft(
    ticket: &Ticket,
    customer_name: &str,
    channel_name: &str,
    transcript_id: &str,
    transcript_base_url: &str,
) -> MessageDraft {
    let category = ticket.category.readable_name();
    let embed = Embed::themed(
        Tone::Success,
        "New Transcript Saved",
        &format!(
            "The Transcript for {category} Ticket #{} has been saved",
            ticket.display_number()
        ),
    )
    .author(customer_name)
    .field("Ticket Owner", user_mention(&ticket.customer_id), true)
    .field("Ticket Name", channel_name, true)
    .field("Ticket Category", category, true)
    .field("Transcript ID", transcript_id, true)
    .field(
        "Ticket Claimer",
        ticket
            .staff_id
            .as_deref()
            .map(user_mention)
            .unwrap_or_else(|| "No one".to_string()),
        true,
    )
    .timestamp(Utc::now());

    MessageDraft::embed(embed).buttons(ButtonRow::new(vec![Button::link(
        "View Transcript",
        transcript_url(transcript_base_url, transcript_id),
    )]))
}

/// Composes history reading and attachment rehosting into one stored transcript.
///
/// Callers check for an existing transcript for the channel before invoking
/// [`TranscriptBuilder::capture`]; the store rejects a second row regardless.
#[derive(Clone)]
pub struct TranscriptBuilder {
    store: Arc<dyn TicketStore>,
    platform: Arc<dyn ChatPlatform>,
    uploader: Arc<dyn UploadService>,
    settings: TranscriptSettings,
}

impl TranscriptBuilder {
    pub fn new(
        store: Arc<dyn TicketStore>,
        platform: Arc<dyn ChatPlatform>,
        uploader: Arc<dyn UploadService>,
        settings: TranscriptSettings,
    ) -> Self {
        Self {
            store,
            platform,
            uploader,
            settings,
        }
    }

    pub fn settings(&self) -> &TranscriptSettings {
        &self.settings
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn capture(&self, channel_id: &str) -> Result<CapturedTranscript, TranscriptError> {
        let history = read_channel_history(
            self.platform.as_ref(),
            channel_id,
            self.settings.page_size,
            self.settings.call_timeout,
        )
        .await?;
        let mut messages = history.into_iter().map(strip_message).collect::<Vec<_>>();

        let urls = messages
            .iter()
            .flat_map(|message| message.attachments.iter().map(|item| item.url.clone()))
            .collect::<Vec<_>>();
        let mut rehosted_count = 0_usize;
        if !urls.is_empty() {
            let mapping =
                rehost_attachments(self.uploader.as_ref(), &urls, self.settings.call_timeout)
                    .await;
            for attachment in messages
                .iter_mut()
                .flat_map(|message| message.attachments.iter_mut())
            {
                if let Some(durable) = mapping.get(&attachment.url) {
                    attachment.url = durable.clone();
                    rehosted_count += 1;
                }
            }
        }

        let transcript_id = generate_transcript_id();
        let message_count = messages.len();
        self.store
            .insert_transcript(Transcript {
                transcript_id: transcript_id.clone(),
                related_channel_id: channel_id.to_string(),
                messages,
                created_at: Utc::now(),
            })
            .await?;
        tracing::info!(
            channel_id,
            transcript_id = %transcript_id,
            messages = message_count,
            attachments = urls.len(),
            rehosted = rehosted_count,
            "transcript saved"
        );

        let archive_task = self.settings.archive.clone().map(|archive| {
            let store = Arc::clone(&self.store);
            let platform = Arc::clone(&self.platform);
            let call_timeout = self.settings.call_timeout;
            let channel_id = channel_id.to_string();
            let transcript_id = transcript_id.clone();
            tokio::spawn(async move {
                if let Err(error) = post_archive_entry(
                    store.as_ref(),
                    platform.as_ref(),
                    &archive,
                    call_timeout,
                    &channel_id,
                    &transcript_id,
                )
                .await
                {
                    tracing::warn!(
                        channel_id = %channel_id,
                        transcript_id = %transcript_id,
                        error = %error,
                        "failed to post transcript archive entry"
                    );
                }
            })
        });

        Ok(CapturedTranscript {
            transcript_id,
            message_count,
            attachment_count: urls.len(),
            rehosted_count,
            archive_task,
        })
    }
}

fn strip_message(message: PlatformMessage) -> TranscriptMessage {
    TranscriptMessage {
        content: message.content,
        author: message.author.id,
        timestamp: message.timestamp,
        attachments: message
            .attachments
            .into_iter()
            .map(|attachment| TranscriptAttachment {
                url: attachment.url,
                name: attachment.filename,
            })
            .collect(),
    }
}

async fn bounded<T>(
    call_timeout: Duration,
    operation: &'static str,
    call: impl Future<Output = PlatformResult<T>>,
) -> Result<T, TranscriptError> {
    tokio::time::timeout(call_timeout, call)
        .await
        .map_err(|_| TranscriptError::Timeout {
            operation,
            timeout_ms: u64::try_from(call_timeout.as_millis()).unwrap_or(u64::MAX),
        })?
        .map_err(TranscriptError::Archive)
}

async fn post_archive_entry(
    store: &dyn TicketStore,
    platform: &dyn ChatPlatform,
    archive: &ArchiveSettings,
    call_timeout: Duration,
    channel_id: &str,
    transcript_id: &str,
) -> Result<String, TranscriptError> {
    let ticket = store
        .ticket_by_channel(channel_id)
        .await?
        .ok_or_else(|| TranscriptError::TicketNotFound(channel_id.to_string()))?;
    let channel = bounded(call_timeout, "fetch channel", platform.fetch_channel(channel_id)).await?;
    let customer_name =
        match bounded(call_timeout, "fetch customer", platform.fetch_member(&ticket.customer_id))
            .await
        {
            Ok(Some(member)) => member.username,
            Ok(None) => ticket.customer_id.clone(),
            Err(error) => {
                tracing::debug!(channel_id, error = %error, "customer lookup failed for archive entry");
                ticket.customer_id.clone()
            }
        };

    let draft = archive_entry_draft(
        &ticket,
        &customer_name,
        &channel.name,
        transcript_id,
        &archive.transcript_base_url,
    );
    let message_id = bounded(
        call_timeout,
        "post archive entry",
        platform.send_message(&archive.channel_id, &draft),
    )
    .await?;

    store
        .update_ticket(
            channel_id,
            None,
            &TicketUpdate::LinkMessage {
                slot: StatusSlot::TranscriptLog,
                message_id: Some(message_id.clone()),
            },
        )
        .await?;
    tracing::debug!(channel_id, message_id = %message_id, "linked transcript archive entry");
    Ok(message_id)
}
