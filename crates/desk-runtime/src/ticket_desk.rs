//! Ticket desk orchestrator: routes inbound actions through the lifecycle
//! planner, the ticket store and the chat platform.

use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use desk_classifier::Classifier;
use desk_platform::{ChannelRequest, ChatPlatform, MessageDraft, PlatformResult};
use desk_store::TicketStore;
use desk_transcript::{
    transcript_url, ArchiveSettings, TranscriptBuilder, TranscriptSettings, UploadService,
};
use desk_types::{
    parse_rating, plan_claim, plan_close, plan_reopen, ChannelLabel, NewTicket, Rating,
    StatusSlot, Ticket, TicketId, TicketState, TicketUpdate, TransitionPlan, TransitionStep,
};
use tokio::task::JoinHandle;

use crate::actions::{
    ActionKind, Actor, InboundAction, COMMENT_FIELD, PROBLEM_DESCRIPTION_FIELD, RATING_FIELD,
};
use crate::config::{DeskConfig, DeskConfigError};
use crate::error::DeskError;
use crate::reply::{ActionReply, ModalKind};

mod channel_locks;
mod render_helpers;

use channel_locks::ChannelLocks;

const REQUESTER_DENIED_TEXT: &str =
    "Tickets are not available to the public yet. Please contact a staff member if you need help.";

/// Result of applying a transition plan.
#[derive(Debug)]
struct TransitionRun {
    ticket: Ticket,
    persisted: bool,
    /// Status messages posted before the row was persisted, linked afterwards.
    pending_links: Vec<(StatusSlot, String)>,
    customer_missing: bool,
    transcript_id: Option<String>,
}

/// Drives tickets through their lifecycle for every inbound action.
///
/// Actions on one channel are serialized in-process; every store write that
/// changes state is conditional on the state the plan was computed from.
pub struct TicketDesk {
    config: DeskConfig,
    store: Arc<dyn TicketStore>,
    platform: Arc<dyn ChatPlatform>,
    classifier: Arc<dyn Classifier>,
    transcripts: TranscriptBuilder,
    locks: ChannelLocks,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl TicketDesk {
    pub fn new(
        config: DeskConfig,
        store: Arc<dyn TicketStore>,
        platform: Arc<dyn ChatPlatform>,
        classifier: Arc<dyn Classifier>,
        uploader: Arc<dyn UploadService>,
    ) -> Result<Self, DeskConfigError> {
        config.validate()?;
        let transcripts = TranscriptBuilder::new(
            Arc::clone(&store),
            Arc::clone(&platform),
            uploader,
            TranscriptSettings {
                page_size: config.history_page_size,
                call_timeout: config.external_call_timeout,
                archive: Some(ArchiveSettings {
                    channel_id: config.archive_channel_id.clone(),
                    transcript_base_url: config.transcript_base_url.clone(),
                }),
            },
        );
        Ok(Self {
            config,
            store,
            platform,
            classifier,
            transcripts,
            locks: ChannelLocks::default(),
            background: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &DeskConfig {
        &self.config
    }

    /// Handles one interaction. Failures are reported through the reply.
    pub async fn handle(&self, action: &InboundAction) -> ActionReply {
        let Some(kind) = action.kind() else {
            tracing::debug!(control_id = %action.control_id, "ignoring unknown control id");
            return ActionReply::Ignored;
        };

        match self.dispatch(kind, action).await {
            Ok(reply) => reply,
            Err(error) => {
                if error.is_operational() {
                    tracing::warn!(
                        action = kind.label(),
                        channel_id = %action.channel_id,
                        actor_id = %action.actor.id,
                        error = %error,
                        "desk action failed"
                    );
                } else {
                    tracing::debug!(
                        action = kind.label(),
                        channel_id = %action.channel_id,
                        actor_id = %action.actor.id,
                        error = %error,
                        "desk action rejected"
                    );
                }
                ActionReply::error(error.user_message())
            }
        }
    }

    /// Waits for archive-log posts spawned by earlier actions.
    pub async fn drain_background(&self) {
        let handles = std::mem::take(&mut *lock_or_recover(&self.background));
        for handle in handles {
            if let Err(error) = handle.await {
                tracing::warn!(error = %error, "background desk task panicked");
            }
        }
    }

    #[cfg(test)]
    fn unfinished_background(&self) -> usize {
        let mut background = lock_or_recover(&self.background);
        background.retain(|handle| !handle.is_finished());
        background.len()
    }

    async fn dispatch(
        &self,
        kind: ActionKind,
        action: &InboundAction,
    ) -> Result<ActionReply, DeskError> {
        match kind {
            ActionKind::CreatePrompt => {
                self.require_requester(&action.actor)?;
                Ok(ActionReply::ShowModal(ModalKind::CreateTicket))
            }
            ActionKind::CreateSubmit => self.create_ticket(action).await,
            ActionKind::ClosePrompt => Ok(ActionReply::ConfirmClose),
            ActionKind::CloseCancel => Ok(ActionReply::DismissPrompt),
            ActionKind::ReviewPrompt { ticket_id } => self.review_prompt(ticket_id).await,
            ActionKind::ReviewSubmit { ticket_id } => self.submit_review(ticket_id, action).await,
            ActionKind::Claim
            | ActionKind::CloseConfirm
            | ActionKind::Reopen
            | ActionKind::Save
            | ActionKind::Delete => {
                let _guard = self.locks.acquire(&action.channel_id).await;
                match kind {
                    ActionKind::Claim => self.claim(action).await,
                    ActionKind::CloseConfirm => self.close(action).await,
                    ActionKind::Reopen => self.reopen(action).await,
                    ActionKind::Save => self.save_transcript(action).await,
                    _ => self.delete(action).await,
                }
            }
        }
    }

    async fn create_ticket(&self, action: &InboundAction) -> Result<ActionReply, DeskError> {
        let actor = &action.actor;
        self.require_requester(actor)?;
        let description = action
            .field(PROBLEM_DESCRIPTION_FIELD)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| {
                DeskError::Validation("Please describe your problem so we can help.".to_string())
            })?;

        let classification = tokio::time::timeout(
            self.config.external_call_timeout,
            self.classifier.classify(description),
        )
        .await
        .map_err(|_| DeskError::timeout("classify ticket", self.timeout_ms()))??;
        let parent_id = self
            .config
            .category_parent(classification.category)
            .ok_or_else(|| {
                DeskError::Fatal(format!(
                    "no parent channel for category {}",
                    classification.category
                ))
            })?
            .to_string();

        let ticket_number = self.store.next_ticket_number(classification.category).await?;
        let channel = self
            .external(
                "create channel",
                self.platform.create_channel(&ChannelRequest {
                    name: ChannelLabel::Open.render(ticket_number),
                    parent_id: Some(parent_id),
                    allowed_role_ids: vec![self.config.staff_role_id.clone()],
                    allowed_member_ids: vec![actor.id.clone()],
                }),
            )
            .await?;

        let ticket = self
            .store
            .insert_ticket(NewTicket {
                customer_id: actor.id.clone(),
                category: classification.category,
                channel_id: channel.id.clone(),
                ticket_number,
                initial_message_id: None,
            })
            .await?;

        let initial = render_helpers::initial_message(
            &self.config,
            classification.category,
            actor,
            description,
        );
        if let Some(message_id) = self
            .attempt(
                &channel.id,
                "post initial message",
                self.platform.send_message(&channel.id, &initial),
            )
            .await
        {
            self.store
                .update_ticket(
                    &channel.id,
                    Some(&TicketState::Unclaimed),
                    &TicketUpdate::LinkMessage {
                        slot: StatusSlot::Initial,
                        message_id: Some(message_id),
                    },
                )
                .await?;
        }

        tracing::info!(
            ticket_id = ticket.id,
            channel_id = %channel.id,
            actor_id = %actor.id,
            category = classification.category.as_str(),
            severity = classification.severity,
            ticket_number = %ticket.display_number(),
            "ticket created"
        );
        Ok(ActionReply::Created {
            channel_id: channel.id,
            ticket_number: ticket.display_number(),
            classification,
        })
    }

    async fn claim(&self, action: &InboundAction) -> Result<ActionReply, DeskError> {
        self.require_staff(&action.actor, "Only staff members can claim tickets.")?;
        let ticket = self.load_ticket(&action.channel_id).await?;
        let plan = plan_claim(
            &ticket,
            &action.actor.id,
            &action.actor.username,
            Utc::now(),
        )?;
        let run = self.run_plan(ticket, &plan, &action.actor).await?;

        let (title, verb) = match plan.update {
            TicketUpdate::Unclaim => ("Ticket Unclaimed", "unclaimed"),
            _ => ("Ticket Claimed", "claimed"),
        };
        Ok(ActionReply::success(
            title,
            format!("You have {verb} ticket #{}.", run.ticket.display_number()),
        ))
    }

    async fn close(&self, action: &InboundAction) -> Result<ActionReply, DeskError> {
        let ticket = self.load_ticket(&action.channel_id).await?;
        let plan = plan_close(&ticket, &action.actor.id, Utc::now())?;
        let run = self.run_plan(ticket, &plan, &action.actor).await?;

        let mut text = "Please click \"Dismiss Message\" below.".to_string();
        if run.transcript_id.is_none() {
            text.push_str(
                "\n\nThe transcript could not be saved automatically. Use **Save Transcript** to try again.",
            );
        }
        Ok(ActionReply::success("Ticket Closed", text))
    }

    async fn reopen(&self, action: &InboundAction) -> Result<ActionReply, DeskError> {
        self.require_staff(&action.actor, "Only staff members can reopen tickets.")?;
        let ticket = self.load_ticket(&action.channel_id).await?;
        let plan = plan_reopen(&ticket)?;
        self.run_plan(ticket, &plan, &action.actor).await?;
        Ok(ActionReply::success(
            "Ticket Reopened",
            "The ticket has been reopened.",
        ))
    }

    async fn save_transcript(&self, action: &InboundAction) -> Result<ActionReply, DeskError> {
        self.require_staff(&action.actor, "Only staff members can save transcripts.")?;
        let ticket = self.load_ticket(&action.channel_id).await?;
        if let Some(existing) = self.store.transcript_by_channel(&ticket.channel_id).await? {
            return Ok(ActionReply::error(format!(
                "Transcript already exists: [View Online]({})",
                self.transcript_link(&existing.transcript_id)
            )));
        }
        if !ticket.state().is_closed() {
            return Err(DeskError::Validation(
                "Close the ticket before saving its transcript.".to_string(),
            ));
        }

        let transcript_id = self.capture_transcript(&ticket.channel_id).await?;
        let link = self.transcript_link(&transcript_id);
        self.enable_delete(&ticket, &link).await;
        tracing::info!(
            ticket_id = ticket.id,
            channel_id = %ticket.channel_id,
            actor_id = %action.actor.id,
            transcript_id = %transcript_id,
            "transcript saved manually"
        );
        Ok(ActionReply::success("Transcript Saved", format!("[View Online]({link})")).public())
    }

    async fn delete(&self, action: &InboundAction) -> Result<ActionReply, DeskError> {
        self.require_staff(&action.actor, "Only staff members can delete tickets.")?;
        let ticket = self.load_ticket(&action.channel_id).await?;
        if self
            .store
            .transcript_by_channel(&ticket.channel_id)
            .await?
            .is_none()
        {
            return Err(DeskError::Validation(
                "Save the transcript before deleting this ticket.".to_string(),
            ));
        }

        self.external(
            "delete channel",
            self.platform.delete_channel(&ticket.channel_id),
        )
        .await?;
        tracing::info!(
            ticket_id = ticket.id,
            channel_id = %ticket.channel_id,
            actor_id = %action.actor.id,
            "ticket channel deleted"
        );
        Ok(ActionReply::success(
            "Ticket Deleted",
            format!("Ticket #{} has been deleted.", ticket.display_number()),
        ))
    }

    async fn review_prompt(&self, ticket_id: TicketId) -> Result<ActionReply, DeskError> {
        self.store
            .ticket_by_id(ticket_id)
            .await?
            .ok_or_else(|| DeskError::NotFound("Ticket not found".to_string()))?;
        if self.store.rating_for_ticket(ticket_id).await?.is_some() {
            return Err(DeskError::Validation(
                "You have already reviewed this ticket".to_string(),
            ));
        }
        Ok(ActionReply::ShowModal(ModalKind::ReviewTicket { ticket_id }))
    }

    async fn submit_review(
        &self,
        ticket_id: TicketId,
        action: &InboundAction,
    ) -> Result<ActionReply, DeskError> {
        let rating = parse_rating(action.field(RATING_FIELD).unwrap_or_default())?;
        let review = action
            .field(COMMENT_FIELD)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();

        let ticket = self
            .store
            .ticket_by_id(ticket_id)
            .await?
            .ok_or_else(|| DeskError::NotFound("Ticket not found!".to_string()))?;
        if self.store.rating_for_ticket(ticket_id).await?.is_some() {
            return Err(DeskError::Validation(
                "You have already reviewed this ticket!".to_string(),
            ));
        }
        self.store
            .insert_rating(Rating {
                ticket_id,
                rating,
                review: review.clone(),
            })
            .await?;
        tracing::info!(
            ticket_id,
            actor_id = %action.actor.id,
            rating,
            "ticket review recorded"
        );

        if let Some(log_message_id) = ticket.transcript_message_id.as_deref() {
            self.append_review(log_message_id, rating, &review).await;
        }
        Ok(ActionReply::success(
            "Review submitted",
            "Thank you for your feedback!",
        ))
    }

    /// Executes `plan` step by step against `ticket`.
    ///
    /// Cleanup-style steps are best-effort. Only the conditional row write
    /// and the links that depend on it abort the transition.
    async fn run_plan(
        &self,
        ticket: Ticket,
        plan: &TransitionPlan,
        actor: &Actor,
    ) -> Result<TransitionRun, DeskError> {
        let channel_id = ticket.channel_id.clone();
        let mut run = TransitionRun {
            ticket,
            persisted: false,
            pending_links: Vec::new(),
            customer_missing: false,
            transcript_id: None,
        };

        for step in &plan.steps {
            match step {
                TransitionStep::DeleteStatusMessage { slot } => {
                    if let Some(message_id) = run.ticket.status_message_id(*slot) {
                        let message_id = message_id.to_string();
                        self.attempt(
                            &channel_id,
                            "delete status message",
                            self.platform.delete_message(&channel_id, &message_id),
                        )
                        .await;
                    }
                }
                TransitionStep::RevokeCustomerAccess => {
                    self.attempt(
                        &channel_id,
                        "revoke customer access",
                        self.platform
                            .revoke_member_access(&channel_id, &run.ticket.customer_id),
                    )
                    .await;
                }
                TransitionStep::GrantCustomerAccess => {
                    let customer_id = run.ticket.customer_id.clone();
                    let member = self
                        .attempt(
                            &channel_id,
                            "fetch customer",
                            self.platform.fetch_member(&customer_id),
                        )
                        .await;
                    if matches!(member, Some(None)) {
                        tracing::warn!(
                            channel_id = %channel_id,
                            customer_id = %customer_id,
                            "ticket customer is no longer a member"
                        );
                        run.customer_missing = true;
                    } else {
                        self.attempt(
                            &channel_id,
                            "grant customer access",
                            self.platform.grant_member_access(&channel_id, &customer_id),
                        )
                        .await;
                    }
                }
                TransitionStep::RenameChannel { label } => {
                    let name = label.render(run.ticket.ticket_number);
                    self.attempt(
                        &channel_id,
                        "rename channel",
                        self.platform.rename_channel(&channel_id, &name),
                    )
                    .await;
                }
                TransitionStep::ClearInitialControls => {
                    if let Some(message_id) = run.ticket.initial_message_id.clone() {
                        self.attempt(
                            &channel_id,
                            "clear initial controls",
                            self.platform.edit_message(
                                &channel_id,
                                &message_id,
                                &MessageDraft::clear_components(),
                            ),
                        )
                        .await;
                    }
                }
                TransitionStep::RestoreInitialControls => {
                    if let Some(message_id) = run.ticket.initial_message_id.clone() {
                        self.attempt(
                            &channel_id,
                            "restore initial controls",
                            self.platform.edit_message(
                                &channel_id,
                                &message_id,
                                &render_helpers::restore_initial_controls(),
                            ),
                        )
                        .await;
                    }
                }
                TransitionStep::Persist => {
                    run.ticket = self
                        .store
                        .update_ticket(&channel_id, Some(&plan.from), &plan.update)
                        .await?;
                    run.persisted = true;
                    for (slot, message_id) in std::mem::take(&mut run.pending_links) {
                        run.ticket = self
                            .link_message(&channel_id, plan, slot, message_id)
                            .await?;
                    }
                }
                TransitionStep::PostStatus { notice } => {
                    let draft = render_helpers::status_message(notice, run.customer_missing);
                    if let Some(message_id) = self
                        .attempt(
                            &channel_id,
                            "post status message",
                            self.platform.send_message(&channel_id, &draft),
                        )
                        .await
                    {
                        if run.persisted {
                            run.ticket = self
                                .link_message(&channel_id, plan, notice.slot(), message_id)
                                .await?;
                        } else {
                            run.pending_links.push((notice.slot(), message_id));
                        }
                    }
                }
                TransitionStep::CaptureTranscript => {
                    run.transcript_id = self.capture_after_close(&run.ticket).await;
                }
            }
        }

        tracing::info!(
            ticket_id = run.ticket.id,
            channel_id = %channel_id,
            actor_id = %actor.id,
            action = plan.action,
            from = plan.from.label(),
            to = plan.to.label(),
            "ticket transition applied"
        );
        Ok(run)
    }

    /// Links a posted status message, conditional on the plan's target state.
    async fn link_message(
        &self,
        channel_id: &str,
        plan: &TransitionPlan,
        slot: StatusSlot,
        message_id: String,
    ) -> Result<Ticket, DeskError> {
        let ticket = self
            .store
            .update_ticket(
                channel_id,
                Some(&plan.to),
                &TicketUpdate::LinkMessage {
                    slot,
                    message_id: Some(message_id),
                },
            )
            .await?;
        Ok(ticket)
    }

    /// Closure-time capture: reuses an existing transcript and never fails the close.
    async fn capture_after_close(&self, ticket: &Ticket) -> Option<String> {
        let transcript_id = match self.store.transcript_by_channel(&ticket.channel_id).await {
            Ok(Some(existing)) => {
                tracing::debug!(
                    channel_id = %ticket.channel_id,
                    transcript_id = %existing.transcript_id,
                    "transcript already exists; skipping capture"
                );
                existing.transcript_id
            }
            Ok(None) => match self.capture_transcript(&ticket.channel_id).await {
                Ok(transcript_id) => transcript_id,
                Err(error) => {
                    tracing::warn!(
                        channel_id = %ticket.channel_id,
                        error = %error,
                        "transcript capture failed during close"
                    );
                    return None;
                }
            },
            Err(error) => {
                tracing::warn!(
                    channel_id = %ticket.channel_id,
                    error = %error,
                    "transcript lookup failed during close"
                );
                return None;
            }
        };

        let link = self.transcript_link(&transcript_id);
        self.enable_delete(ticket, &link).await;
        self.notify_customer(ticket, &link).await;
        Some(transcript_id)
    }

    async fn capture_transcript(&self, channel_id: &str) -> Result<String, DeskError> {
        let captured = self.transcripts.capture(channel_id).await?;
        if let Some(task) = captured.archive_task {
            let mut background = lock_or_recover(&self.background);
            background.retain(|handle| !handle.is_finished());
            background.push(task);
        }
        Ok(captured.transcript_id)
    }

    async fn enable_delete(&self, ticket: &Ticket, link: &str) {
        let Some(message_id) = ticket.closed_message_id.as_deref() else {
            return;
        };
        self.attempt(
            &ticket.channel_id,
            "re-render closing message",
            self.platform.edit_message(
                &ticket.channel_id,
                message_id,
                &render_helpers::closed_with_transcript(link),
            ),
        )
        .await;
    }

    async fn notify_customer(&self, ticket: &Ticket, link: &str) {
        self.attempt(
            &ticket.channel_id,
            "notify customer",
            self.platform.send_direct_message(
                &ticket.customer_id,
                &render_helpers::closure_notice(ticket, link),
            ),
        )
        .await;
        if let Some(staff_id) = ticket.staff_id.as_deref() {
            self.attempt(
                &ticket.channel_id,
                "send review prompt",
                self.platform.send_direct_message(
                    &ticket.customer_id,
                    &render_helpers::review_prompt(ticket, staff_id),
                ),
            )
            .await;
        }
    }

    async fn append_review(&self, log_message_id: &str, rating: u8, review: &str) {
        let archive_channel = self.config.archive_channel_id.as_str();
        let Some(entry) = self
            .attempt(
                archive_channel,
                "fetch archive entry",
                self.platform.fetch_message(archive_channel, log_message_id),
            )
            .await
        else {
            return;
        };
        if entry.embeds.is_empty() {
            return;
        }
        let draft = MessageDraft {
            embeds: render_helpers::with_review_field(entry.embeds, rating, review),
            ..MessageDraft::default()
        };
        self.attempt(
            archive_channel,
            "append review to archive entry",
            self.platform
                .edit_message(archive_channel, log_message_id, &draft),
        )
        .await;
    }

    fn require_staff(&self, actor: &Actor, denied_text: &str) -> Result<(), DeskError> {
        if actor.has_role(&self.config.staff_role_id) {
            Ok(())
        } else {
            Err(DeskError::Unauthorized(denied_text.to_string()))
        }
    }

    fn require_requester(&self, actor: &Actor) -> Result<(), DeskError> {
        if actor.has_role(&self.config.requester_role_id) {
            Ok(())
        } else {
            Err(DeskError::Unauthorized(REQUESTER_DENIED_TEXT.to_string()))
        }
    }

    async fn load_ticket(&self, channel_id: &str) -> Result<Ticket, DeskError> {
        self.store
            .ticket_by_channel(channel_id)
            .await?
            .ok_or_else(DeskError::invalid_ticket)
    }

    fn transcript_link(&self, transcript_id: &str) -> String {
        transcript_url(&self.config.transcript_base_url, transcript_id)
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.config.external_call_timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Platform call the action cannot continue without.
    async fn external<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = PlatformResult<T>>,
    ) -> Result<T, DeskError> {
        match tokio::time::timeout(self.config.external_call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(DeskError::from_platform(operation, error)),
            Err(_) => Err(DeskError::timeout(operation, self.timeout_ms())),
        }
    }

    /// Platform call whose failure is logged and skipped; a missing target is silent.
    async fn attempt<T>(
        &self,
        channel_id: &str,
        operation: &'static str,
        call: impl Future<Output = PlatformResult<T>>,
    ) -> Option<T> {
        match tokio::time::timeout(self.config.external_call_timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(error)) if error.is_not_found() => {
                tracing::debug!(channel_id, operation, error = %error, "target already gone");
                None
            }
            Ok(Err(error)) => {
                tracing::warn!(channel_id, operation, error = %error, "best-effort step failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    channel_id,
                    operation,
                    timeout_ms = self.timeout_ms(),
                    "best-effort step timed out"
                );
                None
            }
        }
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
