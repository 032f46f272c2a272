//! Pure transition planning for claimed/closed/reopened tickets.
//!
//! A plan names the state it was computed from, the state it leads to, the
//! row update to persist, and the ordered steps the orchestrator must run.
//! The order of `steps` is significant: later steps read what earlier steps
//! wrote (the closing message is posted before the transcript exists and is
//! edited only after).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ticket::{format_ticket_number, StatusSlot, Ticket, TicketState, TicketUpdate};

/// Error returned when an action does not apply to the ticket's current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("ticket {ticket_number} is already closed")]
    AlreadyClosed { ticket_number: String },
    #[error("ticket {ticket_number} is not closed")]
    NotClosed { ticket_number: String },
}

/// Channel name variants a ticket moves through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "label", rename_all = "snake_case")]
pub enum ChannelLabel {
    Open,
    ClaimedBy { username: String },
    Closed,
}

impl ChannelLabel {
    pub fn render(&self, ticket_number: u32) -> String {
        let number = format_ticket_number(ticket_number);
        match self {
            Self::Open => format!("ticket-{number}"),
            Self::ClaimedBy { username } => {
                let slug = channel_slug(username);
                if slug.is_empty() {
                    format!("ticket-{number}")
                } else {
                    format!("{slug}-{number}")
                }
            }
            Self::Closed => format!("closed-{number}"),
        }
    }
}

fn channel_slug(value: &str) -> String {
    let mapped = value
        .trim()
        .to_lowercase()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '-'
            }
        })
        .collect::<String>();
    mapped.trim_matches('-').to_string()
}

/// Status message posted by a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum StatusNotice {
    Claimed { staff_id: String },
    Unclaimed { staff_id: String },
    Closed,
    Reopened,
}

impl StatusNotice {
    /// Ticket column the posted message id is linked into.
    pub fn slot(&self) -> StatusSlot {
        match self {
            Self::Claimed { .. } | Self::Unclaimed { .. } => StatusSlot::Claimed,
            Self::Closed => StatusSlot::Closed,
            Self::Reopened => StatusSlot::Reopened,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum TransitionStep {
    /// Best-effort removal of a previously linked status message.
    DeleteStatusMessage { slot: StatusSlot },
    RevokeCustomerAccess,
    GrantCustomerAccess,
    RenameChannel { label: ChannelLabel },
    ClearInitialControls,
    RestoreInitialControls,
    /// Conditional write of the plan's update against the plan's `from` state.
    Persist,
    PostStatus { notice: StatusNotice },
    CaptureTranscript,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub action: &'static str,
    pub from: TicketState,
    pub to: TicketState,
    pub update: TicketUpdate,
    pub steps: Vec<TransitionStep>,
}

/// Plans a claim, or an unclaim when `actor_id` already holds the claim.
///
/// Claiming a ticket held by another staff member takes the claim over.
pub fn plan_claim(
    ticket: &Ticket,
    actor_id: &str,
    actor_name: &str,
    now: DateTime<Utc>,
) -> Result<TransitionPlan, TransitionError> {
    let from = ticket.state();
    let releasing = match &from {
        TicketState::Closed { .. } => {
            return Err(TransitionError::AlreadyClosed {
                ticket_number: ticket.display_number(),
            })
        }
        TicketState::Claimed { staff_id, .. } => staff_id == actor_id,
        TicketState::Unclaimed => false,
    };

    let (to, update, notice, label) = if releasing {
        (
            TicketState::Unclaimed,
            TicketUpdate::Unclaim,
            StatusNotice::Unclaimed {
                staff_id: actor_id.to_string(),
            },
            ChannelLabel::Open,
        )
    } else {
        (
            TicketState::Claimed {
                staff_id: actor_id.to_string(),
                claimed_at: now,
            },
            TicketUpdate::Claim {
                staff_id: actor_id.to_string(),
                claimed_at: now,
            },
            StatusNotice::Claimed {
                staff_id: actor_id.to_string(),
            },
            ChannelLabel::ClaimedBy {
                username: actor_name.to_string(),
            },
        )
    };

    Ok(TransitionPlan {
        action: if releasing { "unclaim" } else { "claim" },
        from,
        to,
        update,
        steps: vec![
            TransitionStep::DeleteStatusMessage {
                slot: StatusSlot::Claimed,
            },
            TransitionStep::Persist,
            TransitionStep::PostStatus { notice },
            TransitionStep::RenameChannel { label },
        ],
    })
}

pub fn plan_close(
    ticket: &Ticket,
    actor_id: &str,
    now: DateTime<Utc>,
) -> Result<TransitionPlan, TransitionError> {
    let from = ticket.state();
    if from.is_closed() {
        return Err(TransitionError::AlreadyClosed {
            ticket_number: ticket.display_number(),
        });
    }
    let to = TicketState::Closed {
        closed_by: Some(actor_id.to_string()),
        closed_at: now,
        staff_id: from.staff_id().map(str::to_string),
    };

    Ok(TransitionPlan {
        action: "close",
        from,
        to,
        update: TicketUpdate::Close {
            closed_by: actor_id.to_string(),
            closed_at: now,
        },
        steps: vec![
            TransitionStep::RevokeCustomerAccess,
            TransitionStep::RenameChannel {
                label: ChannelLabel::Closed,
            },
            TransitionStep::ClearInitialControls,
            TransitionStep::DeleteStatusMessage {
                slot: StatusSlot::Reopened,
            },
            TransitionStep::PostStatus {
                notice: StatusNotice::Closed,
            },
            TransitionStep::Persist,
            TransitionStep::CaptureTranscript,
        ],
    })
}

pub fn plan_reopen(ticket: &Ticket) -> Result<TransitionPlan, TransitionError> {
    let from = ticket.state();
    if !from.is_closed() {
        return Err(TransitionError::NotClosed {
            ticket_number: ticket.display_number(),
        });
    }

    Ok(TransitionPlan {
        action: "reopen",
        from,
        to: TicketState::Unclaimed,
        update: TicketUpdate::Reopen,
        steps: vec![
            TransitionStep::DeleteStatusMessage {
                slot: StatusSlot::Closed,
            },
            TransitionStep::DeleteStatusMessage {
                slot: StatusSlot::Claimed,
            },
            TransitionStep::DeleteStatusMessage {
                slot: StatusSlot::Reopened,
            },
            TransitionStep::Persist,
            TransitionStep::RenameChannel {
                label: ChannelLabel::Open,
            },
            TransitionStep::GrantCustomerAccess,
            TransitionStep::RestoreInitialControls,
            TransitionStep::PostStatus {
                notice: StatusNotice::Reopened,
            },
        ],
    })
}
