use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Store-assigned ticket identifier.
pub type TicketId = i64;

/// Returned when a category string does not name a known category.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown ticket category '{0}'")]
pub struct UnknownCategory(pub String);

/// Fixed set of support categories produced by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketCategory {
    GeneralSupport,
    GameIssues,
    UserReports,
    StaffReportsManagement,
}

impl TicketCategory {
    pub const ALL: [TicketCategory; 4] = [
        Self::GeneralSupport,
        Self::GameIssues,
        Self::UserReports,
        Self::StaffReportsManagement,
    ];

    /// Stable identifier used in storage and classifier output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GeneralSupport => "general_support",
            Self::GameIssues => "game_issues",
            Self::UserReports => "user_reports",
            Self::StaffReportsManagement => "staff_reports_management",
        }
    }

    /// Human-readable name shown in status and archive messages.
    pub fn readable_name(self) -> &'static str {
        match self {
            Self::GeneralSupport => "General Support",
            Self::GameIssues => "Game Issues",
            Self::UserReports => "User Reports",
            Self::StaffReportsManagement => "Staff Reports & Management",
        }
    }
}

impl fmt::Display for TicketCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketCategory {
    type Err = UnknownCategory;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| UnknownCategory(normalized.to_string()))
    }
}

/// Classifier output for a problem description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: TicketCategory,
    /// Urgency on a 1-10 scale.
    pub severity: u8,
}

/// Zero-pads a ticket number to the four-digit display form.
pub fn format_ticket_number(ticket_number: u32) -> String {
    format!("{ticket_number:04}")
}

/// In-channel status messages owned by a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSlot {
    Initial,
    Claimed,
    Closed,
    Reopened,
    TranscriptLog,
}

impl StatusSlot {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Claimed => "claimed",
            Self::Closed => "closed",
            Self::Reopened => "reopened",
            Self::TranscriptLog => "transcript_log",
        }
    }
}

/// Lifecycle state derived from the nullable ticket columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TicketState {
    Unclaimed,
    Claimed {
        staff_id: String,
        claimed_at: DateTime<Utc>,
    },
    Closed {
        closed_by: Option<String>,
        closed_at: DateTime<Utc>,
        /// Staff member who held the claim when the ticket closed.
        staff_id: Option<String>,
    },
}

impl TicketState {
    pub fn staff_id(&self) -> Option<&str> {
        match self {
            Self::Unclaimed => None,
            Self::Claimed { staff_id, .. } => Some(staff_id),
            Self::Closed { staff_id, .. } => staff_id.as_deref(),
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Unclaimed => "open_unclaimed",
            Self::Claimed { .. } => "open_claimed",
            Self::Closed { .. } => "closed",
        }
    }

    /// True when the stored columns still derive to this state.
    ///
    /// Conditional updates compare only the columns that decide the state
    /// (`staff_id` and whether `closed_at` is set).
    pub fn matches_columns(&self, staff_id: Option<&str>, closed: bool) -> bool {
        self.staff_id() == staff_id && self.is_closed() == closed
    }
}

/// Fields required to insert a new ticket row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    pub customer_id: String,
    pub category: TicketCategory,
    pub channel_id: String,
    pub ticket_number: u32,
    pub initial_message_id: Option<String>,
}

/// One row of `support_tickets`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub ticket_number: u32,
    pub channel_id: String,
    pub category: TicketCategory,
    pub customer_id: String,
    pub staff_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<String>,
    pub initial_message_id: Option<String>,
    pub claimed_message_id: Option<String>,
    pub closed_message_id: Option<String>,
    pub reopened_message_id: Option<String>,
    pub transcript_message_id: Option<String>,
}

impl Ticket {
    pub fn state(&self) -> TicketState {
        if let Some(closed_at) = self.closed_at {
            return TicketState::Closed {
                closed_by: self.closed_by.clone(),
                closed_at,
                staff_id: self.staff_id.clone(),
            };
        }
        match &self.staff_id {
            Some(staff_id) => TicketState::Claimed {
                staff_id: staff_id.clone(),
                claimed_at: self.claimed_at.unwrap_or(self.created_at),
            },
            None => TicketState::Unclaimed,
        }
    }

    pub fn display_number(&self) -> String {
        format_ticket_number(self.ticket_number)
    }

    pub fn status_message_id(&self, slot: StatusSlot) -> Option<&str> {
        match slot {
            StatusSlot::Initial => self.initial_message_id.as_deref(),
            StatusSlot::Claimed => self.claimed_message_id.as_deref(),
            StatusSlot::Closed => self.closed_message_id.as_deref(),
            StatusSlot::Reopened => self.reopened_message_id.as_deref(),
            StatusSlot::TranscriptLog => self.transcript_message_id.as_deref(),
        }
    }

    /// Applies `update` to this row in place, mirroring the store's column writes.
    pub fn apply(&mut self, update: &TicketUpdate) {
        match update {
            TicketUpdate::Claim {
                staff_id,
                claimed_at,
            } => {
                self.staff_id = Some(staff_id.clone());
                self.claimed_at = Some(*claimed_at);
                self.claimed_message_id = None;
            }
            TicketUpdate::Unclaim => {
                self.staff_id = None;
                self.claimed_at = None;
                self.claimed_message_id = None;
            }
            TicketUpdate::Close {
                closed_by,
                closed_at,
            } => {
                self.closed_by = Some(closed_by.clone());
                self.closed_at = Some(*closed_at);
                self.claimed_message_id = None;
                self.reopened_message_id = None;
            }
            TicketUpdate::Reopen => {
                self.staff_id = None;
                self.claimed_at = None;
                self.closed_at = None;
                self.closed_by = None;
                self.closed_message_id = None;
                self.claimed_message_id = None;
            }
            TicketUpdate::LinkMessage { slot, message_id } => {
                let target = match slot {
                    StatusSlot::Initial => &mut self.initial_message_id,
                    StatusSlot::Claimed => &mut self.claimed_message_id,
                    StatusSlot::Closed => &mut self.closed_message_id,
                    StatusSlot::Reopened => &mut self.reopened_message_id,
                    StatusSlot::TranscriptLog => &mut self.transcript_message_id,
                };
                *target = message_id.clone();
            }
        }
    }
}

/// Column writes applied to a ticket row by a single store statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TicketUpdate {
    /// Sets `staff_id`/`claimed_at` together and drops the stale claim message link.
    Claim {
        staff_id: String,
        claimed_at: DateTime<Utc>,
    },
    Unclaim,
    /// Sets `closed_at`/`closed_by` and drops the claim message link.
    Close {
        closed_by: String,
        closed_at: DateTime<Utc>,
    },
    /// Clears claim and closure columns plus the closed/claimed message links.
    Reopen,
    LinkMessage {
        slot: StatusSlot,
        message_id: Option<String>,
    },
}

impl TicketUpdate {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Claim { .. } => "claim",
            Self::Unclaim => "unclaim",
            Self::Close { .. } => "close",
            Self::Reopen => "reopen",
            Self::LinkMessage { .. } => "link_message",
        }
    }
}
