//! Inbound interaction model and control-id routing.

use std::collections::BTreeMap;

use desk_types::TicketId;
use serde::{Deserialize, Serialize};

pub const CREATE_TICKET: &str = "create-ticket";
pub const CREATE_TICKET_MODAL: &str = "create-ticket-modal";
pub const CLAIM_TICKET: &str = "claim-ticket";
pub const CLOSE_TICKET: &str = "close-ticket";
pub const CONFIRM_CLOSE_TICKET: &str = "confirm-close-ticket";
pub const CANCEL_CLOSE_TICKET: &str = "cancel-close-ticket";
pub const REOPEN_TICKET: &str = "reopen-ticket";
pub const SAVE_TICKET: &str = "save-ticket";
pub const DELETE_TICKET: &str = "delete-ticket";
const REVIEW_TICKET_PREFIX: &str = "review-ticket-";
const REVIEW_TICKET_MODAL_PREFIX: &str = "review-ticket-modal-";

pub const PROBLEM_DESCRIPTION_FIELD: &str = "problem-description";
pub const RATING_FIELD: &str = "rating";
pub const COMMENT_FIELD: &str = "comment";

pub fn review_control_id(ticket_id: TicketId) -> String {
    format!("{REVIEW_TICKET_PREFIX}{ticket_id}")
}

pub fn review_modal_control_id(ticket_id: TicketId) -> String {
    format!("{REVIEW_TICKET_MODAL_PREFIX}{ticket_id}")
}

/// Member that triggered an interaction, with the roles it held at that time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub role_ids: Vec<String>,
}

impl Actor {
    pub fn has_role(&self, role_id: &str) -> bool {
        self.role_ids.iter().any(|held| held == role_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    CreatePrompt,
    CreateSubmit,
    Claim,
    ClosePrompt,
    CloseConfirm,
    CloseCancel,
    Reopen,
    Save,
    Delete,
    ReviewPrompt { ticket_id: TicketId },
    ReviewSubmit { ticket_id: TicketId },
}

impl ActionKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::CreatePrompt => "create_prompt",
            Self::CreateSubmit => "create",
            Self::Claim => "claim",
            Self::ClosePrompt => "close_prompt",
            Self::CloseConfirm => "close",
            Self::CloseCancel => "close_cancel",
            Self::Reopen => "reopen",
            Self::Save => "save",
            Self::Delete => "delete",
            Self::ReviewPrompt { .. } => "review_prompt",
            Self::ReviewSubmit { .. } => "review",
        }
    }
}

/// Maps a button or modal control id to the action it triggers.
pub fn parse_control_id(control_id: &str) -> Option<ActionKind> {
    let kind = match control_id.trim() {
        CREATE_TICKET => ActionKind::CreatePrompt,
        CREATE_TICKET_MODAL => ActionKind::CreateSubmit,
        CLAIM_TICKET => ActionKind::Claim,
        CLOSE_TICKET => ActionKind::ClosePrompt,
        CONFIRM_CLOSE_TICKET => ActionKind::CloseConfirm,
        CANCEL_CLOSE_TICKET => ActionKind::CloseCancel,
        REOPEN_TICKET => ActionKind::Reopen,
        SAVE_TICKET => ActionKind::Save,
        DELETE_TICKET => ActionKind::Delete,
        other => {
            if let Some(raw) = other.strip_prefix(REVIEW_TICKET_MODAL_PREFIX) {
                ActionKind::ReviewSubmit {
                    ticket_id: parse_ticket_id(raw)?,
                }
            } else if let Some(raw) = other.strip_prefix(REVIEW_TICKET_PREFIX) {
                ActionKind::ReviewPrompt {
                    ticket_id: parse_ticket_id(raw)?,
                }
            } else {
                return None;
            }
        }
    };
    Some(kind)
}

fn parse_ticket_id(raw: &str) -> Option<TicketId> {
    raw.parse::<TicketId>().ok().filter(|id| *id > 0)
}

/// One interaction delivered by the platform dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundAction {
    pub control_id: String,
    pub channel_id: String,
    pub actor: Actor,
    /// Submitted modal fields keyed by input id.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl InboundAction {
    pub fn kind(&self) -> Option<ActionKind> {
        parse_control_id(&self.control_id)
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_control_id, review_control_id, review_modal_control_id, ActionKind, Actor};

    #[test]
    fn routes_fixed_control_ids() {
        assert_eq!(parse_control_id("claim-ticket"), Some(ActionKind::Claim));
        assert_eq!(
            parse_control_id("confirm-close-ticket"),
            Some(ActionKind::CloseConfirm)
        );
        assert_eq!(
            parse_control_id("create-ticket-modal"),
            Some(ActionKind::CreateSubmit)
        );
        assert_eq!(parse_control_id("open-sesame"), None);
    }

    #[test]
    fn review_modal_prefix_wins_over_review_prompt() {
        assert_eq!(
            parse_control_id(&review_modal_control_id(42)),
            Some(ActionKind::ReviewSubmit { ticket_id: 42 })
        );
        assert_eq!(
            parse_control_id(&review_control_id(42)),
            Some(ActionKind::ReviewPrompt { ticket_id: 42 })
        );
        assert_eq!(parse_control_id("review-ticket-abc"), None);
        assert_eq!(parse_control_id("review-ticket-0"), None);
    }

    #[test]
    fn role_checks_match_exact_ids() {
        let actor = Actor {
            id: "u1".to_string(),
            username: "sam".to_string(),
            role_ids: vec!["staff".to_string()],
        };
        assert!(actor.has_role("staff"));
        assert!(!actor.has_role("staf"));
    }
}
