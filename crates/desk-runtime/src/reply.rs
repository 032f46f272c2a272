use desk_platform::Tone;
use desk_types::{Classification, TicketId};
use serde::{Deserialize, Serialize};

use crate::actions::{review_modal_control_id, CREATE_TICKET_MODAL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "modal", rename_all = "snake_case")]
pub enum ModalKind {
    /// Asks for `problem-description`.
    CreateTicket,
    /// Asks for `rating` and `comment`.
    ReviewTicket { ticket_id: TicketId },
}

impl ModalKind {
    /// Control id the submitted modal comes back with.
    pub fn control_id(self) -> String {
        match self {
            Self::CreateTicket => CREATE_TICKET_MODAL.to_string(),
            Self::ReviewTicket { ticket_id } => review_modal_control_id(ticket_id),
        }
    }
}

/// What the dispatcher should answer the interaction with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum ActionReply {
    Message {
        tone: Tone,
        title: String,
        text: String,
        ephemeral: bool,
    },
    /// Ticket channel created; carries the classification for the reply.
    Created {
        channel_id: String,
        ticket_number: String,
        classification: Classification,
    },
    /// Close confirmation prompt with Confirm/Cancel controls.
    ConfirmClose,
    /// Removes the confirmation prompt.
    DismissPrompt,
    ShowModal(ModalKind),
    Ignored,
}

impl ActionReply {
    pub fn success(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Message {
            tone: Tone::Success,
            title: title.into(),
            text: text.into(),
            ephemeral: true,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Message {
            tone: Tone::Failure,
            title: "Error".to_string(),
            text: text.into(),
            ephemeral: true,
        }
    }

    /// Same message, visible to the whole channel.
    pub fn public(self) -> Self {
        match self {
            Self::Message {
                tone, title, text, ..
            } => Self::Message {
                tone,
                title,
                text,
                ephemeral: false,
            },
            other => other,
        }
    }
}
