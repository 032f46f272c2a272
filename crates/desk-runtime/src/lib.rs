//! Ticket lifecycle orchestration: routes inbound interactions to ticket
//! transitions, transcripts and reviews.

mod actions;
mod config;
mod error;
mod reply;
mod ticket_desk;

pub use actions::{
    parse_control_id, review_control_id, review_modal_control_id, ActionKind, Actor,
    InboundAction, CANCEL_CLOSE_TICKET, CLAIM_TICKET, CLOSE_TICKET, COMMENT_FIELD,
    CONFIRM_CLOSE_TICKET, CREATE_TICKET, CREATE_TICKET_MODAL, DELETE_TICKET,
    PROBLEM_DESCRIPTION_FIELD, RATING_FIELD, REOPEN_TICKET, SAVE_TICKET,
};
pub use config::{DeskConfig, DeskConfigError, PING_PLACEHOLDER};
pub use error::{DeskError, GENERIC_FAILURE_TEXT};
pub use reply::{ActionReply, ModalKind};
pub use ticket_desk::TicketDesk;
