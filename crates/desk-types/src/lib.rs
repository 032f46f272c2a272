//! Shared data types for the ticket desk.
//!
//! The ticket row stays flat (nullable columns), while [`TicketState`] is the
//! tagged view derived from it at load time. Lifecycle planning lives in
//! [`lifecycle`] and never performs I/O.

pub mod lifecycle;
mod rating;
mod ticket;
mod transcript;

pub use lifecycle::{
    plan_claim, plan_close, plan_reopen, ChannelLabel, StatusNotice, TransitionError,
    TransitionPlan, TransitionStep,
};
pub use rating::{parse_rating, Rating, RatingError, MAX_RATING, MIN_RATING};
pub use ticket::{
    format_ticket_number, Classification, NewTicket, StatusSlot, Ticket, TicketCategory,
    TicketId, TicketState, TicketUpdate, UnknownCategory,
};
pub use transcript::{
    is_valid_transcript_id, Transcript, TranscriptAttachment, TranscriptMessage,
    TRANSCRIPT_ID_LEN,
};
