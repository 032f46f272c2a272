//! Ticket store abstractions and in-memory backend.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

mod sqlite;

pub use desk_types::{
    NewTicket, Rating, Ticket, TicketCategory, TicketId, TicketState, TicketUpdate, Transcript,
};
pub use sqlite::SqliteTicketStore;

/// Result type for ticket store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ticket '{0}' not found")]
    TicketNotFound(String),
    #[error("channel '{0}' is already bound to a ticket")]
    ChannelAlreadyBound(String),
    #[error("transcript for channel '{0}' already exists")]
    TranscriptAlreadyExists(String),
    #[error("ticket {0} already has a rating")]
    RatingAlreadyExists(TicketId),
    #[error("ticket in channel '{channel_id}' changed concurrently (expected {expected})")]
    StateConflict {
        channel_id: String,
        expected: &'static str,
    },
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Row counts reported by operator diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub tickets: u64,
    pub open_tickets: u64,
    pub transcripts: u64,
    pub ratings: u64,
}

/// Async store contract used by the ticket desk.
///
/// Each call is a single unit of work: implementations acquire whatever
/// connection they need and release it before returning, on every path.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Atomically increments and returns the per-category counter, starting at 1.
    async fn next_ticket_number(&self, category: TicketCategory) -> StoreResult<u32>;

    async fn insert_ticket(&self, ticket: NewTicket) -> StoreResult<Ticket>;
    async fn ticket_by_channel(&self, channel_id: &str) -> StoreResult<Option<Ticket>>;
    async fn ticket_by_id(&self, ticket_id: TicketId) -> StoreResult<Option<Ticket>>;

    /// Applies `update` to the ticket bound to `channel_id`.
    ///
    /// When `expected` is set the write only happens if the stored row still
    /// derives to that state; otherwise `StoreError::StateConflict` is returned
    /// and the row is untouched.
    async fn update_ticket(
        &self,
        channel_id: &str,
        expected: Option<&TicketState>,
        update: &TicketUpdate,
    ) -> StoreResult<Ticket>;

    async fn insert_transcript(&self, transcript: Transcript) -> StoreResult<()>;
    async fn transcript_by_channel(&self, channel_id: &str) -> StoreResult<Option<Transcript>>;
    async fn transcript_by_id(&self, transcript_id: &str) -> StoreResult<Option<Transcript>>;

    async fn insert_rating(&self, rating: Rating) -> StoreResult<()>;
    async fn rating_for_ticket(&self, ticket_id: TicketId) -> StoreResult<Option<Rating>>;

    async fn counts(&self) -> StoreResult<StoreCounts>;
}

/// In-memory implementation for tests and local experimentation.
#[derive(Debug, Default)]
pub struct InMemoryTicketStore {
    inner: RwLock<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    next_id: TicketId,
    counters: HashMap<TicketCategory, u32>,
    tickets: HashMap<TicketId, Ticket>,
    ticket_ids_by_channel: HashMap<String, TicketId>,
    transcripts: Vec<Transcript>,
    ratings: HashMap<TicketId, Rating>,
}

impl InMemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketStore for InMemoryTicketStore {
    async fn next_ticket_number(&self, category: TicketCategory) -> StoreResult<u32> {
        let mut inner = self.inner.write().await;
        let counter = inner.counters.entry(category).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn insert_ticket(&self, ticket: NewTicket) -> StoreResult<Ticket> {
        let mut inner = self.inner.write().await;
        if inner.ticket_ids_by_channel.contains_key(&ticket.channel_id) {
            return Err(StoreError::ChannelAlreadyBound(ticket.channel_id));
        }

        inner.next_id += 1;
        let row = Ticket {
            id: inner.next_id,
            ticket_number: ticket.ticket_number,
            channel_id: ticket.channel_id,
            category: ticket.category,
            customer_id: ticket.customer_id,
            staff_id: None,
            created_at: Utc::now(),
            claimed_at: None,
            closed_at: None,
            closed_by: None,
            initial_message_id: ticket.initial_message_id,
            claimed_message_id: None,
            closed_message_id: None,
            reopened_message_id: None,
            transcript_message_id: None,
        };
        inner
            .ticket_ids_by_channel
            .insert(row.channel_id.clone(), row.id);
        inner.tickets.insert(row.id, row.clone());
        Ok(row)
    }

    async fn ticket_by_channel(&self, channel_id: &str) -> StoreResult<Option<Ticket>> {
        let inner = self.inner.read().await;
        Ok(inner
            .ticket_ids_by_channel
            .get(channel_id)
            .and_then(|id| inner.tickets.get(id))
            .cloned())
    }

    async fn ticket_by_id(&self, ticket_id: TicketId) -> StoreResult<Option<Ticket>> {
        Ok(self.inner.read().await.tickets.get(&ticket_id).cloned())
    }

    async fn update_ticket(
        &self,
        channel_id: &str,
        expected: Option<&TicketState>,
        update: &TicketUpdate,
    ) -> StoreResult<Ticket> {
        let mut inner = self.inner.write().await;
        let ticket_id = *inner
            .ticket_ids_by_channel
            .get(channel_id)
            .ok_or_else(|| StoreError::TicketNotFound(channel_id.to_string()))?;
        let ticket = inner
            .tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| StoreError::TicketNotFound(channel_id.to_string()))?;

        if let Some(expected) = expected {
            if !expected.matches_columns(ticket.staff_id.as_deref(), ticket.closed_at.is_some()) {
                return Err(StoreError::StateConflict {
                    channel_id: channel_id.to_string(),
                    expected: expected.label(),
                });
            }
        }

        ticket.apply(update);
        Ok(ticket.clone())
    }

    async fn insert_transcript(&self, transcript: Transcript) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner
            .transcripts
            .iter()
            .any(|existing| existing.related_channel_id == transcript.related_channel_id)
        {
            return Err(StoreError::TranscriptAlreadyExists(
                transcript.related_channel_id,
            ));
        }
        inner.transcripts.push(transcript);
        Ok(())
    }

    async fn transcript_by_channel(&self, channel_id: &str) -> StoreResult<Option<Transcript>> {
        let inner = self.inner.read().await;
        Ok(inner
            .transcripts
            .iter()
            .find(|transcript| transcript.related_channel_id == channel_id)
            .cloned())
    }

    async fn transcript_by_id(&self, transcript_id: &str) -> StoreResult<Option<Transcript>> {
        let inner = self.inner.read().await;
        Ok(inner
            .transcripts
            .iter()
            .find(|transcript| transcript.transcript_id == transcript_id)
            .cloned())
    }

    async fn insert_rating(&self, rating: Rating) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if !inner.tickets.contains_key(&rating.ticket_id) {
            return Err(StoreError::TicketNotFound(rating.ticket_id.to_string()));
        }
        if inner.ratings.contains_key(&rating.ticket_id) {
            return Err(StoreError::RatingAlreadyExists(rating.ticket_id));
        }
        inner.ratings.insert(rating.ticket_id, rating);
        Ok(())
    }

    async fn rating_for_ticket(&self, ticket_id: TicketId) -> StoreResult<Option<Rating>> {
        Ok(self.inner.read().await.ratings.get(&ticket_id).cloned())
    }

    async fn counts(&self) -> StoreResult<StoreCounts> {
        let inner = self.inner.read().await;
        Ok(StoreCounts {
            tickets: inner.tickets.len() as u64,
            open_tickets: inner
                .tickets
                .values()
                .filter(|ticket| ticket.closed_at.is_none())
                .count() as u64,
            transcripts: inner.transcripts.len() as u64,
            ratings: inner.ratings.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryTicketStore, NewTicket, StoreError, TicketCategory, TicketStore};
    use chrono::Utc;
    use desk_types::{Rating, TicketState, TicketUpdate, Transcript};
    use std::sync::Arc;

    fn new_ticket(channel_id: &str, ticket_number: u32) -> NewTicket {
        NewTicket {
            customer_id: "cust-1".to_string(),
            category: TicketCategory::GeneralSupport,
            channel_id: channel_id.to_string(),
            ticket_number,
            initial_message_id: None,
        }
    }

    #[tokio::test]
    async fn counters_start_at_one_per_category() {
        let store = InMemoryTicketStore::new();
        assert_eq!(
            store
                .next_ticket_number(TicketCategory::GeneralSupport)
                .await
                .expect("first"),
            1
        );
        assert_eq!(
            store
                .next_ticket_number(TicketCategory::GeneralSupport)
                .await
                .expect("second"),
            2
        );
        assert_eq!(
            store
                .next_ticket_number(TicketCategory::UserReports)
                .await
                .expect("other category"),
            1
        );
    }

    #[tokio::test]
    async fn concurrent_allocation_never_repeats_a_number() {
        let store = Arc::new(InMemoryTicketStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .next_ticket_number(TicketCategory::GameIssues)
                    .await
                    .expect("allocate")
            }));
        }
        let mut numbers = Vec::new();
        for handle in handles {
            numbers.push(handle.await.expect("join"));
        }
        numbers.sort_unstable();
        assert_eq!(numbers, (1..=16).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn conditional_update_rejects_stale_expected_state() {
        let store = InMemoryTicketStore::new();
        store
            .insert_ticket(new_ticket("chan-1", 1))
            .await
            .expect("insert");

        store
            .update_ticket(
                "chan-1",
                Some(&TicketState::Unclaimed),
                &TicketUpdate::Claim {
                    staff_id: "staff-a".to_string(),
                    claimed_at: Utc::now(),
                },
            )
            .await
            .expect("first claim");

        let error = store
            .update_ticket(
                "chan-1",
                Some(&TicketState::Unclaimed),
                &TicketUpdate::Claim {
                    staff_id: "staff-b".to_string(),
                    claimed_at: Utc::now(),
                },
            )
            .await
            .expect_err("stale claim should conflict");
        assert!(matches!(error, StoreError::StateConflict { .. }));

        let ticket = store
            .ticket_by_channel("chan-1")
            .await
            .expect("load")
            .expect("ticket");
        assert_eq!(ticket.staff_id.as_deref(), Some("staff-a"));
    }

    #[tokio::test]
    async fn update_of_unknown_channel_is_not_found() {
        let store = InMemoryTicketStore::new();
        let error = store
            .update_ticket("missing", None, &TicketUpdate::Unclaim)
            .await
            .expect_err("missing ticket");
        assert!(matches!(error, StoreError::TicketNotFound(_)));
    }

    #[tokio::test]
    async fn rejects_second_transcript_and_second_rating() {
        let store = InMemoryTicketStore::new();
        let ticket = store
            .insert_ticket(new_ticket("chan-1", 1))
            .await
            .expect("insert");

        let transcript = Transcript {
            transcript_id: "abcdefghij".to_string(),
            related_channel_id: "chan-1".to_string(),
            messages: Vec::new(),
            created_at: Utc::now(),
        };
        store
            .insert_transcript(transcript.clone())
            .await
            .expect("first transcript");
        assert!(matches!(
            store.insert_transcript(transcript).await,
            Err(StoreError::TranscriptAlreadyExists(_))
        ));

        let rating = Rating {
            ticket_id: ticket.id,
            rating: 4,
            review: "quick".to_string(),
        };
        store.insert_rating(rating.clone()).await.expect("rating");
        assert!(matches!(
            store.insert_rating(rating).await,
            Err(StoreError::RatingAlreadyExists(_))
        ));

        let counts = store.counts().await.expect("counts");
        assert_eq!(counts.tickets, 1);
        assert_eq!(counts.open_tickets, 1);
        assert_eq!(counts.transcripts, 1);
        assert_eq!(counts.ratings, 1);
    }
}
