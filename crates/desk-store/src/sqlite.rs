//! SQLite-backed `TicketStore` implementation with durable persistence.

use crate::{StoreCounts, StoreError, StoreResult, TicketStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use desk_types::{
    NewTicket, Rating, Ticket, TicketCategory, TicketId, TicketState, TicketUpdate, Transcript,
    TranscriptMessage,
};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

const TICKET_COLUMNS: &str = "id, ticket_number, channel_id, category, customer_id, staff_id, \
     created_at, claimed_at, closed_at, closed_by, initial_message_id, claimed_message_id, \
     closed_message_id, reopened_message_id, transcript_message_id";

/// Persistent SQLite store backend.
///
/// A connection is opened per operation and dropped before the call returns.
#[derive(Debug)]
pub struct SqliteTicketStore {
    db_path: PathBuf,
}

impl SqliteTicketStore {
    /// Creates a SQLite-backed store at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        initialize_schema(&connection)?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        Ok(connection)
    }
}

fn initialize_schema(connection: &Connection) -> StoreResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS support_tickets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ticket_number INTEGER NOT NULL,
            channel_id TEXT NOT NULL UNIQUE,
            category TEXT NOT NULL,
            customer_id TEXT NOT NULL,
            staff_id TEXT NULL,
            created_at TEXT NOT NULL,
            claimed_at TEXT NULL,
            closed_at TEXT NULL,
            closed_by TEXT NULL,
            initial_message_id TEXT NULL,
            claimed_message_id TEXT NULL,
            closed_message_id TEXT NULL,
            reopened_message_id TEXT NULL,
            transcript_message_id TEXT NULL
        );

        CREATE TABLE IF NOT EXISTS ticket_counters (
            category TEXT PRIMARY KEY,
            counter INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ticket_transcripts (
            transcript_id TEXT PRIMARY KEY,
            related_channel_id TEXT NOT NULL UNIQUE,
            messages TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS support_ticket_ratings (
            ticket_id INTEGER PRIMARY KEY,
            rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
            review TEXT NOT NULL,
            FOREIGN KEY(ticket_id) REFERENCES support_tickets(id)
        );
        "#,
    )?;
    Ok(())
}

#[async_trait]
impl TicketStore for SqliteTicketStore {
    async fn next_ticket_number(&self, category: TicketCategory) -> StoreResult<u32> {
        let connection = self.open_connection()?;
        let counter: i64 = connection.query_row(
            r#"
            INSERT INTO ticket_counters (category, counter) VALUES (?1, 1)
            ON CONFLICT(category) DO UPDATE SET counter = counter + 1
            RETURNING counter
            "#,
            params![category.as_str()],
            |row| row.get(0),
        )?;
        i64_to_u32("counter", counter)
    }

    async fn insert_ticket(&self, ticket: NewTicket) -> StoreResult<Ticket> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let bound = transaction
            .query_row(
                "SELECT 1 FROM support_tickets WHERE channel_id = ?1",
                params![ticket.channel_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if bound.is_some() {
            return Err(StoreError::ChannelAlreadyBound(ticket.channel_id));
        }

        transaction.execute(
            r#"
            INSERT INTO support_tickets (
                ticket_number, channel_id, category, customer_id, created_at, initial_message_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                i64::from(ticket.ticket_number),
                ticket.channel_id,
                ticket.category.as_str(),
                ticket.customer_id,
                timestamp_to_db(Utc::now()),
                ticket.initial_message_id,
            ],
        )?;
        let row = load_ticket(&transaction, "channel_id", &ticket.channel_id)?
            .ok_or_else(|| StoreError::TicketNotFound(ticket.channel_id.clone()))?;
        transaction.commit()?;
        Ok(row)
    }

    async fn ticket_by_channel(&self, channel_id: &str) -> StoreResult<Option<Ticket>> {
        let connection = self.open_connection()?;
        load_ticket(&connection, "channel_id", &channel_id)
    }

    async fn ticket_by_id(&self, ticket_id: TicketId) -> StoreResult<Option<Ticket>> {
        let connection = self.open_connection()?;
        load_ticket(&connection, "id", &ticket_id)
    }

    async fn update_ticket(
        &self,
        channel_id: &str,
        expected: Option<&TicketState>,
        update: &TicketUpdate,
    ) -> StoreResult<Ticket> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut ticket = load_ticket(&transaction, "channel_id", &channel_id)?
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
        transaction.execute(
            r#"
            UPDATE support_tickets SET
                staff_id = ?2,
                claimed_at = ?3,
                closed_at = ?4,
                closed_by = ?5,
                initial_message_id = ?6,
                claimed_message_id = ?7,
                closed_message_id = ?8,
                reopened_message_id = ?9,
                transcript_message_id = ?10
            WHERE id = ?1
            "#,
            params![
                ticket.id,
                ticket.staff_id,
                option_timestamp_to_db(ticket.claimed_at),
                option_timestamp_to_db(ticket.closed_at),
                ticket.closed_by,
                ticket.initial_message_id,
                ticket.claimed_message_id,
                ticket.closed_message_id,
                ticket.reopened_message_id,
                ticket.transcript_message_id,
            ],
        )?;
        transaction.commit()?;
        Ok(ticket)
    }

    async fn insert_transcript(&self, transcript: Transcript) -> StoreResult<()> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists = transaction
            .query_row(
                "SELECT 1 FROM ticket_transcripts WHERE related_channel_id = ?1",
                params![transcript.related_channel_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::TranscriptAlreadyExists(
                transcript.related_channel_id,
            ));
        }

        transaction.execute(
            r#"
            INSERT INTO ticket_transcripts (transcript_id, related_channel_id, messages, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                transcript.transcript_id,
                transcript.related_channel_id,
                serde_json::to_string(&transcript.messages)?,
                timestamp_to_db(transcript.created_at),
            ],
        )?;
        transaction.commit()?;
        Ok(())
    }

    async fn transcript_by_channel(&self, channel_id: &str) -> StoreResult<Option<Transcript>> {
        let connection = self.open_connection()?;
        load_transcript(&connection, "related_channel_id", channel_id)
    }

    async fn transcript_by_id(&self, transcript_id: &str) -> StoreResult<Option<Transcript>> {
        let connection = self.open_connection()?;
        load_transcript(&connection, "transcript_id", transcript_id)
    }

    async fn insert_rating(&self, rating: Rating) -> StoreResult<()> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if load_ticket(&transaction, "id", &rating.ticket_id)?.is_none() {
            return Err(StoreError::TicketNotFound(rating.ticket_id.to_string()));
        }
        let exists = transaction
            .query_row(
                "SELECT 1 FROM support_ticket_ratings WHERE ticket_id = ?1",
                params![rating.ticket_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::RatingAlreadyExists(rating.ticket_id));
        }

        transaction.execute(
            "INSERT INTO support_ticket_ratings (ticket_id, rating, review) VALUES (?1, ?2, ?3)",
            params![rating.ticket_id, i64::from(rating.rating), rating.review],
        )?;
        transaction.commit()?;
        Ok(())
    }

    async fn rating_for_ticket(&self, ticket_id: TicketId) -> StoreResult<Option<Rating>> {
        let connection = self.open_connection()?;
        let row: Option<(i64, i64, String)> = connection
            .query_row(
                "SELECT ticket_id, rating, review FROM support_ticket_ratings WHERE ticket_id = ?1",
                params![ticket_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        row.map(|(ticket_id, rating, review)| -> StoreResult<Rating> {
            Ok(Rating {
                ticket_id,
                rating: u8::try_from(rating).map_err(|_| StoreError::InvalidPersistedValue {
                    field: "rating",
                    value: rating.to_string(),
                })?,
                review,
            })
        })
        .transpose()
    }

    async fn counts(&self) -> StoreResult<StoreCounts> {
        let connection = self.open_connection()?;
        let count = |sql: &str| -> StoreResult<u64> {
            let value: i64 = connection.query_row(sql, [], |row| row.get(0))?;
            u64::try_from(value).map_err(|_| StoreError::InvalidPersistedValue {
                field: "count",
                value: value.to_string(),
            })
        };
        Ok(StoreCounts {
            tickets: count("SELECT COUNT(*) FROM support_tickets")?,
            open_tickets: count("SELECT COUNT(*) FROM support_tickets WHERE closed_at IS NULL")?,
            transcripts: count("SELECT COUNT(*) FROM ticket_transcripts")?,
            ratings: count("SELECT COUNT(*) FROM support_ticket_ratings")?,
        })
    }
}

/// Raw column values of one `support_tickets` row.
struct TicketRow {
    id: i64,
    ticket_number: i64,
    channel_id: String,
    category: String,
    customer_id: String,
    staff_id: Option<String>,
    created_at: String,
    claimed_at: Option<String>,
    closed_at: Option<String>,
    closed_by: Option<String>,
    initial_message_id: Option<String>,
    claimed_message_id: Option<String>,
    closed_message_id: Option<String>,
    reopened_message_id: Option<String>,
    transcript_message_id: Option<String>,
}

impl TicketRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            ticket_number: row.get(1)?,
            channel_id: row.get(2)?,
            category: row.get(3)?,
            customer_id: row.get(4)?,
            staff_id: row.get(5)?,
            created_at: row.get(6)?,
            claimed_at: row.get(7)?,
            closed_at: row.get(8)?,
            closed_by: row.get(9)?,
            initial_message_id: row.get(10)?,
            claimed_message_id: row.get(11)?,
            closed_message_id: row.get(12)?,
            reopened_message_id: row.get(13)?,
            transcript_message_id: row.get(14)?,
        })
    }

    fn into_ticket(self) -> StoreResult<Ticket> {
        Ok(Ticket {
            id: self.id,
            ticket_number: i64_to_u32("ticket_number", self.ticket_number)?,
            channel_id: self.channel_id,
            category: category_from_db(&self.category)?,
            customer_id: self.customer_id,
            staff_id: self.staff_id,
            created_at: timestamp_from_db(&self.created_at)?,
            claimed_at: option_timestamp_from_db(self.claimed_at)?,
            closed_at: option_timestamp_from_db(self.closed_at)?,
            closed_by: self.closed_by,
            initial_message_id: self.initial_message_id,
            claimed_message_id: self.claimed_message_id,
            closed_message_id: self.closed_message_id,
            reopened_message_id: self.reopened_message_id,
            transcript_message_id: self.transcript_message_id,
        })
    }
}

fn load_ticket(
    connection: &Connection,
    key_column: &'static str,
    key: &dyn rusqlite::ToSql,
) -> StoreResult<Option<Ticket>> {
    let sql = format!("SELECT {TICKET_COLUMNS} FROM support_tickets WHERE {key_column} = ?1");
    connection
        .query_row(&sql, [key], TicketRow::read)
        .optional()?
        .map(TicketRow::into_ticket)
        .transpose()
}

fn load_transcript(
    connection: &Connection,
    key_column: &'static str,
    key: &str,
) -> StoreResult<Option<Transcript>> {
    let sql = format!(
        "SELECT transcript_id, related_channel_id, messages, created_at \
         FROM ticket_transcripts WHERE {key_column} = ?1"
    );
    let row: Option<(String, String, String, String)> = connection
        .query_row(&sql, params![key], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })
        .optional()?;

    row.map(
        |(transcript_id, related_channel_id, messages, created_at)| -> StoreResult<Transcript> {
            Ok(Transcript {
                transcript_id,
                related_channel_id,
                messages: serde_json::from_str::<Vec<TranscriptMessage>>(&messages)?,
                created_at: timestamp_from_db(&created_at)?,
            })
        },
    )
    .transpose()
}

fn category_from_db(value: &str) -> StoreResult<TicketCategory> {
    value
        .parse()
        .map_err(|_| StoreError::InvalidPersistedValue {
            field: "category",
            value: value.to_string(),
        })
}

fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn option_timestamp_to_db(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(timestamp_to_db)
}

fn timestamp_from_db(value: &str) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn option_timestamp_from_db(value: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    value.as_deref().map(timestamp_from_db).transpose()
}

fn i64_to_u32(field: &'static str, value: i64) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::InvalidPersistedValue {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::SqliteTicketStore;
    use crate::{StoreError, TicketStore};
    use chrono::{TimeZone, Utc};
    use desk_types::{
        NewTicket, Rating, StatusSlot, TicketCategory, TicketState, TicketUpdate, Transcript,
        TranscriptAttachment, TranscriptMessage,
    };
    use std::sync::Arc;
    use tempfile::tempdir;

    fn new_ticket(channel_id: &str, ticket_number: u32) -> NewTicket {
        NewTicket {
            customer_id: "cust-1".to_string(),
            category: TicketCategory::GeneralSupport,
            channel_id: channel_id.to_string(),
            ticket_number,
            initial_message_id: Some("msg-initial".to_string()),
        }
    }

    #[tokio::test]
    async fn counter_row_is_created_then_incremented() {
        let temp = tempdir().expect("create tempdir");
        let store = SqliteTicketStore::new(temp.path().join("desk.sqlite")).expect("open store");

        let first = store
            .next_ticket_number(TicketCategory::GeneralSupport)
            .await
            .expect("first number");
        let second = store
            .next_ticket_number(TicketCategory::GeneralSupport)
            .await
            .expect("second number");
        assert_eq!((first, second), (1, 2));
        assert_eq!(desk_types::format_ticket_number(first), "0001");
        assert_eq!(desk_types::format_ticket_number(second), "0002");
    }

    #[tokio::test]
    async fn concurrent_allocation_is_race_free() {
        let temp = tempdir().expect("create tempdir");
        let store = Arc::new(
            SqliteTicketStore::new(temp.path().join("desk.sqlite")).expect("open store"),
        );

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .next_ticket_number(TicketCategory::UserReports)
                    .await
                    .expect("allocate")
            }));
        }
        let mut numbers = Vec::new();
        for handle in handles {
            numbers.push(handle.await.expect("join"));
        }
        numbers.sort_unstable();
        assert_eq!(numbers, (1..=8).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn persists_ticket_lifecycle_across_reopen_of_database() {
        let temp = tempdir().expect("create tempdir");
        let db_path = temp.path().join("desk.sqlite");
        let claimed_at = Utc.with_ymd_and_hms(2025, 5, 2, 10, 30, 0).unwrap();

        {
            let store = SqliteTicketStore::new(&db_path).expect("open store");
            store
                .insert_ticket(new_ticket("chan-1", 1))
                .await
                .expect("insert ticket");
            store
                .update_ticket(
                    "chan-1",
                    Some(&TicketState::Unclaimed),
                    &TicketUpdate::Claim {
                        staff_id: "staff-a".to_string(),
                        claimed_at,
                    },
                )
                .await
                .expect("claim");
            store
                .update_ticket(
                    "chan-1",
                    None,
                    &TicketUpdate::LinkMessage {
                        slot: StatusSlot::Claimed,
                        message_id: Some("msg-claim".to_string()),
                    },
                )
                .await
                .expect("link claim message");
        }

        let store = SqliteTicketStore::new(&db_path).expect("reopen store");
        let ticket = store
            .ticket_by_channel("chan-1")
            .await
            .expect("load")
            .expect("ticket exists");
        assert_eq!(
            ticket.state(),
            TicketState::Claimed {
                staff_id: "staff-a".to_string(),
                claimed_at
            }
        );
        assert_eq!(ticket.claimed_message_id.as_deref(), Some("msg-claim"));
        assert_eq!(ticket.initial_message_id.as_deref(), Some("msg-initial"));

        let by_id = store
            .ticket_by_id(ticket.id)
            .await
            .expect("load by id")
            .expect("ticket by id");
        assert_eq!(by_id, ticket);
    }

    #[tokio::test]
    async fn close_clears_claim_link_and_reopen_clears_closure() {
        let temp = tempdir().expect("create tempdir");
        let store = SqliteTicketStore::new(temp.path().join("desk.sqlite")).expect("open store");
        store
            .insert_ticket(new_ticket("chan-1", 1))
            .await
            .expect("insert");
        let claimed = store
            .update_ticket(
                "chan-1",
                None,
                &TicketUpdate::Claim {
                    staff_id: "staff-a".to_string(),
                    claimed_at: Utc::now(),
                },
            )
            .await
            .expect("claim");
        let claimed = store
            .update_ticket(
                "chan-1",
                None,
                &TicketUpdate::LinkMessage {
                    slot: StatusSlot::Reopened,
                    message_id: Some("msg-reopened".to_string()),
                },
            )
            .await
            .expect("link reopened notice");
        assert_eq!(claimed.reopened_message_id.as_deref(), Some("msg-reopened"));

        let closed = store
            .update_ticket(
                "chan-1",
                Some(&claimed.state()),
                &TicketUpdate::Close {
                    closed_by: "staff-a".to_string(),
                    closed_at: Utc::now(),
                },
            )
            .await
            .expect("close");
        assert!(closed.state().is_closed());
        assert_eq!(closed.claimed_message_id, None);
        assert_eq!(closed.reopened_message_id, None);

        let reopened = store
            .update_ticket("chan-1", Some(&closed.state()), &TicketUpdate::Reopen)
            .await
            .expect("reopen");
        assert_eq!(reopened.state(), TicketState::Unclaimed);
        assert_eq!(reopened.staff_id, None);
        assert_eq!(reopened.claimed_at, None);
        assert_eq!(reopened.closed_at, None);

        let conflict = store
            .update_ticket("chan-1", Some(&closed.state()), &TicketUpdate::Reopen)
            .await
            .expect_err("second reopen conflicts");
        assert!(matches!(conflict, StoreError::StateConflict { .. }));
    }

    #[tokio::test]
    async fn rejects_second_ticket_for_same_channel() {
        let temp = tempdir().expect("create tempdir");
        let store = SqliteTicketStore::new(temp.path().join("desk.sqlite")).expect("open store");
        store
            .insert_ticket(new_ticket("chan-1", 1))
            .await
            .expect("insert");
        assert!(matches!(
            store.insert_ticket(new_ticket("chan-1", 2)).await,
            Err(StoreError::ChannelAlreadyBound(_))
        ));
    }

    #[tokio::test]
    async fn stores_transcript_blob_and_enforces_one_per_channel() {
        let temp = tempdir().expect("create tempdir");
        let store = SqliteTicketStore::new(temp.path().join("desk.sqlite")).expect("open store");

        let transcript = Transcript {
            transcript_id: "Ab3De5Gh9K".to_string(),
            related_channel_id: "chan-1".to_string(),
            messages: vec![TranscriptMessage {
                content: "my game crashes".to_string(),
                author: "cust-1".to_string(),
                timestamp: Utc.with_ymd_and_hms(2025, 5, 2, 9, 0, 0).unwrap(),
                attachments: vec![TranscriptAttachment {
                    url: "https://files.example/crash.log".to_string(),
                    name: Some("crash.log".to_string()),
                }],
            }],
            created_at: Utc.with_ymd_and_hms(2025, 5, 2, 11, 0, 0).unwrap(),
        };
        store
            .insert_transcript(transcript.clone())
            .await
            .expect("insert transcript");

        let by_channel = store
            .transcript_by_channel("chan-1")
            .await
            .expect("load by channel")
            .expect("transcript");
        assert_eq!(by_channel, transcript);
        let by_id = store
            .transcript_by_id("Ab3De5Gh9K")
            .await
            .expect("load by id")
            .expect("transcript");
        assert_eq!(by_id.messages.len(), 1);

        let duplicate = Transcript {
            transcript_id: "Zz9Yy8Xx7W".to_string(),
            ..transcript
        };
        assert!(matches!(
            store.insert_transcript(duplicate).await,
            Err(StoreError::TranscriptAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn ratings_are_unique_per_ticket_and_require_ticket() {
        let temp = tempdir().expect("create tempdir");
        let store = SqliteTicketStore::new(temp.path().join("desk.sqlite")).expect("open store");
        let ticket = store
            .insert_ticket(new_ticket("chan-1", 1))
            .await
            .expect("insert");

        assert!(matches!(
            store
                .insert_rating(Rating {
                    ticket_id: ticket.id + 100,
                    rating: 3,
                    review: String::new(),
                })
                .await,
            Err(StoreError::TicketNotFound(_))
        ));

        let rating = Rating {
            ticket_id: ticket.id,
            rating: 5,
            review: "fast and friendly".to_string(),
        };
        store.insert_rating(rating.clone()).await.expect("rating");
        assert!(matches!(
            store.insert_rating(rating.clone()).await,
            Err(StoreError::RatingAlreadyExists(_))
        ));
        assert_eq!(
            store
                .rating_for_ticket(ticket.id)
                .await
                .expect("load rating"),
            Some(rating)
        );

        let counts = store.counts().await.expect("counts");
        assert_eq!(counts.tickets, 1);
        assert_eq!(counts.ratings, 1);
        assert_eq!(counts.transcripts, 0);
    }
}
