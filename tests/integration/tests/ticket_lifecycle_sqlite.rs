use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use desk_classifier::{Classifier, ClassifierError};
use desk_platform::{InMemoryPlatform, Member, MessageAttachment, MessageAuthor, Tone};
use desk_runtime::{
    review_modal_control_id, ActionReply, Actor, DeskConfig, InboundAction, TicketDesk,
};
use desk_store::{SqliteTicketStore, TicketStore};
use desk_transcript::{UploadError, UploadService};
use desk_types::{Classification, TicketCategory};
use tokio::sync::Mutex as AsyncMutex;

struct QueuedClassifier {
    categories: AsyncMutex<VecDeque<TicketCategory>>,
}

impl QueuedClassifier {
    fn new(categories: Vec<TicketCategory>) -> Self {
        Self {
            categories: AsyncMutex::new(VecDeque::from(categories)),
        }
    }
}

#[async_trait]
impl Classifier for QueuedClassifier {
    async fn classify(&self, _text: &str) -> Result<Classification, ClassifierError> {
        let category = self
            .categories
            .lock()
            .await
            .pop_front()
            .ok_or(ClassifierError::Empty)?;
        Ok(Classification {
            category,
            severity: 3,
        })
    }
}

/// Rehosts every url except those on `expired.example`.
struct PartialRehost;

#[async_trait]
impl UploadService for PartialRehost {
    async fn upload_from_urls(&self, urls: &[String]) -> Result<Vec<Option<String>>, UploadError> {
        Ok(urls
            .iter()
            .map(|url| {
                (!url.contains("expired.example"))
                    .then(|| url.replace("https://cdn.example/", "https://ufs.example/f/"))
            })
            .collect())
    }
}

fn config() -> DeskConfig {
    DeskConfig {
        staff_role_id: "staff".to_string(),
        requester_role_id: "member".to_string(),
        support_ping_role_id: None,
        archive_channel_id: "archive".to_string(),
        transcript_base_url: "https://transcripts.example/t".to_string(),
        category_parents: TicketCategory::ALL
            .into_iter()
            .map(|category| (category, format!("parent-{}", category.as_str())))
            .collect(),
        ..DeskConfig::default()
    }
}

async fn platform() -> Arc<InMemoryPlatform> {
    let platform = Arc::new(InMemoryPlatform::new());
    platform.add_channel("archive", "transcripts", None).await;
    for category in TicketCategory::ALL {
        let parent = format!("parent-{}", category.as_str());
        platform.add_channel(&parent, category.as_str(), None).await;
    }
    platform
        .add_member(Member {
            id: "cust-1".to_string(),
            username: "ada".to_string(),
            role_ids: vec!["member".to_string()],
        })
        .await;
    platform
}

fn build_desk(
    db_path: &Path,
    platform: Arc<InMemoryPlatform>,
    categories: Vec<TicketCategory>,
) -> (TicketDesk, Arc<SqliteTicketStore>) {
    let store = Arc::new(SqliteTicketStore::new(db_path).expect("open sqlite store"));
    let desk = TicketDesk::new(
        config(),
        store.clone(),
        platform,
        Arc::new(QueuedClassifier::new(categories)),
        Arc::new(PartialRehost),
    )
    .expect("desk");
    (desk, store)
}

fn customer() -> Actor {
    Actor {
        id: "cust-1".to_string(),
        username: "ada".to_string(),
        role_ids: vec!["member".to_string()],
    }
}

fn staff(id: &str, username: &str) -> Actor {
    Actor {
        id: id.to_string(),
        username: username.to_string(),
        role_ids: vec!["staff".to_string()],
    }
}

fn action(control_id: &str, channel_id: &str, actor: Actor) -> InboundAction {
    InboundAction {
        control_id: control_id.to_string(),
        channel_id: channel_id.to_string(),
        actor,
        fields: BTreeMap::new(),
    }
}

async fn create(desk: &TicketDesk, description: &str) -> (String, String) {
    let mut request = action("create-ticket-modal", "lobby", customer());
    request
        .fields
        .insert("problem-description".to_string(), description.to_string());
    match desk.handle(&request).await {
        ActionReply::Created {
            channel_id,
            ticket_number,
            ..
        } => (channel_id, ticket_number),
        other => panic!("expected created reply, got {other:?}"),
    }
}

fn is_success(reply: &ActionReply) -> bool {
    matches!(
        reply,
        ActionReply::Message {
            tone: Tone::Success,
            ..
        }
    )
}

#[tokio::test]
async fn integration_full_lifecycle_survives_store_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("desk.sqlite3");
    let platform = platform().await;
    let (desk, store) = build_desk(
        &db_path,
        platform.clone(),
        vec![
            TicketCategory::GameIssues,
            TicketCategory::UserReports,
            TicketCategory::GameIssues,
        ],
    );

    let (channel_id, number) = create(&desk, "the launcher crashes").await;
    assert_eq!(number, "0001");
    let (_, other_number) = create(&desk, "a player is griefing").await;
    assert_eq!(other_number, "0001");

    platform
        .seed_message(
            &channel_id,
            MessageAuthor {
                id: "cust-1".to_string(),
                username: "ada".to_string(),
                bot: false,
            },
            "crash log attached",
            vec![
                MessageAttachment {
                    url: "https://cdn.example/crash.log".to_string(),
                    filename: Some("crash.log".to_string()),
                },
                MessageAttachment {
                    url: "https://expired.example/old.png".to_string(),
                    filename: None,
                },
            ],
        )
        .await;

    let sam = staff("staff-a", "Sam");
    assert!(is_success(
        &desk.handle(&action("claim-ticket", &channel_id, sam.clone())).await
    ));
    assert!(is_success(
        &desk
            .handle(&action("confirm-close-ticket", &channel_id, sam.clone()))
            .await
    ));
    desk.drain_background().await;

    let ticket = store
        .ticket_by_channel(&channel_id)
        .await
        .expect("load")
        .expect("ticket");
    assert!(ticket.state().is_closed());
    assert_eq!(ticket.staff_id.as_deref(), Some("staff-a"));
    assert!(ticket.transcript_message_id.is_some());

    let transcript = store
        .transcript_by_channel(&channel_id)
        .await
        .expect("load")
        .expect("transcript");
    let urls = transcript.messages[0]
        .attachments
        .iter()
        .map(|attachment| attachment.url.as_str())
        .collect::<Vec<_>>();
    assert_eq!(
        urls,
        vec![
            "https://ufs.example/f/crash.log",
            "https://expired.example/old.png"
        ]
    );

    let mut review = action(&review_modal_control_id(ticket.id), "dm", customer());
    review.fields.insert("rating".to_string(), "4".to_string());
    review.fields.insert("comment".to_string(), String::new());
    assert!(is_success(&desk.handle(&review).await));
    assert!(!is_success(&desk.handle(&review).await));

    let entry = platform
        .message("archive", ticket.transcript_message_id.as_deref().expect("entry"))
        .await
        .expect("archive entry");
    assert_eq!(
        entry.embeds[0].fields.last().map(|field| field.value.as_str()),
        Some("Rating: 4\nReview: No comment provided")
    );

    drop(desk);
    drop(store);
    let (desk, store) = build_desk(&db_path, platform.clone(), vec![TicketCategory::GameIssues]);
    let persisted = store
        .ticket_by_channel(&channel_id)
        .await
        .expect("load")
        .expect("ticket");
    assert_eq!(persisted, ticket);
    assert_eq!(
        store
            .rating_for_ticket(ticket.id)
            .await
            .expect("load")
            .map(|rating| rating.rating),
        Some(4)
    );
    let (_, next_number) = create(&desk, "crashes again").await;
    assert_eq!(next_number, "0002");

    assert!(is_success(
        &desk.handle(&action("reopen-ticket", &channel_id, sam.clone())).await
    ));
    assert!(is_success(
        &desk
            .handle(&action("confirm-close-ticket", &channel_id, sam.clone()))
            .await
    ));
    assert!(is_success(
        &desk.handle(&action("delete-ticket", &channel_id, sam)).await
    ));
    desk.drain_background().await;
    let counts = store.counts().await.expect("counts");
    assert_eq!(counts.tickets, 3);
    assert_eq!(counts.transcripts, 1);
    assert_eq!(counts.ratings, 1);
    assert!(platform.channel(&channel_id).await.is_none());
}

#[tokio::test]
async fn integration_concurrent_closes_from_two_desks_apply_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("desk.sqlite3");
    let platform = platform().await;
    let (first, store) = build_desk(&db_path, platform.clone(), vec![TicketCategory::GeneralSupport]);
    let (second, _) = build_desk(&db_path, platform.clone(), Vec::new());
    let (channel_id, _) = create(&first, "need help").await;

    let close_a = action("confirm-close-ticket", &channel_id, staff("staff-a", "Sam"));
    let close_b = action("confirm-close-ticket", &channel_id, staff("staff-b", "Kim"));
    let (reply_a, reply_b) = tokio::join!(first.handle(&close_a), second.handle(&close_b));
    first.drain_background().await;
    second.drain_background().await;

    assert_eq!(
        [is_success(&reply_a), is_success(&reply_b)]
            .into_iter()
            .filter(|success| *success)
            .count(),
        1
    );
    let ticket = store
        .ticket_by_channel(&channel_id)
        .await
        .expect("load")
        .expect("ticket");
    assert!(ticket.state().is_closed());
    assert_eq!(store.counts().await.expect("counts").transcripts, 1);
}

#[tokio::test]
async fn integration_same_desk_serializes_claims_on_one_channel() {
    let dir = tempfile::tempdir().expect("tempdir");
    let platform = platform().await;
    let (desk, store) = build_desk(
        &dir.path().join("desk.sqlite3"),
        platform,
        vec![TicketCategory::GeneralSupport],
    );
    let (channel_id, _) = create(&desk, "need help").await;

    let claim_a = action("claim-ticket", &channel_id, staff("staff-a", "Sam"));
    let claim_b = action("claim-ticket", &channel_id, staff("staff-b", "Kim"));
    let (reply_a, reply_b) = tokio::join!(desk.handle(&claim_a), desk.handle(&claim_b));
    assert!(is_success(&reply_a));
    assert!(is_success(&reply_b));

    let ticket = store
        .ticket_by_channel(&channel_id)
        .await
        .expect("load")
        .expect("ticket");
    let owner = ticket.staff_id.expect("claimed");
    assert!(owner == "staff-a" || owner == "staff-b");
    assert_eq!(
        serde_json::to_value(ticket.category).expect("serialize"),
        serde_json::json!("general_support")
    );
}
