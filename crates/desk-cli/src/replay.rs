//! Fixture-driven replay of recorded inbound actions.

use std::path::Path;

use anyhow::{Context, Result};
use desk_platform::{InMemoryPlatform, Member, Tone};
use desk_runtime::{ActionReply, DeskConfig, InboundAction, TicketDesk};
use serde_json::{json, Value};

pub(crate) fn load_actions(path: &Path) -> Result<Vec<InboundAction>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read actions file {}", path.display()))?;
    parse_actions(&raw).with_context(|| format!("invalid actions file {}", path.display()))
}

fn parse_actions(raw: &str) -> Result<Vec<InboundAction>> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str::<InboundAction>(line)
                .with_context(|| format!("line {} is not an inbound action", index + 1))
        })
        .collect()
}

/// Registers the configured channels and every replayed actor on a local platform.
pub(crate) async fn seed_memory_platform(
    platform: &InMemoryPlatform,
    config: &DeskConfig,
    actions: &[InboundAction],
) {
    platform
        .add_channel(&config.archive_channel_id, "transcripts", None)
        .await;
    for (category, parent_id) in &config.category_parents {
        platform.add_channel(parent_id, category.as_str(), None).await;
    }
    for action in actions {
        platform
            .add_member(Member {
                id: action.actor.id.clone(),
                username: action.actor.username.clone(),
                role_ids: action.actor.role_ids.clone(),
            })
            .await;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReplaySummary {
    pub(crate) actions: usize,
    pub(crate) ignored: usize,
    pub(crate) failed: usize,
}

/// Handles `actions` in order, emitting one JSON record per action.
pub(crate) async fn run_replay(
    desk: &TicketDesk,
    actions: &[InboundAction],
    mut emit: impl FnMut(Value),
) -> ReplaySummary {
    let mut summary = ReplaySummary::default();
    for (index, action) in actions.iter().enumerate() {
        let reply = desk.handle(action).await;
        summary.actions += 1;
        match &reply {
            ActionReply::Ignored => summary.ignored += 1,
            ActionReply::Message {
                tone: Tone::Failure,
                ..
            } => summary.failed += 1,
            _ => {}
        }
        emit(json!({
            "index": index,
            "control_id": action.control_id,
            "channel_id": action.channel_id,
            "reply": reply,
        }));
    }
    desk.drain_background().await;
    tracing::info!(
        actions = summary.actions,
        ignored = summary.ignored,
        failed = summary.failed,
        "replay finished"
    );
    summary
}
