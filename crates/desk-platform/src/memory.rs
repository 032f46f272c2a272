//! In-memory chat platform for tests and local replay.

use std::collections::{BTreeSet, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;

use crate::draft::{
    ChannelInfo, ChannelRequest, Member, MessageAttachment, MessageAuthor, MessageDraft,
    PlatformMessage,
};
use crate::{ChatPlatform, PlatformError, PlatformResult};

/// Author id used for messages the desk itself sends.
pub const BOT_USER_ID: &str = "desk-bot";

#[derive(Debug, Default)]
struct MemoryChannel {
    info: Option<ChannelInfo>,
    messages: Vec<PlatformMessage>,
    allowed_members: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct PlatformInner {
    next_id: u64,
    channels: HashMap<String, MemoryChannel>,
    members: HashMap<String, Member>,
    direct_messages: Vec<(String, MessageDraft)>,
    failures: HashMap<&'static str, VecDeque<PlatformError>>,
    calls: Vec<String>,
}

impl PlatformInner {
    fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn take_failure(&mut self, operation: &'static str) -> PlatformResult<()> {
        self.calls.push(operation.to_string());
        match self
            .failures
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn channel(&self, channel_id: &str) -> PlatformResult<&MemoryChannel> {
        self.channels
            .get(channel_id)
            .filter(|channel| channel.info.is_some())
            .ok_or_else(|| PlatformError::not_found(format!("channel {channel_id}")))
    }

    fn channel_mut(&mut self, channel_id: &str) -> PlatformResult<&mut MemoryChannel> {
        self.channels
            .get_mut(channel_id)
            .filter(|channel| channel.info.is_some())
            .ok_or_else(|| PlatformError::not_found(format!("channel {channel_id}")))
    }
}

/// Recording [`ChatPlatform`] with scripted failures.
///
/// Operation names accepted by [`InMemoryPlatform::fail_next`] are the
/// trait method names, e.g. `"rename_channel"`.
#[derive(Debug, Default)]
pub struct InMemoryPlatform {
    inner: Mutex<PlatformInner>,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_channel(&self, channel_id: &str, name: &str, parent_id: Option<&str>) {
        let mut inner = self.inner.lock().await;
        inner.channels.entry(channel_id.to_string()).or_default().info = Some(ChannelInfo {
            id: channel_id.to_string(),
            name: name.to_string(),
            parent_id: parent_id.map(str::to_string),
        });
    }

    pub async fn add_member(&self, member: Member) {
        let mut inner = self.inner.lock().await;
        inner.members.insert(member.id.clone(), member);
    }

    pub async fn remove_member(&self, user_id: &str) {
        self.inner.lock().await.members.remove(user_id);
    }

    /// Appends a message as if `author` had posted it, returning its id.
    pub async fn seed_message(
        &self,
        channel_id: &str,
        author: MessageAuthor,
        content: &str,
        attachments: Vec<MessageAttachment>,
    ) -> String {
        let mut inner = self.inner.lock().await;
        let id = inner.allocate_id("msg");
        let timestamp = Utc::now() + Duration::milliseconds(inner.next_id as i64);
        inner
            .channels
            .entry(channel_id.to_string())
            .or_default()
            .messages
            .push(PlatformMessage {
                id: id.clone(),
                channel_id: channel_id.to_string(),
                author,
                content: content.to_string(),
                timestamp,
                attachments,
                embeds: Vec::new(),
                components: Vec::new(),
            });
        id
    }

    /// Makes the next call to `operation` fail with `error`.
    pub async fn fail_next(&self, operation: &'static str, error: PlatformError) {
        self.inner
            .lock()
            .await
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    pub async fn channel(&self, channel_id: &str) -> Option<ChannelInfo> {
        let inner = self.inner.lock().await;
        inner
            .channels
            .get(channel_id)
            .and_then(|channel| channel.info.clone())
    }

    pub async fn channels(&self) -> Vec<ChannelInfo> {
        let inner = self.inner.lock().await;
        let mut channels = inner
            .channels
            .values()
            .filter_map(|channel| channel.info.clone())
            .collect::<Vec<_>>();
        channels.sort_by(|left, right| left.id.cmp(&right.id));
        channels
    }

    /// Messages currently in `channel_id`, oldest first.
    pub async fn messages(&self, channel_id: &str) -> Vec<PlatformMessage> {
        let inner = self.inner.lock().await;
        inner
            .channels
            .get(channel_id)
            .map(|channel| channel.messages.clone())
            .unwrap_or_default()
    }

    pub async fn message(&self, channel_id: &str, message_id: &str) -> Option<PlatformMessage> {
        let inner = self.inner.lock().await;
        inner.channels.get(channel_id).and_then(|channel| {
            channel
                .messages
                .iter()
                .find(|message| message.id == message_id)
                .cloned()
        })
    }

    pub async fn has_access(&self, channel_id: &str, user_id: &str) -> bool {
        let inner = self.inner.lock().await;
        inner
            .channels
            .get(channel_id)
            .is_some_and(|channel| channel.allowed_members.contains(user_id))
    }

    pub async fn direct_messages(&self, user_id: &str) -> Vec<MessageDraft> {
        let inner = self.inner.lock().await;
        inner
            .direct_messages
            .iter()
            .filter(|(recipient, _)| recipient == user_id)
            .map(|(_, draft)| draft.clone())
            .collect()
    }

    /// Names of the trait operations invoked so far, in order.
    pub async fn calls(&self) -> Vec<String> {
        self.inner.lock().await.calls.clone()
    }

    pub async fn call_count(&self, operation: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.calls.iter().filter(|call| *call == operation).count()
    }
}

#[async_trait]
impl ChatPlatform for InMemoryPlatform {
    async fn send_message(&self, channel_id: &str, draft: &MessageDraft) -> PlatformResult<String> {
        let mut inner = self.inner.lock().await;
        inner.take_failure("send_message")?;
        inner.channel(channel_id)?;
        let id = inner.allocate_id("msg");
        let timestamp = Utc::now() + Duration::milliseconds(inner.next_id as i64);
        let channel = inner.channel_mut(channel_id)?;
        channel.messages.push(PlatformMessage {
            id: id.clone(),
            channel_id: channel_id.to_string(),
            author: MessageAuthor {
                id: BOT_USER_ID.to_string(),
                username: BOT_USER_ID.to_string(),
                bot: true,
            },
            content: draft.content.clone().unwrap_or_default(),
            timestamp,
            attachments: Vec::new(),
            embeds: draft.embeds.clone(),
            components: draft.components.clone().unwrap_or_default(),
        });
        Ok(id)
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        draft: &MessageDraft,
    ) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        inner.take_failure("edit_message")?;
        let message = inner
            .channel_mut(channel_id)?
            .messages
            .iter_mut()
            .find(|message| message.id == message_id)
            .ok_or_else(|| PlatformError::not_found(format!("message {message_id}")))?;
        if let Some(content) = &draft.content {
            message.content = content.clone();
        }
        if !draft.embeds.is_empty() {
            message.embeds = draft.embeds.clone();
        }
        if let Some(components) = &draft.components {
            message.components = components.clone();
        }
        Ok(())
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        inner.take_failure("delete_message")?;
        let channel = inner.channel_mut(channel_id)?;
        let before = channel.messages.len();
        channel.messages.retain(|message| message.id != message_id);
        if channel.messages.len() == before {
            return Err(PlatformError::not_found(format!("message {message_id}")));
        }
        Ok(())
    }

    async fn fetch_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> PlatformResult<PlatformMessage> {
        let mut inner = self.inner.lock().await;
        inner.take_failure("fetch_message")?;
        inner
            .channel(channel_id)?
            .messages
            .iter()
            .find(|message| message.id == message_id)
            .cloned()
            .ok_or_else(|| PlatformError::not_found(format!("message {message_id}")))
    }

    async fn fetch_messages(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> PlatformResult<Vec<PlatformMessage>> {
        let mut inner = self.inner.lock().await;
        inner.take_failure("fetch_messages")?;
        let messages = &inner.channel(channel_id)?.messages;
        let end = match before {
            Some(cursor) => messages
                .iter()
                .position(|message| message.id == cursor)
                .unwrap_or(0),
            None => messages.len(),
        };
        let start = end.saturating_sub(limit);
        Ok(messages[start..end].iter().rev().cloned().collect())
    }

    async fn fetch_channel(&self, channel_id: &str) -> PlatformResult<ChannelInfo> {
        let mut inner = self.inner.lock().await;
        inner.take_failure("fetch_channel")?;
        inner
            .channel(channel_id)?
            .info
            .clone()
            .ok_or_else(|| PlatformError::not_found(format!("channel {channel_id}")))
    }

    async fn rename_channel(&self, channel_id: &str, name: &str) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        inner.take_failure("rename_channel")?;
        if let Some(info) = inner.channel_mut(channel_id)?.info.as_mut() {
            info.name = name.to_string();
        }
        Ok(())
    }

    async fn create_channel(&self, request: &ChannelRequest) -> PlatformResult<ChannelInfo> {
        let mut inner = self.inner.lock().await;
        inner.take_failure("create_channel")?;
        let id = inner.allocate_id("chan");
        let info = ChannelInfo {
            id: id.clone(),
            name: request.name.clone(),
            parent_id: request.parent_id.clone(),
        };
        inner.channels.insert(
            id,
            MemoryChannel {
                info: Some(info.clone()),
                messages: Vec::new(),
                allowed_members: request.allowed_member_ids.iter().cloned().collect(),
            },
        );
        Ok(info)
    }

    async fn delete_channel(&self, channel_id: &str) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        inner.take_failure("delete_channel")?;
        inner.channel(channel_id)?;
        inner.channels.remove(channel_id);
        Ok(())
    }

    async fn grant_member_access(&self, channel_id: &str, user_id: &str) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        inner.take_failure("grant_member_access")?;
        inner
            .channel_mut(channel_id)?
            .allowed_members
            .insert(user_id.to_string());
        Ok(())
    }

    async fn revoke_member_access(&self, channel_id: &str, user_id: &str) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        inner.take_failure("revoke_member_access")?;
        inner
            .channel_mut(channel_id)?
            .allowed_members
            .remove(user_id);
        Ok(())
    }

    async fn fetch_member(&self, user_id: &str) -> PlatformResult<Option<Member>> {
        let mut inner = self.inner.lock().await;
        inner.take_failure("fetch_member")?;
        Ok(inner.members.get(user_id).cloned())
    }

    async fn send_direct_message(
        &self,
        user_id: &str,
        draft: &MessageDraft,
    ) -> PlatformResult<String> {
        let mut inner = self.inner.lock().await;
        inner.take_failure("send_direct_message")?;
        if !inner.members.contains_key(user_id) {
            return Err(PlatformError::not_found(format!("member {user_id}")));
        }
        let id = inner.allocate_id("dm");
        inner
            .direct_messages
            .push((user_id.to_string(), draft.clone()));
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::InMemoryPlatform;
    use crate::{ChatPlatform, MessageAuthor, MessageDraft, PlatformError};

    fn customer() -> MessageAuthor {
        MessageAuthor {
            id: "cust-1".to_string(),
            username: "ada".to_string(),
            bot: false,
        }
    }

    #[tokio::test]
    async fn pages_history_newest_first_with_before_cursor() {
        let platform = InMemoryPlatform::new();
        platform.add_channel("chan-1", "ticket-0001", None).await;
        let mut ids = Vec::new();
        for index in 0..5 {
            ids.push(
                platform
                    .seed_message("chan-1", customer(), &format!("line {index}"), Vec::new())
                    .await,
            );
        }

        let newest = platform
            .fetch_messages("chan-1", None, 2)
            .await
            .expect("first page");
        assert_eq!(
            newest.iter().map(|m| m.id.clone()).collect::<Vec<_>>(),
            vec![ids[4].clone(), ids[3].clone()]
        );
        let older = platform
            .fetch_messages("chan-1", Some(&ids[3]), 2)
            .await
            .expect("second page");
        assert_eq!(older[0].id, ids[2]);
        let oldest = platform
            .fetch_messages("chan-1", Some(&ids[1]), 2)
            .await
            .expect("last page");
        assert_eq!(oldest.len(), 1);
    }

    #[tokio::test]
    async fn edits_patch_only_provided_parts() {
        let platform = InMemoryPlatform::new();
        platform.add_channel("chan-1", "ticket-0001", None).await;
        let id = platform
            .send_message("chan-1", &MessageDraft::default().content("hello"))
            .await
            .expect("send");
        platform
            .edit_message("chan-1", &id, &MessageDraft::clear_components())
            .await
            .expect("edit");
        let message = platform.message("chan-1", &id).await.expect("message");
        assert_eq!(message.content, "hello");
        assert!(message.author.bot);
    }

    #[tokio::test]
    async fn scripted_failures_fire_once() {
        let platform = InMemoryPlatform::new();
        platform.add_channel("chan-1", "ticket-0001", None).await;
        platform
            .fail_next(
                "rename_channel",
                PlatformError::PermissionDenied {
                    operation: "rename channel".to_string(),
                },
            )
            .await;
        assert!(platform.rename_channel("chan-1", "x").await.is_err());
        platform
            .rename_channel("chan-1", "claimed-0001")
            .await
            .expect("second rename");
        assert_eq!(
            platform.channel("chan-1").await.map(|c| c.name).as_deref(),
            Some("claimed-0001")
        );
        assert_eq!(platform.call_count("rename_channel").await, 2);
    }

    #[tokio::test]
    async fn deleting_missing_message_is_not_found() {
        let platform = InMemoryPlatform::new();
        platform.add_channel("chan-1", "ticket-0001", None).await;
        let error = platform
            .delete_message("chan-1", "msg-404")
            .await
            .expect_err("missing");
        assert!(error.is_not_found());
    }
}
