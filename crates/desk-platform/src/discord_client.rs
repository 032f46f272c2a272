//! Discord REST v10 implementation of [`ChatPlatform`].

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use desk_core::{
    is_retryable_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_error, RetryPolicy,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::draft::{
    Button, ButtonRow, ButtonStyle, ButtonTarget, ChannelInfo, ChannelRequest, Embed, Member,
    MessageAttachment, MessageAuthor, MessageDraft, PlatformMessage,
};
use crate::{ChatPlatform, PlatformError, PlatformResult};

const VIEW_CHANNEL: u64 = 1 << 10;
const SEND_MESSAGES: u64 = 1 << 11;
const READ_MESSAGE_HISTORY: u64 = 1 << 16;
const MEMBER_ACCESS: u64 = VIEW_CHANNEL | SEND_MESSAGES | READ_MESSAGE_HISTORY;
const OVERWRITE_ROLE: u8 = 0;
const OVERWRITE_MEMBER: u8 = 1;
const GUILD_TEXT_CHANNEL: u8 = 0;
const ACTION_ROW: u64 = 1;
const BUTTON: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscordClientConfig {
    pub api_base: String,
    pub bot_token: String,
    pub guild_id: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

impl Default for DiscordClientConfig {
    fn default() -> Self {
        Self {
            api_base: "https://discord.com/api/v10".to_string(),
            bot_token: String::new(),
            guild_id: String::new(),
            request_timeout_ms: 10_000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 250,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct DiscordAttachment {
    url: String,
    #[serde(default)]
    filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscordMessage {
    id: String,
    channel_id: String,
    author: DiscordUser,
    #[serde(default)]
    content: String,
    timestamp: String,
    #[serde(default)]
    attachments: Vec<DiscordAttachment>,
    #[serde(default)]
    embeds: Vec<Embed>,
    #[serde(default)]
    components: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct DiscordChannel {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscordMember {
    user: DiscordUser,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DiscordCreated {
    id: String,
}

/// Bot-token REST client scoped to one guild.
#[derive(Clone)]
pub struct DiscordRestClient {
    http: reqwest::Client,
    api_base: String,
    guild_id: String,
    retry: RetryPolicy,
}

impl DiscordRestClient {
    pub fn new(config: DiscordClientConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("ticket-desk (https://discord.com, 1)"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let mut authorization =
            reqwest::header::HeaderValue::from_str(&format!("Bot {}", config.bot_token.trim()))
                .context("discord bot token contains invalid header characters")?;
        authorization.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, authorization);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create discord api client")?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            guild_id: config.guild_id.trim().to_string(),
            retry: RetryPolicy::new(config.retry_max_attempts, config.retry_base_delay_ms),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn send<F>(
        &self,
        operation: &str,
        resource: &str,
        mut builder: F,
    ) -> PlatformResult<reqwest::Response>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = builder()
                .header("x-desk-retry-attempt", attempt.saturating_sub(1).to_string())
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    let code = status.as_u16();
                    if is_retryable_status(code) {
                        if self.retry.allows_retry(attempt) {
                            tracing::debug!(operation, status = code, attempt, "retrying discord request");
                            tokio::time::sleep(retry_delay(
                                self.retry.base_delay_ms,
                                attempt,
                                retry_after,
                            ))
                            .await;
                            continue;
                        }
                        return Err(PlatformError::Transient {
                            operation: operation.to_string(),
                            detail: format!("status {code}: {}", truncate_for_error(&body, 800)),
                        });
                    }

                    return Err(match code {
                        404 => PlatformError::not_found(resource),
                        401 | 403 => PlatformError::PermissionDenied {
                            operation: operation.to_string(),
                        },
                        _ => PlatformError::Rejected {
                            operation: operation.to_string(),
                            status: code,
                            detail: truncate_for_error(&body, 800),
                        },
                    });
                }
                Err(error) => {
                    if self.retry.allows_retry(attempt) && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry.base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(PlatformError::Transient {
                        operation: operation.to_string(),
                        detail: error.to_string(),
                    });
                }
            }
        }
    }

    async fn send_json<T, F>(&self, operation: &str, resource: &str, builder: F) -> PlatformResult<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let response = self.send(operation, resource, builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|error| PlatformError::InvalidResponse {
                operation: operation.to_string(),
                detail: error.to_string(),
            })
    }

    async fn put_member_overwrite(
        &self,
        operation: &str,
        channel_id: &str,
        user_id: &str,
        allow: u64,
        deny: u64,
    ) -> PlatformResult<()> {
        let payload = json!({
            "type": OVERWRITE_MEMBER,
            "allow": allow.to_string(),
            "deny": deny.to_string(),
        });
        let url = self.url(&format!("/channels/{channel_id}/permissions/{user_id}"));
        self.send(operation, &format!("channel {channel_id}"), || {
            self.http.put(&url).json(&payload)
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ChatPlatform for DiscordRestClient {
    async fn send_message(&self, channel_id: &str, draft: &MessageDraft) -> PlatformResult<String> {
        let payload = draft_payload(draft);
        let url = self.url(&format!("/channels/{channel_id}/messages"));
        let created: DiscordCreated = self
            .send_json("send message", &format!("channel {channel_id}"), || {
                self.http.post(&url).json(&payload)
            })
            .await?;
        Ok(created.id)
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        draft: &MessageDraft,
    ) -> PlatformResult<()> {
        let payload = draft_payload(draft);
        let url = self.url(&format!("/channels/{channel_id}/messages/{message_id}"));
        self.send("edit message", &format!("message {message_id}"), || {
            self.http.patch(&url).json(&payload)
        })
        .await?;
        Ok(())
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> PlatformResult<()> {
        let url = self.url(&format!("/channels/{channel_id}/messages/{message_id}"));
        self.send("delete message", &format!("message {message_id}"), || {
            self.http.delete(&url)
        })
        .await?;
        Ok(())
    }

    async fn fetch_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> PlatformResult<PlatformMessage> {
        let url = self.url(&format!("/channels/{channel_id}/messages/{message_id}"));
        let message: DiscordMessage = self
            .send_json("fetch message", &format!("message {message_id}"), || {
                self.http.get(&url)
            })
            .await?;
        message_from_wire(message)
    }

    async fn fetch_messages(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> PlatformResult<Vec<PlatformMessage>> {
        let url = self.url(&format!("/channels/{channel_id}/messages"));
        let mut query = vec![("limit", limit.clamp(1, 100).to_string())];
        if let Some(before) = before {
            query.push(("before", before.to_string()));
        }
        let messages: Vec<DiscordMessage> = self
            .send_json("fetch messages", &format!("channel {channel_id}"), || {
                self.http.get(&url).query(&query)
            })
            .await?;
        messages.into_iter().map(message_from_wire).collect()
    }

    async fn fetch_channel(&self, channel_id: &str) -> PlatformResult<ChannelInfo> {
        let url = self.url(&format!("/channels/{channel_id}"));
        let channel: DiscordChannel = self
            .send_json("fetch channel", &format!("channel {channel_id}"), || {
                self.http.get(&url)
            })
            .await?;
        Ok(channel_from_wire(channel))
    }

    async fn rename_channel(&self, channel_id: &str, name: &str) -> PlatformResult<()> {
        let url = self.url(&format!("/channels/{channel_id}"));
        let payload = json!({ "name": name });
        self.send("rename channel", &format!("channel {channel_id}"), || {
            self.http.patch(&url).json(&payload)
        })
        .await?;
        Ok(())
    }

    async fn create_channel(&self, request: &ChannelRequest) -> PlatformResult<ChannelInfo> {
        let mut overwrites = vec![json!({
            "id": self.guild_id,
            "type": OVERWRITE_ROLE,
            "allow": "0",
            "deny": VIEW_CHANNEL.to_string(),
        })];
        overwrites.extend(request.allowed_role_ids.iter().map(|role_id| {
            json!({
                "id": role_id,
                "type": OVERWRITE_ROLE,
                "allow": MEMBER_ACCESS.to_string(),
                "deny": "0",
            })
        }));
        overwrites.extend(request.allowed_member_ids.iter().map(|user_id| {
            json!({
                "id": user_id,
                "type": OVERWRITE_MEMBER,
                "allow": MEMBER_ACCESS.to_string(),
                "deny": "0",
            })
        }));

        let mut payload = json!({
            "name": request.name,
            "type": GUILD_TEXT_CHANNEL,
            "permission_overwrites": overwrites,
        });
        if let Some(parent_id) = &request.parent_id {
            payload["parent_id"] = Value::String(parent_id.clone());
        }

        let url = self.url(&format!("/guilds/{}/channels", self.guild_id));
        let channel: DiscordChannel = self
            .send_json("create channel", &format!("guild {}", self.guild_id), || {
                self.http.post(&url).json(&payload)
            })
            .await?;
        Ok(channel_from_wire(channel))
    }

    async fn delete_channel(&self, channel_id: &str) -> PlatformResult<()> {
        let url = self.url(&format!("/channels/{channel_id}"));
        self.send("delete channel", &format!("channel {channel_id}"), || {
            self.http.delete(&url)
        })
        .await?;
        Ok(())
    }

    async fn grant_member_access(&self, channel_id: &str, user_id: &str) -> PlatformResult<()> {
        self.put_member_overwrite("grant member access", channel_id, user_id, MEMBER_ACCESS, 0)
            .await
    }

    async fn revoke_member_access(&self, channel_id: &str, user_id: &str) -> PlatformResult<()> {
        self.put_member_overwrite("revoke member access", channel_id, user_id, 0, MEMBER_ACCESS)
            .await
    }

    async fn fetch_member(&self, user_id: &str) -> PlatformResult<Option<Member>> {
        let url = self.url(&format!("/guilds/{}/members/{user_id}", self.guild_id));
        let member: DiscordMember = match self
            .send_json("fetch member", &format!("member {user_id}"), || {
                self.http.get(&url)
            })
            .await
        {
            Ok(member) => member,
            Err(error) if error.is_not_found() => return Ok(None),
            Err(error) => return Err(error),
        };
        Ok(Some(Member {
            id: member.user.id,
            username: member.user.username,
            role_ids: member.roles,
        }))
    }

    async fn send_direct_message(
        &self,
        user_id: &str,
        draft: &MessageDraft,
    ) -> PlatformResult<String> {
        let url = self.url("/users/@me/channels");
        let payload = json!({ "recipient_id": user_id });
        let channel: DiscordCreated = self
            .send_json("open direct message", &format!("user {user_id}"), || {
                self.http.post(&url).json(&payload)
            })
            .await?;
        self.send_message(&channel.id, draft).await
    }
}

fn draft_payload(draft: &MessageDraft) -> Value {
    let mut payload = Map::new();
    if let Some(content) = &draft.content {
        payload.insert("content".to_string(), Value::String(content.clone()));
    }
    if !draft.embeds.is_empty() {
        payload.insert("embeds".to_string(), json!(draft.embeds));
    }
    if let Some(rows) = &draft.components {
        payload.insert("components".to_string(), components_to_wire(rows));
    }
    payload.insert(
        "allowed_mentions".to_string(),
        json!({ "parse": ["users", "roles"] }),
    );
    Value::Object(payload)
}

fn components_to_wire(rows: &[ButtonRow]) -> Value {
    Value::Array(
        rows.iter()
            .map(|row| {
                let buttons = row
                    .buttons
                    .iter()
                    .map(|button| {
                        let mut value = json!({
                            "type": BUTTON,
                            "style": button.style.wire_value(),
                            "label": button.label,
                            "disabled": button.disabled,
                        });
                        match &button.target {
                            ButtonTarget::Action(id) => value["custom_id"] = json!(id),
                            ButtonTarget::Url(url) => value["url"] = json!(url),
                        }
                        value
                    })
                    .collect::<Vec<_>>();
                json!({ "type": ACTION_ROW, "components": buttons })
            })
            .collect(),
    )
}

fn components_from_wire(rows: &[Value]) -> Vec<ButtonRow> {
    rows.iter()
        .filter(|row| row["type"].as_u64() == Some(ACTION_ROW))
        .map(|row| {
            let buttons = row["components"]
                .as_array()
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .filter(|item| item["type"].as_u64() == Some(BUTTON))
                .filter_map(|item| {
                    let style = item["style"].as_u64().and_then(ButtonStyle::from_wire_value)?;
                    let target = match (item["custom_id"].as_str(), item["url"].as_str()) {
                        (Some(id), _) => ButtonTarget::Action(id.to_string()),
                        (None, Some(url)) => ButtonTarget::Url(url.to_string()),
                        (None, None) => return None,
                    };
                    Some(Button {
                        label: item["label"].as_str().unwrap_or_default().to_string(),
                        style,
                        target,
                        disabled: item["disabled"].as_bool().unwrap_or(false),
                    })
                })
                .collect();
            ButtonRow { buttons }
        })
        .collect()
}

fn message_from_wire(message: DiscordMessage) -> PlatformResult<PlatformMessage> {
    let timestamp = DateTime::parse_from_rfc3339(&message.timestamp)
        .map_err(|error| PlatformError::InvalidResponse {
            operation: "read message".to_string(),
            detail: format!("timestamp '{}': {error}", message.timestamp),
        })?
        .with_timezone(&Utc);
    Ok(PlatformMessage {
        id: message.id,
        channel_id: message.channel_id,
        author: MessageAuthor {
            id: message.author.id,
            username: message.author.username,
            bot: message.author.bot,
        },
        content: message.content,
        timestamp,
        attachments: message
            .attachments
            .into_iter()
            .map(|attachment| MessageAttachment {
                url: attachment.url,
                filename: attachment.filename,
            })
            .collect(),
        embeds: message.embeds,
        components: components_from_wire(&message.components),
    })
}

fn channel_from_wire(channel: DiscordChannel) -> ChannelInfo {
    ChannelInfo {
        id: channel.id,
        name: channel.name.unwrap_or_default(),
        parent_id: channel.parent_id,
    }
}
