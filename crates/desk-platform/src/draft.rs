//! Outbound message model and the inbound message view returned by fetches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Embed accent colours used by the desk.
pub mod colors {
    pub const SUCCESS: u32 = 0x38cc96;
    pub const WARNING: u32 = 0xffaa00;
    pub const FAILURE: u32 = 0xdf6461;
    pub const NEUTRAL: u32 = 0x0099ff;
    pub const TICKET_OPENED: u32 = 0xd0a955;
}

/// Colour theme of a status or reply embed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Success,
    Warning,
    Failure,
    Neutral,
}

impl Tone {
    pub fn color(self) -> u32 {
        match self {
            Self::Success => colors::SUCCESS,
            Self::Warning => colors::WARNING,
            Self::Failure => colors::FAILURE,
            Self::Neutral => colors::NEUTRAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

/// Rich embed in the chat platform's wire shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Embed {
    pub fn new(title: impl Into<String>, color: u32) -> Self {
        Self {
            title: Some(title.into()),
            color: Some(color),
            ..Self::default()
        }
    }

    /// Heading-style embed: the title is rendered as a `###` line above `text`.
    pub fn themed(tone: Tone, title: &str, text: &str) -> Self {
        let description = match (title.is_empty(), text.is_empty()) {
            (false, false) => format!("### {title}\n{text}"),
            (false, true) => format!("### {title}"),
            (true, _) => text.to_string(),
        };
        Self {
            description: Some(description),
            color: Some(tone.color()),
            ..Self::default()
        }
    }

    pub fn author(mut self, name: impl Into<String>) -> Self {
        self.author = Some(EmbedAuthor {
            name: name.into(),
            icon_url: None,
        });
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn footer(mut self, text: impl Into<String>) -> Self {
        self.footer = Some(EmbedFooter { text: text.into() });
        self
    }

    pub fn timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = Some(at.to_rfc3339());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Secondary,
    Success,
    Danger,
    Link,
}

impl ButtonStyle {
    pub(crate) fn wire_value(self) -> u8 {
        match self {
            Self::Primary => 1,
            Self::Secondary => 2,
            Self::Success => 3,
            Self::Danger => 4,
            Self::Link => 5,
        }
    }

    pub(crate) fn from_wire_value(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Primary),
            2 => Some(Self::Secondary),
            3 => Some(Self::Success),
            4 => Some(Self::Danger),
            5 => Some(Self::Link),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ButtonTarget {
    /// Control id routed back to the desk when pressed.
    Action(String),
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub style: ButtonStyle,
    pub target: ButtonTarget,
    #[serde(default)]
    pub disabled: bool,
}

impl Button {
    pub fn action(label: impl Into<String>, style: ButtonStyle, control_id: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            style,
            target: ButtonTarget::Action(control_id.into()),
            disabled: false,
        }
    }

    pub fn link(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            style: ButtonStyle::Link,
            target: ButtonTarget::Url(url.into()),
            disabled: false,
        }
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn control_id(&self) -> Option<&str> {
        match &self.target {
            ButtonTarget::Action(id) => Some(id),
            ButtonTarget::Url(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonRow {
    pub buttons: Vec<Button>,
}

impl ButtonRow {
    pub fn new(buttons: Vec<Button>) -> Self {
        Self { buttons }
    }
}

/// Message body for send and edit calls.
///
/// On edit, `content: None`, empty `embeds` and `components: None` leave the
/// existing value untouched; `components: Some(vec![])` clears all controls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub content: Option<String>,
    pub embeds: Vec<Embed>,
    pub components: Option<Vec<ButtonRow>>,
}

impl MessageDraft {
    pub fn embed(embed: Embed) -> Self {
        Self {
            content: None,
            embeds: vec![embed],
            components: None,
        }
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn buttons(mut self, row: ButtonRow) -> Self {
        self.components.get_or_insert_with(Vec::new).push(row);
        self
    }

    /// Edit body that strips every control and keeps content and embeds.
    pub fn clear_components() -> Self {
        Self {
            content: None,
            embeds: Vec::new(),
            components: Some(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAuthor {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttachment {
    pub url: String,
    #[serde(default)]
    pub filename: Option<String>,
}

/// Message as read back from a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformMessage {
    pub id: String,
    pub channel_id: String,
    pub author: MessageAuthor,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<MessageAttachment>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    #[serde(default)]
    pub components: Vec<ButtonRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

/// Request for a private text channel.
///
/// Everyone else is denied visibility; listed roles and members are allowed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelRequest {
    pub name: String,
    pub parent_id: Option<String>,
    pub allowed_role_ids: Vec<String>,
    pub allowed_member_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub role_ids: Vec<String>,
}

impl Member {
    pub fn mention(&self) -> String {
        user_mention(&self.id)
    }
}

pub fn user_mention(user_id: &str) -> String {
    format!("<@{user_id}>")
}

pub fn role_mention(role_id: &str) -> String {
    format!("<@&{role_id}>")
}

#[cfg(test)]
mod tests {
    use super::{Button, ButtonRow, ButtonStyle, Embed, MessageDraft};

    #[test]
    fn embed_builder_collects_fields_in_order() {
        let embed = Embed::new("New Transcript Saved", super::colors::NEUTRAL)
            .field("Ticket Owner", "<@1>", true)
            .field("Ticket Name", "closed-0001", true)
            .footer("desk");
        assert_eq!(embed.fields.len(), 2);
        assert_eq!(embed.fields[1].name, "Ticket Name");
        assert_eq!(embed.footer.map(|footer| footer.text).as_deref(), Some("desk"));
    }

    #[test]
    fn themed_embed_renders_title_as_heading() {
        let embed = Embed::themed(super::Tone::Failure, "Error", "Ticket not found!");
        assert_eq!(embed.description.as_deref(), Some("### Error\nTicket not found!"));
        assert_eq!(embed.color, Some(super::colors::FAILURE));
        assert_eq!(embed.title, None);
    }

    #[test]
    fn embed_serialization_omits_unset_members() {
        let value = serde_json::to_value(Embed::new("Ticket Claimed", 1)).expect("serialize");
        assert_eq!(value, serde_json::json!({ "title": "Ticket Claimed", "color": 1 }));
    }

    #[test]
    fn author_serializes_without_icon_when_unset() {
        let value = serde_json::to_value(Embed::new("New Transcript Saved", 1).author("ada"))
            .expect("serialize");
        assert_eq!(value["author"], serde_json::json!({ "name": "ada" }));
    }

    #[test]
    fn clear_components_only_touches_controls() {
        let draft = MessageDraft::clear_components();
        assert_eq!(draft.content, None);
        assert!(draft.embeds.is_empty());
        assert_eq!(draft.components, Some(Vec::new()));
    }

    #[test]
    fn buttons_append_rows() {
        let draft = MessageDraft::default()
            .buttons(ButtonRow::new(vec![Button::action(
                "Close",
                ButtonStyle::Danger,
                "close-ticket",
            )]))
            .buttons(ButtonRow::new(vec![Button::link("View", "https://x.test/1")]));
        let rows = draft.components.expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].buttons[0].control_id(), Some("close-ticket"));
        assert_eq!(rows[1].buttons[0].control_id(), None);
    }
}
