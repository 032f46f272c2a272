use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Length of the public transcript token.
pub const TRANSCRIPT_ID_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptAttachment {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub content: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<TranscriptAttachment>,
}

/// Archived, human-authored history of a ticket channel in chronological order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub transcript_id: String,
    pub related_channel_id: String,
    pub messages: Vec<TranscriptMessage>,
    pub created_at: DateTime<Utc>,
}

pub fn is_valid_transcript_id(value: &str) -> bool {
    value.len() == TRANSCRIPT_ID_LEN && value.chars().all(|ch| ch.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::is_valid_transcript_id;

    #[test]
    fn transcript_ids_are_ten_alphanumerics() {
        assert!(is_valid_transcript_id("aB3dE5gH9k"));
        assert!(!is_valid_transcript_id("short"));
        assert!(!is_valid_transcript_id("aB3dE5gH9/"));
        assert!(!is_valid_transcript_id("aB3dE5gH9kk"));
    }
}
