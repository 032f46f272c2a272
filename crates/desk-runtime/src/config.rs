use std::collections::BTreeMap;
use std::time::Duration;

use desk_transcript::DEFAULT_PAGE_SIZE;
use desk_types::TicketCategory;
use thiserror::Error;

/// Placeholder in welcome messages replaced by the requester mention.
pub const PING_PLACEHOLDER: &str = "{{PING}}";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeskConfigError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("transcript base url '{0}' must start with http:// or https://")]
    InvalidTranscriptBaseUrl(String),
    #[error("no parent channel configured for category '{0}'")]
    MissingCategoryParent(TicketCategory),
    #[error("external call timeout must be greater than zero")]
    ZeroTimeout,
    #[error("history page size must be between 1 and 100, got {0}")]
    InvalidPageSize(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeskConfig {
    /// Role allowed to claim, reopen, save and delete tickets.
    pub staff_role_id: String,
    /// Role allowed to open tickets.
    pub requester_role_id: String,
    pub support_ping_role_id: Option<String>,
    pub archive_channel_id: String,
    pub transcript_base_url: String,
    pub category_parents: BTreeMap<TicketCategory, String>,
    /// Per-category overrides of the built-in welcome text.
    pub welcome_messages: BTreeMap<TicketCategory, String>,
    pub external_call_timeout: Duration,
    pub history_page_size: usize,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            staff_role_id: String::new(),
            requester_role_id: String::new(),
            support_ping_role_id: None,
            archive_channel_id: String::new(),
            transcript_base_url: String::new(),
            category_parents: BTreeMap::new(),
            welcome_messages: BTreeMap::new(),
            external_call_timeout: Duration::from_secs(30),
            history_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl DeskConfig {
    pub fn validate(&self) -> Result<(), DeskConfigError> {
        for (name, value) in [
            ("staff role id", &self.staff_role_id),
            ("requester role id", &self.requester_role_id),
            ("archive channel id", &self.archive_channel_id),
        ] {
            if value.trim().is_empty() {
                return Err(DeskConfigError::EmptyField(name));
            }
        }
        let base_url = self.transcript_base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(DeskConfigError::InvalidTranscriptBaseUrl(base_url.to_string()));
        }
        if let Some(category) = TicketCategory::ALL.into_iter().find(|category| {
            self.category_parents
                .get(category)
                .map_or(true, |parent| parent.trim().is_empty())
        }) {
            return Err(DeskConfigError::MissingCategoryParent(category));
        }
        if self.external_call_timeout.is_zero() {
            return Err(DeskConfigError::ZeroTimeout);
        }
        if !(1..=DEFAULT_PAGE_SIZE).contains(&self.history_page_size) {
            return Err(DeskConfigError::InvalidPageSize(self.history_page_size));
        }
        Ok(())
    }

    pub fn category_parent(&self, category: TicketCategory) -> Option<&str> {
        self.category_parents.get(&category).map(String::as_str)
    }

    pub fn welcome_message(&self, category: TicketCategory) -> &str {
        self.welcome_messages
            .get(&category)
            .map(String::as_str)
            .unwrap_or_else(|| default_welcome_message(category))
    }
}

fn default_welcome_message(category: TicketCategory) -> &'static str {
    match category {
        TicketCategory::GeneralSupport => {
            "Hello {{PING}}, thanks for reaching out! A member of our support team will be with you shortly."
        }
        TicketCategory::GameIssues => {
            "Hello {{PING}}, sorry you are having trouble in game. Please share any screenshots or error messages while you wait for a staff member."
        }
        TicketCategory::UserReports => {
            "Hello {{PING}}, thank you for your report. Please include the username of the player and any evidence you have."
        }
        TicketCategory::StaffReportsManagement => {
            "Hello {{PING}}, your ticket has been forwarded to management. Please explain the situation in as much detail as you can."
        }
    }
}
