//! Full-history reads of a ticket channel.

use std::time::Duration;

use desk_platform::{ChatPlatform, PlatformError, PlatformMessage};

use crate::TranscriptError;

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Reads every human-authored message in `channel_id`, oldest first.
///
/// Pages walk backwards with a `before` cursor and stop on the first page
/// shorter than `page_size`. Any fetch failure aborts the read.
#[tracing::instrument(level = "debug", skip(platform))]
pub async fn read_channel_history(
    platform: &dyn ChatPlatform,
    channel_id: &str,
    page_size: usize,
    call_timeout: Duration,
) -> Result<Vec<PlatformMessage>, TranscriptError> {
    let page_size = page_size.clamp(1, DEFAULT_PAGE_SIZE);
    let mut collected: Vec<PlatformMessage> = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0_usize;

    loop {
        let page = tokio::time::timeout(
            call_timeout,
            platform.fetch_messages(channel_id, cursor.as_deref(), page_size),
        )
        .await
        .map_err(|_| {
            TranscriptError::History(PlatformError::Transient {
                operation: "fetch messages".to_string(),
                detail: format!("timed out after {}ms", call_timeout.as_millis()),
            })
        })?
        .map_err(TranscriptError::History)?;
        pages += 1;

        let fetched = page.len();
        cursor = page.last().map(|message| message.id.clone());
        collected.extend(page);
        if fetched < page_size || cursor.is_none() {
            break;
        }
    }

    let total = collected.len();
    collected.retain(|message| !message.author.bot);
    collected.reverse();
    tracing::debug!(
        channel_id,
        pages,
        fetched = total,
        kept = collected.len(),
        "read channel history"
    );
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::read_channel_history;
    use crate::TranscriptError;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use desk_platform::{
        ChannelInfo, ChannelRequest, ChatPlatform, InMemoryPlatform, Member, MessageAuthor,
        MessageDraft, PlatformError, PlatformMessage, PlatformResult,
    };
    use std::sync::Mutex;
    use std::time::Duration;

    /// Serves fixed page sizes regardless of cursor, recording each cursor.
    struct PagedPlatform {
        pages: Mutex<Vec<usize>>,
        cursors: Mutex<Vec<Option<String>>>,
        issued: Mutex<usize>,
    }

    impl PagedPlatform {
        fn new(pages: Vec<usize>) -> Self {
            Self {
                pages: Mutex::new(pages),
                cursors: Mutex::new(Vec::new()),
                issued: Mutex::new(0),
            }
        }
    }

    fn message(id: usize, bot: bool) -> PlatformMessage {
        PlatformMessage {
            id: format!("m-{id}"),
            channel_id: "chan-1".to_string(),
            author: MessageAuthor {
                id: if bot { "desk-bot" } else { "cust-1" }.to_string(),
                username: "someone".to_string(),
                bot,
            },
            content: format!("line {id}"),
            timestamp: Utc.with_ymd_and_hms(2025, 5, 2, 9, 0, 0).unwrap(),
            attachments: Vec::new(),
            embeds: Vec::new(),
            components: Vec::new(),
        }
    }

    #[async_trait]
    impl ChatPlatform for PagedPlatform {
        async fn send_message(&self, _: &str, _: &MessageDraft) -> PlatformResult<String> {
            unreachable!("history reads never send")
        }
        async fn edit_message(&self, _: &str, _: &str, _: &MessageDraft) -> PlatformResult<()> {
            unreachable!("history reads never edit")
        }
        async fn delete_message(&self, _: &str, _: &str) -> PlatformResult<()> {
            unreachable!("history reads never delete")
        }
        async fn fetch_message(&self, _: &str, _: &str) -> PlatformResult<PlatformMessage> {
            unreachable!("history reads page instead")
        }
        async fn fetch_messages(
            &self,
            _channel_id: &str,
            before: Option<&str>,
            _limit: usize,
        ) -> PlatformResult<Vec<PlatformMessage>> {
            self.cursors
                .lock()
                .expect("cursor lock")
                .push(before.map(str::to_string));
            let mut pages = self.pages.lock().expect("pages lock");
            if pages.is_empty() {
                return Err(PlatformError::Transient {
                    operation: "fetch messages".to_string(),
                    detail: "no scripted page".to_string(),
                });
            }
            let size = pages.remove(0);
            let mut issued = self.issued.lock().expect("issued lock");
            let page = (0..size)
                .map(|offset| message(*issued + offset, (*issued + offset) % 10 == 9))
                .collect();
            *issued += size;
            Ok(page)
        }
        async fn fetch_channel(&self, _: &str) -> PlatformResult<ChannelInfo> {
            unreachable!()
        }
        async fn rename_channel(&self, _: &str, _: &str) -> PlatformResult<()> {
            unreachable!()
        }
        async fn create_channel(&self, _: &ChannelRequest) -> PlatformResult<ChannelInfo> {
            unreachable!()
        }
        async fn delete_channel(&self, _: &str) -> PlatformResult<()> {
            unreachable!()
        }
        async fn grant_member_access(&self, _: &str, _: &str) -> PlatformResult<()> {
            unreachable!()
        }
        async fn revoke_member_access(&self, _: &str, _: &str) -> PlatformResult<()> {
            unreachable!()
        }
        async fn fetch_member(&self, _: &str) -> PlatformResult<Option<Member>> {
            unreachable!()
        }
        async fn send_direct_message(&self, _: &str, _: &MessageDraft) -> PlatformResult<String> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn stops_after_short_page_and_keeps_every_fetched_human_message() {
        let platform = PagedPlatform::new(vec![100, 100, 47]);
        let messages = read_channel_history(&platform, "chan-1", 100, Duration::from_secs(5))
            .await
            .expect("history");

        // every tenth message is bot-authored: 24 of the 247 fetched
        assert_eq!(messages.len(), 247 - 24);
        let cursors = platform.cursors.lock().expect("cursor lock").clone();
        assert_eq!(
            cursors,
            vec![None, Some("m-99".to_string()), Some("m-199".to_string())]
        );
    }

    #[tokio::test]
    async fn returns_all_247_when_no_bot_messages_are_present() {
        let platform = InMemoryPlatform::new();
        platform.add_channel("chan-1", "ticket-0001", None).await;
        for index in 0..247 {
            platform
                .seed_message(
                    "chan-1",
                    MessageAuthor {
                        id: "cust-1".to_string(),
                        username: "ada".to_string(),
                        bot: false,
                    },
                    &format!("line {index}"),
                    Vec::new(),
                )
                .await;
        }

        let messages = read_channel_history(&platform, "chan-1", 100, Duration::from_secs(5))
            .await
            .expect("history");
        assert_eq!(messages.len(), 247);
        assert_eq!(messages[0].content, "line 0");
        assert_eq!(messages[246].content, "line 246");
        assert_eq!(platform.call_count("fetch_messages").await, 3);
    }

    #[tokio::test]
    async fn fetch_failure_is_fatal() {
        let platform = PagedPlatform::new(vec![100]);
        let error = read_channel_history(&platform, "chan-1", 100, Duration::from_secs(5))
            .await
            .expect_err("second page fails");
        assert!(matches!(error, TranscriptError::History(_)));
    }

    #[tokio::test]
    async fn exact_multiple_of_page_size_ends_on_empty_page() {
        let platform = PagedPlatform::new(vec![100, 0]);
        let messages = read_channel_history(&platform, "chan-1", 100, Duration::from_secs(5))
            .await
            .expect("history");
        assert_eq!(messages.len(), 90);
    }
}
