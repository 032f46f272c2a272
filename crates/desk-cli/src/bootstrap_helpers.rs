use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use desk_classifier::{Classifier, ClassifierError, OpenAiClassifier, OpenAiClassifierConfig};
use desk_platform::{DiscordClientConfig, DiscordRestClient};
use desk_runtime::DeskConfig;
use desk_transcript::{HttpUploadClient, UploadClientConfig, UploadError, UploadService};
use desk_types::{Classification, TicketCategory};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use crate::cli_args::{DeskArgs, HttpArgs};

pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

pub(crate) fn desk_config(args: &DeskArgs) -> DeskConfig {
    let category_parents = [
        (TicketCategory::GeneralSupport, &args.general_support_parent_id),
        (TicketCategory::GameIssues, &args.game_issues_parent_id),
        (TicketCategory::UserReports, &args.user_reports_parent_id),
        (
            TicketCategory::StaffReportsManagement,
            &args.staff_reports_parent_id,
        ),
    ]
    .into_iter()
    .filter(|(_, parent)| !parent.trim().is_empty())
    .map(|(category, parent)| (category, parent.trim().to_string()))
    .collect::<BTreeMap<_, _>>();

    DeskConfig {
        staff_role_id: args.staff_role_id.trim().to_string(),
        requester_role_id: args.requester_role_id.trim().to_string(),
        support_ping_role_id: args
            .support_ping_role_id
            .as_deref()
            .map(str::trim)
            .filter(|role| !role.is_empty())
            .map(str::to_string),
        archive_channel_id: args.archive_channel_id.trim().to_string(),
        transcript_base_url: args.transcript_base_url.trim().to_string(),
        category_parents,
        welcome_messages: args.welcome_messages.iter().cloned().collect(),
        external_call_timeout: Duration::from_millis(args.external_call_timeout_ms),
        history_page_size: args.history_page_size,
    }
}

pub(crate) fn discord_client(args: &HttpArgs) -> Result<DiscordRestClient> {
    anyhow::ensure!(
        !args.discord_bot_token.trim().is_empty(),
        "--discord-bot-token is required for the discord platform"
    );
    anyhow::ensure!(
        !args.discord_guild_id.trim().is_empty(),
        "--discord-guild-id is required for the discord platform"
    );
    DiscordRestClient::new(DiscordClientConfig {
        api_base: args.discord_api_base.clone(),
        bot_token: args.discord_bot_token.clone(),
        guild_id: args.discord_guild_id.clone(),
        request_timeout_ms: args.request_timeout_ms,
        retry_max_attempts: args.retry_max_attempts,
        retry_base_delay_ms: args.retry_base_delay_ms,
    })
    .context("failed to build discord client")
}

pub(crate) fn upload_service(args: &HttpArgs) -> Result<Arc<dyn UploadService>> {
    if args.upload_api_key.trim().is_empty() {
        tracing::warn!("no upload api key configured; transcript attachments keep their original urls");
        return Ok(Arc::new(KeepOriginalUrls));
    }
    let client = HttpUploadClient::new(UploadClientConfig {
        api_base: args.upload_api_base.clone(),
        api_key: args.upload_api_key.clone(),
        request_timeout_ms: args.request_timeout_ms,
        retry_max_attempts: args.retry_max_attempts,
        retry_base_delay_ms: args.retry_base_delay_ms,
    })
    .context("failed to build upload client")?;
    Ok(Arc::new(client))
}

pub(crate) fn classifier(
    args: &HttpArgs,
    fixed_category: Option<TicketCategory>,
) -> Result<Arc<dyn Classifier>> {
    if let Some(category) = fixed_category {
        return Ok(Arc::new(FixedCategory(category)));
    }
    anyhow::ensure!(
        !args.classifier_api_key.trim().is_empty(),
        "--classifier-api-key is required unless --fixed-category is set"
    );
    let client = OpenAiClassifier::new(OpenAiClassifierConfig {
        api_base: args.classifier_api_base.clone(),
        api_key: args.classifier_api_key.clone(),
        model: args.classifier_model.clone(),
        request_timeout_ms: args.request_timeout_ms,
        retry_max_attempts: args.retry_max_attempts,
        retry_base_delay_ms: args.retry_base_delay_ms,
    })
    .context("failed to build classifier client")?;
    Ok(Arc::new(client))
}

/// Leaves every attachment on its original URL.
struct KeepOriginalUrls;

#[async_trait]
impl UploadService for KeepOriginalUrls {
    async fn upload_from_urls(&self, urls: &[String]) -> Result<Vec<Option<String>>, UploadError> {
        Ok(vec![None; urls.len()])
    }
}

/// Files every ticket under one category with the lowest severity.
struct FixedCategory(TicketCategory);

#[async_trait]
impl Classifier for FixedCategory {
    async fn classify(&self, _text: &str) -> Result<Classification, ClassifierError> {
        Ok(Classification {
            category: self.0,
            severity: 1,
        })
    }
}
