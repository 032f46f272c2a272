use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use desk_types::TicketCategory;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_category(value: &str) -> Result<TicketCategory, String> {
    value.parse::<TicketCategory>().map_err(|error| error.to_string())
}

/// `category=text` pair overriding a built-in welcome message.
fn parse_welcome_override(value: &str) -> Result<(TicketCategory, String), String> {
    let (category, text) = value
        .split_once('=')
        .ok_or_else(|| "expected <category>=<text>".to_string())?;
    let text = text.trim();
    if text.is_empty() {
        return Err("welcome message text must not be empty".to_string());
    }
    Ok((parse_category(category)?, text.to_string()))
}

#[derive(Debug, Parser)]
#[command(
    name = "ticket-desk",
    about = "Support ticket desk for Discord communities",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long = "db-path",
        env = "TICKET_DESK_DB_PATH",
        default_value = ".ticket-desk/desk.sqlite3",
        help = "SQLite database holding tickets, counters, transcripts and ratings"
    )]
    pub(crate) db_path: PathBuf,

    #[command(flatten)]
    pub(crate) desk: DeskArgs,

    #[command(flatten)]
    pub(crate) http: HttpArgs,

    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub(crate) enum CliCommand {
    /// Create or upgrade the SQLite schema.
    Migrate,
    /// Validate configuration and report store row counts.
    Doctor,
    /// Feed a JSON-lines file of inbound actions through the desk.
    Replay(ReplayArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum CliPlatform {
    /// Discord REST API with the configured bot token.
    Discord,
    /// Recording in-process platform for local reproduction.
    Memory,
}

#[derive(Debug, Args)]
pub(crate) struct ReplayArgs {
    #[arg(long, help = "JSON-lines file with one inbound action per line")]
    pub(crate) actions: PathBuf,

    #[arg(
        long,
        env = "TICKET_DESK_REPLAY_PLATFORM",
        value_enum,
        default_value_t = CliPlatform::Memory,
        help = "Platform the replayed actions run against"
    )]
    pub(crate) platform: CliPlatform,

    #[arg(
        long = "fixed-category",
        env = "TICKET_DESK_FIXED_CATEGORY",
        value_parser = parse_category,
        help = "Skip the classifier service and file every new ticket under this category"
    )]
    pub(crate) fixed_category: Option<TicketCategory>,
}

#[derive(Debug, Args)]
pub(crate) struct DeskArgs {
    #[arg(
        long = "staff-role-id",
        env = "TICKET_DESK_STAFF_ROLE_ID",
        default_value = "",
        help = "Role allowed to claim, reopen, save and delete tickets"
    )]
    pub(crate) staff_role_id: String,

    #[arg(
        long = "requester-role-id",
        env = "TICKET_DESK_REQUESTER_ROLE_ID",
        default_value = "",
        help = "Role allowed to open tickets"
    )]
    pub(crate) requester_role_id: String,

    #[arg(
        long = "support-ping-role-id",
        env = "TICKET_DESK_SUPPORT_PING_ROLE_ID",
        help = "Optional role mentioned in every new ticket"
    )]
    pub(crate) support_ping_role_id: Option<String>,

    #[arg(
        long = "archive-channel-id",
        env = "TICKET_DESK_ARCHIVE_CHANNEL_ID",
        default_value = "",
        help = "Channel receiving one archive entry per saved transcript"
    )]
    pub(crate) archive_channel_id: String,

    #[arg(
        long = "transcript-base-url",
        env = "TICKET_DESK_TRANSCRIPT_BASE_URL",
        default_value = "",
        help = "Public URL prefix transcripts are served under"
    )]
    pub(crate) transcript_base_url: String,

    #[arg(
        long = "general-support-parent-id",
        env = "TICKET_DESK_GENERAL_SUPPORT_PARENT_ID",
        default_value = ""
    )]
    pub(crate) general_support_parent_id: String,

    #[arg(
        long = "game-issues-parent-id",
        env = "TICKET_DESK_GAME_ISSUES_PARENT_ID",
        default_value = ""
    )]
    pub(crate) game_issues_parent_id: String,

    #[arg(
        long = "user-reports-parent-id",
        env = "TICKET_DESK_USER_REPORTS_PARENT_ID",
        default_value = ""
    )]
    pub(crate) user_reports_parent_id: String,

    #[arg(
        long = "staff-reports-parent-id",
        env = "TICKET_DESK_STAFF_REPORTS_PARENT_ID",
        default_value = ""
    )]
    pub(crate) staff_reports_parent_id: String,

    #[arg(
        long = "welcome-message",
        env = "TICKET_DESK_WELCOME_MESSAGES",
        value_delimiter = ';',
        value_parser = parse_welcome_override,
        help = "Welcome text override as <category>=<text>; {{PING}} is replaced by the requester mention"
    )]
    pub(crate) welcome_messages: Vec<(TicketCategory, String)>,

    #[arg(
        long = "external-call-timeout-ms",
        env = "TICKET_DESK_EXTERNAL_CALL_TIMEOUT_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "Upper bound for each platform, upload and classifier call"
    )]
    pub(crate) external_call_timeout_ms: u64,

    #[arg(
        long = "history-page-size",
        env = "TICKET_DESK_HISTORY_PAGE_SIZE",
        default_value_t = 100,
        value_parser = parse_positive_usize
    )]
    pub(crate) history_page_size: usize,
}

#[derive(Debug, Args)]
pub(crate) struct HttpArgs {
    #[arg(
        long = "discord-api-base",
        env = "TICKET_DESK_DISCORD_API_BASE",
        default_value = "https://discord.com/api/v10"
    )]
    pub(crate) discord_api_base: String,

    #[arg(
        long = "discord-bot-token",
        env = "TICKET_DESK_DISCORD_BOT_TOKEN",
        hide_env_values = true,
        default_value = ""
    )]
    pub(crate) discord_bot_token: String,

    #[arg(
        long = "discord-guild-id",
        env = "TICKET_DESK_DISCORD_GUILD_ID",
        default_value = ""
    )]
    pub(crate) discord_guild_id: String,

    #[arg(
        long = "upload-api-base",
        env = "TICKET_DESK_UPLOAD_API_BASE",
        default_value = "https://api.uploadthing.com"
    )]
    pub(crate) upload_api_base: String,

    #[arg(
        long = "upload-api-key",
        env = "TICKET_DESK_UPLOAD_API_KEY",
        hide_env_values = true,
        default_value = "",
        help = "Attachment rehosting credential; attachments keep their original URLs when empty"
    )]
    pub(crate) upload_api_key: String,

    #[arg(
        long = "classifier-api-base",
        env = "TICKET_DESK_CLASSIFIER_API_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    pub(crate) classifier_api_base: String,

    #[arg(
        long = "classifier-api-key",
        env = "TICKET_DESK_CLASSIFIER_API_KEY",
        hide_env_values = true,
        default_value = ""
    )]
    pub(crate) classifier_api_key: String,

    #[arg(
        long = "classifier-model",
        env = "TICKET_DESK_CLASSIFIER_MODEL",
        default_value = desk_classifier::DEFAULT_CLASSIFIER_MODEL
    )]
    pub(crate) classifier_model: String,

    #[arg(
        long = "request-timeout-ms",
        env = "TICKET_DESK_REQUEST_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "Per-request timeout for the Discord, upload and classifier HTTP clients"
    )]
    pub(crate) request_timeout_ms: u64,

    #[arg(
        long = "retry-max-attempts",
        env = "TICKET_DESK_RETRY_MAX_ATTEMPTS",
        default_value_t = 3,
        value_parser = parse_positive_usize
    )]
    pub(crate) retry_max_attempts: usize,

    #[arg(
        long = "retry-base-delay-ms",
        env = "TICKET_DESK_RETRY_BASE_DELAY_MS",
        default_value_t = 250
    )]
    pub(crate) retry_base_delay_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::{parse_welcome_override, Cli, CliCommand, CliPlatform};
    use clap::Parser;
    use desk_types::TicketCategory;

    #[test]
    fn replay_defaults_to_memory_platform() {
        let cli = Cli::try_parse_from([
            "ticket-desk",
            "--staff-role-id",
            "staff",
            "replay",
            "--actions",
            "actions.jsonl",
            "--fixed-category",
            "game_issues",
        ])
        .expect("parse");
        assert_eq!(cli.desk.staff_role_id, "staff");
        assert_eq!(cli.desk.external_call_timeout_ms, 30_000);
        match cli.command {
            CliCommand::Replay(args) => {
                assert_eq!(args.platform, CliPlatform::Memory);
                assert_eq!(args.fixed_category, Some(TicketCategory::GameIssues));
            }
            other => panic!("expected replay, got {other:?}"),
        }
    }

    #[test]
    fn rejects_zero_timeouts_and_unknown_categories() {
        assert!(Cli::try_parse_from([
            "ticket-desk",
            "--external-call-timeout-ms",
            "0",
            "doctor"
        ])
        .is_err());
        assert!(parse_welcome_override("billing=hello").is_err());
        assert_eq!(
            parse_welcome_override("user_reports=Hi {{PING}}"),
            Ok((TicketCategory::UserReports, "Hi {{PING}}".to_string()))
        );
    }
}
