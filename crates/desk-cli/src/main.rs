mod bootstrap_helpers;
mod cli_args;
mod replay;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use desk_platform::{ChatPlatform, InMemoryPlatform};
use desk_runtime::{DeskConfig, TicketDesk};
use desk_store::{SqliteTicketStore, TicketStore};

use crate::bootstrap_helpers::{classifier, desk_config, discord_client, init_tracing, upload_service};
use crate::cli_args::{Cli, CliCommand, CliPlatform, ReplayArgs};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match &cli.command {
        CliCommand::Migrate => migrate(&cli),
        CliCommand::Doctor => doctor(&cli).await,
        CliCommand::Replay(args) => replay(&cli, args).await,
    }
}

fn open_store(cli: &Cli) -> Result<SqliteTicketStore> {
    SqliteTicketStore::new(&cli.db_path)
        .with_context(|| format!("failed to open ticket store {}", cli.db_path.display()))
}

fn migrate(cli: &Cli) -> Result<()> {
    let store = open_store(cli)?;
    println!("schema ready: {}", store.db_path().display());
    Ok(())
}

async fn doctor(cli: &Cli) -> Result<()> {
    let config = desk_config(&cli.desk);
    let config_status = match config.validate() {
        Ok(()) => "ok".to_string(),
        Err(error) => format!("invalid ({error})"),
    };
    let store = open_store(cli)?;
    let counts = store.counts().await.context("failed to count store rows")?;

    let mut report = vec![
        format!("config: {config_status}"),
        format!("store: {}", store.db_path().display()),
        format!(
            "tickets: total={} open={} transcripts={} ratings={}",
            counts.tickets, counts.open_tickets, counts.transcripts, counts.ratings
        ),
    ];
    for (name, value) in [
        ("discord bot token", &cli.http.discord_bot_token),
        ("discord guild id", &cli.http.discord_guild_id),
        ("upload api key", &cli.http.upload_api_key),
        ("classifier api key", &cli.http.classifier_api_key),
    ] {
        let state = if value.trim().is_empty() { "missing" } else { "set" };
        report.push(format!("{name}: {state}"));
    }
    println!("{}", report.join("\n"));

    config.validate().context("desk configuration is invalid")?;
    Ok(())
}

async fn replay(cli: &Cli, args: &ReplayArgs) -> Result<()> {
    let config: DeskConfig = desk_config(&cli.desk);
    config.validate().context("desk configuration is invalid")?;
    let actions = replay::load_actions(&args.actions)?;

    let platform: Arc<dyn ChatPlatform> = match args.platform {
        CliPlatform::Discord => Arc::new(discord_client(&cli.http)?),
        CliPlatform::Memory => {
            let platform = InMemoryPlatform::new();
            replay::seed_memory_platform(&platform, &config, &actions).await;
            Arc::new(platform)
        }
    };
    let store: Arc<dyn TicketStore> = Arc::new(open_store(cli)?);
    let desk = TicketDesk::new(
        config,
        store,
        platform,
        classifier(&cli.http, args.fixed_category)?,
        upload_service(&cli.http)?,
    )
    .context("failed to build ticket desk")?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut write_error = None;
    let summary = replay::run_replay(&desk, &actions, |record| {
        if write_error.is_none() {
            if let Err(error) = writeln!(out, "{record}") {
                write_error = Some(error);
            }
        }
    })
    .await;
    if let Some(error) = write_error {
        return Err(error).context("failed to write replay output");
    }
    eprintln!(
        "replayed {} actions ({} ignored, {} failed)",
        summary.actions, summary.ignored, summary.failed
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{migrate, open_store};
    use crate::cli_args::Cli;
    use clap::Parser;
    use desk_store::TicketStore;

    #[tokio::test]
    async fn migrate_creates_missing_database_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let db_path = temp.path().join("state/nested/desk.sqlite3");
        let cli = Cli::try_parse_from([
            "ticket-desk",
            "--db-path",
            db_path.to_str().expect("utf-8 path"),
            "migrate",
        ])
        .expect("parse");

        migrate(&cli).expect("migrate");
        assert!(db_path.exists());
        let counts = open_store(&cli)
            .expect("reopen")
            .counts()
            .await
            .expect("counts");
        assert_eq!(counts.tickets, 0);
    }
}
