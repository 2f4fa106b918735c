mod cli;
mod commands;
mod concurrency;
mod config;
mod error;
mod history;
mod logging;
mod storage_ops;

use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;

use cli::{Cli, Command};
use commands::RunContext;
use config::Config;
use error::OrchestratorError;
use history::HistoryResult;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.json_logs);

    let started_at = Utc::now();
    let history_file = cli.history_file.clone();
    let history_args: Vec<String> = std::env::args().skip(1).collect();
    let command_name = command_name(cli.command);

    let config = match Config::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => return fail(&history_file, command_name, &history_args, started_at, e.into()),
    };

    let ctx = match RunContext::new(config) {
        Ok(ctx) => ctx,
        Err(e) => return fail(&history_file, command_name, &history_args, started_at, OrchestratorError::Other(e)),
    };

    let result = dispatch(&ctx, cli.command).await;

    match result {
        Ok(_) => {
            if let Some(path) = &history_file {
                let _ = history::append(path, command_name, history_args, started_at, HistoryResult::Success);
            }
            println!("{{\"success\": true}}");
            ExitCode::SUCCESS
        }
        Err(e) => fail(&history_file, command_name, &history_args, started_at, e),
    }
}

async fn dispatch(ctx: &RunContext, command: Command) -> Result<String, OrchestratorError> {
    match command {
        Command::Create => commands::run_create(ctx, false).await,
        Command::CreateDiff => commands::run_create(ctx, true).await,
        Command::Restore => commands::run_restore(ctx).await,
        Command::RestoreKeys => commands::run_restore_keys(ctx).await,
        Command::Delete => commands::run_delete(ctx).await,
    }
}

fn command_name(command: Command) -> &'static str {
    match command {
        Command::Create => "create",
        Command::CreateDiff => "create_diff",
        Command::Restore => "restore",
        Command::RestoreKeys => "restore_keys",
        Command::Delete => "delete",
    }
}

fn fail(
    history_file: &Option<camino::Utf8PathBuf>,
    command_name: &str,
    args: &[String],
    started_at: chrono::DateTime<Utc>,
    error: OrchestratorError,
) -> ExitCode {
    let message = error.to_string();
    tracing::error!(error = %message, "{command_name} failed");
    if let Some(path) = history_file {
        let _ = history::append(path, command_name, args.to_vec(), started_at, HistoryResult::Failure { error: message.clone() });
    }
    let escaped = serde_json::to_string(&message).unwrap_or_else(|_| "\"unknown error\"".to_string());
    eprintln!("{{\"success\": false, \"error\": {escaped}}}");
    ExitCode::FAILURE
}
