//! Mediaq CLI - Main entry point

use mediaq_cli::{Cli, Commands, ConfigCommand};
use mediaq_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use clap::Parser;
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.markdown_help {
        println!("{}", clap_markdown::help_markdown::<Cli>());
        return;
    }

    if cli.command.is_none() {
        eprintln!("Error: A subcommand is required");
        eprintln!();
        eprintln!("For more information, try '--help'.");
        process::exit(2);
    }

    let level = if cli.verbose { LogLevel::Debug } else { LogLevel::Warn };
    let log_config = LogConfig::builder()
        .level(level)
        .output(LogOutput::Console)
        .log_file_prefix("mediaq")
        .build();

    // Environment variables take precedence over the flag
    let log_config = log_config.clone().with_env_overrides().unwrap_or(log_config);

    // The CLI works without logging
    let _guard = init_logging(&log_config).ok();

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn execute_command(cli: &Cli) -> mediaq_cli::Result<()> {
    let Some(ref command) = cli.command else {
        return Ok(());
    };
    let config_path = cli.config.as_deref();

    match command {
        Commands::Submit {
            remote_id,
            name,
            path_hint,
            size,
            stages,
            description,
            priority,
            wait,
        } => {
            mediaq_cli::commands::submit::run(
                config_path,
                mediaq_cli::commands::submit::SubmitArgs {
                    remote_id: remote_id.clone(),
                    name: name.clone(),
                    path_hint: path_hint.clone(),
                    size: *size,
                    stages: stages.clone(),
                    description: description.clone(),
                    priority: *priority,
                    wait: *wait,
                },
            )
            .await
        },

        Commands::Run => mediaq_cli::commands::run::run(config_path).await,

        Commands::Status { group_id, limit } => {
            mediaq_cli::commands::status::run(config_path, group_id.as_deref(), *limit).await
        },

        Commands::Stats => mediaq_cli::commands::stats::run(config_path).await,

        Commands::Clean { older_than_days } => {
            mediaq_cli::commands::clean::run(config_path, *older_than_days).await
        },

        Commands::Resolve {
            remote_id,
            name,
            path_hint,
        } => {
            mediaq_cli::commands::resolve::run(
                config_path,
                remote_id,
                name.clone(),
                path_hint.clone(),
            )
            .await
        },

        Commands::Config { command } => match command {
            ConfigCommand::Show => mediaq_cli::commands::config::show(config_path).await,
            ConfigCommand::Path => mediaq_cli::commands::config::path(config_path).await,
        },
    }
}
