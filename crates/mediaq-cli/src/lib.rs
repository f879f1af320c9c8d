//! Mediaq CLI Library
//!
//! Cache-and-queue manager for media artifacts that move from a remote
//! object store through a convert, transcribe, summarize and publish
//! pipeline.
//!
//! # Overview
//!
//! - **Resolution**: cache hit, mirror link or download ([`resolver`])
//! - **Cache accounting**: ledger, retention and eviction ([`cache`])
//! - **Processing**: bounded worker pool with backoff retries ([`queue`])
//! - **Publishing**: deduplicated upload of derived artifacts ([`publisher`])
//! - **Commands**: `mediaq submit`, `run`, `status`, `stats`, `clean`,
//!   `resolve` and `config`

pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
pub mod mirror;
pub mod pipeline;
pub mod progress;
pub mod publisher;
pub mod queue;
pub mod remote;
pub mod resolver;
pub mod service;
pub mod status;
pub mod transform;

// Re-export commonly used types
pub use config::Config;
pub use error::{CliError, Result};
pub use service::MediaService;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Mediaq - media artifact cache and processing queue
#[derive(Parser, Debug)]
#[command(name = "mediaq")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "MEDIAQ_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Print the CLI reference as markdown and exit
    #[arg(long, hide = true)]
    pub markdown_help: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a task group for a remote object
    Submit {
        /// Remote id of the source object
        remote_id: String,

        /// Display name (defaults to what the remote store reports)
        #[arg(short, long)]
        name: Option<String>,

        /// Relative path of the file inside the synchronized mirror
        #[arg(long)]
        path_hint: Option<String>,

        /// Expected size in bytes
        #[arg(long)]
        size: Option<u64>,

        /// Comma-separated stages (convert, transcribe, summarize, publish)
        #[arg(short, long, default_value = "convert,transcribe,summarize,publish")]
        stages: String,

        /// Free-form description of the group
        #[arg(short, long)]
        description: Option<String>,

        /// Higher priority groups run first
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i32,

        /// Process now and wait for the group to finish
        #[arg(short, long)]
        wait: bool,
    },

    /// Process every unfinished task group until the queue is idle
    Run,

    /// Show a task group, or list recent groups
    Status {
        /// Task group id
        group_id: Option<String>,

        /// Number of groups to list
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show cache statistics
    Stats,

    /// Evict cache entries past the retention window
    Clean {
        /// Force cleanup of everything idle this many days, including
        /// downloads never processed
        #[arg(long)]
        older_than_days: Option<u64>,
    },

    /// Resolve a remote object to a local path
    Resolve {
        /// Remote id of the object
        remote_id: String,

        /// Display name used for mirror lookup
        #[arg(short, long)]
        name: Option<String>,

        /// Relative path of the file inside the synchronized mirror
        #[arg(long)]
        path_hint: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,

    /// Print the config file location
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_submit_parses_stages_and_priority() {
        let cli = Cli::parse_from([
            "mediaq", "submit", "talks/a.mp4", "--stages", "convert,publish", "--priority", "-2",
        ]);
        match cli.command {
            Some(Commands::Submit {
                remote_id,
                stages,
                priority,
                wait,
                ..
            }) => {
                assert_eq!(remote_id, "talks/a.mp4");
                assert_eq!(stages, "convert,publish");
                assert_eq!(priority, -2);
                assert!(!wait);
            },
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
