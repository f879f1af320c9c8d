//! `mediaq run` command implementation
//!
//! Restores unfinished groups and processes until idle. Ctrl-C stops the
//! workers from claiming new stages; running stages finish first.

use super::open_service;
use crate::error::Result;
use crate::progress::create_spinner;
use colored::Colorize;
use std::path::Path;
use tracing::{info, warn};

pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let service = open_service(config_path).await?;

    let restored = service.queue().restore().await?;
    if restored == 0 {
        println!("No unfinished task groups.");
        service.close().await?;
        return Ok(());
    }

    let spinner = create_spinner(&format!("Processing {} task group(s)", restored));
    service.queue().start().await;

    tokio::select! {
        _ = service.queue().wait_idle() => {},
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupt received, finishing in-flight stages");
            spinner.set_message("Finishing in-flight stages");
        },
    }

    let stats = service.queue_stats().await;
    service.close().await?;
    spinner.finish_and_clear();
    info!(?stats, "Run finished");

    println!("{}", "Queue Summary:".cyan().bold());
    println!("  Succeeded: {}", stats.succeeded.to_string().green());
    println!("  Failed:    {}", stats.failed.to_string().red());
    if stats.pending + stats.running > 0 {
        println!(
            "  Remaining: {} (resume with 'mediaq run')",
            (stats.pending + stats.running).to_string().yellow()
        );
    }

    Ok(())
}
