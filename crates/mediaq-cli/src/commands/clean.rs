//! `mediaq clean` command implementation
//!
//! Without `--older-than-days` runs the standard retention sweep. With it,
//! also removes downloads that were never processed.

use super::open_service;
use crate::error::Result;
use crate::progress::format_bytes;
use colored::Colorize;
use std::path::Path;

pub async fn run(config_path: Option<&Path>, older_than_days: Option<u64>) -> Result<()> {
    let service = open_service(config_path).await?;

    let removed = match older_than_days {
        Some(days) => service.force_cleanup(days).await,
        None => service.sweep().await,
    };
    service.close().await?;
    let removed = removed?;

    if removed.is_empty() {
        println!("Nothing to clean.");
        return Ok(());
    }

    let freed: u64 = removed.iter().map(|e| e.size_bytes).sum();
    println!("{} Removed {} cache entr{}", "✓".green(), removed.len(), if removed.len() == 1 { "y" } else { "ies" });
    println!("  Freed: {}", format_bytes(freed));

    Ok(())
}
