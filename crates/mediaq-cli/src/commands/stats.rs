//! `mediaq stats` command implementation

use super::open_service;
use crate::error::Result;
use crate::progress::format_bytes;
use colored::Colorize;
use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let service = open_service(config_path).await?;
    let stats = service.cache_stats().await;
    let root = service.ledger().layout().root().to_path_buf();
    service.close().await?;

    println!("{}", "Cache Statistics:".cyan().bold());
    println!("  Cache dir:      {}", root.display());
    println!("  Retention:      {} day(s)", stats.retention_days);
    println!(
        "  Entries:        {} ({})",
        stats.total_entries,
        format_bytes(stats.total_bytes)
    );
    println!(
        "  Stale:          {} ({})",
        stats.stale_entries,
        format_bytes(stats.stale_bytes)
    );
    println!(
        "  Published:      {} ({})",
        stats.published_entries,
        format_bytes(stats.published_bytes)
    );
    println!("  Mirror links:   {}", stats.mirror_references);
    println!(
        "  Reclaimable:    {} ({})",
        stats.reclaimable_entries.to_string().green(),
        format_bytes(stats.reclaimable_bytes)
    );

    Ok(())
}
