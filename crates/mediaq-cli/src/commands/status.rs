//! `mediaq status` command implementation
//!
//! Shows one task group stage by stage, or a list of recent groups.

use super::open_service;
use crate::error::{CliError, Result};
use crate::progress::format_age;
use crate::queue::GroupStatus;
use chrono::Utc;
use colored::{ColoredString, Colorize};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use mediaq_common::TaskStatus;
use std::path::Path;
use uuid::Uuid;

pub async fn run(config_path: Option<&Path>, group_id: Option<&str>, limit: usize) -> Result<()> {
    let service = open_service(config_path).await?;

    let result = match group_id {
        Some(raw) => {
            let id = Uuid::parse_str(raw)
                .map_err(|_| CliError::invalid_input(format!("'{}' is not a task group id", raw)))?;
            service.query_status(id).await.map(|status| print_group(&status))
        },
        None => service.recent_groups(limit).await.map(|groups| print_groups(&groups)),
    };

    service.close().await?;
    result
}

fn colored_status(status: TaskStatus) -> ColoredString {
    match status {
        TaskStatus::Pending => status.as_str().yellow(),
        TaskStatus::Running => status.as_str().cyan(),
        TaskStatus::Succeeded => status.as_str().green(),
        TaskStatus::Failed | TaskStatus::Exhausted => status.as_str().red(),
    }
}

/// Per-stage table for one group
pub(crate) fn print_group(status: &GroupStatus) {
    let group = &status.group;
    println!("{} {}", "Task group".cyan().bold(), group.id);
    println!("  Object:   {} ({})", group.object.remote_id, group.object.display_name);
    if let Some(description) = &group.description {
        println!("  About:    {}", description);
    }
    println!("  Priority: {}", group.priority);
    println!("  Status:   {}", colored_status(status.overall()));
    println!();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Stage", "Status", "Attempts", "Next retry", "Last error"]);

    for (stage, task) in status.stage_statuses() {
        match task {
            Some(task) => table.add_row(vec![
                stage.to_string(),
                task.status.to_string(),
                task.attempt_count.to_string(),
                task.next_retry_at
                    .map(|at| at.format("%H:%M:%S").to_string())
                    .unwrap_or_default(),
                task.last_error.clone().unwrap_or_default(),
            ]),
            None => table.add_row(vec![
                stage.to_string(),
                "not started".to_string(),
                String::new(),
                String::new(),
                String::new(),
            ]),
        };
    }

    println!("{}", table);
}

fn print_groups(groups: &[GroupStatus]) {
    if groups.is_empty() {
        println!("No task groups found.");
        println!("Run 'mediaq submit <REMOTE_ID>' to create one.");
        return;
    }

    let now = Utc::now();
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Group", "Object", "Stages", "Priority", "Status", "Age"]);

    for status in groups {
        let group = &status.group;
        let stages = group
            .stages
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(",");
        table.add_row(vec![
            group.id.to_string(),
            group.object.remote_id.clone(),
            stages,
            group.priority.to_string(),
            status.overall().to_string(),
            format_age(now - group.created_at),
        ]);
    }

    println!("{}", table);
}
