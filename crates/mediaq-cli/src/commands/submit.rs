//! `mediaq submit` command implementation
//!
//! Creates a task group. Without `--wait` the group is saved as pending
//! for a later `mediaq run`.

use super::open_service;
use crate::error::{CliError, Result};
use crate::progress::create_spinner;
use crate::service::SubmitOptions;
use mediaq_common::Stage;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct SubmitArgs {
    pub remote_id: String,
    pub name: Option<String>,
    pub path_hint: Option<String>,
    pub size: Option<u64>,
    pub stages: String,
    pub description: Option<String>,
    pub priority: i32,
    pub wait: bool,
}

pub async fn run(config_path: Option<&Path>, args: SubmitArgs) -> Result<()> {
    let stages = Stage::parse_list(&args.stages)?;
    if stages.is_empty() {
        return Err(CliError::invalid_input(
            "--stages must name at least one of convert, transcribe, summarize, publish",
        ));
    }

    let service = open_service(config_path).await?;
    let object = service
        .object_ref(&args.remote_id, args.name, args.path_hint, args.size)
        .await?;
    let options = SubmitOptions {
        description: args.description,
        priority: args.priority,
    };

    if !args.wait {
        let group_id = service.plan(object, &stages, options).await?;
        service.close().await?;
        println!("{}", group_id);
        return Ok(());
    }

    service.queue().start().await;
    let group_id = service.submit(object, &stages, options).await?;

    let spinner = create_spinner(&format!("Processing {}", args.remote_id));
    service.queue().wait_idle().await;
    spinner.finish_and_clear();

    let status = service.query_status(group_id).await?;
    service.close().await?;

    println!("{}", group_id);
    super::status::print_group(&status);

    match status.overall() {
        mediaq_common::TaskStatus::Succeeded => Ok(()),
        other => Err(CliError::invalid_input(format!(
            "task group {} ended {}",
            group_id, other
        ))),
    }
}
