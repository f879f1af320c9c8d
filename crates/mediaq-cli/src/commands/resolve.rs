//! `mediaq resolve` command implementation

use super::open_service;
use crate::error::Result;
use colored::Colorize;
use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    remote_id: &str,
    name: Option<String>,
    path_hint: Option<String>,
) -> Result<()> {
    let service = open_service(config_path).await?;
    let resolved = match service.object_ref(remote_id, name, path_hint, None).await {
        Ok(object) => service.resolve(&object).await,
        Err(e) => Err(e),
    };
    service.close().await?;
    let resolved = resolved?;

    let how = if resolved.cache_hit {
        "cache".green()
    } else {
        resolved.origin.to_string().yellow()
    };
    println!("{}\t{}", resolved.path.display(), how);
    Ok(())
}
