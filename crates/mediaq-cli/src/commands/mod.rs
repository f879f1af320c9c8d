//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod clean;
pub mod config;
pub mod resolve;
pub mod run;
pub mod stats;
pub mod status;
pub mod submit;

use crate::config::Config;
use crate::error::Result;
use crate::service::MediaService;
use std::path::Path;

/// Load configuration and open the service it describes
pub(crate) async fn open_service(config_path: Option<&Path>) -> Result<MediaService> {
    let config = Config::load(config_path)?;
    MediaService::open(&config).await
}
