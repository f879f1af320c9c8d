//! Transformation services and the stage result contract
//!
//! A stage function classifies its own failures. [`StageError`] is the
//! only signal the queue reads: `Retriable` consumes retry budget, `Fatal`
//! ends the task immediately.

pub mod command;
pub mod http;

pub use command::CommandTransformer;
pub use http::HttpTransformer;

use crate::config::{TransformConfig, TransformSettings};
use crate::error::CliError;
use async_trait::async_trait;
use mediaq_common::Stage;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// A later attempt may succeed (timeout, rate limit, transient I/O)
    #[error("{0}")]
    Retriable(String),

    /// No attempt will ever succeed (missing input, malformed media)
    #[error("{0}")]
    Fatal(String),
}

impl StageError {
    pub fn retriable(msg: impl Into<String>) -> Self {
        Self::Retriable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, StageError::Retriable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            StageError::Retriable(msg) | StageError::Fatal(msg) => msg,
        }
    }
}

impl From<CliError> for StageError {
    fn from(err: CliError) -> Self {
        if err.is_retriable() {
            StageError::Retriable(err.to_string())
        } else {
            StageError::Fatal(err.to_string())
        }
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        StageError::from(CliError::Io(err))
    }
}

pub type StageResult<T = ()> = std::result::Result<T, StageError>;

/// One external transformation: read `input`, write `output`
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(&self, input: &Path, output: &Path) -> StageResult;
}

/// Transformer per derived stage
#[derive(Clone)]
pub struct Transformers {
    pub convert: Arc<dyn Transformer>,
    pub transcribe: Arc<dyn Transformer>,
    pub summarize: Arc<dyn Transformer>,
}

impl Transformers {
    pub fn from_settings(settings: &TransformSettings) -> crate::error::Result<Self> {
        Ok(Self {
            convert: build(&settings.convert)?,
            transcribe: build(&settings.transcribe)?,
            summarize: build(&settings.summarize)?,
        })
    }

    pub fn for_stage(&self, stage: Stage) -> Option<&Arc<dyn Transformer>> {
        match stage {
            Stage::Convert => Some(&self.convert),
            Stage::Transcribe => Some(&self.transcribe),
            Stage::Summarize => Some(&self.summarize),
            Stage::Publish => None,
        }
    }
}

fn build(config: &TransformConfig) -> crate::error::Result<Arc<dyn Transformer>> {
    let transformer: Arc<dyn Transformer> = match config {
        TransformConfig::Command {
            program,
            args,
            fatal_markers,
        } => Arc::new(CommandTransformer::new(
            program.clone(),
            args.clone(),
            fatal_markers.clone(),
        )),
        TransformConfig::Http {
            url,
            timeout_secs,
            api_key_env,
        } => {
            let api_key = api_key_env.as_deref().and_then(|var| std::env::var(var).ok());
            Arc::new(HttpTransformer::new(
                url.clone(),
                std::time::Duration::from_secs(*timeout_secs),
                api_key,
            )?)
        },
    };
    Ok(transformer)
}
