//! HTTP transformation service client
//!
//! The input file is posted as the request body; a successful response
//! body is the stage output.

use super::{StageError, StageResult, Transformer};
use crate::error::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

/// Header carrying the input's file name
pub const FILE_NAME_HEADER: &str = "x-mediaq-file-name";

pub struct HttpTransformer {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl HttpTransformer {
    pub fn new(url: impl Into<String>, timeout: Duration, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            api_key,
        })
    }
}

/// Rate limits, request timeouts and server errors are worth retrying
fn is_retriable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

#[async_trait]
impl Transformer for HttpTransformer {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn transform(&self, input: &Path, output: &Path) -> StageResult {
        let body = tokio::fs::read(input).await?;
        let file_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(FILE_NAME_HEADER, file_name)
            .body(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StageError::retriable(format!("request to {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let msg = format!("{} returned {}: {}", self.url, status, detail.trim());
            return Err(if is_retriable_status(status) {
                StageError::retriable(msg)
            } else {
                StageError::fatal(msg)
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| StageError::retriable(format!("reading response from {}: {}", self.url, e)))?;
        tokio::fs::write(output, &bytes).await?;

        debug!(bytes = bytes.len(), "Transformation service responded");
        Ok(())
    }
}
