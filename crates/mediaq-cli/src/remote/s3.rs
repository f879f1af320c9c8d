//! S3-compatible remote store
//!
//! Remote ids are object keys and folders are key prefixes.

use super::{join_key, RemoteStore};
use crate::config::RemoteConfig;
use crate::error::{CliError, Result};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};
use mediaq_common::RemoteObjectRef;
use std::path::Path;
use tracing::{debug, info, instrument};

#[derive(Clone)]
pub struct S3RemoteStore {
    client: Client,
    bucket: String,
}

impl S3RemoteStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from the `[remote]` section.
    ///
    /// Keys fall back to `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`.
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let RemoteConfig::S3 {
            bucket,
            region,
            endpoint,
            access_key,
            secret_key,
            path_style,
        } = config
        else {
            return Err(CliError::config("remote.kind is not 's3'"));
        };

        let access_key = access_key
            .clone()
            .or_else(|| std::env::var("AWS_ACCESS_KEY_ID").ok())
            .ok_or_else(|| CliError::config("S3 access key missing (MEDIAQ_S3_ACCESS_KEY)"))?;
        let secret_key = secret_key
            .clone()
            .or_else(|| std::env::var("AWS_SECRET_ACCESS_KEY").ok())
            .ok_or_else(|| CliError::config("S3 secret key missing (MEDIAQ_S3_SECRET_KEY)"))?;

        let credentials = Credentials::new(access_key, secret_key, None, None, "mediaq");

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(region.clone()))
            .force_path_style(*path_style);

        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());
        info!(bucket = %bucket, "S3 remote store initialized");

        Ok(Self::new(client, bucket.clone()))
    }
}

#[async_trait]
impl RemoteStore for S3RemoteStore {
    #[instrument(skip(self))]
    async fn get(&self, remote_id: &str) -> Result<Vec<u8>> {
        debug!("Downloading s3://{}/{}", self.bucket, remote_id);

        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(remote_id)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let err = e.into_service_error();
                if err.is_no_such_key() {
                    return Err(CliError::ObjectNotFound(remote_id.to_string()));
                }
                return Err(CliError::remote(format!(
                    "get '{}': {}",
                    remote_id,
                    DisplayErrorContext(&err)
                )));
            },
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| CliError::remote(format!("reading body of '{}': {}", remote_id, e)))?
            .into_bytes()
            .to_vec();

        debug!(bytes = data.len(), "Downloaded s3://{}/{}", self.bucket, remote_id);
        Ok(data)
    }

    #[instrument(skip(self))]
    async fn put(&self, local_path: &Path, folder: &str, file_name: &str) -> Result<String> {
        let key = join_key(folder, file_name);
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| CliError::upload(format!("reading '{}': {}", local_path.display(), e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .send()
            .await
            .map_err(|e| CliError::upload(format!("put '{}': {}", key, DisplayErrorContext(&e))))?;

        info!("Uploaded s3://{}/{}", self.bucket, key);
        Ok(key)
    }

    #[instrument(skip(self))]
    async fn exists(&self, remote_id: &str) -> Result<bool> {
        Ok(self.describe(remote_id).await?.is_some())
    }

    #[instrument(skip(self))]
    async fn describe(&self, remote_id: &str) -> Result<Option<RemoteObjectRef>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(remote_id)
            .send()
            .await
        {
            Ok(head) => {
                let mut object = RemoteObjectRef::new(remote_id, super::file_name(remote_id));
                if let Some(len) = head.content_length().and_then(|l| u64::try_from(l).ok()) {
                    object = object.with_expected_size(len);
                }
                Ok(Some(object))
            },
            Err(e) => {
                let err = e.into_service_error();
                if err.is_not_found() {
                    Ok(None)
                } else {
                    Err(CliError::remote(format!(
                        "head '{}': {}",
                        remote_id,
                        DisplayErrorContext(&err)
                    )))
                }
            },
        }
    }
}
