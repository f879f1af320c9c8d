//! Configuration management for Mediaq
//!
//! Defaults, overlaid by a TOML file, overlaid by `MEDIAQ_*` environment
//! variables (a `.env` file is honoured). Every section can be omitted.

use crate::error::{CliError, Result};
use crate::queue::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Days an untouched entry is kept before it becomes evictable.
pub const DEFAULT_RETENTION_DAYS: u64 = 7;

/// Directory depth searched under each mirror root.
pub const DEFAULT_MIRROR_MAX_DEPTH: usize = 8;

/// Worker pool size.
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;

/// Retries after the first attempt of a stage.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Backoff before the first retry; doubles per attempt.
pub const DEFAULT_BASE_DELAY_SECS: u64 = 5;

/// Upper bound on a single backoff delay.
pub const DEFAULT_MAX_DELAY_SECS: u64 = 600;

/// Deadline handed to every stage execution (30 minutes).
pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 1800;

/// Request timeout for HTTP transformation services (5 minutes).
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// Default endpoint of the transcription service.
pub const DEFAULT_TRANSCRIBE_URL: &str = "http://localhost:8080/transcribe";

/// Default endpoint of the summarization service.
pub const DEFAULT_SUMMARIZE_URL: &str = "http://localhost:8080/summarize";

/// File name of the status database inside the cache root.
pub const STATUS_DB_FILE: &str = ".status.db";

/// Full configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub mirror: MirrorConfig,
    pub remote: RemoteConfig,
    pub queue: QueueSettings,
    pub status: StatusConfig,
    pub transform: TransformSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Working cache directory
    pub root: PathBuf,
    pub retention_days: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let root = dirs::cache_dir()
            .map(|dir| dir.join("mediaq"))
            .unwrap_or_else(|| PathBuf::from(".mediaq-cache"));

        Self {
            root,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl CacheConfig {
    pub fn retention(&self) -> Result<chrono::Duration> {
        crate::cache::days_to_duration(self.retention_days).ok_or_else(|| {
            CliError::config(format!(
                "cache.retention_days {} is out of range",
                self.retention_days
            ))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Mount point of the synchronized mirror; `None` disables mirror lookups
    pub root: Option<PathBuf>,
    /// Folders (relative to `root`) searched recursively; empty means `root`
    pub search_roots: Vec<PathBuf>,
    pub max_depth: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            root: None,
            search_roots: Vec::new(),
            max_depth: DEFAULT_MIRROR_MAX_DEPTH,
        }
    }
}

/// Remote object store backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RemoteConfig {
    /// A directory standing in for the drive
    Fs { root: PathBuf },
    /// S3 compatible bucket
    S3 {
        bucket: String,
        #[serde(default = "default_s3_region")]
        region: String,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        access_key: Option<String>,
        #[serde(default)]
        secret_key: Option<String>,
        #[serde(default)]
        path_style: bool,
    },
}

fn default_s3_region() -> String {
    DEFAULT_S3_REGION.to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig::Fs {
            root: PathBuf::from("remote"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub stage_timeout_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_secs: DEFAULT_BASE_DELAY_SECS,
            max_delay_secs: DEFAULT_MAX_DELAY_SECS,
            stage_timeout_secs: DEFAULT_STAGE_TIMEOUT_SECS,
        }
    }
}

impl QueueSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_secs(self.base_delay_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// SQLite file; defaults to `<cache root>/.status.db`
    pub database: Option<PathBuf>,
}

/// How one stage reaches its transformation service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransformConfig {
    /// Local program; `{input}` and `{output}` in `args` are substituted
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        /// stderr fragments that mark the input as unusable
        #[serde(default = "default_fatal_markers")]
        fatal_markers: Vec<String>,
    },
    /// Remote service receiving the input bytes in a POST body
    Http {
        url: String,
        #[serde(default = "default_http_timeout")]
        timeout_secs: u64,
        /// Environment variable holding a bearer token
        #[serde(default)]
        api_key_env: Option<String>,
    },
}

fn default_fatal_markers() -> Vec<String> {
    vec![
        "Invalid data found".to_string(),
        "does not contain any stream".to_string(),
        "Unsupported".to_string(),
    ]
}

fn default_http_timeout() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformSettings {
    pub convert: TransformConfig,
    pub transcribe: TransformConfig,
    pub summarize: TransformConfig,
}

impl Default for TransformSettings {
    fn default() -> Self {
        Self {
            convert: TransformConfig::Command {
                program: "ffmpeg".to_string(),
                args: ["-y", "-i", "{input}", "-vn", "-acodec", "copy", "{output}"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                fatal_markers: default_fatal_markers(),
            },
            transcribe: TransformConfig::Http {
                url: DEFAULT_TRANSCRIBE_URL.to_string(),
                timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
                api_key_env: None,
            },
            summarize: TransformConfig::Http {
                url: DEFAULT_SUMMARIZE_URL.to_string(),
                timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
                api_key_env: None,
            },
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mediaq").join("config.toml"))
    }

    /// Load configuration.
    ///
    /// An explicit `path` (or `MEDIAQ_CONFIG`) must exist; the default
    /// location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("MEDIAQ_CONFIG").ok().map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(CliError::config(format!(
                        "config file '{}' does not exist",
                        path.display()
                    )));
                }
                Self::from_file(&path)?
            },
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Apply `MEDIAQ_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("MEDIAQ_CACHE_DIR") {
            self.cache.root = PathBuf::from(dir);
        }
        if let Some(days) = env_number("MEDIAQ_RETENTION_DAYS")? {
            self.cache.retention_days = days;
        }
        if let Ok(root) = std::env::var("MEDIAQ_MIRROR_ROOT") {
            self.mirror.root = Some(PathBuf::from(root));
        }
        if let Some(n) = env_number("MEDIAQ_MAX_CONCURRENCY")? {
            self.queue.max_concurrency = n;
        }
        if let Some(n) = env_number("MEDIAQ_MAX_RETRIES")? {
            self.queue.max_retries = n;
        }
        if let Ok(db) = std::env::var("MEDIAQ_STATUS_DB") {
            self.status.database = Some(PathBuf::from(db));
        }

        match std::env::var("MEDIAQ_REMOTE_KIND").ok().as_deref() {
            Some("fs") => {
                let root = std::env::var("MEDIAQ_REMOTE_ROOT")
                    .map_err(|_| CliError::config("MEDIAQ_REMOTE_KIND=fs requires MEDIAQ_REMOTE_ROOT"))?;
                self.remote = RemoteConfig::Fs {
                    root: PathBuf::from(root),
                };
            },
            Some("s3") => {
                let bucket = std::env::var("MEDIAQ_S3_BUCKET")
                    .map_err(|_| CliError::config("MEDIAQ_REMOTE_KIND=s3 requires MEDIAQ_S3_BUCKET"))?;
                self.remote = RemoteConfig::S3 {
                    bucket,
                    region: std::env::var("MEDIAQ_S3_REGION").unwrap_or_else(|_| default_s3_region()),
                    endpoint: std::env::var("MEDIAQ_S3_ENDPOINT").ok(),
                    access_key: std::env::var("MEDIAQ_S3_ACCESS_KEY").ok(),
                    secret_key: std::env::var("MEDIAQ_S3_SECRET_KEY").ok(),
                    path_style: std::env::var("MEDIAQ_S3_PATH_STYLE")
                        .ok()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(false),
                };
            },
            Some(other) => {
                return Err(CliError::config(format!(
                    "unknown MEDIAQ_REMOTE_KIND '{}', expected 'fs' or 's3'",
                    other
                )))
            },
            None => {
                if let (RemoteConfig::Fs { root }, Ok(dir)) =
                    (&mut self.remote, std::env::var("MEDIAQ_REMOTE_ROOT"))
                {
                    *root = PathBuf::from(dir);
                }
            },
        }

        Ok(())
    }

    /// Reject values the queue or cache cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.queue.max_concurrency == 0 {
            return Err(CliError::config("queue.max_concurrency must be at least 1"));
        }
        self.cache.retention()?;
        if self.queue.stage_timeout_secs == 0 {
            return Err(CliError::config("queue.stage_timeout_secs must be positive"));
        }
        if self.queue.base_delay_secs > self.queue.max_delay_secs {
            return Err(CliError::config(
                "queue.base_delay_secs must not exceed queue.max_delay_secs",
            ));
        }
        if let RemoteConfig::S3 { bucket, .. } = &self.remote {
            if bucket.trim().is_empty() {
                return Err(CliError::config("remote.bucket must not be empty"));
            }
        }
        for (stage, transform) in [
            ("convert", &self.transform.convert),
            ("transcribe", &self.transform.transcribe),
            ("summarize", &self.transform.summarize),
        ] {
            match transform {
                TransformConfig::Command { program, .. } if program.trim().is_empty() => {
                    return Err(CliError::config(format!(
                        "transform.{}.program must not be empty",
                        stage
                    )));
                },
                TransformConfig::Http { url, .. } if !url.starts_with("http") => {
                    return Err(CliError::config(format!(
                        "transform.{}.url must be an http(s) URL",
                        stage
                    )));
                },
                _ => {},
            }
        }
        Ok(())
    }

    /// Resolved path of the status database
    pub fn status_db_path(&self) -> PathBuf {
        self.status
            .database
            .clone()
            .unwrap_or_else(|| self.cache.root.join(STATUS_DB_FILE))
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CliError::config(format!("{} must be a number, got '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.queue.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.cache.retention().unwrap(), chrono::Duration::days(7));
        assert!(config.mirror.root.is_none());
        assert_eq!(
            config.status_db_path(),
            config.cache.root.join(STATUS_DB_FILE)
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [cache]
            root = "/srv/mediaq"

            [queue]
            max_retries = 5

            [remote]
            kind = "s3"
            bucket = "lectures"

            [transform.transcribe]
            kind = "command"
            program = "whisper"
            args = ["{input}", "--output", "{output}"]
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.root, PathBuf::from("/srv/mediaq"));
        assert_eq!(config.cache.retention_days, DEFAULT_RETENTION_DAYS);
        assert_eq!(config.queue.max_retries, 5);
        assert_eq!(config.queue.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert!(matches!(
            config.remote,
            RemoteConfig::S3 { ref bucket, ref region, .. } if bucket == "lectures" && region == DEFAULT_S3_REGION
        ));
        match &config.transform.transcribe {
            TransformConfig::Command { program, fatal_markers, .. } => {
                assert_eq!(program, "whisper");
                assert!(!fatal_markers.is_empty());
            },
            other => panic!("unexpected transform: {:?}", other),
        }
        assert_eq!(config.transform.summarize, TransformSettings::default().summarize);
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        let mut config = Config::default();
        config.queue.max_concurrency = 0;
        assert!(matches!(config.validate(), Err(CliError::Config(_))));
    }

    #[test]
    fn test_validation_rejects_unrepresentable_retention() {
        let mut config = Config::default();
        config.cache.retention_days = u64::MAX / 2;
        assert!(matches!(config.validate(), Err(CliError::Config(_))));
        assert!(config.cache.retention().is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_backoff() {
        let mut config = Config::default();
        config.queue.base_delay_secs = 100;
        config.queue.max_delay_secs = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_policy_from_settings() {
        let settings = QueueSettings {
            max_retries: 2,
            base_delay_secs: 1,
            ..QueueSettings::default()
        };
        let policy = settings.retry_policy();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = Config::load(Some(Path::new("/nonexistent/mediaq.toml")));
        assert!(matches!(result, Err(CliError::Config(_))));
    }
}
