//! Common types used across Mediaq

use crate::error::{MediaqError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

// ============================================================================
// Pipeline Types
// ============================================================================

/// One step of the fixed transformation pipeline.
///
/// The derived `Ord` follows pipeline order: `Convert < Transcribe <
/// Summarize < Publish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Extract the audio track of a media file
    Convert,
    /// Produce a text transcript of the audio
    Transcribe,
    /// Produce a summary of the transcript
    Summarize,
    /// Upload derived artifacts back to the remote store
    Publish,
}

impl Stage {
    /// All stages in pipeline order
    pub const ALL: [Stage; 4] = [
        Stage::Convert,
        Stage::Transcribe,
        Stage::Summarize,
        Stage::Publish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Convert => "convert",
            Stage::Transcribe => "transcribe",
            Stage::Summarize => "summarize",
            Stage::Publish => "publish",
        }
    }

    /// Whether this stage writes a derived artifact into the cache
    pub fn produces_artifact(&self) -> bool {
        !matches!(self, Stage::Publish)
    }

    /// File extension of the artifact this stage produces
    pub fn artifact_extension(&self) -> Option<&'static str> {
        match self {
            Stage::Convert => Some("m4a"),
            Stage::Transcribe => Some("txt"),
            Stage::Summarize => Some("md"),
            Stage::Publish => None,
        }
    }

    /// Cache subdirectory holding this stage's artifacts
    pub fn artifact_dir(&self) -> Option<&'static str> {
        match self {
            Stage::Convert => Some("audio"),
            Stage::Transcribe => Some("transcripts"),
            Stage::Summarize => Some("summaries"),
            Stage::Publish => None,
        }
    }

    /// Reverse lookup of [`Stage::artifact_dir`]
    pub fn from_artifact_dir(dir: &str) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.artifact_dir() == Some(dir))
    }

    /// Sort and deduplicate a stage list into pipeline order
    pub fn normalize(stages: &[Stage]) -> Vec<Stage> {
        let mut ordered = stages.to_vec();
        ordered.sort();
        ordered.dedup();
        ordered
    }

    /// Parse a comma separated stage list such as `convert,transcribe`
    pub fn parse_list(input: &str) -> Result<Vec<Stage>> {
        let stages = input
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<Stage>>>()?;
        Ok(Stage::normalize(&stages))
    }
}

impl std::str::FromStr for Stage {
    type Err = MediaqError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "convert" => Ok(Stage::Convert),
            "transcribe" => Ok(Stage::Transcribe),
            "summarize" | "summarise" => Ok(Stage::Summarize),
            "publish" => Ok(Stage::Publish),
            _ => Err(MediaqError::UnknownStage(s.to_string())),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    /// Non-retriable failure, no retry budget consumed
    Failed,
    /// Retry budget used up
    Exhausted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Exhausted => "exhausted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Exhausted
        )
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = MediaqError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "succeeded" => Ok(TaskStatus::Succeeded),
            "failed" => Ok(TaskStatus::Failed),
            "exhausted" => Ok(TaskStatus::Exhausted),
            _ => Err(MediaqError::UnknownStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Cache Types
// ============================================================================

/// How a cached file came to exist locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOrigin {
    /// Bytes fetched from the remote store (or produced by a stage)
    LocalDownload,
    /// Link into the synchronized mirror, no second copy
    MirrorReference,
}

impl std::fmt::Display for CacheOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheOrigin::LocalDownload => write!(f, "download"),
            CacheOrigin::MirrorReference => write!(f, "mirror"),
        }
    }
}

/// Identifies a file in the remote store. Never mutated once discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObjectRef {
    /// Opaque, stable identifier in the remote store
    pub remote_id: String,
    /// File name as shown by the remote store
    pub display_name: String,
    /// Size reported by the remote store, used for sanity checks
    pub expected_size_bytes: Option<u64>,
    /// Relative path of the file inside the synchronized mirror, if known
    pub path_hint: Option<String>,
}

impl RemoteObjectRef {
    pub fn new(remote_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            display_name: display_name.into(),
            expected_size_bytes: None,
            path_hint: None,
        }
    }

    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size_bytes = Some(size);
        self
    }

    pub fn with_path_hint(mut self, hint: impl Into<String>) -> Self {
        self.path_hint = Some(hint.into());
        self
    }

    /// Extension of the display name, lowercased (`"mp4"` for `talk.MP4`)
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.display_name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
    }
}

/// Encode a remote id into a file stem that survives any filesystem.
///
/// The encoding is reversible so the cache index can be rebuilt from a
/// directory listing.
pub fn encode_file_key(remote_id: &str) -> String {
    URL_SAFE_NO_PAD.encode(remote_id.as_bytes())
}

/// Inverse of [`encode_file_key`]
pub fn decode_file_key(stem: &str) -> Result<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(stem)
        .map_err(|_| MediaqError::InvalidFileKey(stem.to_string()))?;
    String::from_utf8(bytes).map_err(|_| MediaqError::InvalidFileKey(stem.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_follows_pipeline() {
        assert!(Stage::Convert < Stage::Transcribe);
        assert!(Stage::Transcribe < Stage::Summarize);
        assert!(Stage::Summarize < Stage::Publish);
    }

    #[test]
    fn test_parse_list_sorts_and_dedups() {
        let stages = Stage::parse_list("publish, convert,convert,summarize").unwrap();
        assert_eq!(stages, vec![Stage::Convert, Stage::Summarize, Stage::Publish]);
        assert!(Stage::parse_list("convert,explode").is_err());
    }

    #[test]
    fn test_artifact_dir_round_trip() {
        for stage in Stage::ALL {
            match stage.artifact_dir() {
                Some(dir) => assert_eq!(Stage::from_artifact_dir(dir), Some(stage)),
                None => assert!(!stage.produces_artifact()),
            }
        }
        assert_eq!(Stage::from_artifact_dir("source"), None);
    }

    #[test]
    fn test_status_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Exhausted.is_terminal());
        assert_eq!("exhausted".parse::<TaskStatus>().unwrap(), TaskStatus::Exhausted);
    }

    #[test]
    fn test_file_key_handles_paths() {
        let id = "lectures/2024/Grinevich talk.mp4";
        let key = encode_file_key(id);
        assert!(!key.contains('/'));
        assert_eq!(decode_file_key(&key).unwrap(), id);
        assert!(decode_file_key("not base64 !").is_err());
    }

    #[test]
    fn test_remote_ref_extension() {
        let object = RemoteObjectRef::new("1AbC", "Session 3.MP4").with_expected_size(42);
        assert_eq!(object.extension().as_deref(), Some("mp4"));
        assert_eq!(object.expected_size_bytes, Some(42));
        assert_eq!(RemoteObjectRef::new("x", "noext").extension(), None);
    }
}
