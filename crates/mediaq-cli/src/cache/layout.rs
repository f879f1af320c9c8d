//! On-disk layout of the working cache
//!
//! ```text
//! <root>/
//!   source/        resolved inputs (downloads or mirror links)
//!   audio/         Convert outputs (.m4a)
//!   transcripts/   Transcribe outputs (.txt)
//!   summaries/     Summarize outputs (.md)
//!   .tmp/          staging area, same filesystem as the targets
//!   .keys/         remote ids behind hashed file names
//!   .index.json    ledger index
//! ```
//!
//! Every write lands in `.tmp/` first and is renamed into place, so a
//! crash never leaves a truncated file under a final name.
//!
//! File names are the URL-safe base64 of the remote id. Ids whose encoding
//! would not fit a file name use `~<sha256 hex>` instead, and the id itself
//! is kept under `.keys/<sha256 hex>` so a rescan can still map it back.

use mediaq_common::checksum::compute_checksum;
use mediaq_common::types::{decode_file_key, encode_file_key};
use mediaq_common::{RemoteObjectRef, Stage};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const SOURCE_DIR: &str = "source";
pub const TMP_DIR: &str = ".tmp";
pub const KEYS_DIR: &str = ".keys";
pub const INDEX_FILE: &str = ".index.json";

/// Longest encoded key used verbatim; leaves room for an extension under
/// the usual 255-byte file name limit
const MAX_ENCODED_KEY_LEN: usize = 200;
/// Longer display-name extensions are dropped from input file names
const MAX_EXTENSION_LEN: usize = 16;
const HASHED_KEY_PREFIX: char = '~';

#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join(TMP_DIR)
    }

    pub fn source_dir(&self) -> PathBuf {
        self.root.join(SOURCE_DIR)
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.root.join(KEYS_DIR)
    }

    /// Directory for a stage's artifacts; `None` for the input directory
    pub fn dir_for(&self, stage: Option<Stage>) -> PathBuf {
        match stage.and_then(|s| s.artifact_dir()) {
            Some(dir) => self.root.join(dir),
            None => self.source_dir(),
        }
    }

    /// Create every directory of the layout
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(self.tmp_dir())?;
        std::fs::create_dir_all(self.keys_dir())?;
        std::fs::create_dir_all(self.source_dir())?;
        for stage in Stage::ALL {
            if stage.produces_artifact() {
                std::fs::create_dir_all(self.dir_for(Some(stage)))?;
            }
        }
        Ok(())
    }

    /// Where a resolved input lives: `source/<key>.<ext of display name>`
    pub fn input_path(&self, object: &RemoteObjectRef) -> PathBuf {
        let key = file_key(&object.remote_id);
        let name = match object.extension() {
            Some(ext) if ext.len() <= MAX_EXTENSION_LEN => format!("{}.{}", key, ext),
            _ => key,
        };
        self.source_dir().join(name)
    }

    /// Where a stage's output for `remote_id` lives
    pub fn artifact_path(&self, stage: Stage, remote_id: &str) -> Option<PathBuf> {
        let ext = stage.artifact_extension()?;
        let name = format!("{}.{}", file_key(remote_id), ext);
        Some(self.dir_for(Some(stage)).join(name))
    }

    /// Keep the remote id behind a hashed file name; no-op for short ids
    pub fn remember_key(&self, remote_id: &str) -> io::Result<()> {
        let key = file_key(remote_id);
        let Some(digest) = key.strip_prefix(HASHED_KEY_PREFIX) else {
            return Ok(());
        };
        let dest = self.keys_dir().join(digest);
        if dest.exists() {
            return Ok(());
        }
        std::fs::create_dir_all(self.keys_dir())?;
        self.write_atomic(&dest, remote_id.as_bytes())
    }

    /// A fresh staging path keeping `ext`, for tools that infer format from
    /// the file name
    pub fn staging_path(&self, ext: Option<&str>) -> PathBuf {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let name = match ext {
            Some(ext) => format!("{}.{}", id, ext),
            None => id,
        };
        self.tmp_dir().join(name)
    }

    /// Atomically write `bytes` to `dest`
    pub fn write_atomic(&self, dest: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut tmp = NamedTempFile::new_in(self.tmp_dir())?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(dest).map_err(|e| e.error)?;
        Ok(())
    }

    /// Move a finished staging file into its final place
    pub fn commit(&self, staged: &Path, dest: &Path) -> io::Result<()> {
        std::fs::rename(staged, dest)
    }

    /// Atomically place a link at `dest` pointing to `target`
    pub fn link_atomic(&self, target: &Path, dest: &Path) -> io::Result<()> {
        let staged = self.staging_path(None);
        symlink_file(target, &staged)?;
        if let Err(e) = std::fs::rename(&staged, dest) {
            let _ = std::fs::remove_file(&staged);
            return Err(e);
        }
        Ok(())
    }

    /// Recover `(remote_id, stage)` from a path inside the layout
    pub fn classify(&self, path: &Path) -> Option<(String, Option<Stage>)> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let mut components = relative.components();
        let dir = components.next()?.as_os_str().to_str()?;
        let file = components.next()?.as_os_str().to_str()?;
        if components.next().is_some() {
            return None;
        }

        let stage = match dir {
            SOURCE_DIR => None,
            other => Some(Stage::from_artifact_dir(other)?),
        };
        let stem = file.split('.').next()?;
        let remote_id = match stem.strip_prefix(HASHED_KEY_PREFIX) {
            Some(digest) => std::fs::read_to_string(self.keys_dir().join(digest)).ok()?,
            None => decode_file_key(stem).ok()?,
        };
        Some((remote_id, stage))
    }
}

/// File name stem for a remote id
fn file_key(remote_id: &str) -> String {
    let encoded = encode_file_key(remote_id);
    if encoded.len() <= MAX_ENCODED_KEY_LEN {
        encoded
    } else {
        format!("{}{}", HASHED_KEY_PREFIX, compute_checksum(remote_id.as_bytes()))
    }
}

#[cfg(unix)]
fn symlink_file(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_file(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout() -> (CacheLayout, TempDir) {
        let temp = TempDir::new().unwrap();
        let layout = CacheLayout::new(temp.path().join("cache"));
        layout.ensure().unwrap();
        (layout, temp)
    }

    #[test]
    fn test_ensure_creates_stage_dirs() {
        let (layout, _temp) = layout();
        assert!(layout.source_dir().is_dir());
        assert!(layout.root().join("audio").is_dir());
        assert!(layout.root().join("transcripts").is_dir());
        assert!(layout.root().join("summaries").is_dir());
        assert!(layout.tmp_dir().is_dir());
    }

    #[test]
    fn test_paths_classify_back() {
        let (layout, _temp) = layout();
        let object = RemoteObjectRef::new("talks/2024/keynote.mp4", "keynote.mp4");

        let input = layout.input_path(&object);
        assert!(input.to_string_lossy().ends_with(".mp4"));
        assert_eq!(
            layout.classify(&input),
            Some((object.remote_id.clone(), None))
        );

        let transcript = layout
            .artifact_path(Stage::Transcribe, &object.remote_id)
            .unwrap();
        assert_eq!(
            layout.classify(&transcript),
            Some((object.remote_id.clone(), Some(Stage::Transcribe)))
        );
        assert!(layout.artifact_path(Stage::Publish, "x").is_none());
        assert!(layout.classify(&layout.index_path()).is_none());
    }

    #[test]
    fn test_long_remote_ids_get_short_names_that_classify_back() {
        let (layout, _temp) = layout();
        let remote_id = format!("archive/{}/talk.mp4", "x".repeat(300));
        let object = RemoteObjectRef::new(remote_id.clone(), "talk.mp4");

        let input = layout.input_path(&object);
        let name = input.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.len() <= 255, "{} bytes", name.len());
        assert!(name.starts_with('~'));
        assert!(name.ends_with(".mp4"));

        // Unmapped hashed names cannot be classified
        assert!(layout.classify(&input).is_none());
        layout.remember_key(&remote_id).unwrap();
        assert_eq!(layout.classify(&input), Some((remote_id.clone(), None)));

        let summary = layout.artifact_path(Stage::Summarize, &remote_id).unwrap();
        assert!(summary.file_name().unwrap().len() <= 255);
        assert_eq!(
            layout.classify(&summary),
            Some((remote_id, Some(Stage::Summarize)))
        );
    }

    #[test]
    fn test_short_remote_ids_need_no_key_file() {
        let (layout, _temp) = layout();
        layout.remember_key("talks/keynote.mp4").unwrap();
        assert_eq!(std::fs::read_dir(layout.keys_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_write_atomic_leaves_no_staging_files() {
        let (layout, _temp) = layout();
        let dest = layout.source_dir().join("out.bin");
        layout.write_atomic(&dest, b"payload").unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
        assert_eq!(std::fs::read_dir(layout.tmp_dir()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_link_atomic_references_target() {
        let (layout, temp) = layout();
        let target = temp.path().join("original.mp4");
        std::fs::write(&target, b"video").unwrap();

        let dest = layout.source_dir().join("linked.mp4");
        layout.link_atomic(&target, &dest).unwrap();

        let meta = std::fs::symlink_metadata(&dest).unwrap();
        assert!(meta.file_type().is_symlink());
        assert_eq!(std::fs::read(&dest).unwrap(), b"video");
    }
}
