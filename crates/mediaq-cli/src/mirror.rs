//! Synchronized mirror lookup
//!
//! The mirror is a locally mounted, read-only copy of part of the remote
//! store. It is advisory: a miss or an unmounted root is never an error,
//! and a size that disagrees with the remote store is only logged.

use crate::config::MirrorConfig;
use mediaq_common::RemoteObjectRef;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct Mirror {
    root: PathBuf,
    search_roots: Vec<PathBuf>,
    max_depth: usize,
}

impl Mirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            search_roots: Vec::new(),
            max_depth: crate::config::DEFAULT_MIRROR_MAX_DEPTH,
        }
    }

    /// `None` when no mirror root is configured
    pub fn from_config(config: &MirrorConfig) -> Option<Self> {
        let root = config.root.clone()?;
        Some(Self {
            root,
            search_roots: config.search_roots.clone(),
            max_depth: config.max_depth,
        })
    }

    pub fn with_search_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.search_roots = roots;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the mirror is currently mounted
    pub fn is_available(&self) -> bool {
        self.root.is_dir()
    }

    /// Find the mirrored copy of `object`, path hint first.
    ///
    /// Returns an absolute path suitable as a link target. Blocking.
    pub fn locate(&self, object: &RemoteObjectRef) -> Option<PathBuf> {
        if !self.is_available() {
            debug!(root = %self.root.display(), "Mirror not mounted");
            return None;
        }

        let found = self
            .from_hint(object)
            .or_else(|| self.search(object))?;

        self.check_size(object, &found);
        std::fs::canonicalize(&found).ok()
    }

    fn from_hint(&self, object: &RemoteObjectRef) -> Option<PathBuf> {
        let hint = Path::new(object.path_hint.as_deref()?);
        if hint.components().any(|c| !matches!(c, Component::Normal(_))) {
            warn!(hint = %hint.display(), "Ignoring mirror path hint outside the mirror root");
            return None;
        }
        let candidate = self.root.join(hint);
        candidate.is_file().then_some(candidate)
    }

    /// Same-named files anywhere under the search roots. With a known size,
    /// the first candidate of that size wins; otherwise the first by name
    /// order.
    fn search(&self, object: &RemoteObjectRef) -> Option<PathBuf> {
        let roots: Vec<PathBuf> = if self.search_roots.is_empty() {
            vec![self.root.clone()]
        } else {
            self.search_roots
                .iter()
                .map(|r| if r.is_absolute() { r.clone() } else { self.root.join(r) })
                .collect()
        };

        let candidates: Vec<walkdir::DirEntry> = roots
            .into_iter()
            .filter(|r| r.is_dir())
            .flat_map(|root| {
                WalkDir::new(root)
                    .max_depth(self.max_depth)
                    .follow_links(false)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file() && e.file_name() == object.display_name.as_str())
            })
            .collect();

        if candidates.len() > 1 {
            debug!(
                name = %object.display_name,
                candidates = candidates.len(),
                "Several mirror files share the display name"
            );
        }

        let sized = object.expected_size_bytes.and_then(|expected| {
            candidates
                .iter()
                .position(|e| e.metadata().is_ok_and(|m| m.len() == expected))
        });
        let index = sized.unwrap_or(0);
        candidates.into_iter().nth(index).map(|e| e.into_path())
    }

    fn check_size(&self, object: &RemoteObjectRef, path: &Path) {
        let (Some(expected), Ok(meta)) = (object.expected_size_bytes, std::fs::metadata(path)) else {
            return;
        };
        if meta.len() != expected {
            warn!(
                remote_id = %object.remote_id,
                path = %path.display(),
                expected,
                actual = meta.len(),
                "Mirror copy size differs from remote store"
            );
        }
    }
}
