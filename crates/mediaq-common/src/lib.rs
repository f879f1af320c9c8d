//! Mediaq Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the Mediaq workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`MediaqError`] and the [`Result`] alias
//! - **Checksums**: content hashing used for publish deduplication
//! - **Logging**: `tracing` subscriber setup shared by every binary
//! - **Types**: pipeline stages, task statuses, remote object references
//!
//! # Example
//!
//! ```no_run
//! use mediaq_common::checksum::compute_file_checksum;
//! use mediaq_common::Result;
//!
//! fn hash_artifact(path: &str) -> Result<()> {
//!     let digest = compute_file_checksum(path)?;
//!     println!("content hash: {}", digest);
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{MediaqError, Result};
pub use types::{CacheOrigin, RemoteObjectRef, Stage, TaskStatus};
