//! Snapshot ingestion.
//!
//! Turns a git URL or a local directory into an immutable [`CodeSnapshot`]
//! before a run starts. Anything that goes wrong here is fatal for the run.

mod clone;
mod scanner;

pub use clone::{clone_repository, CloneOptions, ClonedRepo};
pub use scanner::SnapshotScanner;

use crate::config::ScannerConfig;
use crate::models::CodeSnapshot;
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("failed to clone {url}: {source}")]
    Clone {
        url: String,
        #[source]
        source: git2::Error,
    },

    #[error("failed to create temporary directory: {0}")]
    TempDir(#[source] std::io::Error),

    #[error("directory does not exist: {0}")]
    MissingDirectory(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("no source files found in {0}")]
    EmptySnapshot(String),

    #[error("ingestion aborted: {0}")]
    Aborted(String),
}

/// Where a snapshot comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Remote { url: String, branch: Option<String> },
    Local(PathBuf),
}

impl Source {
    /// Label used in reports.
    pub fn label(&self) -> String {
        match self {
            Source::Remote { url, .. } => url.clone(),
            Source::Local(path) => path.display().to_string(),
        }
    }
}

/// Capture a snapshot from `source`. A cloned checkout is removed once its
/// files have been read.
pub fn capture(
    source: &Source,
    scanner: &ScannerConfig,
    allow_empty: bool,
    show_progress: bool,
) -> Result<CodeSnapshot, IngestionError> {
    let snapshot = match source {
        Source::Remote { url, branch } => {
            let cloned = clone_repository(
                url,
                CloneOptions {
                    branch: branch.clone(),
                    show_progress,
                    ..Default::default()
                },
            )?;
            SnapshotScanner::new(cloned.path(), scanner).capture()?
        }
        Source::Local(path) => SnapshotScanner::new(path, scanner).capture()?,
    };

    if snapshot.is_empty() && !allow_empty {
        return Err(IngestionError::EmptySnapshot(source.label()));
    }

    info!("Captured {} files from {}", snapshot.len(), source.label());
    Ok(snapshot)
}
