//! Shallow git clones into temporary directories.

use super::IngestionError;
use git2::{FetchOptions, Progress, RemoteCallbacks};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info};

/// A checkout that lives as long as this value.
pub struct ClonedRepo {
    temp_dir: TempDir,
}

impl ClonedRepo {
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}

/// Options for cloning a repository.
#[derive(Debug, Clone)]
pub struct CloneOptions {
    /// Branch to checkout (None for default branch).
    pub branch: Option<String>,
    /// Depth for shallow clone (None for full clone).
    pub depth: Option<i32>,
    pub show_progress: bool,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            branch: None,
            depth: Some(1),
            show_progress: true,
        }
    }
}

/// Clone `url` into a fresh temporary directory.
pub fn clone_repository(url: &str, options: CloneOptions) -> Result<ClonedRepo, IngestionError> {
    info!("Cloning repository: {}", url);

    let temp_dir = TempDir::new().map_err(IngestionError::TempDir)?;
    debug!("Clone target: {}", temp_dir.path().display());

    let progress_bar = if options.show_progress {
        let pb = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        Some(Arc::new(pb))
    } else {
        None
    };

    let pb_clone = progress_bar.clone();
    let mut callbacks = RemoteCallbacks::new();
    callbacks.transfer_progress(move |progress: Progress<'_>| {
        if let Some(ref pb) = pb_clone {
            pb.set_length(progress.total_objects() as u64);
            pb.set_position(progress.received_objects() as u64);
        }
        true
    });

    let mut fetch_opts = FetchOptions::new();
    fetch_opts.remote_callbacks(callbacks);
    if let Some(depth) = options.depth {
        fetch_opts.depth(depth);
    }

    let mut builder = git2::build::RepoBuilder::new();
    builder.fetch_options(fetch_opts);
    if let Some(ref branch) = options.branch {
        builder.branch(branch);
    }

    let result = builder.clone(url, temp_dir.path());

    if let Some(pb) = progress_bar {
        pb.finish_and_clear();
    }

    result.map_err(|source| IngestionError::Clone {
        url: url.to_string(),
        source,
    })?;

    info!("Cloned repository to: {}", temp_dir.path().display());
    Ok(ClonedRepo { temp_dir })
}
