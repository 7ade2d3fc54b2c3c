//! Directory scanner producing a [`CodeSnapshot`].
//!
//! Respects the configured extensions, excludes, file size limit and file
//! count limit. Walk order is sorted so the same tree always yields the
//! same snapshot.

use super::IngestionError;
use crate::config::ScannerConfig;
use crate::models::CodeSnapshot;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

pub struct SnapshotScanner<'a> {
    root: PathBuf,
    config: &'a ScannerConfig,
}

impl<'a> SnapshotScanner<'a> {
    pub fn new(root: impl AsRef<Path>, config: &'a ScannerConfig) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            config,
        }
    }

    /// Read every matching file under the root.
    pub fn capture(&self) -> Result<CodeSnapshot, IngestionError> {
        if !self.root.exists() {
            return Err(IngestionError::MissingDirectory(self.root.clone()));
        }
        if !self.root.is_dir() {
            return Err(IngestionError::NotADirectory(self.root.clone()));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.is_excluded(e));

        for entry in walker {
            if files.len() >= self.config.max_files {
                debug!("Reached max_files limit ({})", self.config.max_files);
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => {
                    return Err(IngestionError::Unreadable {
                        path: self.root.clone(),
                        source: err,
                    })
                }
                Err(err) => {
                    debug!("Skipping unreadable entry: {}", err);
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.matches(entry.path()) {
                continue;
            }

            let rel_path = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");

            match fs::read_to_string(entry.path()) {
                Ok(content) => files.push((rel_path, content)),
                Err(e) => warn!("Failed to read {}: {}", rel_path, e),
            }
        }

        Ok(CodeSnapshot::from_files(files))
    }

    fn matches(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !self.config.extensions.iter().any(|e| e == ext) {
            return false;
        }

        match fs::metadata(path) {
            Ok(metadata) => metadata.len() <= self.config.max_file_size,
            Err(_) => false,
        }
    }

    /// Hidden entries and configured excludes.
    fn is_excluded(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        name.starts_with('.') || self.config.excludes.iter().any(|pattern| name == pattern.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("src/app.py"), "def main():\n    pass\n").unwrap();
        fs::write(root.join("src/nested/util.rs"), "fn util() {}\n").unwrap();
        fs::write(root.join("src/notes.txt"), "not code\n").unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "module.exports = 1;\n").unwrap();
        fs::write(root.join(".git/config.py"), "x = 1\n").unwrap();
        dir
    }

    #[test]
    fn test_scan_filters_extensions_and_excludes() {
        let dir = tree();
        let config = ScannerConfig::default();
        let snapshot = SnapshotScanner::new(dir.path(), &config).capture().unwrap();

        let paths: Vec<&str> = snapshot.iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["src/app.py", "src/nested/util.rs"]);
    }

    #[test]
    fn test_max_files_and_size_limits() {
        let dir = tree();
        let config = ScannerConfig {
            max_files: 1,
            ..Default::default()
        };
        let snapshot = SnapshotScanner::new(dir.path(), &config).capture().unwrap();
        assert_eq!(snapshot.len(), 1);

        let tiny = ScannerConfig {
            max_file_size: 5,
            ..Default::default()
        };
        let snapshot = SnapshotScanner::new(dir.path(), &tiny).capture().unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_file_root_is_rejected() {
        let dir = tree();
        let config = ScannerConfig::default();
        let err = SnapshotScanner::new(dir.path().join("src/app.py"), &config)
            .capture()
            .unwrap_err();
        assert!(matches!(err, IngestionError::NotADirectory(_)));
    }
}
