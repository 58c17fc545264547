//! Path utilities for test data and scratch directories.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Returns the workspace root directory.
pub fn workspace_root() -> PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    PathBuf::from(manifest_dir)
        .parent() // crates/
        .and_then(|p| p.parent()) // workspace root
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from(manifest_dir))
}

/// Searches for a test file.
///
/// Checks `TEST_DATA_DIR` (if set) and then the `testdata/` directory of the
/// workspace root.
pub fn find_test_file(name: &str) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(test_data_dir) = std::env::var("TEST_DATA_DIR") {
        candidates.push(PathBuf::from(test_data_dir).join(name));
    }
    candidates.push(workspace_root().join("testdata").join(name));
    candidates.into_iter().find(|p| p.exists())
}

/// Fresh temporary directory, removed when dropped.
pub fn scratch_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("grid-reorg-test")
        .tempdir()
        .expect("failed to create temporary directory")
}

/// Creates empty files at `relative` paths below `root`, with parents.
///
/// Returns the created paths in input order.
pub fn touch_files(root: &Path, relative: &[&str]) -> Vec<PathBuf> {
    relative
        .iter()
        .map(|rel| {
            let path = root.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("failed to create parent directory");
            }
            fs::write(&path, b"").expect("failed to create file");
            path
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_root_has_manifest() {
        assert!(workspace_root().join("Cargo.toml").exists());
    }

    #[test]
    fn test_touch_files() {
        let dir = scratch_dir();
        let paths = touch_files(dir.path(), &["ECLIPS2_0_196190/PPT01_196190.nc", "a.nc"]);
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.is_file()));
    }

    #[test]
    fn test_find_missing_file() {
        assert!(find_test_file("definitely_not_here_12345.nc").is_none());
    }
}
