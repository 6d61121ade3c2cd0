//! Command-line inputs: files are taken as given, directories are expanded.

use std::path::{Path, PathBuf};

use tracing::warn;

pub const IMAGE_EXTENSIONS: &[&str] = &["fits", "fit", "fz"];
pub const CATALOG_EXTENSIONS: &[&str] = &["cat"];

/// Files directly inside `dir` with one of `extensions`, sorted by name.
pub fn collect_files(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Unable to list {}: {e}", dir.display());
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_ascii_lowercase())
                    .is_some_and(|e| extensions.contains(&e.as_str()))
        })
        .collect();
    files.sort();
    files
}

/// Expand every directory in `paths` in place, keeping the given order.
pub fn expand(paths: &[PathBuf], extensions: &[&str]) -> Vec<PathBuf> {
    paths
        .iter()
        .flat_map(|p| {
            if p.is_dir() {
                collect_files(p, extensions)
            } else {
                vec![p.clone()]
            }
        })
        .collect()
}
