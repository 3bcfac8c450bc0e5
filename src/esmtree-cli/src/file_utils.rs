//! File system utilities for walking converted trees

use anyhow::Result;
use std::path::{Path, PathBuf};

/// Walk files with an exact file name anywhere under `path`
///
/// Calls the handler with the directory holding each match.
pub fn walk_dirs_containing<F>(path: &Path, file_name: &str, mut handler: F) -> Result<()>
where
    F: FnMut(&Path) -> Result<()>,
{
    for entry in walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        if entry.file_name() != file_name {
            continue;
        }
        if let Some(parent) = entry.path().parent() {
            handler(parent)?;
        }
    }

    Ok(())
}

/// Collect directories holding `file_name`, sorted
pub fn collect_dirs_containing(path: &Path, file_name: &str) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();

    walk_dirs_containing(path, file_name, |dir| {
        dirs.push(dir.to_path_buf());
        Ok(())
    })?;

    dirs.sort();
    Ok(dirs)
}
