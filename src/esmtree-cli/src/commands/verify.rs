//! Output tree verification command
//!
//! Cross-checks a converted tree against its `.lock` index.

use anyhow::{bail, Result};
use esmtree::lock::LOCK_FILE;
use esmtree::{LockFile, INCOMPLETE_FILE, METADATA_FILE};
use std::path::{Path, PathBuf};

use crate::file_utils::collect_dirs_containing;

#[derive(Debug, Default)]
pub struct Findings {
    /// Record directories listed in the lock index
    pub records: usize,
    /// Directories carrying an incomplete marker
    pub incomplete: Vec<PathBuf>,
    /// Locked directories with no metadata and no incomplete marker
    pub missing_metadata: Vec<PathBuf>,
    /// Lock entries whose directory is gone
    pub missing_dirs: Vec<String>,
}

impl Findings {
    pub fn is_clean(&self) -> bool {
        self.incomplete.is_empty()
            && self.missing_metadata.is_empty()
            && self.missing_dirs.is_empty()
    }
}

/// Handle the verify command
pub fn handle(dir: &Path) -> Result<()> {
    let findings = check(dir)?;

    println!("Tree: {}", dir.display());
    println!("Records in lock: {}", findings.records);

    for path in &findings.incomplete {
        println!("  incomplete: {}", path.display());
    }
    for path in &findings.missing_metadata {
        println!("  no metadata: {}", path.display());
    }
    for directory in &findings.missing_dirs {
        println!("  missing: {}", directory);
    }

    if !findings.is_clean() {
        bail!(
            "{} incomplete, {} without metadata, {} missing",
            findings.incomplete.len(),
            findings.missing_metadata.len(),
            findings.missing_dirs.len()
        );
    }

    println!("OK");
    Ok(())
}

pub fn check(dir: &Path) -> Result<Findings> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }

    let mut findings = Findings {
        incomplete: collect_dirs_containing(dir, INCOMPLETE_FILE)?,
        ..Findings::default()
    };

    let lock_path = dir.join(LOCK_FILE);
    if !lock_path.exists() {
        tracing::warn!(path = %lock_path.display(), "no lock index, checking markers only");
        return Ok(findings);
    }

    let entries = LockFile::read_entries(&lock_path)?;
    findings.records = entries.len();

    for entry in entries {
        let record_dir = dir.join(&entry.directory);
        if !record_dir.is_dir() {
            findings.missing_dirs.push(entry.directory);
        } else if !record_dir.join(METADATA_FILE).exists()
            && !record_dir.join(INCOMPLETE_FILE).exists()
        {
            findings.missing_metadata.push(record_dir);
        }
    }

    Ok(findings)
}
