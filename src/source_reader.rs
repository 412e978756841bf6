use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// A file found under a source folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub path: PathBuf,
    pub name: String,
    pub length: u64,
}

/// Trait for listing the incoming files of a source
pub trait SourceReader {
    fn read_entries(&self, root: &Path) -> Result<Vec<SourceEntry>>;
}

/// Recursively lists regular files, ordered by path.
pub struct DirectorySourceReader;

impl DirectorySourceReader {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DirectorySourceReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceReader for DirectorySourceReader {
    fn read_entries(&self, root: &Path) -> Result<Vec<SourceEntry>> {
        let meta = std::fs::metadata(root)
            .with_context(|| format!("Failed to open source folder: {}", root.display()))?;
        if !meta.is_dir() {
            anyhow::bail!("Source is not a folder: {}", root.display());
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };

            // Skip directories
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!("Skipping file with non UTF-8 name: {}", entry.path().display());
                continue;
            };
            let length = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(e) => {
                    warn!("Skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };

            entries.push(SourceEntry {
                path: entry.into_path(),
                name,
                length,
            });
        }

        Ok(entries)
    }
}
