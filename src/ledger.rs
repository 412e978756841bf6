//! Per-folder record of imported files.
//!
//! Each destination folder carries one JSON file listing every file the
//! pipeline has attempted or completed for that folder. Records are keyed by
//! destination file name, compared case-insensitively.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ImportError;

/// Provenance for one destination file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImportRecord {
    pub destination_filename: String,
    pub source_filename: String,
    pub prefix: String,
    pub original_length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_datestamp: Option<DateTime<FixedOffset>>,
}

/// Ordered set of [`ImportRecord`] bound to a ledger file.
#[derive(Debug, Clone)]
pub struct MetadataLedger {
    records: BTreeMap<String, ImportRecord>,
    path_and_filename: PathBuf,
}

fn key_for(destination_filename: &str) -> String {
    destination_filename.to_lowercase()
}

impl MetadataLedger {
    pub fn empty(path_and_filename: impl Into<PathBuf>) -> Self {
        Self {
            records: BTreeMap::new(),
            path_and_filename: path_and_filename.into(),
        }
    }

    /// Loads the ledger at `path`. A missing file gives an empty ledger; a
    /// malformed one is an error so provenance is never silently dropped.
    pub fn load_from_file(path: &Path) -> Result<Self, ImportError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no metadata file yet, starting empty");
                return Ok(Self::empty(path));
            }
            Err(source) => {
                return Err(ImportError::LedgerIo {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        // Older tools wrote a byte order mark.
        let content = content.trim_start_matches('\u{feff}');
        let loaded: Vec<ImportRecord> =
            serde_json::from_str(content).map_err(|source| ImportError::LedgerCorrupt {
                path: path.to_path_buf(),
                source,
            })?;

        let mut ledger = Self::empty(path);
        for record in loaded {
            let key = key_for(&record.destination_filename);
            if ledger.records.contains_key(&key) {
                return Err(ImportError::LedgerDuplicate {
                    path: path.to_path_buf(),
                    name: record.destination_filename,
                });
            }
            ledger.records.insert(key, record);
        }
        debug!(path = %path.display(), records = ledger.len(), "loaded metadata file");
        Ok(ledger)
    }

    pub fn path_and_filename(&self) -> &Path {
        &self.path_and_filename
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, destination_filename: &str) -> Option<&ImportRecord> {
        self.records.get(&key_for(destination_filename))
    }

    pub fn get_mut(&mut self, destination_filename: &str) -> Option<&mut ImportRecord> {
        self.records.get_mut(&key_for(destination_filename))
    }

    /// Returns the record for `destination_filename`, creating it with
    /// `make_record` if absent. The flag is `true` when the record already
    /// existed.
    pub fn get_or_add_file<F>(&mut self, destination_filename: &str, make_record: F) -> (&ImportRecord, bool)
    where
        F: FnOnce() -> ImportRecord,
    {
        use std::collections::btree_map::Entry;

        match self.records.entry(key_for(destination_filename)) {
            Entry::Occupied(entry) => (&*entry.into_mut(), true),
            Entry::Vacant(entry) => (&*entry.insert(make_record()), false),
        }
    }

    pub fn remove(&mut self, destination_filename: &str) -> Option<ImportRecord> {
        self.records.remove(&key_for(destination_filename))
    }

    /// Records in display order: by source file name, then destination.
    pub fn photos(&self) -> Vec<&ImportRecord> {
        let mut photos: Vec<&ImportRecord> = self.records.values().collect();
        photos.sort_by(|a, b| {
            a.source_filename
                .cmp(&b.source_filename)
                .then_with(|| a.destination_filename.cmp(&b.destination_filename))
        });
        photos
    }

    /// Writes the ledger so that either the old or the new file is always at
    /// the canonical path.
    ///
    /// 1. write everything to `{path}.tmp`
    /// 2. move the existing file aside to `{path}.tmp2`
    /// 3. move `{path}.tmp` into place
    /// 4. delete `{path}.tmp2`
    pub fn save_to_file(&self) -> Result<(), ImportError> {
        let path = self.path_and_filename.as_path();
        let io_err = |source| ImportError::LedgerIo {
            path: path.to_path_buf(),
            source,
        };

        let content = serde_json::to_string_pretty(&self.photos()).map_err(|source| {
            ImportError::LedgerSerialize {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let tmp_path = sibling_with_suffix(path, ".tmp");
        let displaced_path = sibling_with_suffix(path, ".tmp2");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&tmp_path, content.as_bytes()).map_err(io_err)?;

        if path.exists() {
            remove_if_present(&displaced_path).map_err(io_err)?;
            fs::rename(path, &displaced_path).map_err(io_err)?;
        }
        fs::rename(&tmp_path, path).map_err(io_err)?;
        remove_if_present(&displaced_path).map_err(io_err)?;

        debug!(path = %path.display(), records = self.len(), "saved metadata file");
        Ok(())
    }
}

/// Every ledger touched during a run, keyed by destination folder.
#[derive(Debug, Default)]
pub struct LedgerSet {
    ledgers: BTreeMap<PathBuf, MetadataLedger>,
}

impl LedgerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the ledger for `folder`, loading it from disk on first use.
    pub fn get_or_load(&mut self, folder: &Path, metadata_filename: &str) -> Result<&mut MetadataLedger, ImportError> {
        use std::collections::btree_map::Entry;

        match self.ledgers.entry(folder.to_path_buf()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let ledger = MetadataLedger::load_from_file(&folder.join(metadata_filename))?;
                Ok(entry.insert(ledger))
            }
        }
    }

    pub fn get(&self, folder: &Path) -> Option<&MetadataLedger> {
        self.ledgers.get(folder)
    }

    pub fn len(&self) -> usize {
        self.ledgers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ledgers.is_empty()
    }

    /// Saves every ledger, continuing past failures. Empty ledgers that were
    /// never on disk are not written. Returns how many were saved.
    pub fn save_all(&self) -> (usize, Vec<ImportError>) {
        let mut saved = 0;
        let mut errors = Vec::new();
        for ledger in self.ledgers.values() {
            if ledger.is_empty() && !ledger.path_and_filename().exists() {
                continue;
            }
            match ledger.save_to_file() {
                Ok(()) => saved += 1,
                Err(e) => errors.push(e),
            }
        }
        (saved, errors)
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
