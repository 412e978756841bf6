//! Import of a single source file.
//!
//! Each file moves through
//! `Start → DateResolved → DestinationResolved → LedgerLoaded → Decided →
//! Processed → Recorded`. Any failure after the ledger is loaded rolls back
//! the ledger record minted for this attempt and any partial destination
//! file, so the next run retries the file as if it were new.

use chrono::{Local, NaiveDateTime};
use std::fmt;
use tracing::{debug, error, info};

use crate::cancellation::CancellationFlag;
use crate::config::{Config, PhotoSource};
use crate::date_resolver::{local_view, DateResolver};
use crate::decision::{DestinationState, ImportDecision, SkipReason};
use crate::error::{ImportError, ProcessingError};
use crate::exif::DateExtractor;
use crate::file_writer::FileSystemWriter;
use crate::ledger::{ImportRecord, LedgerSet, MetadataLedger};
use crate::path_generator::{Destination, PathGenerator};
use crate::processor::{FileKind, FileProcessor, ProcessJob};
use crate::source_reader::SourceEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStage {
    Start,
    DateResolved,
    DestinationResolved,
    LedgerLoaded,
    Decided,
    Processed,
    Recorded,
}

/// How a single file was handled.
#[derive(Debug)]
pub enum FileOutcome {
    BeforeCutoff { cutoff: NaiveDateTime },
    Skipped(SkipReason),
    Processed { reprocessed: bool },
    Failed { stage: ImportStage, error: ProcessingError },
}

impl fmt::Display for FileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeforeCutoff { cutoff } => {
                write!(f, "Older than {}, not processing", cutoff.format("%Y-%m-%d"))
            }
            Self::Skipped(SkipReason::AlreadyCopied) => write!(f, "Already copied"),
            Self::Skipped(SkipReason::PreviouslyProcessedButDeleted) => {
                write!(f, "Previously processed, but deleted from library")
            }
            Self::Processed { reprocessed: false } => write!(f, "Processed OK"),
            Self::Processed { reprocessed: true } => {
                write!(f, "Error during previous processing run, reprocessed OK")
            }
            Self::Failed { error, .. } => write!(f, "Error - {}. See stderr for details", error),
        }
    }
}

/// What this attempt has changed and must undo on failure.
#[derive(Debug, Default)]
struct Attempt {
    owns_record: bool,
    touched_destination: bool,
}

pub struct ImportPipeline<'a> {
    config: &'a Config,
    dates: DateResolver<'a>,
    paths: PathGenerator,
    writer: &'a dyn FileSystemWriter,
    processor: &'a dyn FileProcessor,
}

impl<'a> ImportPipeline<'a> {
    pub fn new(
        config: &'a Config,
        date_extractor: &'a dyn DateExtractor,
        writer: &'a dyn FileSystemWriter,
        processor: &'a dyn FileProcessor,
    ) -> Result<Self, ImportError> {
        Ok(Self {
            config,
            dates: DateResolver::new(date_extractor),
            paths: PathGenerator::from_config(config)?,
            writer,
            processor,
        })
    }

    /// Imports one file. Per-file failures are rolled back and reported as
    /// [`FileOutcome::Failed`]; only ledger load failures are returned as
    /// errors.
    pub fn import_file(
        &self,
        entry: &SourceEntry,
        source: &PhotoSource,
        ledgers: &mut LedgerSet,
        cancel: &CancellationFlag,
    ) -> Result<FileOutcome, ImportError> {
        let instant = match self.dates.resolve(&entry.path, source.timestamp_kind()) {
            Ok(instant) => instant,
            Err(error) => return Ok(self.failed(entry, ImportStage::Start, error)),
        };
        let local_date = local_view(&instant);

        if local_date < self.config.effective_from_local {
            return Ok(FileOutcome::BeforeCutoff {
                cutoff: self.config.effective_from_local,
            });
        }

        let kind = FileKind::classify(&entry.path, self.config);
        let destination = self.paths.generate(
            &local_date,
            &entry.name,
            source,
            kind.destination_extension(self.config),
        );
        debug!(source = %entry.path.display(), destination = %destination.full_path.display(), ?kind, "resolved destination");

        let ledger = ledgers.get_or_load(&destination.folder, &self.config.metadata_filename)?;

        let mut attempt = Attempt::default();
        let mut stage = ImportStage::LedgerLoaded;
        let result = self.run_attempt(
            entry,
            source,
            kind,
            local_date,
            &destination,
            ledger,
            &mut attempt,
            &mut stage,
            cancel,
        );

        match result {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                self.roll_back(&destination, ledger, &attempt);
                Ok(self.failed(entry, stage, error))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_attempt(
        &self,
        entry: &SourceEntry,
        source: &PhotoSource,
        kind: FileKind,
        local_date: NaiveDateTime,
        destination: &Destination,
        ledger: &mut MetadataLedger,
        attempt: &mut Attempt,
        stage: &mut ImportStage,
        cancel: &CancellationFlag,
    ) -> Result<FileOutcome, ProcessingError> {
        let on_disk_length = self.writer.file_length(&destination.full_path)?;

        let (record, existed_in_ledger) = ledger.get_or_add_file(&destination.file_name, || ImportRecord {
            destination_filename: destination.file_name.clone(),
            source_filename: entry.name.clone(),
            prefix: source.filename_prefix.clone(),
            original_length: entry.length,
            processing_datestamp: Some(Local::now().fixed_offset()),
        });
        attempt.owns_record = !existed_in_ledger;

        let state = DestinationState {
            on_disk_length,
            existed_in_ledger,
            recorded_original_length: record.original_length,
        };
        let decision = state.decide();
        *stage = ImportStage::Decided;
        debug!(destination = %destination.file_name, ?state, ?decision, "decided");

        let reprocess = match decision {
            ImportDecision::Skip(reason) => return Ok(FileOutcome::Skipped(reason)),
            ImportDecision::Process { reprocess } => reprocess,
        };
        if reprocess {
            info!(destination = %destination.full_path.display(), "previous run left a truncated or missing file, reprocessing");
        }

        attempt.touched_destination = true;
        self.writer.create_directory(&destination.folder)?;
        self.writer.remove_file_if_present(&destination.full_path)?;

        let job = ProcessJob {
            source: &entry.path,
            destination: &destination.full_path,
            source_config: source,
            local_date,
            config: self.config,
        };
        let produced_length = self.processor.process(kind, &job, cancel)?;
        *stage = ImportStage::Processed;
        debug!(destination = %destination.file_name, produced_length, "processed");

        if reprocess {
            if let Some(record) = ledger.get_mut(&destination.file_name) {
                record.source_filename = entry.name.clone();
                record.original_length = entry.length;
                record.processing_datestamp = Some(Local::now().fixed_offset());
            }
        }
        *stage = ImportStage::Recorded;

        Ok(FileOutcome::Processed { reprocessed: reprocess })
    }

    fn roll_back(&self, destination: &Destination, ledger: &mut MetadataLedger, attempt: &Attempt) {
        if attempt.owns_record {
            ledger.remove(&destination.file_name);
        }
        if attempt.touched_destination {
            if let Err(e) = self.writer.remove_file_if_present(&destination.full_path) {
                error!(path = %destination.full_path.display(), "failed to remove partial file: {}", e);
            }
        }
    }

    fn failed(&self, entry: &SourceEntry, stage: ImportStage, error: ProcessingError) -> FileOutcome {
        error!(path = %entry.path.display(), ?stage, "Error processing file: {}", error);
        FileOutcome::Failed { stage, error }
    }
}
