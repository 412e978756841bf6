use std::path::Path;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::cancellation::CancellationFlag;
use crate::config::{Config, PhotoSource};
use crate::error::ImportError;
use crate::ledger::LedgerSet;
use crate::photo_filter::PhotoFilter;
use crate::pipeline::{FileOutcome, ImportPipeline};
use crate::source_reader::SourceReader;

/// Counts for one run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub reprocessed: usize,
    pub skipped: usize,
    pub before_cutoff: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub ledgers_saved: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Processed { reprocessed: false } => self.processed += 1,
            FileOutcome::Processed { reprocessed: true } => self.reprocessed += 1,
            FileOutcome::Skipped(_) => self.skipped += 1,
            FileOutcome::BeforeCutoff { .. } => self.before_cutoff += 1,
            FileOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Runs the pipeline over every configured source, then flushes ledgers.
pub struct BatchDriver<'a> {
    config: &'a Config,
    reader: &'a dyn SourceReader,
    filter: &'a dyn PhotoFilter,
    pipeline: ImportPipeline<'a>,
}

impl<'a> BatchDriver<'a> {
    pub fn new(
        config: &'a Config,
        reader: &'a dyn SourceReader,
        filter: &'a dyn PhotoFilter,
        pipeline: ImportPipeline<'a>,
    ) -> Self {
        Self {
            config,
            reader,
            filter,
            pipeline,
        }
    }

    /// Imports all sources in configured order.
    ///
    /// Ledgers touched before a fatal error or a cancellation are still
    /// saved; the fatal error is returned after the flush.
    pub fn run(&self, cancel: &CancellationFlag) -> Result<BatchSummary, ImportError> {
        let root = &self.config.destination_path;
        if !root.is_dir() {
            return Err(ImportError::DestinationMissing(root.clone()));
        }

        let mut ledgers = LedgerSet::new();
        let mut summary = BatchSummary::default();

        let result = self.import_sources(&mut ledgers, &mut summary, cancel);
        if let Err(e) = &result {
            error!("Stopping run: {}", e);
        }

        println!("Updating {} metadata files...", ledgers.len());
        let (saved, mut errors) = ledgers.save_all();
        summary.ledgers_saved = saved;
        for e in &errors {
            error!("{}", e);
        }

        result?;
        if !errors.is_empty() {
            return Err(errors.swap_remove(0));
        }
        Ok(summary)
    }

    fn import_sources(
        &self,
        ledgers: &mut LedgerSet,
        summary: &mut BatchSummary,
        cancel: &CancellationFlag,
    ) -> Result<(), ImportError> {
        for source in &self.config.photo_sources {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            self.import_source(source, ledgers, summary, cancel)?;
        }
        Ok(())
    }

    fn import_source(
        &self,
        source: &PhotoSource,
        ledgers: &mut LedgerSet,
        summary: &mut BatchSummary,
        cancel: &CancellationFlag,
    ) -> Result<(), ImportError> {
        let started = Instant::now();
        println!("Processing incoming photos from: {}", source.source_path.display());

        let entries = match self.reader.read_entries(&source.source_path) {
            Ok(entries) => entries,
            Err(e) => {
                error!("Cannot read source {}: {:#}", source.source_path.display(), e);
                return Ok(());
            }
        };
        info!(source = %source.source_path.display(), files = entries.len(), "enumerated source");

        for entry in &entries {
            if cancel.is_cancelled() {
                warn!("Cancelled, skipping remaining files");
                summary.cancelled = true;
                break;
            }
            if !self.filter.should_include(&entry.path) {
                continue;
            }

            let file_started = Instant::now();
            let outcome = self.pipeline.import_file(entry, source, ledgers, cancel)?;
            println!(
                "{}: {} ({}ms).",
                display_name(&entry.path, &source.source_path),
                outcome,
                file_started.elapsed().as_millis()
            );
            summary.record(&outcome);
        }

        println!(
            "Finished {} in {:.2} seconds",
            source.source_path.display(),
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }
}

/// Path relative to the source root, for status lines.
fn display_name(path: &Path, root: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}
