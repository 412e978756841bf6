/// Files at or below this size are treated as absent; an interrupted write
/// usually leaves a stub this small. A genuinely tiny source file is
/// misclassified the same way.
pub const MIN_EXISTING_LENGTH: u64 = 1024;

/// What the pipeline should do with a candidate destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportDecision {
    Process { reprocess: bool },
    Skip(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyCopied,
    PreviouslyProcessedButDeleted,
}

/// On-disk and ledger state for one destination path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestinationState {
    /// Length of the file at the destination path, `None` if absent.
    pub on_disk_length: Option<u64>,
    /// Whether the ledger already held a record for the destination name.
    pub existed_in_ledger: bool,
    /// `OriginalLength` of that ledger record.
    pub recorded_original_length: u64,
}

impl DestinationState {
    pub fn exists_on_disk(&self) -> bool {
        self.on_disk_length
            .map_or(false, |length| length > MIN_EXISTING_LENGTH)
    }

    /// A stub, or nothing, sits where the ledger says a real file was written.
    /// An absent file counts as length 0.
    pub fn previous_processing_error(&self) -> bool {
        let stub_or_nothing = self.on_disk_length.unwrap_or(0) <= MIN_EXISTING_LENGTH;
        stub_or_nothing && self.existed_in_ledger && self.recorded_original_length > MIN_EXISTING_LENGTH
    }

    pub fn decide(&self) -> ImportDecision {
        if self.previous_processing_error() {
            return ImportDecision::Process { reprocess: true };
        }
        if self.exists_on_disk() {
            ImportDecision::Skip(SkipReason::AlreadyCopied)
        } else if self.existed_in_ledger {
            ImportDecision::Skip(SkipReason::PreviouslyProcessedButDeleted)
        } else {
            ImportDecision::Process { reprocess: false }
        }
    }
}
