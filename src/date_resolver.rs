use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::config::TimestampKind;
use crate::error::ProcessingError;
use crate::exif::DateExtractor;

/// Works out when a file was captured: embedded tags first, file
/// modification time otherwise.
pub struct DateResolver<'a> {
    extractor: &'a dyn DateExtractor,
}

impl<'a> DateResolver<'a> {
    pub fn new(extractor: &'a dyn DateExtractor) -> Self {
        Self { extractor }
    }

    /// Tag timestamps carry no zone; `assumed` says whether their clock value
    /// is local time or UTC. Tag read failures are never surfaced.
    pub fn resolve(&self, path: &Path, assumed: TimestampKind) -> Result<DateTime<Utc>, ProcessingError> {
        match self.extractor.extract_date(path) {
            Ok(naive) => {
                if let Some(instant) = interpret(naive, assumed) {
                    return Ok(instant);
                }
                debug!(path = %path.display(), %naive, "tag date does not exist in local time, using file date");
            }
            Err(e) => {
                debug!(path = %path.display(), "no tag date ({:#}), using file date", e);
            }
        }

        let modified = fs::metadata(path)?.modified()?;
        Ok(DateTime::<Utc>::from(modified))
    }
}

fn interpret(naive: NaiveDateTime, assumed: TimestampKind) -> Option<DateTime<Utc>> {
    match assumed {
        TimestampKind::Utc => Some(Utc.from_utc_datetime(&naive)),
        TimestampKind::Local => Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc)),
    }
}

/// The local wall-clock view used for cutoff checks and folder naming.
pub fn local_view(instant: &DateTime<Utc>) -> NaiveDateTime {
    instant.with_timezone(&Local).naive_local()
}
