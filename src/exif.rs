use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use exif::{In, Tag, Value};
use lofty::{ItemKey, TaggedFileExt};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Trait for reading an embedded capture timestamp from a media file
#[cfg_attr(test, mockall::automock)]
pub trait DateExtractor {
    fn extract_date(&self, path: &Path) -> Result<NaiveDateTime>;
}

/// Tags tried in order of preference.
const EXIF_DATE_TAGS: [Tag; 3] = [Tag::DateTimeDigitized, Tag::DateTimeOriginal, Tag::DateTime];

/// Reads EXIF dates from images, falling back to the container's recording
/// date for formats lofty understands (MP4 and friends).
pub struct ExifDateExtractor;

impl ExifDateExtractor {
    pub fn new() -> Self {
        Self
    }

    fn exif_date(&self, path: &Path) -> Result<NaiveDateTime> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open file: {}", path.display()))?;
        let mut reader = BufReader::new(file);

        let exif_data = exif::Reader::new()
            .read_from_container(&mut reader)
            .context("Failed to read EXIF data")?;

        EXIF_DATE_TAGS
            .iter()
            .filter_map(|tag| exif_data.get_field(*tag, In::PRIMARY))
            .find_map(|field| parse_exif_datetime(&field.value))
            .context("No date field found in EXIF data")
    }

    fn container_date(&self, path: &Path) -> Result<NaiveDateTime> {
        let tagged_file = lofty::read_from_path(path).context("Failed to read container tags")?;
        let tag = tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag())
            .context("Container has no tags")?;
        let raw = tag
            .get_string(&ItemKey::RecordingDate)
            .context("Container has no recording date")?;
        parse_container_datetime(raw)
            .ok_or_else(|| anyhow!("Unrecognised container date '{}'", raw))
    }
}

impl Default for ExifDateExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl DateExtractor for ExifDateExtractor {
    fn extract_date(&self, path: &Path) -> Result<NaiveDateTime> {
        self.exif_date(path).or_else(|exif_err| {
            self.container_date(path)
                .map_err(|container_err| exif_err.context(container_err.to_string()))
        })
    }
}

/// EXIF dates are ASCII `YYYY:MM:DD HH:MM:SS`.
fn parse_exif_datetime(value: &Value) -> Option<NaiveDateTime> {
    let Value::Ascii(parts) = value else {
        return None;
    };
    let dt = exif::DateTime::from_ascii(parts.first()?).ok()?;
    NaiveDate::from_ymd_opt(dt.year.into(), dt.month.into(), dt.day.into())?.and_hms_nano_opt(
        dt.hour.into(),
        dt.minute.into(),
        dt.second.into(),
        dt.nanosecond.unwrap_or(0),
    )
}

/// Container dates are ISO 8601, sometimes with an offset, sometimes date only.
fn parse_container_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
