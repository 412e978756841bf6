use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ImportError;
use crate::path_generator::DatePattern;

/// Name of the section in the settings file holding [`Config`].
pub const SETTINGS_SECTION: &str = "PostProcessPhotos";

/// How to interpret a capture timestamp that carries no zone information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum TimestampKind {
    #[default]
    Local,
    #[serde(alias = "UTC")]
    Utc,
}

/// One watched folder of incoming files.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PhotoSource {
    pub source_path: PathBuf,
    pub filename_prefix: String,
    pub files_in_local_or_utc: Option<TimestampKind>,
    pub copyright_to: String,
    pub copyright_license_full: String,
    pub copyright_license_short: String,
    pub copyright_url: String,
}

impl PhotoSource {
    pub fn timestamp_kind(&self) -> TimestampKind {
        self.files_in_local_or_utc.unwrap_or_default()
    }

    /// `Copyright (c) {to}, {year}. {short licence}`
    pub fn copyright_notice(&self, year: i32) -> String {
        format!(
            "Copyright (c) {}, {}. {}",
            self.copyright_to, year, self.copyright_license_short
        )
    }

    /// `Copyright (c) {to}, {year}. {full licence}. {url}`
    pub fn copyright_comment(&self, year: i32) -> String {
        format!(
            "Copyright (c) {}, {}. {}. {}",
            self.copyright_to, year, self.copyright_license_full, self.copyright_url
        )
    }
}

/// Global settings for a run. Immutable once loaded.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    pub destination_path: PathBuf,
    pub destination_sub_folder_pattern: String,
    pub metadata_filename: String,
    #[serde(deserialize_with = "deserialize_local_datetime")]
    pub effective_from_local: NaiveDateTime,
    pub photo_sources: Vec<PhotoSource>,

    #[serde(rename = "PathTo7Zip")]
    pub path_to_7zip: Option<PathBuf>,
    pub path_to_ffmpeg: Option<PathBuf>,

    pub transcode_videos: bool,
    pub transcode_audio_codec: String,
    pub transcode_audio_bitrate: String,
    pub transcode_video_codec: String,
    pub transcode_video_quality_factor: String,
    pub transcode_video_cpu_factor: String,
    pub transcode_video_keyframe_factor: String,
    pub transcode_container_extension: String,
    pub hardware_acceleration: String,

    /// Exit codes at or above these are treated as failures.
    pub ffmpeg_failure_exit_code: i32,
    pub archiver_failure_exit_code: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            destination_path: PathBuf::new(),
            destination_sub_folder_pattern: "yyyy/MM".to_string(),
            metadata_filename: "metadata.json".to_string(),
            effective_from_local: NaiveDateTime::MIN,
            photo_sources: Vec::new(),
            path_to_7zip: None,
            path_to_ffmpeg: None,
            transcode_videos: false,
            transcode_audio_codec: "aac".to_string(),
            transcode_audio_bitrate: "128k".to_string(),
            transcode_video_codec: "libx265".to_string(),
            transcode_video_quality_factor: "23".to_string(),
            transcode_video_cpu_factor: "medium".to_string(),
            transcode_video_keyframe_factor: "250".to_string(),
            transcode_container_extension: "mp4".to_string(),
            hardware_acceleration: "auto".to_string(),
            ffmpeg_failure_exit_code: 1,
            // 7-Zip uses 1 for warnings such as locked files.
            archiver_failure_exit_code: 2,
        }
    }
}

#[derive(Deserialize)]
struct SettingsFile {
    #[serde(rename = "PostProcessPhotos")]
    post_process_photos: Config,
}

impl Config {
    /// Load and validate the `PostProcessPhotos` section of a JSON settings file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        let config = Self::from_json(&content)
            .with_context(|| format!("Invalid settings file: {}", path.display()))?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let content = content.trim_start_matches('\u{feff}');
        let settings: SettingsFile = serde_json::from_str(content)
            .with_context(|| format!("Missing or malformed '{}' section", SETTINGS_SECTION))?;
        let config = settings.post_process_photos;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ImportError> {
        if self.destination_path.as_os_str().is_empty() {
            return Err(ImportError::Config("DestinationPath is not set".to_string()));
        }
        if self.metadata_filename.trim().is_empty() {
            return Err(ImportError::Config("MetadataFilename is not set".to_string()));
        }
        DatePattern::parse(&self.destination_sub_folder_pattern)?;
        if self.transcode_container_extension.trim_start_matches('.').is_empty() {
            return Err(ImportError::Config(
                "TranscodeContainerExtension is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Videos are transcoded only when enabled and ffmpeg is configured.
    pub fn transcoding_enabled(&self) -> bool {
        self.transcode_videos && self.path_to_ffmpeg.is_some()
    }

    pub fn archiving_enabled(&self) -> bool {
        self.path_to_7zip.is_some()
    }
}

/// Accepts `2018-01-01T00:00:00`, `2018-01-01 00:00:00` or a bare `2018-01-01`.
fn deserialize_local_datetime<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_local_datetime(&raw).ok_or_else(|| {
        serde::de::Error::custom(format!("unrecognised date '{}'", raw))
    })
}

fn parse_local_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
