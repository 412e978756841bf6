//! Per-kind transforms that produce the destination artifact.

use chrono::{Datelike, NaiveDateTime};
use lofty::{Accessor, Tag, TagExt, TaggedFileExt};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use tracing::debug;

use crate::cancellation::CancellationFlag;
use crate::config::{Config, PhotoSource};
use crate::error::ProcessingError;
use crate::external_tool::{ToolCommand, ToolRunner};
use crate::file_writer::FileSystemWriter;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov"];
const RAW_EXTENSIONS: &[&str] = &[
    "dng", "cr2", "cr3", "nef", "arw", "raf", "orf", "rw2", "pef", "srw",
];
pub const ARCHIVE_EXTENSION: &str = "7z";

/// The closed set of transforms, chosen once per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Video,
    RawArchive,
    Opaque,
}

impl FileKind {
    /// Classify by extension. Raw files are only archived when an archiver
    /// is configured.
    pub fn classify(path: &Path, config: &Config) -> Self {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return Self::Opaque;
        };
        let ext = ext.to_ascii_lowercase();
        let ext = ext.as_str();

        if IMAGE_EXTENSIONS.contains(&ext) {
            Self::Image
        } else if VIDEO_EXTENSIONS.contains(&ext) {
            Self::Video
        } else if RAW_EXTENSIONS.contains(&ext) && config.archiving_enabled() {
            Self::RawArchive
        } else {
            Self::Opaque
        }
    }

    /// Extension of the produced file when it differs from the source's.
    pub fn destination_extension(self, config: &Config) -> Option<&str> {
        match self {
            Self::RawArchive => Some(ARCHIVE_EXTENSION),
            Self::Video if config.transcoding_enabled() => {
                Some(config.transcode_container_extension.trim_start_matches('.'))
            }
            Self::Video | Self::Image | Self::Opaque => None,
        }
    }
}

/// Inputs for one transform.
#[derive(Debug, Clone, Copy)]
pub struct ProcessJob<'a> {
    pub source: &'a Path,
    pub destination: &'a Path,
    pub source_config: &'a PhotoSource,
    pub local_date: NaiveDateTime,
    pub config: &'a Config,
}

/// Seam between the pipeline and the transforms.
pub trait FileProcessor {
    /// Produces the destination file and returns its length.
    fn process(&self, kind: FileKind, job: &ProcessJob<'_>, cancel: &CancellationFlag) -> Result<u64, ProcessingError>;
}

/// Writes copyright fields into media files.
pub trait MetadataTagger {
    fn tag_image(&self, path: &Path, notice: &str, author: &str, comment: &str) -> Result<(), ProcessingError>;
    fn tag_video(&self, path: &Path, notice: &str, comment: &str) -> Result<(), ProcessingError>;
}

/// EXIF through little_exif, MP4 atoms through lofty.
pub struct FileMetadataTagger;

impl FileMetadataTagger {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileMetadataTagger {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataTagger for FileMetadataTagger {
    fn tag_image(&self, path: &Path, notice: &str, author: &str, comment: &str) -> Result<(), ProcessingError> {
        use little_exif::exif_tag::ExifTag;
        use little_exif::metadata::Metadata;

        // Screenshots and re-saved images often carry no EXIF segment at all.
        let mut metadata = match Metadata::new_from_path(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(path = %path.display(), "no readable EXIF ({}), writing a fresh block", e);
                Metadata::new()
            }
        };
        metadata.set_tag(ExifTag::Copyright(notice.to_string()));
        metadata.set_tag(ExifTag::Artist(author.to_string()));
        metadata.set_tag(ExifTag::ImageDescription(comment.to_string()));

        // little_exif can panic on unusual files rather than return an error.
        match panic::catch_unwind(AssertUnwindSafe(|| metadata.write_to_file(path))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ProcessingError::Tag(format!("failed to write EXIF: {}", e))),
            Err(_) => Err(ProcessingError::Tag("EXIF writer panicked".to_string())),
        }
    }

    fn tag_video(&self, path: &Path, notice: &str, comment: &str) -> Result<(), ProcessingError> {
        let mut tagged_file = lofty::read_from_path(path)?;
        if tagged_file.primary_tag().is_none() {
            let tag_type = tagged_file.primary_tag_type();
            tagged_file.insert_tag(Tag::new(tag_type));
        }
        let tag = tagged_file
            .primary_tag_mut()
            .ok_or_else(|| ProcessingError::Tag("container does not accept tags".to_string()))?;

        tag.insert_text(lofty::ItemKey::CopyrightMessage, notice.to_string());
        tag.set_comment(comment.to_string());
        tag.save_to_path(path)?;
        Ok(())
    }
}

/// Dispatches each [`FileKind`] to its transform.
pub struct TypeProcessor<'a> {
    writer: &'a dyn FileSystemWriter,
    tools: &'a dyn ToolRunner,
    tagger: &'a dyn MetadataTagger,
}

impl<'a> TypeProcessor<'a> {
    pub fn new(
        writer: &'a dyn FileSystemWriter,
        tools: &'a dyn ToolRunner,
        tagger: &'a dyn MetadataTagger,
    ) -> Self {
        Self {
            writer,
            tools,
            tagger,
        }
    }

    fn process_image(&self, job: &ProcessJob<'_>) -> Result<(), ProcessingError> {
        let year = job.local_date.year();
        let source = job.source_config;
        self.writer.copy_file(job.source, job.destination)?;
        self.tagger.tag_image(
            job.destination,
            &source.copyright_notice(year),
            &source.copyright_to,
            &source.copyright_comment(year),
        )
    }

    fn process_video(&self, job: &ProcessJob<'_>, cancel: &CancellationFlag) -> Result<(), ProcessingError> {
        if job.config.transcoding_enabled() {
            let command = transcode_command(job.config, job.source, job.destination)?;
            self.tools.run(&command, cancel)?;
        } else {
            self.writer.copy_file(job.source, job.destination)?;
        }

        let year = job.local_date.year();
        self.tagger.tag_video(
            job.destination,
            &job.source_config.copyright_notice(year),
            &job.source_config.copyright_comment(year),
        )
    }

    fn process_raw_archive(&self, job: &ProcessJob<'_>, cancel: &CancellationFlag) -> Result<(), ProcessingError> {
        let command = archive_command(job.config, job.source, job.destination)?;
        self.tools.run(&command, cancel)?;
        Ok(())
    }

    fn process_opaque(&self, job: &ProcessJob<'_>) -> Result<(), ProcessingError> {
        self.writer.copy_file(job.source, job.destination)?;
        Ok(())
    }
}

impl FileProcessor for TypeProcessor<'_> {
    fn process(&self, kind: FileKind, job: &ProcessJob<'_>, cancel: &CancellationFlag) -> Result<u64, ProcessingError> {
        debug!(?kind, source = %job.source.display(), destination = %job.destination.display(), "processing");
        match kind {
            FileKind::Image => self.process_image(job)?,
            FileKind::Video => self.process_video(job, cancel)?,
            FileKind::RawArchive => self.process_raw_archive(job, cancel)?,
            FileKind::Opaque => self.process_opaque(job)?,
        }

        self.writer.file_length(job.destination)?.ok_or_else(|| {
            ProcessingError::InvalidPath(format!(
                "{} was not produced",
                job.destination.display()
            ))
        })
    }
}

/// `ffmpeg -hwaccel <hint> -i <in> -y -c:a <codec> -b:a <bitrate> -c:v <codec>
/// -crf <quality> -preset <speed> -g <keyframes> <out>`
pub fn transcode_command(config: &Config, source: &Path, destination: &Path) -> Result<ToolCommand, ProcessingError> {
    let ffmpeg = config
        .path_to_ffmpeg
        .as_ref()
        .ok_or(ProcessingError::ToolMissing("ffmpeg"))?;

    Ok(ToolCommand::new(ffmpeg, config.ffmpeg_failure_exit_code)
        .arg("-hwaccel")
        .arg(config.hardware_acceleration.as_str())
        .arg("-i")
        .arg(source)
        .arg("-y")
        .arg("-c:a")
        .arg(config.transcode_audio_codec.as_str())
        .arg("-b:a")
        .arg(config.transcode_audio_bitrate.as_str())
        .arg("-c:v")
        .arg(config.transcode_video_codec.as_str())
        .arg("-crf")
        .arg(config.transcode_video_quality_factor.as_str())
        .arg("-preset")
        .arg(config.transcode_video_cpu_factor.as_str())
        .arg("-g")
        .arg(config.transcode_video_keyframe_factor.as_str())
        .arg(destination))
}

/// `7z a -mx9 <archive> <input>`
pub fn archive_command(config: &Config, source: &Path, destination: &Path) -> Result<ToolCommand, ProcessingError> {
    let seven_zip = config
        .path_to_7zip
        .as_ref()
        .ok_or(ProcessingError::ToolMissing("7-Zip"))?;

    Ok(ToolCommand::new(seven_zip, config.archiver_failure_exit_code)
        .arg("a")
        .arg("-mx9")
        .arg(destination)
        .arg(source))
}
