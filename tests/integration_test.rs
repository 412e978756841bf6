use chrono::{Local, TimeZone};
use serde_json::{json, Value};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::TempDir;

// Import the library modules
use incoming_to_library::batch::{BatchDriver, BatchSummary};
use incoming_to_library::cancellation::CancellationFlag;
use incoming_to_library::config::Config;
use incoming_to_library::error::ImportError;
use incoming_to_library::exif::ExifDateExtractor;
use incoming_to_library::external_tool::ProcessToolRunner;
use incoming_to_library::file_writer::RealFileSystemWriter;
use incoming_to_library::ledger::MetadataLedger;
use incoming_to_library::photo_filter::TempFileFilter;
use incoming_to_library::pipeline::ImportPipeline;
use incoming_to_library::processor::{FileMetadataTagger, TypeProcessor};
use incoming_to_library::source_reader::DirectorySourceReader;

struct Workspace {
    temp: TempDir,
    library: PathBuf,
    incoming: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let library = temp.path().join("library");
        let incoming = temp.path().join("incoming");
        fs::create_dir_all(&library).unwrap();
        fs::create_dir_all(&incoming).unwrap();
        Self {
            temp,
            library,
            incoming,
        }
    }

    /// Writes an incoming file with no embedded tags, dated 1 March 2024 local time.
    fn add_incoming(&self, name: &str, length: usize) -> PathBuf {
        self.add_incoming_bytes(name, &vec![7u8; length])
    }

    fn add_incoming_bytes(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.incoming.join(name);
        fs::write(&path, content).unwrap();
        let taken = Local.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::from(taken))
            .unwrap();
        path
    }

    fn settings(&self, extra: Value) -> Config {
        let mut section = json!({
            "DestinationPath": self.library,
            "DestinationSubFolderPattern": "yyyy/MM",
            "EffectiveFromLocal": "2020-01-01T00:00:00",
            "PhotoSources": [
                {
                    "SourcePath": self.incoming,
                    "FilenamePrefix": "A_",
                    "CopyrightTo": "Jane Doe"
                }
            ]
        });
        if let (Some(section), Value::Object(extra)) = (section.as_object_mut(), extra) {
            section.extend(extra);
        }
        let path = self.temp.path().join("appsettings.json");
        fs::write(&path, json!({ "PostProcessPhotos": section }).to_string()).unwrap();
        Config::load(&path).expect("Failed to load settings")
    }

    fn month_folder(&self) -> PathBuf {
        self.library.join("2024").join("03")
    }
}

fn run_batch(config: &Config) -> Result<BatchSummary, ImportError> {
    let date_extractor = ExifDateExtractor::new();
    let file_writer = RealFileSystemWriter::new();
    let tool_runner = ProcessToolRunner::new();
    let tagger = FileMetadataTagger::new();
    let processor = TypeProcessor::new(&file_writer, &tool_runner, &tagger);
    let source_reader = DirectorySourceReader::new();
    let filter = TempFileFilter::new();
    let pipeline = ImportPipeline::new(config, &date_extractor, &file_writer, &processor)?;

    BatchDriver::new(config, &source_reader, &filter, pipeline).run(&CancellationFlag::new())
}

fn load_ledger(folder: &Path) -> MetadataLedger {
    MetadataLedger::load_from_file(&folder.join("metadata.json")).expect("Failed to load ledger")
}

#[test]
fn test_end_to_end_import_is_idempotent() {
    // Arrange
    let ws = Workspace::new();
    ws.add_incoming("IMG_0001.bin", 204_800);
    ws.add_incoming("notes.txt", 4096);
    ws.add_incoming("IMG_0002.bin.tmp", 4096);
    let config = ws.settings(json!({}));

    // Act
    let first = run_batch(&config).expect("First run failed");
    let second = run_batch(&config).expect("Second run failed");

    // Assert
    assert_eq!(first.processed, 2);
    assert_eq!(first.failed, 0);
    assert_eq!(first.ledgers_saved, 1);
    assert_eq!(second.processed, 0);
    assert_eq!(second.skipped, 2);

    let folder = ws.month_folder();
    let copied = fs::read(folder.join("A_IMG_0001.bin")).unwrap();
    assert_eq!(copied.len(), 204_800);
    assert!(folder.join("A_notes.txt").exists());
    assert!(!folder.join("A_IMG_0002.bin.tmp").exists());

    let ledger = load_ledger(&folder);
    assert_eq!(ledger.len(), 2);
    let record = ledger.get("A_IMG_0001.bin").unwrap();
    assert_eq!(record.source_filename, "IMG_0001.bin");
    assert_eq!(record.prefix, "A_");
    assert_eq!(record.original_length, 204_800);
    assert!(record.processing_datestamp.is_some());
}

#[test]
fn test_ledger_file_uses_pascal_case_fields() {
    // Arrange
    let ws = Workspace::new();
    ws.add_incoming("IMG_0001.bin", 2048);
    let config = ws.settings(json!({}));

    // Act
    run_batch(&config).unwrap();

    // Assert
    let raw = fs::read(ws.month_folder().join("metadata.json")).unwrap();
    assert_ne!(&raw[..3], b"\xEF\xBB\xBF");
    let parsed: Value = serde_json::from_slice(&raw).unwrap();
    let entry = &parsed.as_array().unwrap()[0];
    assert_eq!(entry["DestinationFilename"], "A_IMG_0001.bin");
    assert_eq!(entry["SourceFilename"], "IMG_0001.bin");
    assert_eq!(entry["Prefix"], "A_");
    assert_eq!(entry["OriginalLength"], 2048);
    assert!(entry["ProcessingDatestamp"].is_string());
}

#[test]
fn test_truncated_file_is_reprocessed_on_next_run() {
    // Arrange
    let ws = Workspace::new();
    ws.add_incoming("IMG_0001.bin", 204_800);
    let config = ws.settings(json!({}));
    run_batch(&config).unwrap();
    let output = ws.month_folder().join("A_IMG_0001.bin");
    fs::write(&output, vec![0u8; 512]).unwrap();

    // Act
    let summary = run_batch(&config).unwrap();

    // Assert
    assert_eq!(summary.reprocessed, 1);
    assert_eq!(fs::metadata(&output).unwrap().len(), 204_800);
    let ledger = load_ledger(&ws.month_folder());
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.get("A_IMG_0001.bin").unwrap().original_length, 204_800);
}

#[test]
fn test_missing_output_is_restored_on_next_run() {
    // Arrange
    let ws = Workspace::new();
    ws.add_incoming("IMG_0001.bin", 4096);
    let config = ws.settings(json!({}));
    run_batch(&config).unwrap();
    let output = ws.month_folder().join("A_IMG_0001.bin");
    fs::remove_file(&output).unwrap();

    // Act
    let summary = run_batch(&config).unwrap();

    // Assert
    assert_eq!(summary.reprocessed, 1);
    assert_eq!(fs::metadata(&output).unwrap().len(), 4096);
    assert_eq!(load_ledger(&ws.month_folder()).len(), 1);
}

#[test]
fn test_deleted_tiny_file_stays_deleted() {
    // Arrange
    let ws = Workspace::new();
    ws.add_incoming("icon.bin", 600);
    let config = ws.settings(json!({}));
    run_batch(&config).unwrap();
    fs::remove_file(ws.month_folder().join("A_icon.bin")).unwrap();

    // Act
    let summary = run_batch(&config).unwrap();

    // Assert
    assert_eq!(summary.skipped, 1);
    assert!(!ws.month_folder().join("A_icon.bin").exists());
}

#[test]
fn test_ledger_lookup_ignores_case() {
    // Arrange
    let ws = Workspace::new();
    ws.add_incoming("IMG_0001.bin", 4096);
    let config = ws.settings(json!({}));
    let folder = ws.month_folder();
    fs::create_dir_all(&folder).unwrap();
    let existing = json!([{
        "DestinationFilename": "a_img_0001.BIN",
        "SourceFilename": "img_0001.bin",
        "Prefix": "A_",
        "OriginalLength": 4096,
        "ProcessingDatestamp": "2024-03-01T10:00:00Z"
    }]);
    fs::write(folder.join("metadata.json"), existing.to_string()).unwrap();

    // Act
    let summary = run_batch(&config).unwrap();

    // Assert
    // The existing record matched, so the missing output is restored in place
    assert_eq!(summary.reprocessed, 1);
    assert_eq!(summary.processed, 0);
    let ledger = load_ledger(&folder);
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.get("A_IMG_0001.BIN").unwrap().source_filename, "IMG_0001.bin");
    assert!(folder.join("A_IMG_0001.bin").exists());
}

#[test]
fn test_files_before_cutoff_leave_no_trace() {
    // Arrange
    let ws = Workspace::new();
    ws.add_incoming("IMG_0001.bin", 4096);
    ws.add_incoming("IMG_0002.dng", 4096);
    let config = ws.settings(json!({ "EffectiveFromLocal": "2025-01-01" }));

    // Act
    let summary = run_batch(&config).unwrap();

    // Assert
    assert_eq!(summary.before_cutoff, 2);
    assert_eq!(summary.ledgers_saved, 0);
    assert!(!ws.library.join("2024").exists());
}

#[test]
fn test_corrupt_ledger_stops_the_run() {
    // Arrange
    let ws = Workspace::new();
    ws.add_incoming("IMG_0001.bin", 4096);
    let config = ws.settings(json!({}));
    fs::create_dir_all(ws.month_folder()).unwrap();
    fs::write(ws.month_folder().join("metadata.json"), "{ not a list").unwrap();

    // Act
    let result = run_batch(&config);

    // Assert
    assert!(matches!(result, Err(ImportError::LedgerCorrupt { .. })));
    assert!(!ws.month_folder().join("A_IMG_0001.bin").exists());
}

#[test]
fn test_missing_destination_is_reported() {
    // Arrange
    let ws = Workspace::new();
    ws.add_incoming("IMG_0001.bin", 4096);
    let config = ws.settings(json!({}));
    fs::remove_dir_all(&ws.library).unwrap();

    // Act
    let result = run_batch(&config);

    // Assert
    assert!(matches!(result, Err(ImportError::DestinationMissing(_))));
    assert!(!ws.library.exists());
}

#[cfg(unix)]
mod archiver {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// Stand-in for `7z a -mx9 <archive> <input>`.
    fn fake_archiver(ws: &Workspace, name: &str, script: &str) -> PathBuf {
        let path = ws.temp.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_raw_file_is_archived_under_new_extension() {
        // Arrange
        let ws = Workspace::new();
        ws.add_incoming("IMG_0002.DNG", 4096);
        let tool = fake_archiver(&ws, "7z", r#"cp "$4" "$3""#);
        let config = ws.settings(json!({ "PathTo7Zip": tool }));

        // Act
        let first = run_batch(&config).unwrap();
        let second = run_batch(&config).unwrap();

        // Assert
        assert_eq!(first.processed, 1);
        assert_eq!(second.skipped, 1);
        let folder = ws.month_folder();
        assert!(folder.join("A_IMG_0002.7z").exists());
        assert!(!folder.join("A_IMG_0002.DNG").exists());
        let ledger = load_ledger(&folder);
        assert_eq!(ledger.get("A_IMG_0002.7z").unwrap().source_filename, "IMG_0002.DNG");
    }

    #[test]
    fn test_archiver_failure_is_rolled_back_and_retried() {
        // Arrange
        let ws = Workspace::new();
        ws.add_incoming("IMG_0002.DNG", 4096);
        let broken = fake_archiver(&ws, "7z-broken", r#"echo partial > "$3"; echo "disk full" >&2; exit 2"#);
        let config = ws.settings(json!({ "PathTo7Zip": broken }));

        // Act
        let failed = run_batch(&config).unwrap();

        // Assert
        assert_eq!(failed.failed, 1);
        assert_eq!(failed.ledgers_saved, 0);
        let folder = ws.month_folder();
        assert!(!folder.join("A_IMG_0002.7z").exists());
        assert!(!folder.join("metadata.json").exists());

        // Act
        let fixed = fake_archiver(&ws, "7z-fixed", r#"cp "$4" "$3""#);
        let config = ws.settings(json!({ "PathTo7Zip": fixed }));
        let retried = run_batch(&config).unwrap();

        // Assert
        assert_eq!(retried.processed, 1);
        assert_eq!(retried.reprocessed, 0);
        assert_eq!(load_ledger(&folder).len(), 1);
    }

    #[test]
    fn test_archiver_warning_exit_code_is_accepted() {
        // Arrange
        let ws = Workspace::new();
        ws.add_incoming("IMG_0003.NEF", 4096);
        let tool = fake_archiver(&ws, "7z-warning", r#"cp "$4" "$3"; exit 1"#);
        let config = ws.settings(json!({ "PathTo7Zip": tool }));

        // Act
        let summary = run_batch(&config).unwrap();

        // Assert
        assert_eq!(summary.processed, 1);
        assert!(ws.month_folder().join("A_IMG_0003.7z").exists());
    }
}

mod tagging {
    use super::*;
    use exif::{In, Reader, Tag, Value};
    use little_exif::exif_tag::ExifTag;
    use little_exif::metadata::Metadata;
    use std::io::BufReader;

    /// Structurally valid baseline JPEG with a JFIF header and no EXIF segment.
    fn jfif_without_exif() -> Vec<u8> {
        let mut jpeg = vec![0xFF, 0xD8];
        // APP0 JFIF
        jpeg.extend_from_slice(&[
            0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00, 0x01,
            0x00, 0x01, 0x00, 0x00,
        ]);
        // DQT
        jpeg.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x43, 0x00]);
        jpeg.extend(std::iter::repeat(1u8).take(64));
        // SOF0, 1x1 greyscale
        jpeg.extend_from_slice(&[
            0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x00, 0x01, 0x00, 0x01, 0x01, 0x01, 0x11, 0x00,
        ]);
        // SOS, then padding scan data to stay above the stub threshold
        jpeg.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00]);
        jpeg.extend(std::iter::repeat(0u8).take(4096));
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        jpeg
    }

    fn read_ascii(path: &Path, tag: Tag) -> Option<String> {
        let file = File::open(path).unwrap();
        let exif = Reader::new()
            .read_from_container(&mut BufReader::new(file))
            .ok()?;
        match &exif.get_field(tag, In::PRIMARY)?.value {
            Value::Ascii(parts) => parts
                .first()
                .map(|p| String::from_utf8_lossy(p).trim_end_matches('\0').to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_jpeg_without_exif_is_tagged() {
        // Arrange
        let ws = Workspace::new();
        ws.add_incoming_bytes("screenshot.jpg", &jfif_without_exif());
        let config = ws.settings(json!({}));

        // Act
        let summary = run_batch(&config).unwrap();

        // Assert
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 0);
        let output = ws.month_folder().join("A_screenshot.jpg");
        assert_eq!(read_ascii(&output, Tag::Artist).as_deref(), Some("Jane Doe"));
        let notice = read_ascii(&output, Tag::Copyright).unwrap();
        assert!(notice.starts_with("Copyright (c) Jane Doe, 2024."));
    }

    #[test]
    fn test_jpeg_with_exif_keeps_capture_date_and_gains_copyright() {
        // Arrange
        let ws = Workspace::new();
        let source = ws.add_incoming_bytes("IMG_0001.jpg", &jfif_without_exif());
        let mut metadata = Metadata::new();
        metadata.set_tag(ExifTag::DateTimeOriginal("2023:07:14 09:30:00".to_string()));
        metadata.write_to_file(&source).unwrap();
        let config = ws.settings(json!({}));

        // Act
        let summary = run_batch(&config).unwrap();

        // Assert
        assert_eq!(summary.processed, 1);
        let output = ws.library.join("2023").join("07").join("A_IMG_0001.jpg");
        assert_eq!(
            read_ascii(&output, Tag::DateTimeOriginal).as_deref(),
            Some("2023:07:14 09:30:00")
        );
        assert_eq!(read_ascii(&output, Tag::Artist).as_deref(), Some("Jane Doe"));
        assert!(read_ascii(&output, Tag::Copyright)
            .unwrap()
            .starts_with("Copyright (c) Jane Doe, 2023."));
    }

    #[test]
    fn test_untaggable_video_is_rolled_back() {
        // Arrange
        let ws = Workspace::new();
        ws.add_incoming_bytes("VID_0001.mp4", &b"not a video container ".repeat(200));
        let config = ws.settings(json!({}));

        // Act
        let summary = run_batch(&config).unwrap();

        // Assert
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.ledgers_saved, 0);
        assert!(!ws.month_folder().join("A_VID_0001.mp4").exists());
        assert!(!ws.month_folder().join("metadata.json").exists());
    }
}
