use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Trait for the filesystem operations the pipeline performs on the library
pub trait FileSystemWriter {
    fn create_directory(&self, path: &Path) -> io::Result<()>;
    /// Copies `source` to a new file at `destination`; fails if it exists.
    fn copy_file(&self, source: &Path, destination: &Path) -> io::Result<u64>;
    fn remove_file_if_present(&self, path: &Path) -> io::Result<bool>;
    /// Length of the file at `path`, `None` if there is no file.
    fn file_length(&self, path: &Path) -> io::Result<Option<u64>>;
}

/// Concrete implementation that writes to the actual filesystem
pub struct RealFileSystemWriter;

impl RealFileSystemWriter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RealFileSystemWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystemWriter for RealFileSystemWriter {
    fn create_directory(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn copy_file(&self, source: &Path, destination: &Path) -> io::Result<u64> {
        let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, File::open(source)?);
        let target = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(destination)?;
        let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, target);
        let copied = io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
        Ok(copied)
    }

    fn remove_file_if_present(&self, path: &Path) -> io::Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn file_length(&self, path: &Path) -> io::Result<Option<u64>> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}
