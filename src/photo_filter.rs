use std::path::Path;

/// Trait for deciding which incoming files are candidates for import
pub trait PhotoFilter {
    fn should_include(&self, path: &Path) -> bool;
}

/// Skips `.tmp` files that cameras and sync tools leave mid-transfer.
pub struct TempFileFilter;

impl TempFileFilter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TempFileFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl PhotoFilter for TempFileFilter {
    fn should_include(&self, path: &Path) -> bool {
        !path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("tmp"))
    }
}
