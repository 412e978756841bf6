use chrono::format::{Item, StrftimeItems};
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::config::{Config, PhotoSource};
use crate::error::ImportError;

/// Folder naming pattern, stored as a chrono format string.
///
/// Accepts .NET style custom date tokens (`yyyy/MM`, `yyyy/yyyy-MM-dd`) or a
/// chrono pattern if the input already contains a `%`. Both `/` and `\`
/// separate nested folders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatePattern {
    chrono_format: String,
}

fn token_regex() -> &'static Regex {
    static TOKENS: OnceLock<Regex> = OnceLock::new();
    TOKENS.get_or_init(|| {
        Regex::new(r"'[^']*'|yyyy|yy|MMMM|MMM|MM|M|dddd|ddd|dd|d|HH|H|mm|ss")
            .expect("static regex is valid")
    })
}

impl DatePattern {
    pub fn parse(pattern: &str) -> Result<Self, ImportError> {
        if pattern.trim().is_empty() {
            return Err(ImportError::Config(
                "DestinationSubFolderPattern is empty".to_string(),
            ));
        }

        let chrono_format = if pattern.contains('%') {
            pattern.to_string()
        } else {
            translate_dotnet_pattern(pattern)
        };

        let unsupported = || ImportError::Config(format!("Unsupported folder pattern '{}'", pattern));
        if StrftimeItems::new(&chrono_format).any(|item| matches!(item, Item::Error)) {
            return Err(unsupported());
        }

        // Offset specifiers parse fine but cannot render a naive date.
        let sample = NaiveDate::from_ymd_opt(2000, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .ok_or_else(unsupported)?;
        let mut rendered = String::new();
        write!(rendered, "{}", sample.format(&chrono_format)).map_err(|_| unsupported())?;

        Ok(Self { chrono_format })
    }

    pub fn chrono_format(&self) -> &str {
        &self.chrono_format
    }

    /// Relative folder for a local date, one component per separator.
    ///
    /// `parse` has already rendered the format once, so it cannot fail here.
    pub fn relative_folder(&self, local: &NaiveDateTime) -> PathBuf {
        local
            .format(&self.chrono_format)
            .to_string()
            .split(['/', '\\'])
            .filter(|part| !part.is_empty())
            .collect()
    }
}

fn translate_dotnet_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut last = 0;
    for m in token_regex().find_iter(pattern) {
        push_literal(&mut out, &pattern[last..m.start()]);
        let token = m.as_str();
        match token {
            "yyyy" => out.push_str("%Y"),
            "yy" => out.push_str("%y"),
            "MMMM" => out.push_str("%B"),
            "MMM" => out.push_str("%b"),
            "MM" => out.push_str("%m"),
            "M" => out.push_str("%-m"),
            "dddd" => out.push_str("%A"),
            "ddd" => out.push_str("%a"),
            "dd" => out.push_str("%d"),
            "d" => out.push_str("%-d"),
            "HH" => out.push_str("%H"),
            "H" => out.push_str("%-H"),
            "mm" => out.push_str("%M"),
            "ss" => out.push_str("%S"),
            quoted => push_literal(&mut out, quoted.trim_matches('\'')),
        }
        last = m.end();
    }
    push_literal(&mut out, &pattern[last..]);
    out
}

fn push_literal(out: &mut String, literal: &str) {
    out.push_str(&literal.replace('%', "%%"));
}

/// Where a source file lands in the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub folder: PathBuf,
    pub file_name: String,
    pub full_path: PathBuf,
}

/// Computes destination folders and file names from the effective date.
pub struct PathGenerator {
    root: PathBuf,
    pattern: DatePattern,
}

impl PathGenerator {
    pub fn new(root: impl Into<PathBuf>, pattern: DatePattern) -> Self {
        Self {
            root: root.into(),
            pattern,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ImportError> {
        let pattern = DatePattern::parse(&config.destination_sub_folder_pattern)?;
        Ok(Self::new(&config.destination_path, pattern))
    }

    /// Generates `{root}/{pattern(local date)}/{prefix}{name}`, swapping the
    /// extension for `extension_override` when the processor changes format.
    pub fn generate(
        &self,
        local_date: &NaiveDateTime,
        source_file_name: &str,
        source: &PhotoSource,
        extension_override: Option<&str>,
    ) -> Destination {
        let folder = self.root.join(self.pattern.relative_folder(local_date));

        let base_name = match extension_override {
            Some(ext) => replace_extension(source_file_name, ext),
            None => source_file_name.to_string(),
        };
        let file_name = format!("{}{}", source.filename_prefix, base_name);
        let full_path = folder.join(&file_name);

        Destination {
            folder,
            file_name,
            full_path,
        }
    }
}

fn replace_extension(file_name: &str, extension: &str) -> String {
    let extension = extension.trim_start_matches('.');
    Path::new(file_name)
        .with_extension(extension)
        .to_string_lossy()
        .into_owned()
}
