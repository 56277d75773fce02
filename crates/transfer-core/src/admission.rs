//! File admission policy
//!
//! Decides whether a candidate file may join an upload session before any of
//! its bytes are written. Checks run in a fixed order and the first failing
//! check wins, so a file with no extension is reported as such even when it is
//! also too large.
//!
//! Two different caps are in play. A single file may be at most the smaller of
//! the per-file and per-session caps, while the running session total is held
//! to the larger of the two.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use utoipa::ToSchema;

use crate::models::SessionUsage;

pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Why a file was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCode {
    MissingExtension,
    ExtensionNotAllowed,
    InvalidSize,
    EmptyFile,
    FileTooLarge,
    TooManyFiles,
    TotalSizeExceeded,
    DuplicateName,
}

impl RejectionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCode::MissingExtension => "missing_extension",
            RejectionCode::ExtensionNotAllowed => "extension_not_allowed",
            RejectionCode::InvalidSize => "invalid_size",
            RejectionCode::EmptyFile => "empty_file",
            RejectionCode::FileTooLarge => "file_too_large",
            RejectionCode::TooManyFiles => "too_many_files",
            RejectionCode::TotalSizeExceeded => "total_size_exceeded",
            RejectionCode::DuplicateName => "duplicate_name",
        }
    }

    /// Rejections caused by byte limits rather than by the file's shape.
    pub fn is_size_limit(&self) -> bool {
        matches!(
            self,
            RejectionCode::FileTooLarge | RejectionCode::TotalSizeExceeded
        )
    }
}

impl Display for RejectionCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

/// A refused file: a short message for the upload widget and a verbose one
/// for logs and detail views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Rejection {
    pub code: RejectionCode,
    pub error: String,
    pub verbose_error: String,
}

impl Rejection {
    fn new(code: RejectionCode, error: String, verbose_error: String) -> Self {
        Self {
            code,
            error,
            verbose_error,
        }
    }

    /// Check 8, also raised when a concurrent upload claims the name first.
    pub fn duplicate_name(filename: &str) -> Self {
        Self::new(
            RejectionCode::DuplicateName,
            "A file with the same name has already been uploaded.".to_string(),
            format!(
                "A file with the name \"{}\" has already been uploaded",
                filename
            ),
        )
    }
}

impl Display for Rejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{} ({})", self.error, self.code)
    }
}

/// Accepted extensions, grouped by a label shown to users.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceptedFormats {
    groups: BTreeMap<String, Vec<String>>,
}

impl AcceptedFormats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group<I, S>(mut self, name: &str, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entry = self.groups.entry(name.to_string()).or_default();
        for ext in extensions {
            let ext = ext.as_ref().trim().trim_start_matches('.').to_lowercase();
            if !ext.is_empty() && !entry.contains(&ext) {
                entry.push(ext);
            }
        }
        self
    }

    /// Parse `Group:ext,ext;Group:ext` as found in the environment.
    pub fn parse(raw: &str) -> Result<Self, anyhow::Error> {
        let mut formats = AcceptedFormats::new();
        for group in raw.split(';').map(str::trim).filter(|g| !g.is_empty()) {
            let (name, extensions) = group.split_once(':').ok_or_else(|| {
                anyhow::anyhow!("Invalid accepted format group '{}': expected Name:ext,ext", group)
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(anyhow::anyhow!(
                    "Invalid accepted format group '{}': missing group name",
                    group
                ));
            }
            formats = formats.with_group(name, extensions.split(','));
        }
        Ok(formats)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.values().all(Vec::is_empty)
    }

    /// Case-insensitive membership; group names play no part.
    pub fn allows(&self, extension: &str) -> bool {
        let extension = extension.to_lowercase();
        self.groups
            .values()
            .any(|exts| exts.iter().any(|e| *e == extension))
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.groups
            .iter()
            .map(|(name, exts)| (name.as_str(), exts.as_slice()))
    }
}

impl Display for AcceptedFormats {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let summary: Vec<String> = self
            .groups()
            .filter(|(_, exts)| !exts.is_empty())
            .map(|(name, exts)| format!("{} ({})", name, exts.join(", ")))
            .collect();
        write!(f, "{}", summary.join(", "))
    }
}

/// Limits applied to every candidate file.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_single_upload_mb: u64,
    pub max_total_upload_mb: u64,
    pub max_total_upload_count: u64,
    pub accepted_formats: AcceptedFormats,
}

impl UploadPolicy {
    /// Cap for one file: the smaller of the two configured caps.
    pub fn max_file_mb(&self) -> u64 {
        self.max_single_upload_mb.min(self.max_total_upload_mb)
    }

    /// Cap for a whole session: the larger of the two configured caps.
    pub fn max_session_mb(&self) -> u64 {
        self.max_single_upload_mb.max(self.max_total_upload_mb)
    }

    pub fn max_session_bytes(&self) -> u64 {
        self.max_session_mb() * BYTES_PER_MB
    }

    /// Check 6, also raised when a concurrent upload takes the last slot.
    pub fn too_many_files(&self, filename: &str) -> Rejection {
        Rejection::new(
            RejectionCode::TooManyFiles,
            "You can not upload anymore files.".to_string(),
            format!(
                "The file \"{}\" would push the total file count past the maximum number of files ({})",
                filename, self.max_total_upload_count
            ),
        )
    }

    /// Check 7, also raised when a concurrent upload uses up the budget.
    pub fn total_size_exceeded(&self, filename: &str) -> Rejection {
        let max_session_mb = self.max_session_mb();
        Rejection::new(
            RejectionCode::TotalSizeExceeded,
            format!("Maximum total upload size ({} MB) exceeded", max_session_mb),
            format!(
                "The file \"{}\" would push the total transfer size past the {}MB max",
                filename, max_session_mb
            ),
        )
    }

    /// Run every check in order against a file whose size is declared as text.
    ///
    /// Returns the parsed size on acceptance.
    pub fn check_file(
        &self,
        filename: &str,
        declared_size: &str,
        session: Option<&SessionUsage>,
    ) -> Result<u64, Rejection> {
        let extension = match filename.rsplit_once('.') {
            Some((_, ext)) => ext,
            None => {
                return Err(Rejection::new(
                    RejectionCode::MissingExtension,
                    "File does not have an extension.".to_string(),
                    format!("The file \"{}\" does not have a file extension", filename),
                ))
            }
        };

        if !self.accepted_formats.allows(extension) {
            return Err(Rejection::new(
                RejectionCode::ExtensionNotAllowed,
                format!("Files with \"{}\" extension are not allowed.", extension),
                format!(
                    "The file \"{}\" has an extension that is not accepted. Accepted formats: {}",
                    filename, self.accepted_formats
                ),
            ));
        }

        let size = match parse_declared_size(declared_size) {
            Some(size) => size,
            None => {
                return Err(Rejection::new(
                    RejectionCode::InvalidSize,
                    "File size is invalid.".to_string(),
                    format!(
                        "The file \"{}\" has an invalid size ({})",
                        filename, declared_size
                    ),
                ))
            }
        };

        if size == 0 {
            return Err(Rejection::new(
                RejectionCode::EmptyFile,
                "File is empty.".to_string(),
                format!("The file \"{}\" is empty", filename),
            ));
        }

        let max_file_mb = self.max_file_mb();
        if size > max_file_mb * BYTES_PER_MB {
            return Err(Rejection::new(
                RejectionCode::FileTooLarge,
                format!(
                    "File is too big ({:.2}MB). Max filesize: {}MB",
                    bytes_to_mb(size),
                    max_file_mb
                ),
                format!(
                    "The file \"{}\" is too big ({:.2}MB). Max filesize: {}MB",
                    filename,
                    bytes_to_mb(size),
                    max_file_mb
                ),
            ));
        }

        let Some(session) = session else {
            return Ok(size);
        };

        if session.file_count >= self.max_total_upload_count {
            return Err(self.too_many_files(filename));
        }

        if session.total_bytes.saturating_add(size) > self.max_session_bytes() {
            return Err(self.total_size_exceeded(filename));
        }

        if session.has_file_named(filename) {
            return Err(Rejection::duplicate_name(filename));
        }

        Ok(size)
    }
}

/// A declared size must be a non-negative integer.
pub fn parse_declared_size(raw: &str) -> Option<u64> {
    let value = raw.trim().parse::<i64>().ok()?;
    u64::try_from(value).ok()
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB as f64
}
