use std::path::Path;

use snafu::ensure;

use crate::error::{
    EmptyFileSnafu, FileTooLargeSnafu, UnsupportedFileTypeSnafu, ValidationResult,
};

const MEBIBYTE: u64 = 1024 * 1024;

/// A file picked by the user, not yet accepted by any policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|extension| extension.to_str())
            .map(|extension| extension.to_ascii_lowercase())
    }
}

/// Accepted types and size cap for one file-selection surface.
///
/// Type entries ending in `/*` accept the whole top-level type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    pub label: &'static str,
    pub accepted_types: &'static [&'static str],
    pub accepted_extensions: &'static [&'static str],
    pub max_bytes: u64,
}

impl UploadPolicy {
    /// End-user capture panel: any image, or a PDF.
    pub const fn invoice_capture() -> Self {
        Self {
            label: "invoice capture",
            accepted_types: &["image/*", "application/pdf"],
            accepted_extensions: &["jpg", "jpeg", "png", "gif", "bmp", "webp", "heic", "pdf"],
            max_bytes: 10 * MEBIBYTE,
        }
    }

    /// Administrative form/template upload.
    pub const fn form_template() -> Self {
        Self {
            label: "form template",
            accepted_types: &[
                "application/json",
                "application/pdf",
                "text/csv",
                "application/vnd.ms-excel",
            ],
            accepted_extensions: &["xlsx"],
            max_bytes: 5 * MEBIBYTE,
        }
    }

    pub fn accepts_type(&self, file: &SelectedFile) -> bool {
        let mime_type = file.mime_type.trim().to_ascii_lowercase();
        let by_type = self.accepted_types.iter().any(|accepted| {
            match accepted.strip_suffix("/*") {
                Some(top_level) => mime_type
                    .split_once('/')
                    .is_some_and(|(kind, subtype)| kind == top_level && !subtype.is_empty()),
                None => mime_type == *accepted,
            }
        });

        by_type
            || file.extension().is_some_and(|extension| {
                self.accepted_extensions
                    .iter()
                    .any(|accepted| *accepted == extension)
            })
    }

    /// Type first, then size, matching the order the user fixes them in.
    pub fn validate(&self, file: &SelectedFile) -> ValidationResult<()> {
        ensure!(
            self.accepts_type(file),
            UnsupportedFileTypeSnafu {
                stage: "validate-upload-type",
                policy: self.label,
                file_name: file.name.clone(),
                mime_type: file.mime_type.clone(),
            }
        );
        ensure!(
            file.size_bytes() <= self.max_bytes,
            FileTooLargeSnafu {
                stage: "validate-upload-size",
                file_name: file.name.clone(),
                size_bytes: file.size_bytes(),
                max_bytes: self.max_bytes,
            }
        );
        ensure!(
            file.size_bytes() > 0,
            EmptyFileSnafu {
                stage: "validate-upload-size",
                file_name: file.name.clone(),
            }
        );
        Ok(())
    }
}

/// Guesses a MIME type from a file name, for callers that only know the path.
pub fn mime_type_for_name(name: &str) -> &'static str {
    let extension = Path::new(name)
        .extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| extension.to_ascii_lowercase());

    match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("heic") => "image/heic",
        Some("pdf") => "application/pdf",
        Some("json") => "application/json",
        Some("csv") => "text/csv",
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}
