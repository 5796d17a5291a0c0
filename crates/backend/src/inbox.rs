use std::path::{Path, PathBuf};

use snafu::ResultExt;

use super::provider::{
    BackendResult, BoxFuture, CreateInboxSnafu, InvoiceProcessor, InvoiceUpload,
    ProcessingReceipt, WriteArtifactSnafu,
};

/// Hands artifacts to the processing pipeline through a spool directory.
///
/// Each upload lands as `<reference>.<ext>`; the OCR workers pick files up from there.
pub struct InboxProcessor {
    inbox_dir: PathBuf,
}

impl InboxProcessor {
    pub fn new(inbox_dir: impl Into<PathBuf>) -> Self {
        Self {
            inbox_dir: inbox_dir.into(),
        }
    }

    pub fn inbox_dir(&self) -> &Path {
        &self.inbox_dir
    }

    async fn spool(&self, upload: InvoiceUpload) -> BackendResult<ProcessingReceipt> {
        tokio::fs::create_dir_all(&self.inbox_dir)
            .await
            .context(CreateInboxSnafu {
                stage: "create-inbox-directory",
                path: self.inbox_dir.clone(),
            })?;

        let path = self
            .inbox_dir
            .join(format!("{}.{}", upload.reference, extension_for(&upload.mime_type)));
        tokio::fs::write(&path, &upload.bytes[..])
            .await
            .context(WriteArtifactSnafu {
                stage: "write-inbox-artifact",
                path: path.clone(),
            })?;

        tracing::info!(
            reference = %upload.reference,
            file_name = %upload.file_name,
            size_bytes = upload.bytes.len(),
            path = ?path,
            "artifact spooled for processing"
        );

        Ok(ProcessingReceipt {
            reference: upload.reference,
            location: Some(path.display().to_string()),
        })
    }
}

impl InvoiceProcessor for InboxProcessor {
    fn process<'a>(&'a self, upload: InvoiceUpload) -> BoxFuture<'a, BackendResult<ProcessingReceipt>> {
        Box::pin(self.spool(upload))
    }
}

pub fn extension_for(mime_type: &str) -> &'static str {
    match mime_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        "image/heic" => "heic",
        "application/pdf" => "pdf",
        "application/json" => "json",
        "text/csv" => "csv",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_mime_types_map_to_extensions() {
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for(" Application/PDF "), "pdf");
        assert_eq!(extension_for("application/octet-stream"), "bin");
    }

    #[tokio::test]
    async fn spooling_into_an_unwritable_location_reports_the_stage() {
        let blocker = std::env::temp_dir().join(format!("invoice-desk-inbox-{}", std::process::id()));
        let _ = tokio::fs::write(&blocker, b"file, not a directory").await;

        let processor = InboxProcessor::new(blocker.join("nested"));
        let upload = InvoiceUpload {
            reference: "r1".to_string(),
            file_name: "a.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            bytes: vec![1_u8, 2, 3].into(),
        };

        let result = processor.process(upload).await;
        assert!(matches!(
            result,
            Err(crate::BackendError::CreateInbox { .. })
        ));
        let _ = tokio::fs::remove_file(&blocker).await;
    }

    #[tokio::test]
    async fn spooled_artifact_is_written_under_its_reference() {
        let dir = std::env::temp_dir().join(format!("invoice-desk-spool-{}", std::process::id()));
        let processor = InboxProcessor::new(&dir);
        let upload = InvoiceUpload {
            reference: "artifact-7".to_string(),
            file_name: "scan.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            bytes: b"%PDF-1.7".to_vec().into(),
        };

        let receipt = processor.process(upload).await.ok();
        let written = tokio::fs::read(dir.join("artifact-7.pdf")).await.ok();

        assert_eq!(receipt.map(|receipt| receipt.reference), Some("artifact-7".to_string()));
        assert_eq!(written.as_deref(), Some(&b"%PDF-1.7"[..]));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
