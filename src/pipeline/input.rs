//! Input resolution: turn a user-supplied path or URL into PDF bytes.
//!
//! pdfium can load a document straight from a byte slice, so both local
//! files and downloads end up as an in-memory [`PdfSource`]. The `%PDF`
//! magic is checked here so callers get a meaningful error instead of a
//! pdfium parse failure.

use crate::error::GradeError;
use std::path::PathBuf;
use tracing::{debug, info};

/// PDF bytes plus a human-readable name for error messages.
#[derive(Debug, Clone)]
pub struct PdfSource {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl PdfSource {
    /// Wrap in-memory bytes, validating the PDF magic.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, GradeError> {
        let name = name.into();
        check_magic(&name, &bytes)?;
        Ok(Self { name, bytes })
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Reject anything that does not start with `%PDF`.
pub fn check_magic(name: &str, bytes: &[u8]) -> Result<(), GradeError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        return Err(GradeError::NotAPdf {
            source_name: name.to_string(),
            magic: bytes.iter().take(4).copied().collect(),
        });
    }
    Ok(())
}

/// Resolve the input string to PDF bytes.
///
/// URLs are downloaded; anything else is read as a local file.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<PdfSource, GradeError> {
    if input.trim().is_empty() {
        return Err(GradeError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(input).await
    }
}

async fn read_local(path_str: &str) -> Result<PdfSource, GradeError> {
    let path = PathBuf::from(path_str);

    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(GradeError::PermissionDenied { path });
        }
        Err(_) => return Err(GradeError::FileNotFound { path }),
    };

    debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
    PdfSource::from_bytes(path.display().to_string(), bytes)
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<PdfSource, GradeError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| GradeError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            GradeError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            GradeError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(GradeError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| GradeError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    PdfSource::from_bytes(url, bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/sheet.pdf"));
        assert!(is_url("http://example.com/sheet.pdf"));
        assert!(!is_url("/tmp/sheet.pdf"));
        assert!(!is_url("sheet.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn magic_check() {
        assert!(check_magic("ok", b"%PDF-1.5\n").is_ok());
        let err = check_magic("bad", b"PK\x03\x04").unwrap_err();
        match err {
            GradeError::NotAPdf { magic, .. } => assert_eq!(magic, b"PK\x03\x04".to_vec()),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(check_magic("short", b"%P").is_err());
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = resolve_input("/definitely/not/here.pdf", 5).await.unwrap_err();
        assert!(matches!(err, GradeError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn empty_input_is_invalid() {
        let err = resolve_input("  ", 5).await.unwrap_err();
        assert!(matches!(err, GradeError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn local_non_pdf_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.pdf");
        std::fs::write(&path, b"hello world").unwrap();
        let err = resolve_input(path.to_str().unwrap(), 5).await.unwrap_err();
        assert!(matches!(err, GradeError::NotAPdf { .. }));
    }

    #[tokio::test]
    async fn local_pdf_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheet.pdf");
        std::fs::write(&path, b"%PDF-1.5\n%%EOF\n").unwrap();
        let src = resolve_input(path.to_str().unwrap(), 5).await.unwrap();
        assert!(src.bytes.starts_with(b"%PDF"));
        assert!(src.name.ends_with("sheet.pdf"));
    }
}
