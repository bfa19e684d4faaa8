//! Local temporary storage for uploaded request images

use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Handle to a stored upload
#[derive(Debug, Clone, PartialEq)]
pub struct TempFile {
    pub path: PathBuf,
    pub mime_type: String,
    pub original_name: String,
}

/// Temp files live directly under the uploads directory with generated names
#[derive(Debug, Clone)]
pub struct TempFileStore {
    dir: PathBuf,
}

impl TempFileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` to a new file; the MIME type is sniffed from the content
    pub async fn store(&self, bytes: &[u8], original_name: &str) -> std::io::Result<TempFile> {
        let (mime_type, extension) = match infer::get(bytes) {
            Some(kind) => (kind.mime_type().to_string(), kind.extension()),
            None => ("application/octet-stream".to_string(), "bin"),
        };

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{}.{}", Uuid::new_v4(), extension));
        tokio::fs::write(&path, bytes).await?;

        tracing::debug!(path = %path.display(), mime_type = %mime_type, "Stored temp file");

        Ok(TempFile {
            path,
            mime_type,
            original_name: original_name.to_string(),
        })
    }

    /// Remove a stored file; returns false when it was already gone
    pub async fn delete(&self, file: &TempFile) -> std::io::Result<bool> {
        match tokio::fs::remove_file(&file.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
