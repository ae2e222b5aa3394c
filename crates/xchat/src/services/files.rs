//! Upload storage
//!
//! Uploaded bytes arrive already received; this service decides whether to
//! keep them, stores them under a generated name and fingerprints them so a
//! later read can detect tampering.

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;
use xchat_store::Attachment;

use crate::config::ChatConfig;
use crate::error::{Error, Result};

/// Longest stored original name, matching the schema's `Name` type.
const MAX_NAME_LEN: usize = 100;
const MAX_MIME_LEN: usize = MAX_NAME_LEN;

/// A file handed over by the caller.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    /// Content type claimed by the client, if any
    pub mime_type: Option<String>,
    pub bytes: Bytes,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

pub struct FileUploadService {
    uploads_dir: PathBuf,
    max_bytes: u64,
    allowed_extensions: Vec<String>,
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Reduce a client-supplied name to a safe base name.
///
/// Directory parts are dropped, anything outside `[A-Za-z0-9._-]` becomes
/// `_`, leading dots are stripped and the stem is shortened so the whole
/// name fits the schema.
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        return "file".to_string();
    }
    if cleaned.len() <= MAX_NAME_LEN {
        return cleaned.to_string();
    }

    match cleaned.rsplit_once('.') {
        Some((stem, ext)) if ext.len() < MAX_NAME_LEN / 2 => {
            let keep = MAX_NAME_LEN - ext.len() - 1;
            format!("{}.{}", &stem[..keep.min(stem.len())], ext)
        }
        _ => cleaned[..MAX_NAME_LEN].to_string(),
    }
}

fn extension_of(name: &str) -> Option<String> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// `type/subtype` with no whitespace or parameters, short enough to store.
pub fn is_valid_mime_type(mime_type: &str) -> bool {
    if mime_type.len() > MAX_MIME_LEN
        || mime_type.chars().any(|c| c.is_whitespace() || c.is_control() || c == ';')
    {
        return false;
    }
    matches!(
        mime_type.split_once('/'),
        Some((kind, subtype)) if !kind.is_empty() && !subtype.is_empty() && !subtype.contains('/')
    )
}

/// Content type for a known extension.
pub fn guess_mime_type(extension: &str) -> &'static str {
    match extension {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "json" => "application/json",
        "zip" => "application/zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

impl FileUploadService {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            uploads_dir: config.uploads_dir.clone(),
            max_bytes: config.max_upload_bytes,
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|ext| ext.to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    /// Validate and persist an upload, returning its attachment metadata.
    pub async fn store(&self, upload: &Upload) -> Result<Attachment> {
        if upload.bytes.is_empty() {
            return Err(Error::Upload("file is empty".into()));
        }
        let size = upload.bytes.len() as u64;
        if size > self.max_bytes {
            warn!(
                "[Files] Rejected {} ({} bytes, limit {})",
                upload.file_name, size, self.max_bytes
            );
            return Err(Error::Upload(format!(
                "file is {} bytes, the limit is {}",
                size, self.max_bytes
            )));
        }

        let name = sanitize_file_name(&upload.file_name);
        let extension = extension_of(&name)
            .filter(|ext| self.allowed_extensions.contains(ext))
            .ok_or_else(|| {
                warn!("[Files] Rejected {}: extension not allowed", upload.file_name);
                Error::Upload(format!("file type of '{}' is not allowed", name))
            })?;

        let mime_type = match upload.mime_type.as_deref().map(str::trim) {
            Some(claimed) if !claimed.is_empty() => {
                if !is_valid_mime_type(claimed) {
                    warn!("[Files] Rejected {}: bad MIME type", upload.file_name);
                    return Err(Error::Upload(format!(
                        "MIME type must look like type/subtype and be at most {} characters",
                        MAX_MIME_LEN
                    )));
                }
                claimed.to_string()
            }
            _ => guess_mime_type(&extension).to_string(),
        };

        let stored_name = format!("{}.{}", Uuid::new_v4().simple(), extension);
        let target = self.uploads_dir.join(&stored_name);
        let temp = self.uploads_dir.join(format!("{}.tmp", stored_name));

        fs::create_dir_all(&self.uploads_dir).await?;
        fs::write(&temp, &upload.bytes).await?;
        fs::rename(&temp, &target).await?;

        let checksum = sha256_hex(&upload.bytes);
        info!(
            "[Files] Stored {} as {} ({} bytes, {})",
            name, stored_name, size, mime_type
        );

        Ok(Attachment {
            name,
            stored_name,
            mime_type,
            size,
            checksum,
        })
    }

    /// Read a stored attachment back, verifying size and checksum.
    pub async fn open(&self, attachment: &Attachment) -> Result<Bytes> {
        let path = self.path_of(attachment)?;
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found("file", &attachment.stored_name))
            }
            Err(e) => return Err(e.into()),
        };

        if data.len() as u64 != attachment.size || sha256_hex(&data) != attachment.checksum {
            warn!("[Files] Checksum mismatch for {}", attachment.stored_name);
            return Err(Error::Upload(format!(
                "stored file {} does not match its checksum",
                attachment.stored_name
            )));
        }
        Ok(Bytes::from(data))
    }

    /// Delete a stored attachment. Returns false if it was already gone.
    pub async fn remove(&self, attachment: &Attachment) -> Result<bool> {
        let path = self.path_of(attachment)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("[Files] Removed {}", attachment.stored_name);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn path_of(&self, attachment: &Attachment) -> Result<PathBuf> {
        let name = &attachment.stored_name;
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(Error::Upload(format!("invalid stored name '{}'", name)));
        }
        Ok(self.uploads_dir.join(name))
    }
}
