//! Photo attachments for checkouts and returns.
//!
//! A photo is either raw bytes picked from disk or a `data:` URL, the form
//! the offline queue persists.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use std::path::Path;
use tracing::debug;

use crate::error::{ColetaError, Result};

/// Extensions the server accepts on `upload-foto`.
pub const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "heic"];

/// Photo grid size on the checkout and return forms.
pub const MAX_PHOTOS_PER_SIDE: usize = 4;

/// Limit for a checkout recorded while offline.
pub const MAX_QUEUED_PHOTOS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum PhotoSource {
    Bytes(Vec<u8>),
    DataUrl(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhotoRef {
    pub file_name: String,
    pub source: PhotoSource,
}

/// Multipart payload for one upload.
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Reject file names the server would refuse.
pub fn check_extension(file_name: &str) -> Result<()> {
    match extension_of(file_name) {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(ColetaError::validation(format!(
            "Formato de foto não suportado: {file_name} (use {})",
            ALLOWED_EXTENSIONS.join(", ")
        ))),
    }
}

/// MIME type from the file's magic bytes, falling back to its extension.
pub fn content_type(file_name: &str, bytes: &[u8]) -> &'static str {
    if let Ok(format) = image::guess_format(bytes) {
        return format.to_mime_type();
    }
    match extension_of(file_name).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        _ => "application/octet-stream",
    }
}

pub fn encode_data_url(content_type: &str, bytes: &[u8]) -> String {
    format!("data:{content_type};base64,{}", BASE64_STANDARD.encode(bytes))
}

/// Split a base64 `data:` URL into its MIME type and decoded bytes.
pub fn decode_data_url(url: &str) -> Result<(String, Vec<u8>)> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| ColetaError::Storage("photo is not a data URL".into()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| ColetaError::Storage("data URL has no payload".into()))?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or_else(|| ColetaError::Storage("data URL is not base64 encoded".into()))?;
    let bytes = BASE64_STANDARD
        .decode(payload.trim())
        .map_err(|e| ColetaError::Storage(format!("data URL decode: {e}")))?;
    Ok((mime.to_string(), bytes))
}

impl PhotoRef {
    pub fn from_bytes(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            source: PhotoSource::Bytes(bytes),
        }
    }

    /// A photo read back from the offline queue.
    pub fn from_data_url(file_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            source: PhotoSource::DataUrl(url.into()),
        }
    }

    /// Read a photo from disk. The extension is checked before reading.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ColetaError::validation(format!("Invalid photo path: {}", path.display()))
            })?
            .to_string();
        check_extension(&file_name)?;
        let bytes = std::fs::read(path).map_err(|e| {
            ColetaError::validation(format!("Cannot read photo {}: {e}", path.display()))
        })?;
        if bytes.is_empty() {
            return Err(ColetaError::validation(format!("Photo {file_name} is empty")));
        }
        debug!(file = %file_name, size = bytes.len(), "photo loaded");
        Ok(Self::from_bytes(file_name, bytes))
    }

    /// The photo as a `data:` URL.
    pub fn to_data_url(&self) -> String {
        match &self.source {
            PhotoSource::Bytes(bytes) => {
                encode_data_url(content_type(&self.file_name, bytes), bytes)
            }
            PhotoSource::DataUrl(url) => url.clone(),
        }
    }

    pub fn to_upload(&self) -> Result<PhotoUpload> {
        match &self.source {
            PhotoSource::Bytes(bytes) => Ok(PhotoUpload {
                file_name: self.file_name.clone(),
                content_type: content_type(&self.file_name, bytes).to_string(),
                bytes: bytes.clone(),
            }),
            PhotoSource::DataUrl(url) => {
                let (mime, bytes) = decode_data_url(url)?;
                Ok(PhotoUpload {
                    file_name: self.file_name.clone(),
                    content_type: mime,
                    bytes,
                })
            }
        }
    }
}

/// Upload outcome for one submission. Failures never undo the checkout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PhotoReport {
    pub photos_uploaded: usize,
    pub photos_failed: usize,
}

impl PhotoReport {
    pub fn record(&mut self, ok: bool) {
        if ok {
            self.photos_uploaded += 1;
        } else {
            self.photos_failed += 1;
        }
    }

    /// Notification lines: `"N foto(s) enviada(s)"`, `"M foto(s) falharam"`.
    pub fn notifications(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if self.photos_uploaded > 0 {
            lines.push(format!("{} foto(s) enviada(s)", self.photos_uploaded));
        }
        if self.photos_failed > 0 {
            lines.push(format!("{} foto(s) falharam", self.photos_failed));
        }
        lines
    }
}
