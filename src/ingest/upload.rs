use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::ingest::IngestError;

/// One file as submitted by the browser upload widget
///
/// `contents` is a data URL: `<mime type>;base64,<payload>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFile {
    pub filename: String,
    pub contents: String,
}

/// A decoded upload: original filename plus raw bytes
#[derive(Debug, Clone)]
pub struct RawUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    /// Build a data-URL upload from raw bytes
    pub fn encode(filename: impl Into<String>, mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            filename: filename.into(),
            contents: format!("data:{mime_type};base64,{}", STANDARD.encode(bytes)),
        }
    }

    /// Strip everything up to the first comma and base64-decode the rest
    pub fn decode(&self) -> Result<RawUpload, IngestError> {
        let (_, payload) = self.contents.split_once(',').ok_or_else(|| {
            IngestError::malformed(&self.filename, "contents are not a base64 data URL")
        })?;

        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| IngestError::malformed(&self.filename, format!("invalid base64: {e}")))?;

        Ok(RawUpload {
            filename: self.filename.clone(),
            bytes,
        })
    }
}
