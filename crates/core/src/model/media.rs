use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

//
// ─── ERRORS (domain validation) ────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaValidationError {
    #[error("Media reference cannot be empty.")]
    EmptyMediaRef,

    #[error("Media URL is not valid: {0}")]
    InvalidUrl(String),
}

//
// ─── MEDIA REFERENCES ──────────────────────────────────────────────────────────
//

/// Pointer to an image attached to a prompt or an option.
///
/// The engine never loads the media itself; upload and storage live elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "location", rename_all = "snake_case")]
pub enum MediaRef {
    FilePath(PathBuf),
    Url(Url),
}

impl MediaRef {
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, MediaValidationError> {
        let p = path.into();
        if p.as_os_str().is_empty() {
            return Err(MediaValidationError::EmptyMediaRef);
        }
        Ok(MediaRef::FilePath(p))
    }

    pub fn from_url(url: impl AsRef<str>) -> Result<Self, MediaValidationError> {
        let s = url.as_ref().trim();
        if s.is_empty() {
            return Err(MediaValidationError::EmptyMediaRef);
        }
        let u = Url::parse(s).map_err(|e| MediaValidationError::InvalidUrl(e.to_string()))?;
        Ok(MediaRef::Url(u))
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            MediaRef::FilePath(p) => Some(p.as_path()),
            MediaRef::Url(_) => None,
        }
    }

    pub fn as_url(&self) -> Option<&Url> {
        match self {
            MediaRef::Url(u) => Some(u),
            MediaRef::FilePath(_) => None,
        }
    }
}
