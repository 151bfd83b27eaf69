// Document I/O - read/write YAML envelopes, one file per document

use crate::error::{RegistrarError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// File extension used for every stored document.
pub const DOCUMENT_EXTENSION: &str = "yaml";

/// A loaded document: storage key, implicit timestamps and typed data.
///
/// `key` is storage-internal (derived from the file name) and never equal to
/// the numeric business id carried inside `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document<T> {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub data: T,
}

impl<T> Document<T> {
    /// Wrap freshly created data under a new storage key.
    pub fn new(data: T) -> Self {
        let now = Utc::now();
        Document {
            key: new_key(),
            created_at: now,
            modified_at: now,
            data,
        }
    }
}

/// On-disk shape. The key lives in the file name, not the file.
#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
    data: T,
}

/// Generate a new storage key.
pub fn new_key() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}

/// Read a document file. The key is taken from the file stem.
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Document<T>> {
    let key = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| {
            RegistrarError::Other(format!("Invalid document path: {}", path.display()))
        })?
        .to_string();
    let raw = std::fs::read_to_string(path)?;
    let envelope: Envelope<T> = serde_yaml::from_str(&raw)?;
    Ok(Document {
        key,
        created_at: envelope.created_at,
        modified_at: envelope.modified_at,
        data: envelope.data,
    })
}

/// Write a document file atomically: the content goes to a temp file in the
/// same directory which is then renamed over the target.
pub fn write_document<T: Serialize>(path: &Path, doc: &Document<T>) -> Result<()> {
    let envelope = Envelope {
        created_at: doc.created_at,
        modified_at: doc.modified_at,
        data: &doc.data,
    };
    let yaml = serde_yaml::to_string(&envelope)?;

    let dir = path.parent().ok_or_else(|| {
        RegistrarError::Other(format!("Document path has no parent: {}", path.display()))
    })?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(yaml.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| RegistrarError::Io(e.error))?;
    Ok(())
}

/// Delete a document file. Missing files are not an error.
pub fn delete_document(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
