use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistrarError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Document already exists: {collection}/{id}")]
    AlreadyExists { collection: String, id: String },

    #[error("Concurrency conflict on {collection}/{id}: the record was modified by another writer")]
    Conflict { collection: String, id: String },

    #[error(
        "Cannot delete {collection}/{id}: referenced by {dependents} document(s) in '{dependent_collection}'"
    )]
    HasDependents {
        collection: String,
        id: String,
        dependent_collection: String,
        dependents: usize,
    },

    #[error("Partial synchronization failure after {applied} of {attempted} writes: {source}")]
    PartialSync {
        applied: usize,
        attempted: usize,
        #[source]
        source: Box<RegistrarError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

impl RegistrarError {
    pub fn not_found(collection: &str, id: impl ToString) -> Self {
        RegistrarError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn conflict(collection: &str, id: impl ToString) -> Self {
        RegistrarError::Conflict {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    /// True for errors a caller can resolve by re-reading and retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RegistrarError::Conflict { .. } | RegistrarError::PartialSync { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RegistrarError>;
