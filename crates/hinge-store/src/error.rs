use hinge_core::HingeError;

/// Failures of the snapshot layer. Callers outside the store see them as
/// [`HingeError::Persistence`], except `NotFound`, which keeps its meaning.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session database: {0}")]
    Database(String),
    #[error("no persisted {0}")]
    NotFound(String),
    #[error("corrupt session snapshot: {0}")]
    Serialization(String),
    #[error("session database path: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<StoreError> for HingeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::Persistence(other.to_string()),
        }
    }
}
