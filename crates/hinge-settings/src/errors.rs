use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read hinge settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("hinge settings are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A value parsed but cannot be honored, e.g. replay without history.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;
