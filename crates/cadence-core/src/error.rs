use thiserror::Error;

#[derive(Debug, Error)]
pub enum CadenceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl CadenceError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            CadenceError::Config(_) => "CONFIG_ERROR",
            CadenceError::InvalidSetting { .. } => "INVALID_SETTING",
            CadenceError::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }
}

pub type Result<T> = std::result::Result<T, CadenceError>;
