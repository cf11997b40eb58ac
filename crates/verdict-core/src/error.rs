use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerdictError {
    #[error("invalid field path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid clause '{clause}': {reason}")]
    InvalidClause { clause: String, reason: String },

    #[error("missing binding: {0}")]
    MissingBinding(String),

    #[error("invalid binding '{key}': {reason}")]
    InvalidBinding { key: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("observer '{observer}' failed: {message}")]
    Observer { observer: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl VerdictError {
    pub fn observer(observer: impl Into<String>, message: impl Into<String>) -> Self {
        VerdictError::Observer {
            observer: observer.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VerdictError>;
