use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse {what}: {source}")]
    Parse {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("gcloud exited with {code}: {stderr}")]
    Process { code: i32, stderr: String },

    #[error("gcloud did not finish within {0:?}")]
    Timeout(std::time::Duration),

    #[error("gcloud not found on PATH")]
    GcloudNotFound,
}
