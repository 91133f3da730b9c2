use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("API error: {message}")]
    Api { message: String },

    #[error("Rate limited: {message}")]
    RateLimited { message: String },

    /// The post was accepted but its id could not be recovered.
    #[error("Submission accepted but unconfirmed: {message}")]
    SubmissionUnconfirmed { message: String },

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),

    #[error(transparent)]
    Download(#[from] DownloadError),
}

pub type Result<T> = std::result::Result<T, HarvestError>;

/// Failure of a single media download. Never fatal for a run.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Worth another attempt on a later run: timeouts, connection drops, 5xx, 429.
    #[error("transient failure fetching {url}: {reason}")]
    Transient { url: String, reason: String },

    #[error("permanent failure fetching {url}: {reason}")]
    Permanent { url: String, reason: String },

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DownloadError::Transient { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, DownloadError::Transient { reason, .. } if reason.starts_with("HTTP 429"))
    }

    /// Classify a non-200 response status.
    pub fn from_status(url: &str, status: u16) -> Self {
        let reason = format!("HTTP {status}");
        if status == 429 || (500..=599).contains(&status) {
            DownloadError::Transient { url: url.to_string(), reason }
        } else {
            DownloadError::Permanent { url: url.to_string(), reason }
        }
    }

    /// Classify a transport-level error from reqwest.
    pub fn from_transport(url: &str, err: &reqwest::Error) -> Self {
        let reason = err.to_string();
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            DownloadError::Transient { url: url.to_string(), reason }
        } else {
            DownloadError::Permanent { url: url.to_string(), reason }
        }
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DownloadError::Transient { .. } => "transient",
            DownloadError::Permanent { .. } => "permanent",
            DownloadError::Io { .. } => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(DownloadError::from_status("u", 503).is_transient());
        assert!(DownloadError::from_status("u", 429).is_transient());
        assert!(DownloadError::from_status("u", 429).is_rate_limited());
        assert!(!DownloadError::from_status("u", 404).is_transient());
        assert!(!DownloadError::from_status("u", 500).is_rate_limited());
        assert_eq!(DownloadError::from_status("u", 403).kind(), "permanent");
    }
}
