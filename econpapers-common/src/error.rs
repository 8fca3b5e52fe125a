use std::path::PathBuf;

use reqwest::StatusCode;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure of a single page fetch. Every variant is retryable; callers decide
/// when to give up.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {0}")]
    Status(StatusCode),

    #[error("unexpected page structure: {0}")]
    Parse(String),
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::Status(status) if *status == StatusCode::TOO_MANY_REQUESTS)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read or write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid paper URL {href:?}: {source}")]
    InvalidUrl {
        href: String,
        #[source]
        source: url::ParseError,
    },

    #[error("catalog page {page} could not be fetched after {attempts} attempts: {source}")]
    CatalogFetch {
        page: u32,
        attempts: u32,
        #[source]
        source: FetchError,
    },

    #[error("invalid --{name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("logger initialisation failed: {0}")]
    Logger(#[from] log::SetLoggerError),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Error::Json {
            path: path.into(),
            source,
        }
    }
}
