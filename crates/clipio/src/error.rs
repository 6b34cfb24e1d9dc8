use clip_manifest::{ManifestError, TrackKind};
use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("manifest error: {source}")]
    Manifest {
        #[from]
        source: ManifestError,
    },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("no {kind} track with id `{id}` in manifest")]
    TrackNotFound { kind: TrackKind, id: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl DownloadError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>, operation: &'static str) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn track_not_found(kind: TrackKind, id: impl Into<String>) -> Self {
        Self::TrackNotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether this failure is the echo of a sibling's cancellation rather
    /// than an originating error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
