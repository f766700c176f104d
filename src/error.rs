//! Crate-level error types.

use thiserror::Error;

/// Result type for research client operations.
pub type Result<T> = std::result::Result<T, ResearchError>;

/// Errors raised by the research client, the session store and the
/// orchestrator.
///
/// Most of these never reach a UI call site: the orchestrator folds them
/// into [`crate::research::ResearchState`] and a [`crate::research::RunOutcome`].
#[derive(Debug, Error)]
pub enum ResearchError {
    /// The remote server replied with a non-2xx HTTP status code.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// A TCP-level connection could not be established or dropped mid-body.
    #[error("Connection failed to {url}: {detail}")]
    Connect { url: String, detail: String },

    /// Response body could not be parsed as the expected JSON structure.
    #[error("JSON parse error on field '{field}': {detail}")]
    Json { field: String, detail: String },

    /// `start_research` was called without a chat to attach the job to.
    #[error("no active chat; open or create a chat before starting research")]
    NoActiveChat,

    /// The backend reported a failure (`step: "error"` or `status: "failed"`).
    /// Displays the server's own message.
    #[error("{0}")]
    ServerReported(String),

    /// Polling hit its hard cap without a terminal status.
    #[error("research timed out after {polls} status checks; please try again")]
    Timeout { polls: u32 },

    /// Too many consecutive polling errors.
    #[error("lost connection to research job after {failures} consecutive errors")]
    ConnectionLost { failures: u32 },

    /// Breadcrumb storage failed.
    #[error("session store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Configuration file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ResearchError {
    fn from(e: serde_json::Error) -> Self {
        ResearchError::Json {
            field: "body".into(),
            detail: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_http_contains_status_and_url() {
        let err = ResearchError::Http {
            status: 503,
            url: "http://localhost:8000/research/jobs/abc".into(),
        };
        let s = err.to_string();
        assert!(s.contains("503"), "{s}");
        assert!(s.contains("/research/jobs/abc"), "{s}");
    }

    #[test]
    fn timeout_message_asks_to_retry() {
        let s = ResearchError::Timeout { polls: 600 }.to_string();
        assert!(s.contains("600"));
        assert!(s.contains("try again"));
    }

    #[test]
    fn server_reported_shows_the_server_message() {
        assert_eq!(ResearchError::ServerReported("quota exceeded".into()).to_string(), "quota exceeded");
    }

    #[test]
    fn serde_error_converts_to_json_variant() {
        let e = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ResearchError = e.into();
        assert!(matches!(err, ResearchError::Json { .. }));
    }
}
