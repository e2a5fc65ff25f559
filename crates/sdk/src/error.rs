use thiserror::Error;

/// Boxed error payload produced by injected handler and cursor-store
/// implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors fetching a feed page.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level failure or timeout. Transient.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered 5xx. Transient.
    #[error("server unavailable ({status})")]
    ServerUnavailable { status: u16 },

    /// The server rejected the request (4xx). A stale or compacted offset
    /// is not rejected by conforming servers; this indicates a genuinely
    /// malformed request and is surfaced to the caller.
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The response body was not a feed page.
    #[error("malformed feed page: {0}")]
    Decode(#[from] serde_json::Error),

    /// A link could not be resolved against the feed root.
    #[error("invalid feed link {link}: {source}")]
    InvalidLink {
        link: String,
        #[source]
        source: url::ParseError,
    },
}

impl FetchError {
    /// Transient failures are retried by the poller with the cursor
    /// unchanged; everything else surfaces.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Transport(_) | FetchError::ServerUnavailable { .. }
        )
    }
}

/// Fatal poller failures.
///
/// Transient conditions (transport errors, 5xx, handler failures) are
/// retried internally and never surface; these variants leave the
/// last-known-good cursor intact and require the operator.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("cursor load failed: {0}")]
    CursorLoad(#[source] BoxError),

    /// Retries exhausted while persisting the cursor. Neither silently
    /// advancing nor silently stalling is safe here; both can violate the
    /// ordering/at-least-once contract.
    #[error("cursor persistence failed after {attempts} attempts: {source}")]
    CursorPersistence {
        attempts: u32,
        #[source]
        source: BoxError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transience_classification() {
        assert!(FetchError::ServerUnavailable { status: 503 }.is_transient());
        assert!(
            !FetchError::Rejected {
                status: 400,
                message: "bad offset".to_string()
            }
            .is_transient()
        );
    }
}
