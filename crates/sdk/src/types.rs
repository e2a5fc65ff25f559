/// Poller lifecycle states.
///
/// `Fetching → Processing → Persisting → Fetching` while pages are
/// non-empty; `Sleeping` between polls of a drained feed and during
/// failure backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// Not running
    Idle,

    /// Requesting the next page
    Fetching,

    /// Applying page items to the handler
    Processing,

    /// Saving the advanced cursor
    Persisting,

    /// Waiting out the poll delay or a backoff
    Sleeping,
}

impl std::fmt::Display for PollerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollerState::Idle => write!(f, "idle"),
            PollerState::Fetching => write!(f, "fetching"),
            PollerState::Processing => write!(f, "processing"),
            PollerState::Persisting => write!(f, "persisting"),
            PollerState::Sleeping => write!(f, "sleeping"),
        }
    }
}

/// Configuration for a feed poller.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Root URL of the feed to poll.
    pub feed_url: String,

    /// Bearer secret sent with every fetch (pass-through; the server
    /// decides what to do with it).
    pub secret: Option<String>,

    /// Delay between polls once the feed is drained (milliseconds).
    pub poll_delay_ms: u64,

    /// Initial backoff after a transient failure (milliseconds).
    pub backoff_initial_ms: u64,

    /// Backoff ceiling (milliseconds).
    pub backoff_max_ms: u64,

    /// Per-fetch timeout (milliseconds). A timeout is a transient failure.
    pub fetch_timeout_ms: u64,

    /// Attempts before cursor persistence is reported fatal.
    pub persist_retry_attempts: u32,
}

impl PollerConfig {
    /// Create a new configuration for the given feed
    pub fn new(feed_url: impl Into<String>) -> Self {
        Self {
            feed_url: feed_url.into(),
            secret: None,
            poll_delay_ms: 5_000,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 30_000,
            fetch_timeout_ms: 10_000,
            persist_retry_attempts: 3,
        }
    }

    /// Set the bearer secret
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Set the idle poll delay
    pub fn with_poll_delay(mut self, delay_ms: u64) -> Self {
        self.poll_delay_ms = delay_ms;
        self
    }

    /// Set the transient-failure backoff window
    pub fn with_backoff(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.backoff_initial_ms = initial_ms;
        self.backoff_max_ms = max_ms;
        self
    }

    /// Set the per-fetch timeout
    pub fn with_fetch_timeout(mut self, timeout_ms: u64) -> Self {
        self.fetch_timeout_ms = timeout_ms;
        self
    }

    /// Set the number of cursor persistence attempts
    pub fn with_persist_retry_attempts(mut self, attempts: u32) -> Self {
        self.persist_retry_attempts = attempts;
        self
    }
}
