//! The cursor-driven polling loop.

use std::{sync::Arc, time::Duration};

use parking_lot::RwLock;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

use restfeed_types::{ClientCursor, FeedPage};

use crate::{
    client::{FeedClient, HttpFeedClient},
    cursor::CursorStore,
    error::{BoxError, FetchError, PollError},
    handler::EntryHandler,
    types::{PollerConfig, PollerState},
};

/// Delay between cursor persistence attempts.
const PERSIST_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Exponential backoff for transient failures.
struct Backoff {
    next: Duration,
    initial: Duration,
    max: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial,
            initial,
            max,
        }
    }

    fn delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.next = self.initial;
    }
}

/// Drives one feed through the fetch/process/persist loop.
///
/// Exactly one sequential loop runs per subscribed feed - ordering and
/// cursor-advancement correctness depend on fully processing page N before
/// requesting page N+1. Independent feeds run independent pollers.
///
/// The loop has no terminal success state; it runs until cancelled. Fatal
/// conditions (a 4xx fetch, exhausted cursor persistence) end it with an
/// error and the last-known-good cursor intact.
pub struct FeedPoller<C, S, H> {
    config: PollerConfig,
    client: C,
    cursor_store: S,
    handler: H,
    state: Arc<RwLock<PollerState>>,
}

impl<S, H> FeedPoller<HttpFeedClient, S, H>
where
    S: CursorStore,
    H: EntryHandler,
{
    /// Poller backed by the HTTP client derived from the configuration.
    pub fn http(config: PollerConfig, cursor_store: S, handler: H) -> Result<Self, FetchError> {
        let client = HttpFeedClient::new(&config)?;
        Ok(Self::new(config, client, cursor_store, handler))
    }
}

impl<C, S, H> FeedPoller<C, S, H>
where
    C: FeedClient,
    S: CursorStore,
    H: EntryHandler,
{
    pub fn new(config: PollerConfig, client: C, cursor_store: S, handler: H) -> Self {
        Self {
            config,
            client,
            cursor_store,
            handler,
            state: Arc::new(RwLock::new(PollerState::Idle)),
        }
    }

    /// Current loop state.
    pub fn state(&self) -> PollerState {
        *self.state.read()
    }

    /// Spawn the loop onto the runtime.
    ///
    /// Dropping the returned handle stops the poller at its next
    /// cancellation point; keep it alive for the lifetime of the
    /// subscription.
    pub fn spawn(self) -> PollerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let state = Arc::clone(&self.state);

        let join = tokio::spawn(async move { self.run(shutdown_rx).await });

        PollerHandle {
            state,
            shutdown_tx,
            join,
        }
    }

    /// Run the loop on the current task until shutdown or a fatal error.
    ///
    /// Cancellation is cooperative: the signal is observed while fetching
    /// or sleeping, so an in-flight process/persist step always completes
    /// and the persisted cursor sits on a fully-processed page boundary.
    pub async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<(), PollError> {
        let feed_url = self.config.feed_url.clone();

        let mut cursor = match self
            .cursor_store
            .load(&feed_url)
            .await
            .map_err(PollError::CursorLoad)?
        {
            Some(cursor) => {
                info!(feed = %feed_url, link = %cursor.current_link, "Resuming from persisted cursor");
                cursor
            }
            None => {
                info!(feed = %feed_url, "Starting new subscription");
                ClientCursor::initial(feed_url.clone())
            }
        };

        let mut backoff = Backoff::new(
            Duration::from_millis(self.config.backoff_initial_ms),
            Duration::from_millis(self.config.backoff_max_ms),
        );

        loop {
            self.set_state(PollerState::Fetching);

            let fetched = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(feed = %feed_url, "Shutdown signal received");
                    self.set_state(PollerState::Idle);
                    return Ok(());
                }
                fetched = self.client.fetch_page(&cursor.current_link) => fetched,
            };

            let page = match fetched {
                Ok(page) => page,
                Err(err) if err.is_transient() => {
                    let delay = backoff.delay();
                    warn!(
                        feed = %feed_url,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Fetch failed, backing off"
                    );
                    if self.sleep_or_shutdown(delay, &mut shutdown_rx).await {
                        return Ok(());
                    }
                    continue;
                }
                Err(err) => {
                    error!(feed = %feed_url, link = %cursor.current_link, error = %err, "Fetch failed fatally");
                    self.set_state(PollerState::Idle);
                    return Err(err.into());
                }
            };

            self.set_state(PollerState::Processing);
            if let Err((position, err)) = self.process_page(&page).await {
                let delay = backoff.delay();
                warn!(
                    feed = %feed_url,
                    position,
                    error = %err,
                    "Handler failed, page will be replayed"
                );
                if self.sleep_or_shutdown(delay, &mut shutdown_rx).await {
                    return Ok(());
                }
                continue;
            }

            backoff.reset();

            match page.links.next {
                Some(next_link) => {
                    // Non-empty page: persist the advanced cursor, then
                    // re-fetch without delay - more data may already be
                    // available.
                    self.set_state(PollerState::Persisting);
                    cursor.current_link = next_link;
                    if let Err(err) = self.persist_cursor(&cursor).await {
                        self.set_state(PollerState::Idle);
                        return Err(err);
                    }
                    debug!(feed = %feed_url, link = %cursor.current_link, "Cursor advanced");
                }
                None => {
                    // Drained: the cursor is untouched, idle before
                    // retrying the same offset.
                    let delay = Duration::from_millis(self.config.poll_delay_ms);
                    if self.sleep_or_shutdown(delay, &mut shutdown_rx).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Apply the page items strictly in order. The first failure halts the
    /// page; the failed position is reported and nothing after it runs.
    async fn process_page(&self, page: &FeedPage) -> Result<(), (i64, BoxError)> {
        for entry in &page.items {
            if let Err(err) = self.handler.handle(entry).await {
                return Err((entry.position, err));
            }
            debug!(position = entry.position, "Processed entry");
        }
        Ok(())
    }

    async fn persist_cursor(&self, cursor: &ClientCursor) -> Result<(), PollError> {
        let attempts = self.config.persist_retry_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.cursor_store.save(cursor).await {
                Ok(()) => return Ok(()),
                Err(source) if attempt >= attempts => {
                    return Err(PollError::CursorPersistence {
                        attempts: attempt,
                        source,
                    });
                }
                Err(err) => {
                    warn!(attempt, error = %err, "Cursor save failed, retrying");
                    tokio::time::sleep(PERSIST_RETRY_DELAY).await;
                }
            }
        }
    }

    /// Sleep, or stop early on the shutdown signal. Returns true when the
    /// loop should exit.
    async fn sleep_or_shutdown(
        &self,
        delay: Duration,
        shutdown_rx: &mut mpsc::Receiver<()>,
    ) -> bool {
        self.set_state(PollerState::Sleeping);
        tokio::select! {
            _ = shutdown_rx.recv() => {
                self.set_state(PollerState::Idle);
                true
            }
            _ = tokio::time::sleep(delay) => false,
        }
    }

    fn set_state(&self, next: PollerState) {
        *self.state.write() = next;
    }
}

/// Handle to a spawned poller.
pub struct PollerHandle {
    state: Arc<RwLock<PollerState>>,
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<Result<(), PollError>>,
}

impl PollerHandle {
    /// Current loop state.
    pub fn state(&self) -> PollerState {
        *self.state.read()
    }

    /// Signal shutdown and wait for the loop to finish its in-flight step.
    pub async fn shutdown(self) -> Result<(), PollError> {
        let _ = self.shutdown_tx.send(()).await;
        match self.join.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                std::panic::resume_unwind(join_err.into_panic())
            }
            Err(_) => Ok(()),
        }
    }
}
