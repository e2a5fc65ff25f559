use std::{future::Future, time::Duration};

use tracing::debug;
use url::Url;

use restfeed_types::FeedPage;

use crate::{error::FetchError, types::PollerConfig};

/// Fetches feed pages by link.
///
/// The poller depends only on this seam, so its control logic is testable
/// without a network.
pub trait FeedClient: Send + Sync + 'static {
    fn fetch_page(&self, link: &str) -> impl Future<Output = Result<FeedPage, FetchError>> + Send;
}

/// HTTP implementation speaking the JSON feed protocol via reqwest.
///
/// Every request carries a bounded timeout; a timeout is classified as a
/// transient transport failure.
pub struct HttpFeedClient {
    http: reqwest::Client,
    feed_root: Url,
    secret: Option<String>,
}

impl HttpFeedClient {
    pub fn new(config: &PollerConfig) -> Result<Self, FetchError> {
        let feed_root = Url::parse(&config.feed_url).map_err(|source| FetchError::InvalidLink {
            link: config.feed_url.clone(),
            source,
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.fetch_timeout_ms))
            .build()?;

        Ok(Self {
            http,
            feed_root,
            secret: config.secret.clone(),
        })
    }

    /// Links in pages may be path-relative; resolve them against the feed
    /// root. Absolute links pass through unchanged.
    fn resolve(&self, link: &str) -> Result<Url, FetchError> {
        self.feed_root
            .join(link)
            .map_err(|source| FetchError::InvalidLink {
                link: link.to_string(),
                source,
            })
    }
}

impl FeedClient for HttpFeedClient {
    async fn fetch_page(&self, link: &str) -> Result<FeedPage, FetchError> {
        let url = self.resolve(link)?;

        let mut request = self
            .http
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(secret) = &self.secret {
            request = request.bearer_auth(secret);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_server_error() {
            return Err(FetchError::ServerUnavailable {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FetchError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        let page: FeedPage = serde_json::from_str(&body)?;

        debug!(url = %url, items = page.items.len(), "Fetched feed page");
        Ok(page)
    }
}
