//! Node sources: where the proxy list of a build comes from.
//!
//! The pipeline only needs "a sequence of node records", so the source is a
//! trait. [`SubscriptionSource`] is the production implementation: it fetches
//! a Clash subscription over HTTP(S), or reads a local `file://` snapshot for
//! offline builds.

mod parser;

use std::future::Future;
use std::time::Duration;

use clashbuilder_shared::{ClashBuilderError, NodeRecord, Result, SourceConfig};
use reqwest::Client;
use tracing::{debug, info, instrument};
use url::Url;

pub use parser::parse_node_list;

/// Maximum number of redirects to follow when fetching a subscription.
const MAX_REDIRECTS: usize = 5;

/// Maximum response size we consider valid (32 MB).
const MAX_RESPONSE_SIZE: u64 = 32 * 1024 * 1024;

// ---------------------------------------------------------------------------
// NodeSource
// ---------------------------------------------------------------------------

/// Something that yields the node list for one build.
pub trait NodeSource {
    /// Identifier reported in logs and errors (usually a URL).
    fn locator(&self) -> &str;

    /// Fetch the full node list.
    fn fetch(&self) -> impl Future<Output = Result<Vec<NodeRecord>>> + Send;
}

// ---------------------------------------------------------------------------
// Source options
// ---------------------------------------------------------------------------

/// HTTP settings for subscription fetches.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Timeout for the whole request in seconds.
    pub timeout_secs: u64,
    /// User-Agent header value.
    pub user_agent: String,
}

impl Default for SourceOptions {
    fn default() -> Self {
        SourceConfig::default().into()
    }
}

impl From<SourceConfig> for SourceOptions {
    fn from(config: SourceConfig) -> Self {
        Self {
            timeout_secs: config.timeout_secs,
            user_agent: config.user_agent,
        }
    }
}

// ---------------------------------------------------------------------------
// SubscriptionSource
// ---------------------------------------------------------------------------

/// Subscription fetched from an `http(s)://` or `file://` URL.
#[derive(Debug, Clone)]
pub struct SubscriptionSource {
    url: Url,
    client: Client,
}

impl SubscriptionSource {
    /// Create a source for `url`.
    pub fn new(url: Url, opts: &SourceOptions) -> Result<Self> {
        match url.scheme() {
            "http" | "https" | "file" => {}
            other => {
                return Err(ClashBuilderError::source_fetch(
                    url.as_str(),
                    format!("unsupported scheme '{other}'"),
                ));
            }
        }
        let client = build_client(opts)?;
        Ok(Self { url, client })
    }

    /// The subscription URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn read_body(&self) -> Result<String> {
        if self.url.scheme() == "file" {
            let path = self.url.to_file_path().map_err(|()| {
                ClashBuilderError::source_fetch(self.url.as_str(), "not a local file path")
            })?;
            return tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| ClashBuilderError::source_fetch(self.url.as_str(), e));
        }
        fetch_body(&self.client, &self.url).await
    }
}

impl NodeSource for SubscriptionSource {
    fn locator(&self) -> &str {
        self.url.as_str()
    }

    #[instrument(skip_all, fields(url = %self.url))]
    async fn fetch(&self) -> Result<Vec<NodeRecord>> {
        info!("fetching subscription");
        let body = self.read_body().await?;
        let nodes = parse_node_list(&body, self.url.as_str())?;
        info!(count = nodes.len(), "subscription parsed");
        Ok(nodes)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build a reqwest client with appropriate settings.
fn build_client(opts: &SourceOptions) -> Result<Client> {
    Client::builder()
        .user_agent(opts.user_agent.as_str())
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(Duration::from_secs(opts.timeout_secs))
        .build()
        .map_err(|e| ClashBuilderError::config(format!("failed to build HTTP client: {e}")))
}

/// GET `url` and return the body as text.
async fn fetch_body(client: &Client, url: &Url) -> Result<String> {
    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| ClashBuilderError::source_fetch(url.as_str(), e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ClashBuilderError::source_fetch(
            url.as_str(),
            format!("HTTP {status}"),
        ));
    }

    // Check content-length if available
    if let Some(len) = response.content_length() {
        if len > MAX_RESPONSE_SIZE {
            return Err(ClashBuilderError::source_fetch(
                url.as_str(),
                format!("response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"),
            ));
        }
    }

    let body = response.text().await.map_err(|e| {
        ClashBuilderError::source_fetch(url.as_str(), format!("failed to read body: {e}"))
    })?;

    debug!(bytes = body.len(), "subscription body received");
    Ok(body)
}
