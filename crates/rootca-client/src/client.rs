//! HTTP fetcher used by the vendor sources.

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use rootca_core::{Result, RootcaError};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default per-request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Host that receives the GitHub access token by default
pub const GITHUB_API_HOST: &str = "api.github.com";

/// A GET operation returning the response body, or an error on non-success status.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Fetch the body at `url`.
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

/// reqwest-backed [`Fetch`] implementation.
#[derive(Clone)]
pub struct HttpFetcher {
    inner: Arc<FetcherInner>,
}

struct FetcherInner {
    http: HttpClient,
    bearer: Option<(String, String)>,
}

impl HttpFetcher {
    /// Create a fetcher with default settings
    ///
    /// # Errors
    ///
    /// Returns `RootcaError::Fetch` if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self> {
        HttpFetcherBuilder::new().build()
    }

    /// Create a builder for custom configuration
    #[must_use]
    pub fn builder() -> HttpFetcherBuilder {
        HttpFetcherBuilder::new()
    }

    /// Fetch a body as UTF-8 text
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let body = self.get_bytes(url).await?;
        String::from_utf8(body).map_err(|e| RootcaError::Fetch {
            url: url.to_string(),
            reason: format!("response is not UTF-8: {e}"),
        })
    }

    /// Fetch and deserialize a JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get_bytes(url).await?;
        serde_json::from_slice(&body).map_err(RootcaError::Json)
    }

    /// Whether `url` should carry the bearer token
    fn bearer_for(&self, url: &str) -> Option<&str> {
        let (host, token) = self.inner.bearer.as_ref()?;
        let parsed = url::Url::parse(url).ok()?;
        (parsed.host_str() == Some(host.as_str())).then_some(token.as_str())
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url = %url, "GET request");

        let mut request = self.inner.http.get(url);
        if let Some(token) = self.bearer_for(url) {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| RootcaError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 403 || status.as_u16() == 429 {
                warn!(url = %url, status = status.as_u16(), "request was rate limited or refused");
            }
            return Err(RootcaError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| RootcaError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(body.to_vec())
    }
}

/// Builder for configuring an [`HttpFetcher`]
pub struct HttpFetcherBuilder {
    timeout: Duration,
    user_agent: String,
    bearer: Option<(String, String)>,
}

impl Default for HttpFetcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcherBuilder {
    /// Create a new builder with default settings
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            user_agent: format!(
                "rootca/{} (github.com/tlsinspector/rootca)",
                env!("CARGO_PKG_VERSION")
            ),
            bearer: None,
        }
    }

    /// Set the per-request timeout
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the User-Agent header
    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    /// Send `Authorization: Bearer <token>` to requests for `host`
    #[must_use]
    pub fn bearer_token(mut self, host: impl Into<String>, token: impl Into<String>) -> Self {
        self.bearer = Some((host.into(), token.into()));
        self
    }

    /// Use a GitHub access token for `api.github.com`
    #[must_use]
    pub fn github_token(self, token: impl Into<String>) -> Self {
        self.bearer_token(GITHUB_API_HOST, token)
    }

    /// Build the fetcher
    ///
    /// # Errors
    ///
    /// Returns `RootcaError::Fetch` if the HTTP client cannot be constructed.
    pub fn build(self) -> Result<HttpFetcher> {
        let http = HttpClient::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .gzip(true)
            .build()
            .map_err(|e| RootcaError::Fetch {
                url: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(HttpFetcher {
            inner: Arc::new(FetcherInner {
                http,
                bearer: self.bearer,
            }),
        })
    }
}
