use std::time::Duration;

use url::Url;

use crate::error::Error;

const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";
const DEFAULT_LOGIN_ENDPOINT: &str = "/auth/login";
const DEFAULT_LOGIN_PATH: &str = "/login";

/// Gateway configuration.
///
/// The base endpoint is a constructor parameter; everything else has a
/// default and can be overridden with `with_*` methods.
///
/// ```rust,ignore
/// use agrimarket_client::GatewayConfig;
///
/// let config = GatewayConfig::new("https://api.agrimarket.example/".parse()?)
///     .with_login_path("/signin")
///     .with_timeout(std::time::Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct GatewayConfig {
    pub(crate) base_url: Url,
    pub(crate) refresh_path: String,
    pub(crate) login_endpoint: String,
    pub(crate) login_path: String,
    pub(crate) timeout: Option<Duration>,
    pub(crate) user_agent: Option<String>,
}

impl GatewayConfig {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            refresh_path: DEFAULT_REFRESH_PATH.into(),
            login_endpoint: DEFAULT_LOGIN_ENDPOINT.into(),
            login_path: DEFAULT_LOGIN_PATH.into(),
            timeout: None,
            user_agent: None,
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `AGRIMARKET_API_URL`: base endpoint all request paths are relative to
    ///
    /// # Optional env vars
    /// - `AGRIMARKET_REFRESH_PATH`: refresh endpoint (default `/auth/refresh`)
    /// - `AGRIMARKET_LOGIN_ENDPOINT`: login endpoint (default `/auth/login`)
    /// - `AGRIMARKET_LOGIN_PATH`: client route to send users to when the session ends (default `/login`)
    /// - `AGRIMARKET_TIMEOUT_SECS`: per-request timeout in seconds
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the base URL is missing or any value is invalid.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let base_url: Url = lookup("AGRIMARKET_API_URL")
            .ok_or_else(|| Error::Config("AGRIMARKET_API_URL is required".into()))?
            .parse()
            .map_err(|e| Error::Config(format!("AGRIMARKET_API_URL: {e}")))?;

        let mut config = Self::new(base_url);

        if let Some(path) = lookup("AGRIMARKET_REFRESH_PATH") {
            config = config.with_refresh_path(path);
        }
        if let Some(path) = lookup("AGRIMARKET_LOGIN_ENDPOINT") {
            config = config.with_login_endpoint(path);
        }
        if let Some(path) = lookup("AGRIMARKET_LOGIN_PATH") {
            config = config.with_login_path(path);
        }
        if let Some(secs) = lookup("AGRIMARKET_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("AGRIMARKET_TIMEOUT_SECS: {e}")))?;
            config = config.with_timeout(Duration::from_secs(secs));
        }

        Ok(config)
    }

    /// Override the refresh endpoint path.
    #[must_use]
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    /// Override the login endpoint path.
    #[must_use]
    pub fn with_login_endpoint(mut self, path: impl Into<String>) -> Self {
        self.login_endpoint = path.into();
        self
    }

    /// Override the route reported in [`Error::SessionExpired`].
    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Base endpoint.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Refresh endpoint path.
    #[must_use]
    pub fn refresh_path(&self) -> &str {
        &self.refresh_path
    }

    /// Login endpoint path.
    #[must_use]
    pub fn login_endpoint(&self) -> &str {
        &self.login_endpoint
    }

    /// Client route to navigate to when the session ends.
    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Resolve a request path against the base endpoint.
    ///
    /// Paths are appended to the base URL's path, so a base of
    /// `https://host/api/v1` and a path of `/orders` yields
    /// `https://host/api/v1/orders`. The path may carry a query string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the result is not a valid URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
            .parse()
            .map_err(|e| Error::InvalidRequest(format!("{path}: {e}")))
    }

    /// Build the underlying HTTP client from this configuration.
    pub(crate) fn http_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        builder
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {e}")))
    }
}
