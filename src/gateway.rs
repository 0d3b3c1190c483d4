use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::GatewayConfig;
use crate::error::Error;
use crate::request::ApiRequest;
use crate::session::{RefreshGuard, Session};
use crate::types::{AccessToken, LoginRequest, RefreshRequest, TokenPair};

/// Lifecycle of a single request through [`Gateway::send`].
///
/// `Pending → Sent → {Succeeded, Failed, Unauthorized}`, then
/// `Unauthorized → Refreshing → {RetrySucceeded, RetryFailed, ForcedLogout}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RequestState {
    Pending,
    Sent,
    /// Non-401 success status.
    Succeeded,
    /// Transport error or non-401 error status.
    Failed,
    Unauthorized,
    Refreshing,
    RetrySucceeded,
    /// Retry hit a transport error or any error status, including a second 401.
    RetryFailed,
    /// Refresh failed; the session is over.
    ForcedLogout,
}

impl RequestState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded
                | Self::Failed
                | Self::RetrySucceeded
                | Self::RetryFailed
                | Self::ForcedLogout
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Unauthorized => "unauthorized",
            Self::Refreshing => "refreshing",
            Self::RetrySucceeded => "retry_succeeded",
            Self::RetryFailed => "retry_failed",
            Self::ForcedLogout => "forced_logout",
        }
    }

    fn after_response(status: StatusCode, retried: bool) -> Self {
        match (status.is_success() || status.is_redirection(), retried) {
            (true, false) => Self::Succeeded,
            (false, false) => Self::Failed,
            (true, true) => Self::RetrySucceeded,
            (false, true) => Self::RetryFailed,
        }
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated request gateway for the Agrimarket API.
///
/// Attaches the stored access token to every request. On `401 Unauthorized`
/// it refreshes the credential pair once and retries the request once;
/// if the refresh fails it returns [`Error::SessionExpired`] and the
/// caller should send the user to the login route.
///
/// ```rust,ignore
/// use agrimarket_client::{ApiRequest, Gateway, GatewayConfig, MemoryStore, Session};
///
/// let gateway = Gateway::new(GatewayConfig::from_env()?, Session::new(MemoryStore::new()))?;
/// match gateway.send(ApiRequest::get("/orders")).await {
///     Ok(resp) => render(resp).await,
///     Err(e) if e.login_redirect().is_some() => navigate(e.login_redirect().unwrap()),
///     Err(e) => show_error(e),
/// }
/// ```
pub struct Gateway {
    config: GatewayConfig,
    http: reqwest::Client,
    session: Session,
}

impl Gateway {
    /// Create a gateway with an HTTP client built from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be built.
    pub fn new(config: GatewayConfig, session: Session) -> Result<Self, Error> {
        let http = config.http_client()?;
        Ok(Self {
            config,
            http,
            session,
        })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Send a request with the stored bearer credential.
    ///
    /// Any response other than `401` is returned unchanged, error statuses
    /// included. A `401` triggers one refresh and one retry; the retry's
    /// response is returned as-is, even if it is another `401`.
    ///
    /// # Errors
    ///
    /// - [`Error::Http`] on transport failure of the request or its retry.
    /// - [`Error::SessionExpired`] if the credential refresh fails.
    /// - [`Error::Storage`] if credentials cannot be read or written.
    /// - [`Error::InvalidRequest`] if the request cannot be built.
    pub async fn send(&self, mut request: ApiRequest) -> Result<reqwest::Response, Error> {
        let method = request.method().clone();
        let path = request.path().to_owned();
        tracing::trace!(%method, %path, state = %RequestState::Pending, "Request accepted");

        let epoch = self.session.refresh_epoch();
        let sent_with = self.session.access_token()?;
        if let Some(token) = &sent_with {
            request.set_bearer(token)?;
        }

        tracing::debug!(%method, %path, state = %RequestState::Sent, "Dispatching request");
        let response = self.dispatch(&request).await.inspect_err(|e| {
            tracing::debug!(%method, %path, state = %RequestState::Failed, error = %e, "Request failed");
        })?;

        if response.status() != StatusCode::UNAUTHORIZED {
            let state = RequestState::after_response(response.status(), false);
            tracing::debug!(%method, %path, %state, status = response.status().as_u16(), "Request finished");
            return Ok(response);
        }

        tracing::debug!(%method, %path, state = %RequestState::Unauthorized, "Access token rejected");
        let token = self
            .refresh_after(sent_with.as_ref(), epoch)
            .await
            .inspect_err(|e| {
                tracing::warn!(%method, %path, state = %RequestState::ForcedLogout, error = %e, "Session ended");
            })?;
        request.set_bearer(&token)?;

        let retried = self.dispatch(&request).await.inspect_err(|e| {
            tracing::debug!(%method, %path, state = %RequestState::RetryFailed, error = %e, "Retry failed");
        })?;
        let state = RequestState::after_response(retried.status(), true);
        tracing::debug!(%method, %path, %state, status = retried.status().as_u16(), "Retry finished");
        Ok(retried)
    }

    /// `GET path` and decode a JSON body.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send), plus [`Error::Api`] for any non-success status.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let response = self.send(ApiRequest::get(path)).await?;
        let response = Self::ensure_success(response, "GET request").await?;
        response.json::<T>().await.map_err(Into::into)
    }

    /// `POST path` with a JSON body and decode a JSON response.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send), plus [`Error::Api`] for any non-success status.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, Error>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(ApiRequest::post(path).json(body)?).await?;
        let response = Self::ensure_success(response, "POST request").await?;
        response.json::<T>().await.map_err(Into::into)
    }

    /// Exchange username and password for a credential pair and store it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, [`Error::Api`] if the
    /// login endpoint rejects the credentials, or [`Error::Storage`].
    pub async fn login(&self, credentials: &LoginRequest) -> Result<TokenPair, Error> {
        let url = self.config.endpoint(&self.config.login_endpoint)?;
        let response = self.http.post(url).json(credentials).send().await?;
        let response = Self::ensure_success(response, "login").await?;
        let pair = response.json::<TokenPair>().await?;

        let mut gate = self.session.lock_refresh().await;
        self.session.store_pair(&pair)?;
        gate.record_success();
        tracing::info!(username = %credentials.username, "Login successful");
        Ok(pair)
    }

    /// Forget the stored credential pair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store cannot be written.
    pub async fn logout(&self) -> Result<(), Error> {
        let _gate = self.session.lock_refresh().await;
        self.session.clear()?;
        tracing::info!("Logged out");
        Ok(())
    }

    /// Whether an access token is currently stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the store cannot be read.
    pub fn is_authenticated(&self) -> Result<bool, Error> {
        Ok(self.session.access_token()?.is_some())
    }

    /// Refresh the credential pair now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionExpired`] if no refresh token is stored or
    /// the refresh endpoint fails, or [`Error::Storage`].
    pub async fn refresh(&self) -> Result<TokenPair, Error> {
        let mut gate = self.session.lock_refresh().await;
        self.refresh_locked(&mut gate).await
    }

    /// Obtain a usable access token after `stale` was rejected.
    ///
    /// Waits on the refresh gate. If another request already replaced
    /// `stale` while this one waited, the stored token is reused. If a
    /// refresh for `stale` failed after `epoch`, the session is over.
    /// Neither case makes a refresh call.
    async fn refresh_after(
        &self,
        stale: Option<&AccessToken>,
        epoch: u64,
    ) -> Result<AccessToken, Error> {
        let mut gate = self.session.lock_refresh().await;
        tracing::debug!(state = %RequestState::Refreshing, "Refresh gate acquired");

        if let Some(current) = self.session.access_token()?
            && stale != Some(&current)
        {
            tracing::debug!("Access token already refreshed by a concurrent request");
            return Ok(current);
        }
        if gate.failed_since(epoch, stale) {
            tracing::debug!("Refresh already failed for a concurrent request");
            return Err(self.session_expired());
        }

        self.refresh_locked(&mut gate)
            .await
            .map(|pair| pair.access_token)
    }

    /// Refresh under the held gate and record the outcome on it.
    async fn refresh_locked(&self, gate: &mut RefreshGuard<'_>) -> Result<TokenPair, Error> {
        let stale = self.session.access_token()?;
        match self.request_refresh().await {
            Ok(pair) => {
                gate.record_success();
                Ok(pair)
            }
            Err(e) => {
                gate.record_failure(stale);
                Err(e)
            }
        }
    }

    async fn request_refresh(&self) -> Result<TokenPair, Error> {
        let Some(refresh_token) = self.session.refresh_token()? else {
            tracing::warn!("No refresh token stored");
            return Err(self.session_expired());
        };

        let url = self.config.endpoint(&self.config.refresh_path)?;
        let body = RefreshRequest {
            refresh_token: refresh_token.as_str(),
        };

        let response = match self.http.post(url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Refresh request failed");
                return Err(self.session_expired());
            }
        };

        if !response.status().is_success() {
            tracing::warn!(status = response.status().as_u16(), "Refresh rejected");
            return Err(self.session_expired());
        }

        let pair = match response.json::<TokenPair>().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "Refresh response unreadable");
                return Err(self.session_expired());
            }
        };

        self.session.store_pair(&pair)?;
        tracing::info!("Credentials refreshed");
        Ok(pair)
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<reqwest::Response, Error> {
        let url = self.config.endpoint(request.path())?;
        request.build(&self.http, url).send().await.map_err(Into::into)
    }

    fn session_expired(&self) -> Error {
        Error::SessionExpired {
            login_path: self.config.login_path.clone(),
        }
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let detail = response.text().await.unwrap_or_default();
        Err(Error::Api {
            operation,
            status,
            detail,
        })
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("base_url", &self.config.base_url.as_str())
            .finish_non_exhaustive()
    }
}
