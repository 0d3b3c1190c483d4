/// Errors returned by the Agrimarket client.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Transport failure on the original request or its retry.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Credential refresh failed; the caller should send the user to `login_path`.
    #[error("Session expired, login required at {login_path}")]
    SessionExpired { login_path: String },

    /// The API answered with a non-success status.
    #[error("{operation} failed (HTTP {status}): {detail}")]
    Api {
        operation: &'static str,
        status: u16,
        detail: String,
    },

    /// Credential storage could not be read or written.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The request descriptor could not be turned into an HTTP request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Login route to navigate to, if this error ended the session.
    #[must_use]
    pub fn login_redirect(&self) -> Option<&str> {
        match self {
            Self::SessionExpired { login_path } => Some(login_path),
            _ => None,
        }
    }

    /// HTTP status reported by the API, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
