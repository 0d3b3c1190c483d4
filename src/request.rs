use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;

use crate::error::Error;
use crate::types::AccessToken;

/// Outbound request descriptor.
///
/// Owned and cloneable so the gateway can re-dispatch it after a
/// credential refresh. The path is relative to the configured base
/// endpoint and may include a query string.
///
/// ```rust,ignore
/// let req = ApiRequest::post("/orders").json(&new_order)?;
/// let resp = gateway.send(req).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl ApiRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    #[must_use]
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Add a header, replacing any previous value under the same name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the name or value is not a valid header.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, Error> {
        let name = HeaderName::try_from(name)
            .map_err(|e| Error::InvalidRequest(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::try_from(value)
            .map_err(|e| Error::InvalidRequest(format!("header {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Set a JSON body and `Content-Type: application/json`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if `body` fails to serialize.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, Error> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| Error::InvalidRequest(format!("JSON body: {e}")))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(bytes);
        Ok(self)
    }

    /// Set a raw body. The caller is responsible for `Content-Type`.
    #[must_use]
    pub fn body(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.body = Some(bytes.into());
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Current `Authorization` header, if set and valid UTF-8.
    #[must_use]
    pub fn authorization(&self) -> Option<&str> {
        self.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok())
    }

    /// Set `Authorization: Bearer <token>`, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the token contains bytes not
    /// allowed in a header value.
    pub fn set_bearer(&mut self, token: &AccessToken) -> Result<(), Error> {
        let mut value = HeaderValue::try_from(token.bearer())
            .map_err(|_| Error::InvalidRequest("access token is not a valid header value".into()))?;
        value.set_sensitive(true);
        self.headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    pub(crate) fn build(
        &self,
        http: &reqwest::Client,
        url: url::Url,
    ) -> reqwest::RequestBuilder {
        let builder = http
            .request(self.method.clone(), url)
            .headers(self.headers.clone());
        match &self.body {
            Some(bytes) => builder.body(bytes.clone()),
            None => builder,
        }
    }
}
