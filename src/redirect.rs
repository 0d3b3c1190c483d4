//! Axum integration for backend-for-frontend services.
//!
//! Handlers that call the API through a [`Gateway`](crate::Gateway) can
//! return [`Error`] directly: an ended session becomes a redirect to the
//! login route, upstream API errors keep their status.
//!
//! ```rust,ignore
//! async fn orders(State(gw): State<Arc<Gateway>>) -> Result<Json<Vec<Order>>, Error> {
//!     Ok(Json(gw.get_json("/orders").await?))
//! }
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};

use crate::error::Error;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Self::SessionExpired { ref login_path } => Redirect::to(login_path).into_response(),
            Self::Api { status, .. } => {
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
                (status, self.to_string()).into_response()
            }
            Self::Http(_) => {
                tracing::error!(error = %self, "Upstream API unreachable");
                (StatusCode::BAD_GATEWAY, "Upstream unavailable").into_response()
            }
            Self::Storage(_) | Self::Config(_) | Self::InvalidRequest(_) => {
                tracing::error!(error = %self, "Client internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}
