//! In-process fake of the marketplace API for gateway tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use agrimarket_client::{
    ACCESS_TOKEN_KEY, CredentialStore, Gateway, GatewayConfig, MemoryStore, REFRESH_TOKEN_KEY,
    Session,
};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{Value, json};
use url::Url;

/// One request seen by `/orders`, with the client's stored tokens at that moment.
#[derive(Debug, Clone)]
pub struct OrdersHit {
    pub authorization: Option<String>,
    pub stored_access: Option<String>,
    pub stored_refresh: Option<String>,
}

/// How `/auth/refresh` answers.
#[derive(Debug, Clone)]
pub enum RefreshBehavior {
    /// Issue `{accessToken, refreshToken}` and accept the new access token.
    Issue { access: String, refresh: String },
    /// Answer with this status and an error body.
    Reject(StatusCode),
    /// Answer 200 with a body that is not a token pair.
    Garbage,
    /// Sleep long enough to trip the client timeout.
    Hang,
}

pub struct MockState {
    /// Access token currently accepted by protected routes.
    pub valid_token: Mutex<String>,
    pub refresh: Mutex<RefreshBehavior>,
    pub refresh_delay: Mutex<Duration>,
    pub refresh_bodies: Mutex<Vec<Value>>,
    pub orders_hits: Mutex<Vec<OrdersHit>>,
    pub status_hits: Mutex<Vec<Option<String>>>,
    /// Pair written into the client store by the next `/orders` hit, as if
    /// another request had refreshed while this one was in flight.
    pub rotate_on_orders: Mutex<Option<(String, String)>>,
    pub stall_hits: Mutex<usize>,
    pub client_store: Arc<MemoryStore>,
}

impl MockState {
    pub fn refresh_calls(&self) -> usize {
        self.refresh_bodies.lock().len()
    }

    pub fn orders_hits(&self) -> Vec<OrdersHit> {
        self.orders_hits.lock().clone()
    }
}

pub struct MockApi {
    pub base_url: Url,
    pub state: Arc<MockState>,
    pub store: Arc<MemoryStore>,
}

impl MockApi {
    /// Start a fake API that accepts `valid_token` and answers refreshes per `behavior`.
    pub async fn start(valid_token: &str, behavior: RefreshBehavior) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = Arc::new(MockState {
            valid_token: Mutex::new(valid_token.to_string()),
            refresh: Mutex::new(behavior),
            refresh_delay: Mutex::new(Duration::ZERO),
            refresh_bodies: Mutex::new(Vec::new()),
            orders_hits: Mutex::new(Vec::new()),
            status_hits: Mutex::new(Vec::new()),
            rotate_on_orders: Mutex::new(None),
            stall_hits: Mutex::new(0),
            client_store: store.clone(),
        });

        let app = Router::new()
            .route("/orders", get(orders))
            .route("/always-401", get(always_unauthorized))
            .route("/stall-after-401", get(stall_after_unauthorized))
            .route("/status/{code}", get(fixed_status))
            .route("/offers", post(create_offer))
            .route("/auth/refresh", post(refresh))
            .route("/auth/login", post(login))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}").parse().unwrap(),
            state,
            store,
        }
    }

    pub fn config(&self) -> GatewayConfig {
        GatewayConfig::new(self.base_url.clone())
    }

    /// Gateway over this API's client-side store.
    pub fn gateway(&self) -> Gateway {
        self.gateway_with(self.config())
    }

    pub fn gateway_with(&self, config: GatewayConfig) -> Gateway {
        let store: Arc<dyn CredentialStore> = self.store.clone();
        self.gateway_with_session(config, Session::from_arc(store))
    }

    pub fn gateway_with_session(&self, config: GatewayConfig, session: Session) -> Gateway {
        // Loopback only; ignore proxy env vars.
        let mut http = reqwest::Client::builder().no_proxy();
        if let Some(timeout) = config.timeout() {
            http = http.timeout(timeout);
        }
        Gateway::new(config, session)
            .unwrap()
            .with_http_client(http.build().unwrap())
    }

    pub fn seed_tokens(&self, access: &str, refresh: &str) {
        self.store.set(ACCESS_TOKEN_KEY, access).unwrap();
        self.store.set(REFRESH_TOKEN_KEY, refresh).unwrap();
    }

    pub fn stored(&self) -> (Option<String>, Option<String>) {
        (
            self.store.get(ACCESS_TOKEN_KEY).unwrap(),
            self.store.get(REFRESH_TOKEN_KEY).unwrap(),
        )
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.state.refresh_delay.lock() = delay;
    }

    pub fn rotate_on_next_orders(&self, access: &str, refresh: &str) {
        *self.state.rotate_on_orders.lock() = Some((access.to_string(), refresh.to_string()));
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn is_authorized(state: &MockState, headers: &HeaderMap) -> bool {
    let expected = format!("Bearer {}", state.valid_token.lock());
    bearer(headers).as_deref() == Some(expected.as_str())
}

async fn orders(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.orders_hits.lock().push(OrdersHit {
        authorization: bearer(&headers),
        stored_access: state.client_store.get(ACCESS_TOKEN_KEY).unwrap(),
        stored_refresh: state.client_store.get(REFRESH_TOKEN_KEY).unwrap(),
    });

    let rotation = state.rotate_on_orders.lock().take();
    if let Some((access, refresh)) = rotation {
        state
            .client_store
            .set_many(&[
                (ACCESS_TOKEN_KEY, access.as_str()),
                (REFRESH_TOKEN_KEY, refresh.as_str()),
            ])
            .unwrap();
    }

    if is_authorized(&state, &headers) {
        Json(json!({ "orders": [{ "id": 1, "crop": "wheat", "tonnes": 12 }] })).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({ "message": "token expired" }))).into_response()
    }
}

async fn always_unauthorized(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.status_hits.lock().push(bearer(&headers));
    StatusCode::UNAUTHORIZED.into_response()
}

/// First hit answers 401; later hits outlast any test client timeout.
async fn stall_after_unauthorized(State(state): State<Arc<MockState>>) -> Response {
    let first = {
        let mut hits = state.stall_hits.lock();
        *hits += 1;
        *hits == 1
    };
    if !first {
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
    StatusCode::UNAUTHORIZED.into_response()
}

async fn fixed_status(
    State(state): State<Arc<MockState>>,
    Path(code): Path<u16>,
    headers: HeaderMap,
) -> Response {
    state.status_hits.lock().push(bearer(&headers));
    let status = StatusCode::from_u16(code).unwrap();
    (status, format!("status {code}")).into_response()
}

async fn create_offer(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !is_authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    (StatusCode::CREATED, Json(json!({ "id": 42, "offer": body }))).into_response()
}

async fn refresh(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.refresh_bodies.lock().push(body);

    let delay = *state.refresh_delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let behavior = state.refresh.lock().clone();
    match behavior {
        RefreshBehavior::Issue { access, refresh } => {
            *state.valid_token.lock() = access.clone();
            Json(json!({ "accessToken": access, "refreshToken": refresh })).into_response()
        }
        RefreshBehavior::Reject(status) => {
            (status, Json(json!({ "message": "invalid refresh token" }))).into_response()
        }
        RefreshBehavior::Garbage => Json(json!({ "unexpected": true })).into_response(),
        RefreshBehavior::Hang => {
            tokio::time::sleep(Duration::from_secs(5)).await;
            StatusCode::OK.into_response()
        }
    }
}

async fn login(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    if body["username"] == "farmer-7" && body["password"] == "secret" {
        *state.valid_token.lock() = "L1".to_string();
        Json(json!({ "accessToken": "L1", "refreshToken": "LR1" })).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, "invalid credentials").into_response()
    }
}
