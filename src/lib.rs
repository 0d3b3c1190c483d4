#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod gateway;
#[cfg(feature = "axum")]
mod redirect;
pub mod request;
pub mod session;
pub mod storage;
pub mod types;

// Re-exports for convenient access
pub use config::GatewayConfig;
pub use error::Error;
pub use gateway::{Gateway, RequestState};
pub use request::ApiRequest;
pub use session::Session;
#[cfg(feature = "file-store")]
pub use storage::FileStore;
pub use storage::{ACCESS_TOKEN_KEY, CredentialStore, MemoryStore, REFRESH_TOKEN_KEY};
pub use types::{AccessToken, LoginRequest, RefreshToken, TokenPair};
