//! Discshelf Client
//!
//! HTTP client library for the Discshelf compact-disc collection API.
//!
//! # Features
//!
//! - **Session**: access/refresh tokens and user profile, mirrored to a
//!   host-supplied durable store
//! - **Authenticated requests**: bearer credentials attached to every call,
//!   one transparent refresh-and-retry when the access token expires
//! - **Single-flight refresh**: concurrent expiries share one refresh exchange
//! - **Normalized errors**: every failure carries a message, an HTTP-style
//!   status and per-field messages
//!
//! # Example
//!
//! ```ignore
//! use discshelf_client::{ClientConfig, DiscshelfClient, MemoryStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client =
//!         DiscshelfClient::connect(ClientConfig::new("http://localhost:8001"), Arc::new(MemoryStore::new()))
//!             .await?;
//!
//!     client.auth().login("me@example.com", "hunter22").await?;
//!
//!     let artists: Vec<serde_json::Value> = client.get("/api/v1/artists/", None).await?;
//!     println!("Found {} artists", artists.len());
//!
//!     match client.delete("/api/v1/artists/42").await {
//!         Err(e) if e.requires_login() => println!("Please login again"),
//!         Err(e) => println!("{} ({})", e.message(), e.status()),
//!         Ok(()) => {}
//!     }
//!
//!     Ok(())
//! }
//! ```

mod auth;
mod client;
mod config;
mod error;
mod normalize;
mod refresh;
mod request;
mod session;
mod store;
mod types;

// Re-export main types
pub use client::DiscshelfClient;
pub use config::{ClientConfig, DEFAULT_API_URL};
pub use error::{ApiError, FieldErrors, RefreshError, Result, StoreError, NO_RESPONSE_STATUS};
pub use types::{TokenPair, TokenResponse, UserProfile};

pub use auth::AuthClient;
pub use normalize::{normalize_failure, GENERIC_MESSAGE};
pub use refresh::RefreshCoordinator;
pub use request::{build_url, RequestDescriptor};
pub use session::{SessionStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreResult};

// Re-exported so callers can name methods without depending on reqwest.
pub use reqwest::Method;
