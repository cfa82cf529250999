//! Shared helpers for the integration tests.

#![allow(dead_code)]

use discshelf_client::{ClientConfig, DiscshelfClient, MemoryStore};
use std::sync::{Arc, Once};
use wiremock::{MockServer, Request};

static INIT: Once = Once::new();

/// Install a test-writer subscriber once per test binary.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// Client against `server` with an empty in-memory session.
pub fn client_for(server: &MockServer) -> DiscshelfClient {
    init_tracing();
    DiscshelfClient::new(ClientConfig::new(server.uri()), Arc::new(MemoryStore::new()))
        .expect("mock server uri is valid")
}

/// Client against `server` already holding the given token pair.
pub async fn client_with_tokens(server: &MockServer, access: &str, refresh: &str) -> DiscshelfClient {
    let client = client_for(server);
    client.session().set_tokens(access, refresh).await;
    client
}

/// Requests the server received for `path`.
pub async fn requests_to(server: &MockServer, path: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == path)
        .collect()
}

pub fn token_body(access: &str, refresh: &str) -> serde_json::Value {
    serde_json::json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer",
        "scopes": ["user"]
    })
}

pub fn user_body(id: i64, email: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "email": email,
        "is_active": true,
        "created_at": "2024-01-01T00:00:00",
        "updated_at": null
    })
}

pub fn artists_body() -> serde_json::Value {
    serde_json::json!([
        {
            "id": 1,
            "name": "John Coltrane",
            "description": null,
            "is_favorite": true,
            "created_at": "2024-01-01T00:00:00",
            "updated_at": "2024-01-01T00:00:00"
        },
        {
            "id": 2,
            "name": "Nina Simone",
            "description": "Piano",
            "is_favorite": false,
            "created_at": "2024-01-02T00:00:00",
            "updated_at": "2024-01-02T00:00:00"
        }
    ])
}
