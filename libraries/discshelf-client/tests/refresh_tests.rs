//! Concurrency tests for token refresh.
//!
//! Refresh tokens are single-use, so however many requests discover an
//! expired access token at the same time, only one exchange may reach the
//! server.

mod common;

use common::{client_for, client_with_tokens, requests_to, token_body, user_body};
use discshelf_client::{ApiError, RefreshError};
use futures_util::future::join_all;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REFRESH: &str = "/api/v1/auth/refresh";

/// Mount a refresh endpoint that answers slowly, so concurrent callers
/// overlap with the exchange.
async fn mount_slow_refresh(server: &MockServer, status: u16, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path(REFRESH))
        .respond_with(
            ResponseTemplate::new(status)
                .set_body_json(body)
                .set_delay(Duration::from_millis(300)),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_concurrent_expiries_share_one_refresh() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/artists/"))
        .and(header("Authorization", "Bearer expired_access"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/artists/"))
        .and(header("Authorization", "Bearer fresh_access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{"id": 1}])))
        .mount(&mock_server)
        .await;
    mount_slow_refresh(&mock_server, 200, token_body("fresh_access", "fresh_refresh")).await;

    let client = client_with_tokens(&mock_server, "expired_access", "single_use_refresh").await;

    let calls = (0..8).map(|_| client.get::<Vec<serde_json::Value>>("/api/v1/artists/", None));
    let results = join_all(calls).await;

    for result in results {
        let artists = result.expect("every call succeeds after the shared refresh");
        assert_eq!(artists.len(), 1);
    }

    let refreshes = requests_to(&mock_server, REFRESH).await;
    assert_eq!(refreshes.len(), 1);
    // 8 rejected + 8 retried with the new token
    assert_eq!(requests_to(&mock_server, "/api/v1/artists/").await.len(), 16);
}

#[tokio::test]
async fn test_concurrent_refresh_calls_get_same_pair() {
    let mock_server = MockServer::start().await;
    mount_slow_refresh(&mock_server, 200, token_body("fresh_access", "fresh_refresh")).await;

    let client = client_with_tokens(&mock_server, "old_access", "old_refresh").await;

    let results = join_all((0..5).map(|_| client.refresher().refresh())).await;

    for result in results {
        let pair = result.unwrap();
        assert_eq!(pair.access_token, "fresh_access");
        assert_eq!(pair.refresh_token, "fresh_refresh");
    }
    assert_eq!(requests_to(&mock_server, REFRESH).await.len(), 1);
    assert_eq!(
        client.session().access_token().await.as_deref(),
        Some("fresh_access")
    );
}

#[tokio::test]
async fn test_late_rejection_reuses_rotated_pair() {
    let mock_server = MockServer::start().await;

    // Rejected immediately: starts the refresh
    Mock::given(method("GET"))
        .and(path("/api/v1/artists/"))
        .and(header("Authorization", "Bearer expired_access"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;
    // Rejected only after the refresh has completed
    Mock::given(method("GET"))
        .and(path("/api/v1/albums/"))
        .and(header("Authorization", "Bearer expired_access"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(600)))
        .mount(&mock_server)
        .await;
    for endpoint in ["/api/v1/artists/", "/api/v1/albums/"] {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .and(header("Authorization", "Bearer fresh_access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&mock_server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path(REFRESH))
        .and(body_json(serde_json::json!({"refresh_token": "single_use_refresh"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("fresh_access", "fresh_refresh")))
        .mount(&mock_server)
        .await;

    let client = client_with_tokens(&mock_server, "expired_access", "single_use_refresh").await;

    let (artists, albums) = tokio::join!(
        client.get::<Vec<serde_json::Value>>("/api/v1/artists/", None),
        client.get::<Vec<serde_json::Value>>("/api/v1/albums/", None),
    );

    assert!(artists.is_ok());
    assert!(albums.is_ok());
    assert_eq!(requests_to(&mock_server, REFRESH).await.len(), 1);
}

#[tokio::test]
async fn test_failed_shared_refresh_expires_every_waiter() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/genres/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;
    mount_slow_refresh(
        &mock_server,
        401,
        serde_json::json!({"detail": "Refresh token revoked"}),
    )
    .await;

    let client = client_with_tokens(&mock_server, "expired_access", "revoked_refresh").await;

    let results =
        join_all((0..4).map(|_| client.get::<serde_json::Value>("/api/v1/genres/", None))).await;

    for result in results {
        match result {
            Err(ApiError::SessionExpired { cause }) => assert_eq!(
                cause,
                RefreshError::Rejected {
                    status: 401,
                    message: "Refresh token revoked".into()
                }
            ),
            other => panic!("Expected SessionExpired, got: {:?}", other),
        }
    }

    assert_eq!(requests_to(&mock_server, REFRESH).await.len(), 1);
    // Nothing was retried
    assert_eq!(requests_to(&mock_server, "/api/v1/genres/").await.len(), 4);
    assert!(!client.is_authenticated().await);
}

#[tokio::test]
async fn test_refresh_without_refresh_token() {
    let mock_server = MockServer::start().await;
    let client = client_for(&mock_server);

    let err = client.refresher().refresh().await.unwrap_err();

    assert_eq!(err, RefreshError::NoRefreshToken);
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_refresh_leaves_session_untouched() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(REFRESH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let client = client_with_tokens(&mock_server, "old_access", "old_refresh").await;

    let err = client.refresher().refresh().await.unwrap_err();
    assert!(matches!(err, RefreshError::Rejected { status: 500, .. }));

    // Only the executor ends the session on refresh failure
    assert!(client.is_authenticated().await);
    assert_eq!(
        client.session().access_token().await.as_deref(),
        Some("old_access")
    );
    assert_eq!(
        client.session().refresh_token().await.as_deref(),
        Some("old_refresh")
    );
}

#[tokio::test]
async fn test_refresh_with_malformed_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(REFRESH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "only"})))
        .mount(&mock_server)
        .await;

    let client = client_with_tokens(&mock_server, "old_access", "old_refresh").await;

    let err = client.refresher().refresh().await.unwrap_err();
    assert!(matches!(err, RefreshError::InvalidResponse(_)));
    assert_eq!(
        client.session().access_token().await.as_deref(),
        Some("old_access")
    );
}

#[tokio::test]
async fn test_sequential_refreshes_each_reach_server() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(REFRESH))
        .and(body_json(serde_json::json!({"refresh_token": "r0"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a1", "r1")))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH))
        .and(body_json(serde_json::json!({"refresh_token": "r1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a2", "r2")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_with_tokens(&mock_server, "a0", "r0").await;

    assert_eq!(client.refresher().refresh().await.unwrap().access_token, "a1");
    // The slot is cleared once an exchange completes
    assert_eq!(client.refresher().refresh().await.unwrap().access_token, "a2");
}

#[tokio::test]
async fn test_logout_during_refresh_is_not_undone() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/artists/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;
    mount_slow_refresh(&mock_server, 200, token_body("fresh_access", "fresh_refresh")).await;

    let client = client_with_tokens(&mock_server, "expired_access", "valid_refresh").await;

    let (result, ()) = tokio::join!(
        client.get::<serde_json::Value>("/api/v1/artists/", None),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            client.auth().logout().await;
        }
    );

    match result {
        Err(ApiError::SessionExpired { cause }) => assert_eq!(cause, RefreshError::SessionChanged),
        other => panic!("Expected SessionExpired, got: {:?}", other),
    }
    assert!(!client.is_authenticated().await);
    assert!(client.session().tokens().await.is_none());

    let err = client
        .get::<serde_json::Value>("/api/v1/artists/", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::AuthorizationRequired));
    assert_eq!(requests_to(&mock_server, REFRESH).await.len(), 1);
    assert_eq!(requests_to(&mock_server, "/api/v1/artists/").await.len(), 1);
}

#[tokio::test]
async fn test_login_during_refresh_keeps_new_session() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("login_access", "login_refresh")))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/users/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_body(2, "me@example.com")))
        .mount(&mock_server)
        .await;
    mount_slow_refresh(&mock_server, 200, token_body("fresh_access", "fresh_refresh")).await;

    let client = client_with_tokens(&mock_server, "old_access", "old_refresh").await;

    let (refreshed, login) = tokio::join!(client.refresher().refresh(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.auth().login("me@example.com", "secret").await
    });

    assert!(login.is_ok());
    assert_eq!(refreshed.unwrap_err(), RefreshError::SessionChanged);
    assert_eq!(
        client.session().access_token().await.as_deref(),
        Some("login_access")
    );
    assert_eq!(
        client.session().refresh_token().await.as_deref(),
        Some("login_refresh")
    );
}

#[tokio::test]
async fn test_abandoned_refresh_does_not_block_later_exchanges() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(REFRESH))
        .and(body_json(serde_json::json!({"refresh_token": "r0"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("a1", "r1"))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH))
        .and(body_json(serde_json::json!({"refresh_token": "r1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a2", "r2")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_with_tokens(&mock_server, "a0", "r0").await;

    // The caller that started the exchange gives up before it completes
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), client.refresher().refresh()).await;
    assert!(abandoned.is_err());

    // The next caller finishes that exchange rather than starting another
    assert_eq!(client.refresher().refresh().await.unwrap().access_token, "a1");
    assert_eq!(client.refresher().refresh().await.unwrap().access_token, "a2");
}
