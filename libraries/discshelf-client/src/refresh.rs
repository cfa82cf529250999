//! Token refresh with single-flight coordination.
//!
//! A refresh token is single-use on the server, so two exchanges started
//! from the same token would race and the loser would be rejected. Every
//! caller therefore goes through one slot holding the in-flight exchange:
//! the first caller starts it, later callers await the same shared future,
//! and all of them receive its result. The exchange empties the slot itself
//! once it finishes, whether or not any caller is still waiting.

use crate::error::RefreshError;
use crate::normalize::failure_message;
use crate::session::SessionStore;
use crate::types::{RefreshTokenRequest, TokenPair, TokenResponse};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub(crate) const REFRESH_PATH: &str = "/api/v1/auth/refresh";

type RefreshResult = Result<TokenPair, RefreshError>;
type InFlight = Shared<BoxFuture<'static, RefreshResult>>;

#[derive(Default)]
struct Slot {
    generation: u64,
    running: Option<InFlight>,
}

/// Performs refresh exchanges and writes their result into the session.
pub struct RefreshCoordinator {
    http: Client,
    base_url: String,
    session: Arc<SessionStore>,
    in_flight: Arc<Mutex<Slot>>,
}

impl RefreshCoordinator {
    pub(crate) fn new(http: Client, base_url: String, session: Arc<SessionStore>) -> Self {
        Self {
            http,
            base_url,
            session,
            in_flight: Arc::new(Mutex::new(Slot::default())),
        }
    }

    /// Exchange the current refresh token for a new pair.
    ///
    /// Joins an exchange that is already running instead of starting a
    /// second one.
    pub async fn refresh(&self) -> RefreshResult {
        self.join_or_start(None).await
    }

    /// Refresh after the server rejected `rejected_access`.
    ///
    /// If the session already holds a different access token, an exchange
    /// finished after the rejected request was sent and that pair is
    /// returned without contacting the server.
    pub(crate) async fn refresh_rejected(&self, rejected_access: &str) -> RefreshResult {
        self.join_or_start(Some(rejected_access)).await
    }

    async fn join_or_start(&self, rejected_access: Option<&str>) -> RefreshResult {
        let exchange = {
            let mut slot = self.in_flight.lock().await;
            if let Some(running) = slot.running.as_ref() {
                debug!("Joining in-flight token refresh");
                running.clone()
            } else {
                let current = self.session.tokens().await;

                if let (Some(rejected), Some(current)) = (rejected_access, current.as_ref()) {
                    if current.access_token != rejected {
                        debug!("Access token already rotated, skipping refresh");
                        return Ok(current.clone());
                    }
                }

                let refresh_token = current
                    .map(|t| t.refresh_token)
                    .ok_or(RefreshError::NoRefreshToken)?;

                slot.generation = slot.generation.wrapping_add(1);
                let exchange = self.start(slot.generation, refresh_token);
                slot.running = Some(exchange.clone());
                exchange
            }
        };

        exchange.await
    }

    fn start(&self, generation: u64, refresh_token: String) -> InFlight {
        let http = self.http.clone();
        let base_url = self.base_url.clone();
        let session = self.session.clone();
        let in_flight = Arc::clone(&self.in_flight);

        async move {
            let result = run_exchange(http, base_url, session, refresh_token).await;

            let mut slot = in_flight.lock().await;
            if slot.generation == generation {
                slot.running = None;
            }

            result
        }
        .boxed()
        .shared()
    }
}

/// One exchange against the refresh endpoint.
///
/// Owns everything it touches so the future can be shared between callers.
async fn run_exchange(
    http: Client,
    base_url: String,
    session: Arc<SessionStore>,
    refresh_token: String,
) -> RefreshResult {
    let url = format!("{}{}", base_url, REFRESH_PATH);
    debug!(url = %url, "Refreshing access token");

    let response = http
        .post(&url)
        .json(&RefreshTokenRequest {
            refresh_token: refresh_token.clone(),
        })
        .send()
        .await
        .map_err(|e| {
            warn!(error = %e, "Token refresh request failed");
            RefreshError::Network(e.to_string())
        })?;

    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| RefreshError::Network(e.to_string()))?;

    if !status.is_success() {
        let message = failure_message(&body);
        warn!(status = status.as_u16(), message = %message, "Token refresh rejected");
        return Err(RefreshError::Rejected {
            status: status.as_u16(),
            message,
        });
    }

    let tokens: TokenResponse = serde_json::from_slice(&body)
        .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;
    let pair = tokens.token_pair();

    if !session.replace_tokens_if(&refresh_token, pair.clone()).await {
        warn!("Session changed during token refresh, dropping issued tokens");
        return Err(RefreshError::SessionChanged);
    }
    debug!("Token refresh successful");

    Ok(pair)
}
