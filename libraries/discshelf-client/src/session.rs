//! Session state shared by every request.
//!
//! [`SessionStore`] owns the current tokens and cached user profile and is
//! the only component that reads or writes their durable copy. All state is
//! replaced under a single write guard, so a reader never sees an access
//! token from one pair next to the refresh token of another.
//!
//! Mutations that touch the durable copy are serialized by a second lock
//! held until the store calls return. A logout therefore cannot be undone
//! by a token write that started before it, and two writes never leave a
//! mixed pair on disk.

use crate::error::StoreError;
use crate::store::KeyValueStore;
use crate::types::{TokenPair, UserProfile};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Durable key holding the access token.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";
/// Durable key holding the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

#[derive(Debug, Default, Clone)]
struct Session {
    tokens: Option<TokenPair>,
    user: Option<UserProfile>,
}

/// Process-wide session: credentials, profile and authentication flag.
pub struct SessionStore {
    state: RwLock<Session>,
    storage: Arc<dyn KeyValueStore>,
    // Held across the in-memory change and its durable write
    writer: Mutex<()>,
}

impl SessionStore {
    /// Create an empty session backed by `storage`.
    ///
    /// Call [`initialize`](Self::initialize) to restore a persisted session.
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            state: RwLock::new(Session::default()),
            storage,
            writer: Mutex::new(()),
        }
    }

    pub async fn access_token(&self) -> Option<String> {
        self.state
            .read()
            .await
            .tokens
            .as_ref()
            .map(|t| t.access_token.clone())
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.state
            .read()
            .await
            .tokens
            .as_ref()
            .map(|t| t.refresh_token.clone())
    }

    /// Both tokens, read under one lock.
    pub async fn tokens(&self) -> Option<TokenPair> {
        self.state.read().await.tokens.clone()
    }

    pub async fn user(&self) -> Option<UserProfile> {
        self.state.read().await.user.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state.read().await.tokens.is_some()
    }

    /// Replace both tokens and persist them.
    ///
    /// The in-memory pair is swapped before the durable write starts, so
    /// readers see the new pair while it is being persisted.
    pub async fn set_tokens(&self, access_token: impl Into<String>, refresh_token: impl Into<String>) {
        let pair = TokenPair {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        };

        let _writer = self.writer.lock().await;
        self.store_pair(pair).await;
    }

    /// Install `pair` only if the session still holds `exchanged_refresh`.
    ///
    /// Returns `false`, leaving the session alone, when it was logged out
    /// or given other tokens after the exchange started.
    pub(crate) async fn replace_tokens_if(&self, exchanged_refresh: &str, pair: TokenPair) -> bool {
        let _writer = self.writer.lock().await;

        let unchanged = matches!(
            self.state.read().await.tokens.as_ref(),
            Some(current) if current.refresh_token == exchanged_refresh
        );
        if !unchanged {
            debug!("Session changed during refresh, discarding new tokens");
            return false;
        }

        self.store_pair(pair).await;
        true
    }

    // Caller holds `writer`.
    async fn store_pair(&self, pair: TokenPair) {
        self.state.write().await.tokens = Some(pair.clone());
        debug!("Session tokens replaced");

        if let Err(e) = self.persist(&pair).await {
            warn!(error = %e, "Failed to persist session tokens");
        }
    }

    /// Replace the cached user profile. Tokens are left untouched.
    pub async fn set_user(&self, user: UserProfile) {
        self.state.write().await.user = Some(user);
    }

    /// Clear the session and its durable copy. Safe to call repeatedly.
    pub async fn logout(&self) {
        let _writer = self.writer.lock().await;

        let was_authenticated = {
            let mut state = self.state.write().await;
            let was = state.tokens.is_some();
            *state = Session::default();
            was
        };

        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if let Err(e) = self.storage.remove(key).await {
                warn!(key, error = %e, "Failed to remove persisted token");
            }
        }

        if was_authenticated {
            info!("Logged out");
        }
    }

    /// Restore a persisted session.
    ///
    /// Returns `true` when both tokens were found and loaded. If either is
    /// missing (or not valid UTF-8) the session is left empty.
    pub async fn initialize(&self) -> Result<bool, StoreError> {
        let _writer = self.writer.lock().await;

        let access = self.load(ACCESS_TOKEN_KEY).await?;
        let refresh = self.load(REFRESH_TOKEN_KEY).await?;

        match (access, refresh) {
            (Some(access_token), Some(refresh_token)) => {
                self.state.write().await.tokens = Some(TokenPair {
                    access_token,
                    refresh_token,
                });
                info!("Restored persisted session");
                Ok(true)
            }
            _ => {
                debug!("No persisted session found");
                Ok(false)
            }
        }
    }

    async fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let Some(bytes) = self.storage.get(key).await? else {
            return Ok(None);
        };
        match String::from_utf8(bytes) {
            Ok(value) if !value.is_empty() => Ok(Some(value)),
            Ok(_) => Ok(None),
            Err(_) => {
                warn!(key, "Ignoring persisted token that is not valid UTF-8");
                Ok(None)
            }
        }
    }

    async fn persist(&self, pair: &TokenPair) -> Result<(), StoreError> {
        self.storage
            .set(ACCESS_TOKEN_KEY, pair.access_token.as_bytes())
            .await?;
        self.storage
            .set(REFRESH_TOKEN_KEY, pair.refresh_token.as_bytes())
            .await
    }
}
