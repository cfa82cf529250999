//! Authentication methods for the Discshelf API.

use crate::client::DiscshelfClient;
use crate::error::Result;
use crate::types::{LoginRequest, RegisterRequest, TokenResponse, UserProfile};
use tracing::{debug, info, warn};

pub(crate) const LOGIN_PATH: &str = "/api/v1/auth/login";
pub(crate) const USERS_PATH: &str = "/api/v1/users/";
pub(crate) const CURRENT_USER_PATH: &str = "/api/v1/users/me";

/// Login, registration and profile operations.
///
/// Obtained from [`DiscshelfClient::auth`]. Writes its results into the
/// client's session.
pub struct AuthClient<'a> {
    client: &'a DiscshelfClient,
}

impl<'a> AuthClient<'a> {
    pub(crate) fn new(client: &'a DiscshelfClient) -> Self {
        Self { client }
    }

    /// Login with email and password.
    ///
    /// Stores the issued tokens, then fetches and caches the user's
    /// profile. If the profile fetch fails the tokens stay stored and the
    /// fetch error is returned.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenResponse> {
        debug!(email = %email, "Attempting login");

        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };

        let tokens: TokenResponse = match self.client.post_public(LOGIN_PATH, &request).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(status = e.status(), error = %e, "Login failed");
                return Err(e);
            }
        };

        self.client
            .session()
            .set_tokens(tokens.access_token.clone(), tokens.refresh_token.clone())
            .await;

        let user = self.current_user().await?;
        info!(user_id = user.id, email = %user.email, "Login successful");

        Ok(tokens)
    }

    /// Create a new account. Does not log in.
    pub async fn register(&self, email: &str, password: &str) -> Result<UserProfile> {
        debug!(email = %email, "Registering user");

        let request = RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
        };

        let user: UserProfile = match self.client.post_public(USERS_PATH, &request).await {
            Ok(user) => user,
            Err(e) => {
                warn!(status = e.status(), error = %e, "Registration failed");
                return Err(e);
            }
        };

        info!(user_id = user.id, "Registration successful");
        Ok(user)
    }

    /// Fetch the logged in user's profile and cache it in the session.
    pub async fn current_user(&self) -> Result<UserProfile> {
        let user: UserProfile = self.client.get(CURRENT_USER_PATH, None).await?;
        self.client.session().set_user(user.clone()).await;
        Ok(user)
    }

    /// End the session.
    pub async fn logout(&self) {
        self.client.session().logout().await;
    }
}
