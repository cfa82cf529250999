//! Types for Discshelf API requests and responses.

use serde::{Deserialize, Serialize};

// =============================================================================
// Authentication Types
// =============================================================================

/// Request body for the login endpoint.
#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request body for registering a new user.
#[derive(Debug, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

/// Request body for token refresh.
#[derive(Debug, Serialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

/// Token pair issued by login and refresh.
#[derive(Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl TokenResponse {
    pub fn token_pair(&self) -> TokenPair {
        TokenPair {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

/// Access and refresh token, always replaced together.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

// Tokens stay out of logs.
impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Profile of the logged in user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
}

fn default_active() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_response_debug_redacts_tokens() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token": "secret_access", "refresh_token": "secret_refresh"}"#,
        )
        .unwrap();

        let printed = format!("{:?}", response);
        assert!(!printed.contains("secret_access"));
        assert!(!printed.contains("secret_refresh"));
        assert!(printed.contains("bearer"));

        let pair = format!("{:?}", response.token_pair());
        assert!(!pair.contains("secret_access"));
        assert!(!pair.contains("secret_refresh"));
    }
}
