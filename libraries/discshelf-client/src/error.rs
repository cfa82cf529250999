//! Error types for the Discshelf client.

use std::collections::HashMap;
use thiserror::Error;

/// Per-field validation messages reported by the server.
pub type FieldErrors = HashMap<String, Vec<String>>;

/// Status reported for failures where no HTTP response was obtained.
pub const NO_RESPONSE_STATUS: u16 = 0;

/// Errors surfaced by the Discshelf client.
///
/// Every variant maps onto the same normalized shape: a human readable
/// [`message`](ApiError::message), an HTTP-style [`status`](ApiError::status)
/// and a (possibly empty) map of [`field_errors`](ApiError::field_errors).
#[derive(Error, Debug)]
pub enum ApiError {
    /// No access token is held; nothing was sent.
    #[error("Authentication required")]
    AuthorizationRequired,

    /// The access token was rejected and refreshing it failed.
    ///
    /// The session has been logged out when this is returned.
    #[error("Session expired. Please login again.")]
    SessionExpired {
        #[source]
        cause: RefreshError,
    },

    /// The server answered with a non-success status.
    #[error("Request rejected ({status}): {message}")]
    RequestRejected {
        status: u16,
        message: String,
        field_errors: FieldErrors,
    },

    /// No response was obtained (connect failure, timeout, broken body).
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// A success response whose body could not be decoded.
    #[error("Failed to parse response: {message}")]
    InvalidResponse { status: u16, message: String },

    /// The request body could not be serialized; nothing was sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The base address or request path does not form a valid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Client configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The durable session store could not be read.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl ApiError {
    /// HTTP status of the failure, or [`NO_RESPONSE_STATUS`] when the server
    /// never answered.
    pub fn status(&self) -> u16 {
        match self {
            Self::AuthorizationRequired | Self::SessionExpired { .. } => 401,
            Self::RequestRejected { status, .. } | Self::InvalidResponse { status, .. } => *status,
            Self::Network(_)
            | Self::InvalidRequest(_)
            | Self::InvalidUrl(_)
            | Self::Config(_)
            | Self::Storage(_) => NO_RESPONSE_STATUS,
        }
    }

    /// Message suitable for showing to a user.
    pub fn message(&self) -> String {
        match self {
            Self::RequestRejected { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Field validation messages; empty for everything but rejected requests.
    pub fn field_errors(&self) -> &FieldErrors {
        static EMPTY: std::sync::OnceLock<FieldErrors> = std::sync::OnceLock::new();
        match self {
            Self::RequestRejected { field_errors, .. } => field_errors,
            _ => EMPTY.get_or_init(FieldErrors::new),
        }
    }

    /// True for 422 rejections, which carry per-field messages.
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Self::RequestRejected { status: 422, .. })
    }

    /// True when the caller should send the user back to a login flow.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::AuthorizationRequired | Self::SessionExpired { .. }
        )
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status())
    }

    pub fn is_network_error(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Why a token refresh exchange failed.
///
/// Cloneable so a single exchange result can be handed to every caller
/// waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// The session holds no refresh token.
    #[error("No refresh token available")]
    NoRefreshToken,

    /// The refresh endpoint answered with a non-success status.
    #[error("Refresh rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The refresh endpoint could not be reached.
    #[error("Refresh request failed: {0}")]
    Network(String),

    /// The refresh endpoint answered 2xx with an unusable body.
    #[error("Failed to parse refresh response: {0}")]
    InvalidResponse(String),

    /// The session was logged out or given other tokens while the exchange
    /// ran. The issued pair was discarded.
    #[error("Session changed during refresh")]
    SessionChanged,
}

/// Errors from a durable key-value store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The key cannot be represented by this store.
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ApiError>;
