/// Client configuration
use crate::error::{ApiError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default API address used when nothing else is configured.
pub const DEFAULT_API_URL: &str = "http://localhost:8001";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Base URL of the API (e.g. "https://discs.example.com")
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl ClientConfig {
    /// Create a config pointing at `api_url` with default timeouts.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder();

        // Load from config file if it exists
        let config_path = PathBuf::from("discshelf.toml");
        if config_path.exists() {
            settings = settings.add_source(config::File::from(config_path));
        }

        // Override with environment variables (DISCSHELF_API_URL, ...)
        settings = settings.add_source(config::Environment::with_prefix("DISCSHELF").try_parsing(true));

        let config = settings
            .build()
            .map_err(|e| ApiError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| ApiError::Config(e.to_string()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

// Default values
fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}
