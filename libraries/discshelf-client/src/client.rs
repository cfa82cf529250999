//! Main Discshelf API client.

use crate::auth::AuthClient;
use crate::config::ClientConfig;
use crate::error::{ApiError, RefreshError, Result};
use crate::normalize::normalize_failure;
use crate::refresh::RefreshCoordinator;
use crate::request::RequestDescriptor;
use crate::session::SessionStore;
use crate::store::KeyValueStore;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a logical call stands in its refresh-and-retry cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    /// First dispatch; a 401 may still trigger a refresh.
    Initial,
    /// Dispatched again after a refresh; the response is final.
    Retried,
}

/// Client for the Discshelf API.
///
/// Every authenticated call goes through [`execute`](Self::execute), which
/// attaches the session's access token and, when the server rejects it,
/// refreshes the token pair and retries the call once.
///
/// # Example
///
/// ```ignore
/// use discshelf_client::{ClientConfig, DiscshelfClient, FileStore};
/// use std::sync::Arc;
///
/// let storage = Arc::new(FileStore::new("/var/lib/discshelf/session"));
/// let client = DiscshelfClient::connect(ClientConfig::load()?, storage).await?;
///
/// if !client.is_authenticated().await {
///     client.auth().login("me@example.com", "hunter22").await?;
/// }
///
/// let artists: Vec<serde_json::Value> = client.get("/api/v1/artists/", None).await?;
/// ```
pub struct DiscshelfClient {
    http: Client,
    base_url: String,
    session: Arc<SessionStore>,
    refresher: RefreshCoordinator,
}

impl DiscshelfClient {
    /// Create a client with an empty session.
    ///
    /// Use [`connect`](Self::connect) to also restore a persisted session.
    pub fn new(config: ClientConfig, storage: Arc<dyn KeyValueStore>) -> Result<Self> {
        // Validate URL
        if config.api_url.is_empty() {
            return Err(ApiError::InvalidUrl("URL cannot be empty".into()));
        }

        // Parse and normalize URL
        let base_url = config.api_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ApiError::InvalidUrl(
                "URL must start with http:// or https://".into(),
            ));
        }
        url::Url::parse(&base_url).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;

        let http = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(format!("Discshelf/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ApiError::Network)?;

        let session = Arc::new(SessionStore::new(storage));
        let refresher = RefreshCoordinator::new(http.clone(), base_url.clone(), session.clone());

        Ok(Self {
            http,
            base_url,
            session,
            refresher,
        })
    }

    /// Create a client and restore the persisted session, if any.
    pub async fn connect(config: ClientConfig, storage: Arc<dyn KeyValueStore>) -> Result<Self> {
        let client = Self::new(config, storage)?;
        client.session.initialize().await?;
        Ok(client)
    }

    /// Base URL of the API, without trailing slash.
    pub fn url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    pub async fn is_authenticated(&self) -> bool {
        self.session.is_authenticated().await
    }

    /// Login, registration and profile operations.
    pub fn auth(&self) -> AuthClient<'_> {
        AuthClient::new(self)
    }

    /// Run one authenticated call.
    ///
    /// Returns the decoded JSON body; `DELETE` and empty bodies yield an
    /// empty object. Fails with [`ApiError::AuthorizationRequired`] without
    /// touching the network when no access token is held.
    pub async fn execute<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        query: Option<&[(&str, &str)]>,
    ) -> Result<Value> {
        let Some(mut access_token) = self.session.access_token().await else {
            warn!(path = %path, "No access token, refusing to send request");
            return Err(ApiError::AuthorizationRequired);
        };

        let descriptor = RequestDescriptor::new(method, &self.base_url, path, query, body)?;
        let mut attempt = Attempt::Initial;

        loop {
            let response = self.dispatch(&descriptor, &access_token, attempt).await?;

            if response.status() == StatusCode::UNAUTHORIZED
                && attempt == Attempt::Initial
                && self.session.refresh_token().await.is_some()
            {
                warn!(url = %descriptor.url(), "Access token rejected, refreshing");

                match self.refresher.refresh_rejected(&access_token).await {
                    Ok(pair) => {
                        access_token = pair.access_token;
                        attempt = Attempt::Retried;
                        continue;
                    }
                    // Whoever changed the session owns it now
                    Err(cause @ RefreshError::SessionChanged) => {
                        return Err(ApiError::SessionExpired { cause });
                    }
                    Err(cause) => {
                        warn!(error = %cause, "Token refresh failed, ending session");
                        self.session.logout().await;
                        return Err(ApiError::SessionExpired { cause });
                    }
                }
            }

            return Self::finish(descriptor.method(), response).await;
        }
    }

    /// `GET` a path and decode the body into `T`.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Option<&[(&str, &str)]>,
    ) -> Result<T> {
        let value = self.execute::<()>(Method::GET, path, None, query).await?;
        decode(value)
    }

    /// `POST` a JSON body to a path and decode the answer into `T`.
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let value = self.execute(Method::POST, path, Some(body), None).await?;
        decode(value)
    }

    /// `DELETE` a path.
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.execute::<()>(Method::DELETE, path, None, None).await?;
        Ok(())
    }

    /// `POST` without credentials, for endpoints that issue them.
    pub(crate) async fn post_public<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let descriptor = RequestDescriptor::new(Method::POST, &self.base_url, path, None, Some(body))?;
        debug!(url = %descriptor.url(), "Sending unauthenticated request");

        let mut request = self
            .http
            .post(descriptor.url().clone())
            .header(CONTENT_TYPE, "application/json");
        if let Some(bytes) = descriptor.body() {
            request = request.body(bytes.to_vec());
        }

        let response = request.send().await.map_err(ApiError::Network)?;
        decode(Self::finish(descriptor.method(), response).await?)
    }

    async fn dispatch(
        &self,
        descriptor: &RequestDescriptor,
        access_token: &str,
        attempt: Attempt,
    ) -> Result<Response> {
        debug!(
            method = %descriptor.method(),
            url = %descriptor.url(),
            attempt = ?attempt,
            "Dispatching request"
        );

        let mut request = self
            .http
            .request(descriptor.method().clone(), descriptor.url().clone())
            .bearer_auth(access_token)
            .header(CONTENT_TYPE, "application/json");
        if let Some(bytes) = descriptor.body() {
            request = request.body(bytes.to_vec());
        }

        request.send().await.map_err(|e| {
            warn!(url = %descriptor.url(), error = %e, "Request failed without response");
            ApiError::Network(e)
        })
    }

    /// Turn a final response into the call's result.
    async fn finish(method: &Method, response: Response) -> Result<Value> {
        let status = response.status();
        let body = response.bytes().await.map_err(ApiError::Network)?;

        if !status.is_success() {
            debug!(status = status.as_u16(), "Request rejected by server");
            return Err(normalize_failure(status.as_u16(), &body));
        }

        if *method == Method::DELETE || body.is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }

        serde_json::from_slice(&body).map_err(|e| ApiError::InvalidResponse {
            status: status.as_u16(),
            message: e.to_string(),
        })
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| ApiError::InvalidResponse {
        status: StatusCode::OK.as_u16(),
        message: e.to_string(),
    })
}

impl std::fmt::Debug for DiscshelfClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscshelfClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
