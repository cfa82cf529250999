//! Request construction.

use crate::error::{ApiError, Result};
use reqwest::Method;
use serde::Serialize;
use url::Url;

/// One logical request: what to send, independent of credentials.
///
/// The body is serialized when the descriptor is built, so a retry sends
/// exactly the same bytes and only the `Authorization` header changes.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    url: Url,
    body: Option<Vec<u8>>,
}

impl RequestDescriptor {
    /// Build a descriptor for `path` relative to `base_url`.
    pub fn new<B: Serialize + ?Sized>(
        method: Method,
        base_url: &str,
        path: &str,
        query: Option<&[(&str, &str)]>,
        body: Option<&B>,
    ) -> Result<Self> {
        let url = build_url(base_url, path, query)?;
        let body = body.map(serialize_body).transpose()?;
        Ok(Self { method, url, body })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }
}

/// Join `base_url` and `path`, appending `query` pairs in the given order.
pub fn build_url(base_url: &str, path: &str, query: Option<&[(&str, &str)]>) -> Result<Url> {
    let mut url = Url::parse(&format!("{}{}", base_url, path))
        .map_err(|e| ApiError::InvalidUrl(format!("{}{}: {}", base_url, path, e)))?;

    if let Some(pairs) = query.filter(|p| !p.is_empty()) {
        url.query_pairs_mut().extend_pairs(pairs.iter().copied());
    }

    Ok(url)
}

/// Serialize a request body to JSON bytes.
pub fn serialize_body<B: Serialize + ?Sized>(body: &B) -> Result<Vec<u8>> {
    serde_json::to_vec(body)
        .map_err(|e| ApiError::InvalidRequest(format!("Failed to serialize request body: {}", e)))
}
