//! Mapping of failure responses onto [`ApiError`].

use crate::error::{ApiError, FieldErrors};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

/// Message used when the server gives no usable explanation.
pub const GENERIC_MESSAGE: &str = "An error occurred";

const VALIDATION_MESSAGE: &str = "Validation failed";

/// Shape of an error body. Every field is optional, and a field of the
/// wrong shape is dropped without losing the others.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<Detail>,
    #[serde(default, deserialize_with = "lenient")]
    message: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    errors: Option<FieldErrors>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Detail {
    Text(String),
    Validation(Vec<ValidationIssue>),
    Other(serde_json::Value),
}

/// One entry of a framework-generated validation report.
#[derive(Debug, Deserialize)]
struct ValidationIssue {
    #[serde(default)]
    loc: Vec<serde_json::Value>,
    msg: String,
}

impl ValidationIssue {
    fn field(&self) -> String {
        match self.loc.last() {
            Some(serde_json::Value::String(name)) => name.clone(),
            Some(other) => other.to_string(),
            None => "__all__".to_string(),
        }
    }
}

/// Build the error for a non-success response with status `status` and
/// raw body `body`.
pub fn normalize_failure(status: u16, body: &[u8]) -> ApiError {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    let (message, field_errors) = parsed.into_parts();

    ApiError::RequestRejected {
        status,
        message,
        field_errors,
    }
}

/// Extract just the message of an error body.
pub fn failure_message(body: &[u8]) -> String {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    parsed.into_parts().0
}

impl ErrorBody {
    fn into_parts(self) -> (String, FieldErrors) {
        let mut field_errors = self.errors.unwrap_or_default();

        let message = match self.detail {
            Some(Detail::Text(text)) if !text.is_empty() => Some(text),
            Some(Detail::Validation(issues)) if !issues.is_empty() => {
                if field_errors.is_empty() {
                    for issue in &issues {
                        field_errors
                            .entry(issue.field())
                            .or_default()
                            .push(issue.msg.clone());
                    }
                }
                Some(VALIDATION_MESSAGE.to_string())
            }
            _ => None,
        };

        let message = message
            .or(self.message.filter(|m| !m.is_empty()))
            .unwrap_or_else(|| GENERIC_MESSAGE.to_string());

        (message, field_errors)
    }
}
