use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(FieldErrors),

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Authentication failed - please sign in again")]
    AuthenticationFailed,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Credential storage error: {0}")]
    Storage(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            400 => match FieldErrors::parse(body) {
                Some(errors) => ApiError::Validation(errors),
                None => ApiError::InvalidResponse(format!(
                    "Status {}: {}",
                    status,
                    Self::truncate_body(body)
                )),
            },
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(Self::truncate_body(body)),
            404 => ApiError::NotFound(Self::truncate_body(body)),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(Self::truncate_body(body)),
            _ => ApiError::InvalidResponse(format!(
                "Status {}: {}",
                status,
                Self::truncate_body(body)
            )),
        }
    }

    /// Copy of this error for handing to more than one caller.
    /// `reqwest::Error` cannot be cloned, so a network error is carried as its message.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            ApiError::Validation(errors) => ApiError::Validation(errors.clone()),
            ApiError::Unauthorized => ApiError::Unauthorized,
            ApiError::AuthenticationFailed => ApiError::AuthenticationFailed,
            ApiError::AccessDenied(body) => ApiError::AccessDenied(body.clone()),
            ApiError::NotFound(body) => ApiError::NotFound(body.clone()),
            ApiError::RateLimited => ApiError::RateLimited,
            ApiError::ServerError(body) => ApiError::ServerError(body.clone()),
            ApiError::NetworkError(e) => ApiError::ServerError(format!("Network error: {}", e)),
            ApiError::Timeout => ApiError::Timeout,
            ApiError::InvalidResponse(msg) => ApiError::InvalidResponse(msg.clone()),
            ApiError::Storage(msg) => ApiError::Storage(msg.clone()),
        }
    }

    /// True for errors that end the current session
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::Unauthorized | ApiError::AuthenticationFailed)
    }
}

/// Field-level validation messages as returned by the REST backend,
/// e.g. `{"username": ["This field is required."], "non_field_errors": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

/// Key the backend uses for errors not tied to a single field
pub const NON_FIELD_ERRORS: &str = "non_field_errors";

#[derive(Deserialize)]
#[serde(untagged)]
enum Messages {
    Many(Vec<String>),
    One(String),
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a single non-field error
    pub fn non_field(message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(NON_FIELD_ERRORS, message);
        errors
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    /// Parse a 400 body. `{"detail": "..."}` is treated as a non-field error.
    /// Returns None when the body is not a JSON object of messages.
    pub fn parse(body: &str) -> Option<Self> {
        let raw: BTreeMap<String, Messages> = serde_json::from_str(body).ok()?;
        let mut errors = Self::new();
        for (field, messages) in raw {
            let field = if field == "detail" {
                NON_FIELD_ERRORS.to_string()
            } else {
                field
            };
            match messages {
                Messages::Many(list) => {
                    for message in list {
                        errors.push(&field, message);
                    }
                }
                Messages::One(message) => errors.push(&field, message),
            }
        }
        if errors.is_empty() {
            None
        } else {
            Some(errors)
        }
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in self.iter() {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                first = false;
                if field == NON_FIELD_ERRORS {
                    write!(f, "{}", message)?;
                } else {
                    write!(f, "{}: {}", field, message)?;
                }
            }
        }
        Ok(())
    }
}
