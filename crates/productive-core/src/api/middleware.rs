//! Request and response middleware, applied by `ApiClient` in this order:
//! `attach_credentials` before dispatch, then `classify` on the response.
//! The 401 handling step sits between the two in `ApiClient::execute`.

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};

use super::transport::{ApiRequest, ApiResponse};
use super::ApiError;
use crate::auth::CredentialPair;

pub const CSRF_HEADER: &str = "x-csrftoken";

/// Build the header map for `request` from the stored credentials.
///
/// The bearer token goes on every request when present. The CSRF token is
/// sent whenever the store has one; mutating requests without one are sent
/// as-is and left for the server to reject.
pub fn attach_credentials(
    credentials: &CredentialPair,
    request: &ApiRequest,
) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
    if request.body.is_some() {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
    }

    if let Some(ref token) = credentials.access_token {
        headers.insert(header::AUTHORIZATION, header_value(&format!("Bearer {}", token))?);
    }
    if let Some(ref csrf) = credentials.csrf_token {
        headers.insert(HeaderName::from_static(CSRF_HEADER), header_value(csrf)?);
    }
    Ok(headers)
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value)
        .map_err(|_| ApiError::Storage("Stored token is not a valid header value".to_string()))
}

/// Pass successful responses through; map everything else onto `ApiError`.
pub fn classify(response: ApiResponse) -> Result<ApiResponse, ApiError> {
    if response.status.is_success() {
        Ok(response)
    } else {
        Err(ApiError::from_status(response.status, &response.body))
    }
}

/// Bearer token carried by a prepared header map
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_attach_credentials_sets_bearer_and_csrf() {
        let credentials = CredentialPair {
            access_token: Some("abc".to_string()),
            refresh_token: Some("r".to_string()),
            csrf_token: Some("csrf".to_string()),
        };
        let headers = attach_credentials(&credentials, &ApiRequest::post("/api/tasks/")).unwrap();
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer abc");
        assert_eq!(headers.get(CSRF_HEADER).unwrap(), "csrf");
        assert_eq!(bearer_token(&headers), Some("abc"));
    }

    #[test]
    fn test_attach_credentials_empty_store() {
        let headers =
            attach_credentials(&CredentialPair::default(), &ApiRequest::get("/api/tasks/"))
                .unwrap();
        assert!(headers.get(header::AUTHORIZATION).is_none());
        assert!(headers.get(CSRF_HEADER).is_none());
        assert_eq!(headers.get(header::ACCEPT).unwrap(), "application/json");
        assert!(headers.get(header::CONTENT_TYPE).is_none());
    }

    #[test]
    fn test_content_type_only_with_body() {
        let request = ApiRequest::post("/api/categories/")
            .json(&serde_json::json!({"name": "Home"}))
            .unwrap();
        let headers = attach_credentials(&CredentialPair::default(), &request).unwrap();
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/json");
    }

    #[test]
    fn test_csrf_sent_on_reads_too() {
        let credentials = CredentialPair {
            csrf_token: Some("csrf".to_string()),
            ..Default::default()
        };
        let headers = attach_credentials(&credentials, &ApiRequest::get("/api/tasks/")).unwrap();
        assert_eq!(headers.get(CSRF_HEADER).unwrap(), "csrf");
    }

    #[test]
    fn test_invalid_token_rejected() {
        let credentials = CredentialPair {
            access_token: Some("bad\ntoken".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            attach_credentials(&credentials, &ApiRequest::get("/")),
            Err(ApiError::Storage(_))
        ));
    }

    #[test]
    fn test_classify() {
        assert!(classify(ApiResponse::new(StatusCode::NO_CONTENT, "")).is_ok());
        assert!(matches!(
            classify(ApiResponse::new(StatusCode::NOT_FOUND, "")),
            Err(ApiError::NotFound(_))
        ));
    }
}
