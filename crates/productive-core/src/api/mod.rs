//! REST API client module for the ProductiveYou backend.
//!
//! Every call goes through `ApiClient`, which attaches the stored bearer and
//! CSRF tokens, and on a 401 renews the access token once through the
//! `RefreshCoordinator` before replaying the request.

pub mod client;
pub mod error;
pub mod middleware;
pub mod resources;
pub mod transport;

pub use client::ApiClient;
pub use error::{ApiError, FieldErrors};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
