//! Core library for ProductiveYou: an authenticated client for the task,
//! category, team and profile API, with transparent access token renewal.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

#[cfg(test)]
mod test_support;

pub use api::{ApiClient, ApiError};
pub use auth::{Session, SessionContext, SessionState};
pub use config::Config;
