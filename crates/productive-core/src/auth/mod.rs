//! Authentication state: stored credentials, token renewal and the
//! current session.
//!
//! This module provides:
//! - `CredentialStore`: durable access/refresh/CSRF token storage
//!   (file, OS keychain or memory backed)
//! - `RefreshCoordinator`: single-flight access token renewal with a FIFO
//!   queue of requests waiting on the outcome
//! - `SessionContext`: who is signed in, observable by the rest of the app

pub mod credentials;
pub mod refresh;
pub mod session;

pub use credentials::{
    CredentialPair, CredentialStore, FileCredentialStore, KeyringCredentialStore,
    MemoryCredentialStore,
};
pub use refresh::RefreshCoordinator;
pub use session::{Session, SessionContext, SessionState};
