//! Single-flight access token renewal.
//!
//! The first request to see a 401 becomes the leader and performs the one
//! refresh call. Requests that see a 401 while that call is in flight are
//! parked in a FIFO queue and released, in arrival order, with the leader's
//! outcome: either the new access token or the error that ended the refresh.
//!
//! Only a rejected refresh token (400/401 from the refresh endpoint, or none
//! stored) ends the session. Server, network and timeout failures leave the
//! stored credentials alone so a later request can try again.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::{CredentialPair, CredentialStore, SessionContext};
use crate::api::middleware::{attach_credentials, classify};
use crate::api::transport::{ApiRequest, Transport};
use crate::api::ApiError;

pub const REFRESH_PATH: &str = "/dj-rest-auth/token/refresh/";

/// Default bound on a single refresh call
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
    /// Present when the backend rotates refresh tokens
    #[serde(default)]
    refresh: Option<String>,
}

/// Outcome delivered to a parked request
type Waiter = oneshot::Sender<Result<String, ApiError>>;

enum RefreshState {
    Idle,
    Refreshing { waiters: VecDeque<Waiter> },
}

enum Role {
    /// Store already holds a newer token than the one that was rejected
    Current(String),
    Leader(String),
    Follower(oneshot::Receiver<Result<String, ApiError>>),
    NoRefreshToken,
}

pub struct RefreshCoordinator {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    session: SessionContext,
    timeout: Duration,
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        session: SessionContext,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            store,
            session,
            timeout,
            state: Mutex::new(RefreshState::Idle),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock(), RefreshState::Refreshing { .. })
    }

    /// Number of requests parked behind the in-flight refresh
    pub fn pending(&self) -> usize {
        match &*self.lock() {
            RefreshState::Idle => 0,
            RefreshState::Refreshing { waiters } => waiters.len(),
        }
    }

    /// Get an access token to replay a request that was rejected with 401
    /// while carrying `rejected` as its bearer token.
    pub async fn renew(&self, rejected: Option<&str>) -> Result<String, ApiError> {
        loop {
            match self.claim_role(rejected) {
                Role::Current(token) => {
                    debug!("Access token already renewed; replaying");
                    return Ok(token);
                }
                Role::Leader(refresh_token) => return self.lead(&refresh_token).await,
                Role::Follower(rx) => match rx.await {
                    Ok(outcome) => return outcome,
                    // Leader was dropped before finishing; compete again
                    Err(_) => continue,
                },
                Role::NoRefreshToken => {
                    debug!("No refresh token stored; ending session");
                    self.end_session();
                    return Err(ApiError::AuthenticationFailed);
                }
            }
        }
    }

    fn claim_role(&self, rejected: Option<&str>) -> Role {
        let mut state = self.lock();
        match &mut *state {
            RefreshState::Refreshing { waiters } => {
                let (tx, rx) = oneshot::channel();
                waiters.push_back(tx);
                debug!(queued = waiters.len(), "Refresh in flight; request queued");
                Role::Follower(rx)
            }
            RefreshState::Idle => {
                let credentials = self.store.get();
                match (credentials.access_token, credentials.refresh_token) {
                    (Some(current), _) if rejected != Some(current.as_str()) => {
                        Role::Current(current)
                    }
                    (_, Some(refresh_token)) => {
                        *state = RefreshState::Refreshing {
                            waiters: VecDeque::new(),
                        };
                        Role::Leader(refresh_token)
                    }
                    (_, None) => Role::NoRefreshToken,
                }
            }
        }
    }

    async fn lead(&self, refresh_token: &str) -> Result<String, ApiError> {
        let mut guard = LeaderGuard {
            coordinator: self,
            armed: true,
        };
        info!("Refreshing access token");

        let outcome = match tokio::time::timeout(self.timeout, self.request_refresh(refresh_token))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout),
        };
        guard.armed = false;

        match outcome {
            Ok(tokens) => {
                let mut pair = self.store.get().with_access_token(tokens.access.clone());
                if let Some(rotated) = tokens.refresh {
                    pair.refresh_token = Some(rotated);
                }
                if let Err(e) = self.store.set(&pair) {
                    warn!(error = %e, "Failed to persist refreshed access token");
                }

                let waiters = self.take_waiters();
                info!(queued = waiters.len(), "Access token refreshed");
                for waiter in waiters {
                    let _ = waiter.send(Ok(tokens.access.clone()));
                }
                Ok(tokens.access)
            }
            Err(ApiError::AuthenticationFailed) => {
                warn!("Refresh token rejected; ending session");
                let waiters = self.end_session();
                for waiter in waiters {
                    let _ = waiter.send(Err(ApiError::AuthenticationFailed));
                }
                Err(ApiError::AuthenticationFailed)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed; keeping stored credentials");
                let waiters = self.take_waiters();
                for waiter in waiters {
                    let _ = waiter.send(Err(e.duplicate()));
                }
                Err(e)
            }
        }
    }

    /// Call the refresh endpoint. A 400 or 401 means the refresh token itself
    /// is no longer valid and is reported as `AuthenticationFailed`.
    async fn request_refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        let request = ApiRequest::post(REFRESH_PATH).json(&RefreshRequest {
            refresh: refresh_token,
        })?;
        // Only the CSRF token travels with the refresh call
        let csrf_only = CredentialPair {
            csrf_token: self.store.get().csrf_token,
            ..Default::default()
        };
        let headers = attach_credentials(&csrf_only, &request)?;
        let response = self.transport.send(&request, headers).await?;
        if matches!(
            response.status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED
        ) {
            debug!(status = %response.status, "Refresh endpoint rejected the refresh token");
            return Err(ApiError::AuthenticationFailed);
        }
        classify(response)?.json()
    }

    /// Clear credentials, return to idle and drop the session.
    /// Returns the waiters that were queued so the caller can reject them.
    fn end_session(&self) -> VecDeque<Waiter> {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear stored credentials");
        }
        let waiters = self.take_waiters();
        self.session.set_session(None);
        waiters
    }

    fn take_waiters(&self) -> VecDeque<Waiter> {
        match std::mem::replace(&mut *self.lock(), RefreshState::Idle) {
            RefreshState::Idle => VecDeque::new(),
            RefreshState::Refreshing { waiters } => waiters,
        }
    }
}

/// Returns the coordinator to idle if the leading future is dropped mid-refresh.
/// Dropping the queued senders wakes the followers, which then compete to lead.
struct LeaderGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    armed: bool,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!("Refresh abandoned before completion");
            drop(self.coordinator.take_waiters());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryCredentialStore, Session, SessionState};
    use crate::test_support::{json_response, ScriptedTransport};

    fn stored_pair() -> CredentialPair {
        CredentialPair {
            access_token: Some("old".to_string()),
            refresh_token: Some("refresh-1".to_string()),
            csrf_token: Some("csrf".to_string()),
        }
    }

    fn coordinator(
        transport: Arc<ScriptedTransport>,
        store: Arc<MemoryCredentialStore>,
        session: SessionContext,
    ) -> RefreshCoordinator {
        RefreshCoordinator::new(transport, store, session, DEFAULT_REFRESH_TIMEOUT)
    }

    #[tokio::test]
    async fn test_refresh_persists_new_token() {
        let transport = Arc::new(ScriptedTransport::new(|request, _| {
            assert_eq!(request.path, REFRESH_PATH);
            assert_eq!(
                request.body,
                Some(serde_json::json!({"refresh": "refresh-1"}))
            );
            json_response(StatusCode::OK, r#"{"access": "new"}"#)
        }));
        let store = Arc::new(MemoryCredentialStore::with_pair(stored_pair()));
        let coordinator = coordinator(transport.clone(), store.clone(), SessionContext::new());

        let token = coordinator.renew(Some("old")).await.unwrap();
        assert_eq!(token, "new");
        assert_eq!(store.get().access_token.as_deref(), Some("new"));
        assert_eq!(store.get().refresh_token.as_deref(), Some("refresh-1"));
        assert!(!coordinator.is_refreshing());

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        // The rejected bearer token is not sent to the refresh endpoint
        assert_eq!(calls[0].bearer, None);
        assert_eq!(calls[0].csrf.as_deref(), Some("csrf"));
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_is_stored() {
        let transport = Arc::new(ScriptedTransport::new(|_, _| {
            json_response(StatusCode::OK, r#"{"access": "new", "refresh": "refresh-2"}"#)
        }));
        let store = Arc::new(MemoryCredentialStore::with_pair(stored_pair()));
        let coordinator = coordinator(transport, store.clone(), SessionContext::new());

        coordinator.renew(Some("old")).await.unwrap();
        assert_eq!(store.get().refresh_token.as_deref(), Some("refresh-2"));
    }

    #[tokio::test]
    async fn test_stale_rejection_skips_refresh() {
        let transport = Arc::new(ScriptedTransport::new(|_, _| {
            json_response(StatusCode::OK, r#"{"access": "unexpected"}"#)
        }));
        let store = Arc::new(MemoryCredentialStore::with_pair(
            stored_pair().with_access_token("already-new".to_string()),
        ));
        let coordinator = coordinator(transport.clone(), store, SessionContext::new());

        let token = coordinator.renew(Some("old")).await.unwrap();
        assert_eq!(token, "already-new");
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_store_and_session() {
        let transport = Arc::new(ScriptedTransport::new(|_, _| {
            json_response(
                StatusCode::UNAUTHORIZED,
                r#"{"detail": "Token is invalid or expired", "code": "token_not_valid"}"#,
            )
        }));
        let store = Arc::new(MemoryCredentialStore::with_pair(stored_pair()));
        let session = SessionContext::new();
        session.set_session(Some(Session {
            user_id: 1,
            username: "alice".to_string(),
            profile_id: Some(1),
            profile_image_url: None,
        }));
        let coordinator = coordinator(transport, store.clone(), session.clone());

        let result = coordinator.renew(Some("old")).await;
        assert!(matches!(result, Err(ApiError::AuthenticationFailed)));
        assert!(store.get().is_empty());
        assert_eq!(session.state(), SessionState::Anonymous);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_missing_refresh_token_fails_without_network() {
        let transport = Arc::new(ScriptedTransport::new(|_, _| {
            json_response(StatusCode::OK, r#"{"access": "new"}"#)
        }));
        let store = Arc::new(MemoryCredentialStore::with_pair(CredentialPair {
            access_token: Some("old".to_string()),
            ..Default::default()
        }));
        let coordinator = coordinator(transport.clone(), store.clone(), SessionContext::new());

        let result = coordinator.renew(Some("old")).await;
        assert!(matches!(result, Err(ApiError::AuthenticationFailed)));
        assert!(transport.calls().is_empty());
        assert!(store.get().is_empty());
    }

    #[tokio::test]
    async fn test_server_error_keeps_stored_credentials() {
        let transport = Arc::new(ScriptedTransport::new(|_, _| {
            json_response(StatusCode::SERVICE_UNAVAILABLE, "maintenance")
        }));
        let store = Arc::new(MemoryCredentialStore::with_pair(stored_pair()));
        let session = SessionContext::new();
        session.set_session(Some(Session {
            user_id: 1,
            username: "alice".to_string(),
            profile_id: None,
            profile_image_url: None,
        }));
        let coordinator = coordinator(transport.clone(), store.clone(), session.clone());

        let result = coordinator.renew(Some("old")).await;
        assert!(matches!(result, Err(ApiError::ServerError(ref body)) if body == "maintenance"));
        assert_eq!(store.get(), stored_pair());
        assert!(session.is_authenticated());
        assert!(!coordinator.is_refreshing());

        // Nothing was cleared, so the next 401 tries the refresh again
        let _ = coordinator.renew(Some("old")).await;
        assert_eq!(transport.refresh_calls(), 2);
    }

    #[tokio::test]
    async fn test_bad_request_from_refresh_ends_session() {
        let transport = Arc::new(ScriptedTransport::new(|_, _| {
            json_response(StatusCode::BAD_REQUEST, r#"{"refresh": ["This field may not be blank."]}"#)
        }));
        let store = Arc::new(MemoryCredentialStore::with_pair(stored_pair()));
        let coordinator = coordinator(transport, store.clone(), SessionContext::new());

        let result = coordinator.renew(Some("old")).await;
        assert!(matches!(result, Err(ApiError::AuthenticationFailed)));
        assert!(store.get().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_timeout_keeps_stored_credentials() {
        let transport = Arc::new(
            ScriptedTransport::new(|_, _| json_response(StatusCode::OK, r#"{"access": "new"}"#))
                .with_refresh_gate(),
        );
        let store = Arc::new(MemoryCredentialStore::with_pair(stored_pair()));
        let coordinator = RefreshCoordinator::new(
            transport,
            store.clone(),
            SessionContext::new(),
            Duration::from_secs(1),
        );

        // Gate is never opened, so the call hangs until the timeout fires
        let result = coordinator.renew(Some("old")).await;
        assert!(matches!(result, Err(ApiError::Timeout)));
        assert_eq!(store.get(), stored_pair());
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_abandoned_leader_returns_to_idle() {
        let transport = Arc::new(
            ScriptedTransport::new(|_, _| json_response(StatusCode::OK, r#"{"access": "new"}"#))
                .with_refresh_gate(),
        );
        let store = Arc::new(MemoryCredentialStore::with_pair(stored_pair()));
        let coordinator = coordinator(transport.clone(), store.clone(), SessionContext::new());

        {
            let leader = coordinator.renew(Some("old"));
            tokio::pin!(leader);
            // Poll once so the leader claims the refresh, then drop it
            assert!(futures::poll!(leader.as_mut()).is_pending());
            assert!(coordinator.is_refreshing());
        }
        assert!(!coordinator.is_refreshing());

        transport.open_refresh_gate();
        assert_eq!(coordinator.renew(Some("old")).await.unwrap(), "new");
    }
}
