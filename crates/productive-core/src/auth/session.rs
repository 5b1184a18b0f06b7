use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::api::ApiClient;

/// The signed-in user as reported by `GET /dj-rest-auth/user/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "UserPayload")]
pub struct Session {
    pub user_id: i64,
    pub username: String,
    pub profile_id: Option<i64>,
    pub profile_image_url: Option<String>,
}

/// Wire shape of the user endpoint. The backend reports the profile either
/// flattened (`profile_id`, `profile_image`) or nested under `profile`.
#[derive(Deserialize)]
struct UserPayload {
    #[serde(alias = "user_id")]
    pk: i64,
    username: String,
    #[serde(default)]
    profile_id: Option<i64>,
    #[serde(default, alias = "profile_image_url")]
    profile_image: Option<String>,
    #[serde(default)]
    profile: Option<NestedProfile>,
}

#[derive(Deserialize)]
struct NestedProfile {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    image: Option<String>,
}

impl From<UserPayload> for Session {
    fn from(payload: UserPayload) -> Self {
        let (nested_id, nested_image) = payload
            .profile
            .map(|p| (p.id, p.image))
            .unwrap_or((None, None));
        Self {
            user_id: payload.pk,
            username: payload.username,
            profile_id: payload.profile_id.or(nested_id),
            profile_image_url: payload.profile_image.or(nested_image),
        }
    }
}

/// Lifecycle of the session context.
///
/// `Uninitialized -> Loading -> Authenticated | Anonymous`, then
/// `Authenticated -> Anonymous` on logout or failed refresh and
/// `Anonymous -> Authenticated` on login.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Uninitialized,
    Loading,
    Authenticated(Session),
    Anonymous,
}

impl SessionState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Authenticated(session) => Some(session),
            _ => None,
        }
    }
}

/// Shared view of who is signed in. Clones observe the same state.
#[derive(Clone)]
pub struct SessionContext {
    state: Arc<watch::Sender<SessionState>>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Uninitialized);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn session(&self) -> Option<Session> {
        self.state.borrow().session().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(*self.state.borrow(), SessionState::Authenticated(_))
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Replace the current session; `None` means signed out.
    pub fn set_session(&self, session: Option<Session>) {
        let next = match session {
            Some(session) => {
                info!(username = %session.username, "Session authenticated");
                SessionState::Authenticated(session)
            }
            None => {
                if self.is_authenticated() {
                    info!("Session ended");
                }
                SessionState::Anonymous
            }
        };
        self.state.send_replace(next);
    }

    /// Ask the API who we are. A failure leaves the context anonymous.
    pub async fn initialize(&self, client: &ApiClient) -> SessionState {
        self.state.send_replace(SessionState::Loading);
        match client.current_user().await {
            Ok(session) => self.set_session(Some(session)),
            Err(e) => {
                debug!(error = %e, "No authenticated user at startup");
                self.set_session(None);
            }
        }
        self.state()
    }
}
