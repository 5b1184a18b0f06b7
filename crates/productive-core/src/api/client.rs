//! API client for communicating with the ProductiveYou REST API.
//!
//! `ApiClient` is the single choke point for outbound calls. It owns the
//! transport, the credential store, the refresh coordinator and a handle to
//! the session context, all injected at construction.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::middleware::{attach_credentials, classify};
use super::transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
use super::{ApiError, FieldErrors};
use crate::auth::{CredentialPair, CredentialStore, RefreshCoordinator, Session, SessionContext};
use crate::config::Config;

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "/dj-rest-auth/login/";
const REGISTRATION_PATH: &str = "/dj-rest-auth/registration/";
const LOGOUT_PATH: &str = "/dj-rest-auth/logout/";
const USER_PATH: &str = "/dj-rest-auth/user/";

/// Cookie carrying Django's anti-forgery token
const CSRF_COOKIE: &str = "csrftoken";

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RegistrationRequest<'a> {
    username: &'a str,
    password1: &'a str,
    password2: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default, alias = "access_token")]
    access: Option<String>,
    #[serde(default, alias = "refresh_token")]
    refresh: Option<String>,
    #[serde(default)]
    user: Option<Session>,
}

/// Authenticated client for the ProductiveYou API.
/// Clone is cheap - all state is shared behind `Arc`s.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    refresher: Arc<RefreshCoordinator>,
    session: SessionContext,
}

impl ApiClient {
    /// Build a client over HTTP from the application config
    pub fn new(config: &Config, session: SessionContext) -> Result<Self> {
        let transport = HttpTransport::new(config.base_url(), config.request_timeout())
            .context("Failed to create HTTP client")?;
        let store = config.credential_store()?;
        Ok(Self::with_transport(
            Arc::new(transport),
            store,
            session,
            config.refresh_timeout(),
        ))
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        session: SessionContext,
        refresh_timeout: Duration,
    ) -> Self {
        let refresher = Arc::new(RefreshCoordinator::new(
            transport.clone(),
            store.clone(),
            session.clone(),
            refresh_timeout,
        ));
        Self {
            transport,
            store,
            refresher,
            session,
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    // ===== Request pipeline =====

    /// Send `request` with stored credentials. A 401 on the first attempt
    /// renews the access token and replays the request exactly once; a 401
    /// on the replay is returned to the caller.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let credentials = self.store.get();
        let headers = attach_credentials(&credentials, &request)?;
        let response = self.transport.send(&request, headers).await?;

        if response.status != StatusCode::UNAUTHORIZED || request.retried {
            return classify(response);
        }

        debug!(method = %request.method, path = %request.path, "Unauthorized; renewing access token");
        let token = self
            .refresher
            .renew(credentials.access_token.as_deref())
            .await?;

        let retry = request.into_retry();
        let credentials = self.store.get().with_access_token(token);
        let headers = attach_credentials(&credentials, &retry)?;
        classify(self.transport.send(&retry, headers).await?)
    }

    /// Send without a bearer token and without 401 handling.
    /// Used for the login and registration calls, where a stale stored token
    /// must not be presented.
    async fn execute_anonymous(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let csrf_only = CredentialPair {
            csrf_token: self.store.get().csrf_token,
            ..Default::default()
        };
        let headers = attach_credentials(&csrf_only, request)?;
        classify(self.transport.send(request, headers).await?)
    }

    pub(crate) async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        self.execute(request).await?.json()
    }

    pub(crate) async fn send_json<T: DeserializeOwned, B: Serialize>(
        &self,
        request: ApiRequest,
        body: &B,
    ) -> Result<T, ApiError> {
        self.execute(request.json(body)?).await?.json()
    }

    pub(crate) async fn send_unit(&self, request: ApiRequest) -> Result<(), ApiError> {
        self.execute(request).await.map(|_| ())
    }

    fn store_credentials(&self, pair: &CredentialPair) -> Result<(), ApiError> {
        self.store
            .set(pair)
            .map_err(|e| ApiError::Storage(format!("{:#}", e)))
    }

    // ===== Authentication =====

    /// Sign in and populate the session.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, ApiError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(ApiError::Validation(FieldErrors::non_field(
                "Both fields are required.",
            )));
        }

        let request = ApiRequest::post(LOGIN_PATH).json(&LoginRequest { username, password })?;
        let response = self.execute_anonymous(&request).await?;
        let login: LoginResponse = response.json()?;

        if login.access.is_none() {
            warn!("Login response carried no access token");
        }
        let pair = CredentialPair {
            access_token: login.access,
            refresh_token: login.refresh,
            csrf_token: response
                .cookie(CSRF_COOKIE)
                .or_else(|| self.store.get().csrf_token),
        };
        self.store_credentials(&pair)?;

        let session = match login.user {
            Some(user) => user,
            None => self.current_user().await?,
        };
        info!(username = %session.username, "Signed in");
        self.session.set_session(Some(session.clone()));
        Ok(session)
    }

    /// Create an account. Field problems come back as `ApiError::Validation`.
    pub async fn register(
        &self,
        username: &str,
        password1: &str,
        password2: &str,
    ) -> Result<(), ApiError> {
        let request = ApiRequest::post(REGISTRATION_PATH).json(&RegistrationRequest {
            username,
            password1,
            password2,
        })?;
        self.execute_anonymous(&request).await?;
        info!(username = %username, "Registered account");
        Ok(())
    }

    /// Sign out. Local credentials and the session are dropped even when the
    /// server call fails.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let server_result = self.send_unit(ApiRequest::post(LOGOUT_PATH)).await;
        if let Err(ref e) = server_result {
            warn!(error = %e, "Server logout failed; clearing local session anyway");
        }

        let cleared = self
            .store
            .clear()
            .map_err(|e| ApiError::Storage(format!("{:#}", e)));
        self.session.set_session(None);
        info!("Signed out");
        cleared
    }

    /// Identity of the current user
    pub async fn current_user(&self) -> Result<Session, ApiError> {
        self.fetch(ApiRequest::get(USER_PATH)).await
    }
}
