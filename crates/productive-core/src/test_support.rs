//! Scripted transport used by unit tests in place of the network.

use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, SET_COOKIE};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tokio::sync::watch;

use crate::api::middleware::{bearer_token, CSRF_HEADER};
use crate::api::transport::{ApiRequest, ApiResponse, Transport};
use crate::api::ApiError;
use crate::auth::refresh::REFRESH_PATH;

/// One request as the transport saw it.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub bearer: Option<String>,
    pub csrf: Option<String>,
    pub body: Option<Value>,
    pub retried: bool,
}

type Handler = Box<dyn Fn(&ApiRequest, Option<&str>) -> ApiResponse + Send + Sync>;

/// Answers every request through `handler(request, bearer_token)` and records it.
/// With a gate installed, refresh calls block until the gate is opened.
pub struct ScriptedTransport {
    handler: Handler,
    calls: Mutex<Vec<RecordedCall>>,
    refresh_gate: Option<watch::Sender<bool>>,
}

impl ScriptedTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&ApiRequest, Option<&str>) -> ApiResponse + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            refresh_gate: None,
        }
    }

    pub fn with_refresh_gate(mut self) -> Self {
        self.refresh_gate = Some(watch::channel(false).0);
        self
    }

    pub fn open_refresh_gate(&self) {
        if let Some(ref gate) = self.refresh_gate {
            gate.send_replace(true);
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.path == path)
            .collect()
    }

    pub fn refresh_calls(&self) -> usize {
        self.calls_to(REFRESH_PATH).len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest, headers: HeaderMap) -> Result<ApiResponse, ApiError> {
        let bearer = bearer_token(&headers).map(str::to_string);
        self.calls.lock().unwrap().push(RecordedCall {
            method: request.method.clone(),
            path: request.path.clone(),
            query: request.query.clone(),
            bearer: bearer.clone(),
            csrf: headers
                .get(CSRF_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body: request.body.clone(),
            retried: request.retried,
        });

        if request.path == REFRESH_PATH {
            if let Some(ref gate) = self.refresh_gate {
                let mut rx = gate.subscribe();
                let _ = rx.wait_for(|open| *open).await;
            }
        }

        Ok((self.handler)(request, bearer.as_deref()))
    }
}

pub fn json_response(status: StatusCode, body: &str) -> ApiResponse {
    ApiResponse::new(status, body)
}

pub fn with_cookie(mut response: ApiResponse, cookie: &'static str) -> ApiResponse {
    response
        .headers
        .append(SET_COOKIE, HeaderValue::from_static(cookie));
    response
}
