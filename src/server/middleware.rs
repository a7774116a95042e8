//! # Middleware Module
//!
//! Authentication and body crypto shared by every API route, plus request
//! timing.
//!
//! ## Authentication Modes
//!
//! | Mode | `X-SID` present | `X-SID` absent |
//! |------|-----------------|----------------|
//! | [`AuthMode::Session`] | open token | disconnected |
//! | [`AuthMode::Login`] | disconnected | login key |
//! | [`AuthMode::LoginOrSession`] | open token | login key |
//!
//! An empty header counts as absent. A token that cannot be opened is always
//! reported as *session disconnected*, which clients recover from by logging
//! in again.
//!
//! ## Pipeline
//!
//! authenticate → [`decode_request`] → handler → [`encode_response`]. Any
//! failure short-circuits into [`error_response`], a plaintext structured
//! error sent with status 200.

use crate::crypto::{CryptoService, EnvelopeKey};
use crate::error::{ReariseError, Result};
use crate::wire::{ApiErrorBody, CONTENT_TYPE_JSON, CONTENT_TYPE_OCTET_STREAM};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How a route authenticates its callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Pre-session routes, body sealed with the login key
    Login,
    /// Routes that require a session token
    Session,
    /// Routes reachable both before and after login
    LoginOrSession,
}

impl AuthMode {
    fn allows_session(self) -> bool {
        matches!(self, Self::Session | Self::LoginOrSession)
    }

    fn allows_login(self) -> bool {
        matches!(self, Self::Login | Self::LoginOrSession)
    }
}

/// Caller identity resolved by [`authenticate`]
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Account id; `None` for login-mode callers
    pub user_id: Option<i32>,
    /// Fresh flag from the token; always false in login mode
    pub fresh: bool,
    key: EnvelopeKey,
}

impl AuthContext {
    /// Key that opened the request and seals the response
    #[must_use]
    pub fn key(&self) -> &EnvelopeKey {
        &self.key
    }

    /// Whether the caller authenticated with a session token
    #[must_use]
    pub fn is_session(&self) -> bool {
        self.user_id.is_some()
    }
}

/// Resolve the caller's identity and body key
///
/// ## Errors
/// - `ReariseError::Api(DISCONNECTED_SESSION)`: no usable credential for the
///   route's mode
/// - `ReariseError::InvalidToken`: malformed token on a session route
pub fn authenticate(
    crypto: &CryptoService,
    mode: AuthMode,
    session_id: Option<&str>,
) -> Result<AuthContext> {
    let session_id = session_id.filter(|sid| !sid.is_empty());

    if mode.allows_session() {
        if let Some(sid) = session_id {
            let opened = crypto.open_session(sid)?;
            debug!(user_id = opened.user_id, fresh = opened.fresh, "Session authenticated");
            return Ok(AuthContext {
                user_id: Some(opened.user_id),
                fresh: opened.fresh,
                key: opened.key,
            });
        }
    }

    if session_id.is_none() && mode.allows_login() {
        return Ok(AuthContext {
            user_id: None,
            fresh: false,
            key: crypto.login_key().clone(),
        });
    }

    Err(ReariseError::Api(crate::wire::ErrorNumber::DISCONNECTED_SESSION))
}

/// Decrypt and parse a request body
///
/// An envelope holding no bytes decodes to `null`.
pub fn decode_request(crypto: &CryptoService, auth: &AuthContext, body: &[u8]) -> Result<Value> {
    let plaintext = crypto.unseal(auth.key(), body)?;
    if plaintext.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(&plaintext)?)
}

/// Serialize and encrypt a handler result
pub fn encode_response(
    crypto: &CryptoService,
    auth: &AuthContext,
    payload: &Value,
) -> Result<Response<Full<Bytes>>> {
    let plaintext = serde_json::to_vec(payload).map_err(|e| {
        ReariseError::internal_error("Failed to serialize response", Some(Box::new(e)))
    })?;
    let sealed = crypto.seal(auth.key(), &plaintext);

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", CONTENT_TYPE_OCTET_STREAM)
        .header("cache-control", "no-cache, no-store, must-revalidate")
        .body(Full::new(Bytes::from(sealed)))?)
}

/// Structured plaintext error for any failure on an API route
///
/// Never encrypted, so clients can read it without a valid key.
#[must_use]
pub fn error_response(err: &ReariseError) -> Response<Full<Bytes>> {
    let body = ApiErrorBody::new(err.error_number());
    let json = serde_json::to_vec(&body).unwrap_or_else(|_| {
        format!(r#"{{"errorNumber":{}}}"#, crate::wire::ErrorNumber::SERVER_ERROR.0).into_bytes()
    });

    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = StatusCode::OK;
    if let Ok(value) = CONTENT_TYPE_JSON.parse() {
        response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

/// Request timing and logging middleware
#[derive(Debug, Clone)]
pub struct RequestMiddleware {
    /// Request start time for latency calculation
    start_time: Option<Instant>,
}

impl RequestMiddleware {
    /// Create new request middleware instance
    #[must_use]
    pub fn new() -> Self {
        Self { start_time: None }
    }

    /// Start timing a request
    pub fn start_timing(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Elapsed time since [`Self::start_timing`], in milliseconds
    #[must_use]
    pub fn elapsed_ms(&self) -> Option<f64> {
        self.start_time
            .map(|start| start.elapsed().as_secs_f64() * 1000.0)
    }

    /// Log request completion with timing
    ///
    /// `error_number` is the structured code when the call failed.
    pub fn log_completion(&self, path: &str, error_number: Option<i64>) {
        let Some(elapsed_ms) = self.elapsed_ms() else {
            return;
        };
        match error_number {
            Some(code) => warn!(path, error_number = code, "Request failed ({elapsed_ms:.2}ms)"),
            None => info!(path, "Request completed ({elapsed_ms:.2}ms)"),
        }
    }
}

impl Default for RequestMiddleware {
    fn default() -> Self {
        Self::new()
    }
}
