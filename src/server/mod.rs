//! # Protocol Server Module
//!
//! A hyper HTTP/1 server that answers the game API wire protocol. It holds no
//! sessions: every request authenticates from its own token, so connections
//! are fully independent and share only the key ring and the user store.
//!
//! ## Routes
//!
//! - `POST /api/{path}`: encrypted API call, see [`handlers`]
//! - `GET /health`: JSON status and crypto counters (when enabled)
//!
//! ## Error Surface
//!
//! Every failure on an API route leaves the process as a plaintext
//! `{"errorNumber": ...}` body with status 200. Framework errors never reach
//! the wire.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod migration;
pub mod store;
pub mod version;

// Re-export commonly used types
pub use config::ServerConfig;
pub use handlers::{ApiHandler, HandlerRegistry, HandlerRequest};
pub use middleware::{AuthContext, AuthMode};
pub use store::{MemoryUserStore, UserStore};
pub use version::{VersionGate, VersionManifest};

use crate::crypto::CryptoService;
use crate::error::{ReariseError, Result};
use crate::shutdown::Shutdown;
use crate::wire::{split_request, HEADER_SESSION_ID};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use middleware::RequestMiddleware;
use migration::SingleFlight;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use store::LegacyAccount;
use tokio::net::TcpListener;
use tracing::{debug, error, info, instrument, warn};

/// Path prefix of encrypted API routes
pub const API_PREFIX: &str = "/api/";

/// State shared by every connection
pub struct ServerState {
    /// Key ring
    pub crypto: Arc<CryptoService>,
    /// Account storage
    pub store: Arc<dyn UserStore>,
    /// Version negotiation
    pub versions: VersionGate,
    /// Base URL advertised for asset downloads
    pub public_base_url: String,
    /// Password restores in flight, keyed by friend code and password
    pub(crate) restores: SingleFlight<String, LegacyAccount>,
}

impl ServerState {
    /// Bundle the shared state
    #[must_use]
    pub fn new(
        crypto: Arc<CryptoService>,
        store: Arc<dyn UserStore>,
        versions: VersionGate,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            crypto,
            store,
            versions,
            public_base_url: public_base_url.into(),
            restores: SingleFlight::new(),
        }
    }
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("versions", &self.versions)
            .field("public_base_url", &self.public_base_url)
            .finish_non_exhaustive()
    }
}

/// Main server instance managing HTTP connections and request routing
#[derive(Debug)]
pub struct GameServer {
    /// Server configuration
    config: ServerConfig,
    /// Shared state handed to handlers
    state: Arc<ServerState>,
    /// Route table
    registry: HandlerRegistry,
}

impl GameServer {
    /// Create a server with the built-in routes and an in-memory store
    ///
    /// ## Errors
    /// - `ReariseError::Config`: malformed keys or unreadable manifests
    #[instrument(level = "info", name = "server_new", skip(config))]
    pub async fn new(config: ServerConfig) -> Result<Self> {
        Self::with_store(config, Arc::new(MemoryUserStore::new())).await
    }

    /// Create a server backed by `store`
    pub async fn with_store(config: ServerConfig, store: Arc<dyn UserStore>) -> Result<Self> {
        let crypto = Arc::new(config.build_crypto()?);
        let versions = VersionGate::from_config(&config).await?;
        info!(
            app_version = versions.app_version(),
            master_cache_key = %versions.master_cache_key(),
            resource_cache_key = %versions.resource_cache_key(),
            "Game server initialized"
        );

        let state = Arc::new(ServerState::new(
            crypto,
            store,
            versions,
            config.public_base_url.clone(),
        ));
        Ok(Self {
            config,
            state,
            registry: HandlerRegistry::with_builtin_routes(),
        })
    }

    /// Add or replace a route
    pub fn register<H: ApiHandler + 'static>(&mut self, handler: H) {
        self.registry.register(handler);
    }

    /// Shared state
    #[must_use]
    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Bind the configured address and serve until `shutdown` triggers
    ///
    /// ## Errors
    /// - `ReariseError::Server`: bind failure
    #[instrument(level = "info", name = "server_start", skip(self, shutdown))]
    pub async fn start(self, shutdown: Shutdown) -> Result<()> {
        let bind_addr = self.config.bind_addr;
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            error!("Failed to bind to address {}: {}", bind_addr, e);
            ReariseError::server_error(
                format!("Failed to bind to address {bind_addr}: {e}"),
                Some(Box::new(e)),
            )
        })?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from an already bound listener
    ///
    /// Stops accepting once `shutdown` triggers; connections in progress
    /// finish on their own tasks.
    pub async fn serve(self, listener: TcpListener, shutdown: Shutdown) -> Result<()> {
        info!("Server listening on {}", listener.local_addr()?);
        let server = Arc::new(self);

        loop {
            let accepted = tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            let (stream, remote_addr) = match accepted {
                Ok(connection) => connection,
                Err(e) => {
                    // Per-connection accept failures (EMFILE, resets) are not fatal.
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let server_clone = Arc::clone(&server);
            tokio::task::spawn(async move {
                if let Err(e) = hyper::server::conn::http1::Builder::new()
                    .serve_connection(
                        TokioIo::new(stream),
                        service_fn(move |req| {
                            let server = Arc::clone(&server_clone);
                            async move { server.handle_request(req, remote_addr).await }
                        }),
                    )
                    .await
                {
                    debug!("Connection error from {}: {}", remote_addr, e);
                }
            });
        }
    }

    #[instrument(level = "debug", name = "handle_request", skip(self, request))]
    async fn handle_request(
        &self,
        request: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        if method == Method::POST {
            if let Some(api_path) = path.strip_prefix(API_PREFIX) {
                if let Some(handler) = self.registry.get(api_path) {
                    return Ok(self.handle_api(handler, api_path, request, remote_addr).await);
                }
            }
        }

        let response = match (&method, path.as_str()) {
            (&Method::GET, "/health") if self.config.enable_health_check => {
                self.handle_health_check()
            }
            _ => {
                warn!("Unknown endpoint: {} {}", method, path);
                Ok(plain_response(StatusCode::NOT_FOUND, "Not found"))
            }
        };

        Ok(response.unwrap_or_else(|e| {
            error!("Failed to build response for {}: {}", remote_addr, e);
            plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }))
    }

    async fn handle_api(
        &self,
        handler: Arc<dyn ApiHandler>,
        api_path: &str,
        request: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Response<Full<Bytes>> {
        let mut timing = RequestMiddleware::new();
        timing.start_timing();

        let timeout = Duration::from_millis(self.config.request_timeout_ms);
        let outcome = match tokio::time::timeout(timeout, self.run_api(handler, request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ReariseError::internal_error(
                format!("{api_path} exceeded {}ms", self.config.request_timeout_ms),
                None,
            )),
        };

        match outcome {
            Ok(response) => {
                timing.log_completion(api_path, None);
                response
            }
            Err(e) => {
                if e.is_critical() {
                    error!("Critical error handling {} from {}: {}", api_path, remote_addr, e);
                } else {
                    warn!("Request error on {} from {}: {}", api_path, remote_addr, e.internal_message());
                }
                timing.log_completion(api_path, Some(e.error_number().0));
                middleware::error_response(&e)
            }
        }
    }

    async fn run_api(
        &self,
        handler: Arc<dyn ApiHandler>,
        request: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>> {
        let session_id = request
            .headers()
            .get(HEADER_SESSION_ID)
            .map(|value| {
                value
                    .to_str()
                    .map(str::to_owned)
                    .map_err(|_| ReariseError::invalid_token("session header is not ASCII"))
            })
            .transpose()?;

        let crypto = &self.state.crypto;
        let auth = middleware::authenticate(crypto, handler.auth_mode(), session_id.as_deref())?;

        let body = Limited::new(request.into_body(), self.config.max_payload_size)
            .collect()
            .await
            .map_err(|e| ReariseError::request_error(format!("Failed to read request body: {e}")))?
            .to_bytes();

        let decoded = middleware::decode_request(crypto, &auth, &body)?;
        let (common, payload) = split_request(decoded)?;
        self.state
            .versions
            .validate(&common, handler.verify_all_versions())?;

        let result = handler
            .handle(
                &self.state,
                HandlerRequest {
                    auth: auth.clone(),
                    common,
                    payload,
                },
            )
            .await?;
        middleware::encode_response(crypto, &auth, &result)
    }

    fn handle_health_check(&self) -> Result<Response<Full<Bytes>>> {
        let crypto_metrics = self.state.crypto.get_metrics();

        let health_status = serde_json::json!({
            "status": "healthy",
            "version": crate::VERSION,
            "routes": self.registry.paths(),
            "crypto": {
                "token_operations": crypto_metrics.token_operations,
                "envelope_operations": crypto_metrics.envelope_operations,
                "error_rate": crypto_metrics.error_rate_percent(),
                "avg_latency_us": crypto_metrics.average_latency_us(),
            }
        });

        let response_body = serde_json::to_string(&health_status).map_err(|e| {
            ReariseError::internal_error(
                format!("Failed to serialize health status: {e}"),
                Some(Box::new(e)),
            )
        })?;

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/json")
            .header("cache-control", "no-cache")
            .body(Full::new(Bytes::from(response_body)))?)
    }
}

fn plain_response(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(message.as_bytes())));
    *response.status_mut() = status;
    response
}

/// Build a server from `config` and run it until `shutdown` triggers
///
/// ## Example
/// ```rust,no_run
/// use rearise_wire::{shutdown::Shutdown, start_server, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> rearise_wire::Result<()> {
///     let shutdown = Shutdown::new();
///     start_server(ServerConfig::default(), shutdown).await
/// }
/// ```
pub async fn start_server(config: ServerConfig, shutdown: Shutdown) -> Result<()> {
    let server = GameServer::new(config).await?;
    server.start(shutdown).await
}
