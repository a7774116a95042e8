//! # Server Configuration Module
//!
//! Configuration for the protocol server, loaded from command-line arguments
//! with environment variable fallbacks.
//!
//! ## Configuration Sources
//!
//! In order of precedence:
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Default values
//!
//! ## Key Material
//!
//! - `token_key`: 16-byte AES-128 key (hex) that seals session tokens
//! - `hmac_key`: HMAC-MD5 key (hex) that derives per-session keys
//! - `login_key`: 32-character pre-shared key for pre-session routes
//!
//! The defaults are development keys. [`ServerConfig::validate`] warns when
//! they are still in use.

use crate::client::config::parse_env;
use crate::crypto::{envelope, CryptoService, EnvelopeKey, SessionTokenCodec, DEFAULT_LOGIN_KEY};
use crate::error::{ReariseError, Result};
use clap::Parser;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{metadata::ParseLevelError, Level};

/// Development token key; replace in any shared deployment
pub const DEV_TOKEN_KEY: &str = "00000000000000000000000000000000";

/// Development HMAC key; replace in any shared deployment
pub const DEV_HMAC_KEY: &str = "00000000000000000000000000000000";

/// Wrapper for `tracing::Level` to handle serialization/deserialization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogLevel(Level);

impl LogLevel {
    /// Returns the inner `tracing::Level` value.
    #[must_use]
    pub fn inner(&self) -> Level {
        self.0
    }
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        Self(level)
    }
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        log_level.0
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl Serialize for LogLevel {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self(s.parse().map_err(serde::de::Error::custom)?))
    }
}

/// Protocol server configuration
///
/// ## Version Negotiation
/// `app_version` must match the client's declared app version exactly.
/// Master and resource versions are read from manifest files; without a
/// manifest that version is unknown and never checked.
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(
    name = "rearise-server",
    about = "Encrypted session protocol server for the ReArise game API",
    version,
    long_about = None
)]
pub struct ServerConfig {
    /// Network address to bind the server to
    #[arg(
        short = 'b',
        long = "bind",
        value_name = "ADDRESS:PORT",
        default_value = "0.0.0.0:7999",
        env = "REARISE_BIND_ADDR",
        help = "Network address to bind the server to"
    )]
    pub bind_addr: SocketAddr,

    /// Base URL clients use to reach this server's master/resource paths
    #[arg(
        long = "public-url",
        value_name = "URL",
        default_value = "http://127.0.0.1:7999",
        env = "REARISE_PUBLIC_URL",
        help = "Public base URL advertised by app/status"
    )]
    pub public_base_url: String,

    /// AES-128 session token key, hex encoded
    #[arg(
        long = "token-key",
        value_name = "HEX",
        default_value = DEV_TOKEN_KEY,
        env = "REARISE_TOKEN_KEY",
        hide_env_values = true,
        help = "Session token key (32 hex characters)"
    )]
    pub token_key: String,

    /// HMAC-MD5 session key derivation key, hex encoded
    #[arg(
        long = "hmac-key",
        value_name = "HEX",
        default_value = DEV_HMAC_KEY,
        env = "REARISE_HMAC_KEY",
        hide_env_values = true,
        help = "Session key derivation key (hex)"
    )]
    pub hmac_key: String,

    /// Pre-shared login-mode key (32 ASCII characters)
    #[arg(
        long = "login-key",
        value_name = "KEY",
        default_value = DEFAULT_LOGIN_KEY,
        env = "REARISE_LOGIN_KEY",
        hide_env_values = true,
        help = "Pre-shared key for pre-session routes"
    )]
    pub login_key: String,

    /// App version clients must declare
    #[arg(
        long = "app-version",
        value_name = "VERSION",
        default_value = "1.0.0",
        env = "REARISE_APP_VERSION",
        help = "Required client app version"
    )]
    pub app_version: String,

    /// Master data manifest (`{"version": "..."}`)
    #[arg(
        long = "master-manifest",
        value_name = "PATH",
        env = "REARISE_MASTER_MANIFEST",
        help = "Path to the master data manifest"
    )]
    pub master_manifest: Option<PathBuf>,

    /// Resource manifest (`{"version": "..."}`)
    #[arg(
        long = "resource-manifest",
        value_name = "PATH",
        env = "REARISE_RESOURCE_MANIFEST",
        help = "Path to the resource manifest"
    )]
    pub resource_manifest: Option<PathBuf>,

    /// Logging level for the server
    #[arg(
        short = 'l',
        long = "log-level",
        value_name = "LEVEL",
        default_value = "info",
        env = "LOG_LEVEL",
        help = "Logging level (error, warn, info, debug, trace)"
    )]
    pub log_level: LogLevel,

    /// Maximum request payload size in bytes
    #[arg(
        short = 'm',
        long = "max-payload-size",
        value_name = "BYTES",
        default_value_t = crate::MAX_PAYLOAD_SIZE,
        env = "MAX_PAYLOAD_SIZE",
        help = "Maximum request payload size in bytes"
    )]
    pub max_payload_size: usize,

    /// Request timeout in milliseconds
    #[arg(
        short = 't',
        long = "request-timeout",
        value_name = "MILLISECONDS",
        default_value_t = crate::REQUEST_TIMEOUT_MS,
        env = "REQUEST_TIMEOUT_MS",
        help = "Request timeout in milliseconds"
    )]
    pub request_timeout_ms: u64,

    /// Number of worker threads for the server
    #[arg(
        short = 'w',
        long = "worker-threads",
        value_name = "COUNT",
        env = "WORKER_THREADS",
        help = "Number of runtime worker threads (default: 2x CPU cores, at most 16)"
    )]
    pub worker_threads: Option<usize>,

    /// Enable health check endpoint
    #[arg(
        long = "enable-health-check",
        env = "ENABLE_HEALTH_CHECK",
        default_value = "true",
        action = clap::ArgAction::Set,
        help = "Enable health check endpoint"
    )]
    pub enable_health_check: bool,
}

impl ServerConfig {
    /// Create a new configuration with default values
    ///
    /// ## Example
    /// ```rust
    /// use rearise_wire::ServerConfig;
    ///
    /// let config = ServerConfig::new();
    /// assert_eq!(config.bind_addr.port(), 7999);
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from command-line arguments and environment
    #[must_use]
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Load configuration from environment variables only
    ///
    /// Missing variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(bind_addr) = parse_env("REARISE_BIND_ADDR")? {
            config.bind_addr = bind_addr;
        }
        if let Some(url) = parse_env("REARISE_PUBLIC_URL")? {
            config.public_base_url = url;
        }
        if let Some(key) = parse_env("REARISE_TOKEN_KEY")? {
            config.token_key = key;
        }
        if let Some(key) = parse_env("REARISE_HMAC_KEY")? {
            config.hmac_key = key;
        }
        if let Some(key) = parse_env("REARISE_LOGIN_KEY")? {
            config.login_key = key;
        }
        if let Some(version) = parse_env("REARISE_APP_VERSION")? {
            config.app_version = version;
        }
        config.master_manifest = parse_env("REARISE_MASTER_MANIFEST")?.or(config.master_manifest);
        config.resource_manifest =
            parse_env("REARISE_RESOURCE_MANIFEST")?.or(config.resource_manifest);

        if let Some(log_level) = parse_env("LOG_LEVEL")? {
            config.log_level = log_level;
        }
        if let Some(max_size) = parse_env("MAX_PAYLOAD_SIZE")? {
            config.max_payload_size = max_size;
        }
        if let Some(timeout) = parse_env("REQUEST_TIMEOUT_MS")? {
            config.request_timeout_ms = timeout;
        }
        if let Some(workers) = parse_env("WORKER_THREADS")? {
            config.worker_threads = Some(workers);
        }
        if let Some(health) = parse_env("ENABLE_HEALTH_CHECK")? {
            config.enable_health_check = health;
        }

        Ok(config)
    }

    /// Validate the configuration
    ///
    /// ## Errors
    /// - `ReariseError::Config`: malformed keys, missing manifests, zero limits
    pub fn validate(&self) -> Result<()> {
        if self.bind_addr.ip().is_unspecified() {
            tracing::warn!(
                "Binding to wildcard address {} - ensure this is secure for your environment",
                self.bind_addr
            );
        }

        // Builds the key ring once to surface malformed keys at startup.
        self.build_crypto()?;
        if self.token_key == DEV_TOKEN_KEY || self.hmac_key == DEV_HMAC_KEY {
            tracing::warn!("Using development session keys - tokens are forgeable");
        }

        if self.app_version.is_empty() {
            return Err(ReariseError::config_error("App version cannot be empty", None));
        }

        for manifest in [&self.master_manifest, &self.resource_manifest]
            .into_iter()
            .flatten()
        {
            if !manifest.is_file() {
                return Err(ReariseError::config_error(
                    format!("Manifest file does not exist: {}", manifest.display()),
                    None,
                ));
            }
        }

        if self.max_payload_size == 0 {
            return Err(ReariseError::config_error(
                "Maximum payload size cannot be zero",
                None,
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(ReariseError::config_error("Request timeout cannot be zero", None));
        }

        if let Some(workers) = self.worker_threads {
            if workers == 0 {
                return Err(ReariseError::config_error(
                    "Worker thread count cannot be zero",
                    None,
                ));
            }

            if workers > 64 {
                tracing::warn!(
                    "Very high worker thread count: {} - this may cause excessive context switching",
                    workers
                );
            }
        }

        Ok(())
    }

    /// Build the server key ring from the configured keys
    pub fn build_crypto(&self) -> Result<CryptoService> {
        let tokens = SessionTokenCodec::from_hex(&self.token_key, &self.hmac_key)?;
        if self.login_key.len() != envelope::KEY_LEN {
            return Err(ReariseError::config_error(
                format!(
                    "Login key must be {} characters, got {}",
                    envelope::KEY_LEN,
                    self.login_key.len()
                ),
                None,
            ));
        }
        let login_key = EnvelopeKey::from_slice(self.login_key.as_bytes())?;
        Ok(CryptoService::new(tokens, login_key))
    }

    /// Get the optimal number of worker threads
    #[must_use]
    pub fn get_worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(|| {
            // 2x CPU count for I/O-bound workloads, capped at 16
            std::thread::available_parallelism()
                .map(|n| n.get() * 2)
                .unwrap_or(4)
                .min(16)
        })
    }

    /// Build the multi-threaded runtime the server runs on
    pub fn build_runtime(&self) -> Result<tokio::runtime::Runtime> {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.get_worker_threads())
            .thread_name("rearise-worker")
            .enable_all()
            .build()
            .map_err(|e| {
                ReariseError::server_error("Failed to build async runtime", Some(Box::new(e)))
            })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], crate::DEFAULT_PORT)),
            public_base_url: format!("http://127.0.0.1:{}", crate::DEFAULT_PORT),
            token_key: DEV_TOKEN_KEY.to_string(),
            hmac_key: DEV_HMAC_KEY.to_string(),
            login_key: DEFAULT_LOGIN_KEY.to_string(),
            app_version: "1.0.0".to_string(),
            master_manifest: None,
            resource_manifest: None,
            log_level: LogLevel::from(Level::INFO),
            max_payload_size: crate::MAX_PAYLOAD_SIZE,
            request_timeout_ms: crate::REQUEST_TIMEOUT_MS,
            worker_threads: None,
            enable_health_check: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_manifest_file(version: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, r#"{{"version":"{version}"}}"#).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr.port(), 7999);
        assert_eq!(config.log_level, LogLevel::from(Level::INFO));
        assert_eq!(config.max_payload_size, crate::MAX_PAYLOAD_SIZE);
        assert_eq!(config.request_timeout_ms, crate::REQUEST_TIMEOUT_MS);
        assert_eq!(config.login_key, DEFAULT_LOGIN_KEY);
        assert!(config.enable_health_check);
        assert!(config.master_manifest.is_none());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_keys() {
        let mut config = ServerConfig::default();
        config.token_key = "abcd".to_string();
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.hmac_key = "not hex".to_string();
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.login_key = "short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_missing_manifest() {
        let mut config = ServerConfig::default();
        config.master_manifest = Some(PathBuf::from("/nonexistent/manifest"));
        assert!(config.validate().is_err());

        let manifest = create_manifest_file("20240101");
        config.master_manifest = Some(manifest.path().to_path_buf());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_limits() {
        let mut config = ServerConfig::default();
        config.max_payload_size = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.request_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.worker_threads = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_worker_threads_calculation() {
        let config = ServerConfig::default();
        let worker_count = config.get_worker_threads();
        assert!(worker_count >= 1);
        assert!(worker_count <= 16);

        let mut config = ServerConfig::default();
        config.worker_threads = Some(8);
        assert_eq!(config.get_worker_threads(), 8);
    }

    #[test]
    fn test_runtime_uses_configured_workers() {
        let mut config = ServerConfig::default();
        config.worker_threads = Some(3);
        let runtime = config.build_runtime().unwrap();
        assert_eq!(runtime.metrics().num_workers(), 3);

        let handle = runtime.spawn(async { std::thread::current().name().map(str::to_owned) });
        let thread_name = runtime.block_on(handle).unwrap();
        assert_eq!(thread_name.as_deref(), Some("rearise-worker"));
    }

    #[test]
    fn test_build_crypto() {
        let crypto = ServerConfig::default().build_crypto().unwrap();
        let minted = crypto.mint_session(1, false);
        assert!(crypto.open_session(&minted.session_id).is_ok());
    }

    #[test]
    fn test_parse_from_cli_arguments() {
        let config = ServerConfig::try_parse_from([
            "rearise-server",
            "--bind",
            "127.0.0.1:8080",
            "--app-version",
            "2.3.0",
            "--enable-health-check",
            "false",
        ])
        .unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.app_version, "2.3.0");
        assert!(!config.enable_health_check);
    }

    #[test]
    fn test_config_serialization() {
        let config = ServerConfig::default();

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("bind_addr"));
        assert!(json.contains("log_level"));

        let deserialized: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.bind_addr.port(), config.bind_addr.port());
        assert_eq!(deserialized.log_level, config.log_level);
    }

    #[test]
    fn test_from_env_parsing() {
        std::env::set_var("REARISE_BIND_ADDR", "127.0.0.1:8081");
        std::env::set_var("REARISE_APP_VERSION", "9.9.9");
        std::env::set_var("WORKER_THREADS", "4");
        std::env::set_var("ENABLE_HEALTH_CHECK", "false");

        let config = ServerConfig::from_env().unwrap();

        assert_eq!(config.bind_addr.port(), 8081);
        assert_eq!(config.app_version, "9.9.9");
        assert_eq!(config.worker_threads, Some(4));
        assert!(!config.enable_health_check);

        std::env::remove_var("REARISE_BIND_ADDR");
        std::env::remove_var("REARISE_APP_VERSION");
        std::env::remove_var("WORKER_THREADS");
        std::env::remove_var("ENABLE_HEALTH_CHECK");

        // Same test: env vars are process-wide.
        std::env::set_var("REQUEST_TIMEOUT_MS", "soon");

        let result = ServerConfig::from_env();
        assert!(result.is_err());

        std::env::remove_var("REQUEST_TIMEOUT_MS");
    }
}
