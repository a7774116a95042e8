//! # ReArise Wire Library
//!
//! Encrypted session protocol of the ReArise game API, implemented for both
//! ends of the connection: a client call engine that keeps player sessions
//! alive, and a compatible server that authenticates and answers them.
//!
//! ## Features
//!
//! - **Envelope Codec**: AES-256-CBC bodies behind a 20-byte random header
//! - **Session Tokens**: stateless single-block tokens with derived per-session keys
//! - **Self-Healing Client**: transparent re-login, daily-login replay, backoff and resync
//! - **Cooperative Shutdown**: one cancellation token stops every in-flight wait
//! - **Hyper Server**: login-mode and session-mode routes with structured errors
//!
//! ## Architecture
//!
//! - [`error`] - Crate-wide error type and wire-code mapping
//! - [`crypto`] - Envelope and session token codecs
//! - [`wire`] - Common request/response wrappers, error codes, content types
//! - [`shutdown`] - Cancellation handle shared by all sessions
//! - [`client`] - Call engine, transports and the run harness
//! - [`server`] - Hyper server, auth middleware, handlers and version gate
//!
//! ## Security Model
//!
//! 1. **Login mode**: pre-session routes are sealed with a pre-shared key
//! 2. **Session mode**: the `X-SID` token opens to a user id and a derived key
//! 3. **Errors**: always plaintext `{"errorNumber": ...}`, never encrypted
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use rearise_wire::{shutdown::Shutdown, start_server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::new();
//!     let shutdown = Shutdown::new();
//!     start_server(config, shutdown).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod crypto;
pub mod error;
pub mod server;
pub mod shutdown;
pub mod wire;

// Re-export commonly used types for convenience
pub use client::{run_sessions, Account, ClientConfig, HttpTransport, Session, Transport};
pub use error::{ReariseError, Result};
pub use server::{start_server, GameServer, ServerConfig};

/// Version information for the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default server port
pub const DEFAULT_PORT: u16 = 7999;

/// Default bind address for the server
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";

/// Maximum request payload size in bytes (16MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Timeout for individual request processing in milliseconds
pub const REQUEST_TIMEOUT_MS: u64 = 30_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_are_reasonable() {
        assert!(MAX_PAYLOAD_SIZE > 1024);
        assert!(MAX_PAYLOAD_SIZE < 100 * 1024 * 1024);
        assert!(REQUEST_TIMEOUT_MS > 1000);
        assert!(REQUEST_TIMEOUT_MS < 300_000);
        assert_eq!(DEFAULT_PORT, 7999);
        assert_eq!(
            ServerConfig::default().bind_addr.to_string(),
            format!("{DEFAULT_BIND_ADDR}:{DEFAULT_PORT}")
        );
    }

    #[test]
    fn test_version_is_valid() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }
}
