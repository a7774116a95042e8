//! # Cryptographic Operations Module
//!
//! Both ciphers of the protocol plus the server-side key ring that ties them
//! together.
//!
//! - [`envelope`]: AES-256-CBC body encryption behind a random 20-byte header
//! - [`token`]: AES-128 session tokens and HMAC-MD5 session key derivation
//! - [`CryptoService`]: token codec, login key and operation counters shared
//!   by every server connection
//!
//! ## Performance
//!
//! All operations are synchronous and run on a single block or a small body,
//! so they are called inline from async handlers without `spawn_blocking`.

pub mod envelope;
pub mod token;

pub use envelope::{decode, encode, EnvelopeKey};
pub use token::{IdentityRecord, MintedSession, OpenedSession, SessionTokenCodec};

use crate::error::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Login-mode key of the deployed client
///
/// Used for the routes that precede a session: status check, account
/// creation, login and password restore.
pub const DEFAULT_LOGIN_KEY: &str = "KjS.$O,;+i_qVe|aTBrOd%N|u\\#dR!+9";

/// Server key ring
#[derive(Debug)]
pub struct CryptoService {
    /// Token codec (static token key + HMAC key)
    tokens: SessionTokenCodec,
    /// Pre-shared login-mode key
    login_key: EnvelopeKey,
    /// Tokens minted or opened
    token_operations: AtomicU64,
    /// Envelopes sealed or opened
    envelope_operations: AtomicU64,
    /// Accumulated latency in microseconds
    total_latency_us: AtomicU64,
    /// Failed operations
    error_count: AtomicU64,
}

impl CryptoService {
    /// Create a key ring
    #[must_use]
    pub fn new(tokens: SessionTokenCodec, login_key: EnvelopeKey) -> Self {
        Self {
            tokens,
            login_key,
            token_operations: AtomicU64::new(0),
            envelope_operations: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    /// Pre-shared login-mode key
    #[must_use]
    pub fn login_key(&self) -> &EnvelopeKey {
        &self.login_key
    }

    /// Mint a session for `user_id`
    #[must_use]
    pub fn mint_session(&self, user_id: i32, fresh: bool) -> MintedSession {
        let start = Instant::now();
        let minted = self.tokens.mint(user_id, fresh);
        self.record(&self.token_operations, start, true);
        minted
    }

    /// Open a session token
    pub fn open_session(&self, token: &str) -> Result<OpenedSession> {
        let start = Instant::now();
        let result = self.tokens.open(token);
        self.record(&self.token_operations, start, result.is_ok());
        result
    }

    /// Encrypt a response body
    #[must_use]
    pub fn seal(&self, key: &EnvelopeKey, plaintext: &[u8]) -> Vec<u8> {
        let start = Instant::now();
        let sealed = envelope::encode(key, plaintext);
        self.record(&self.envelope_operations, start, true);
        sealed
    }

    /// Decrypt a request body
    pub fn unseal(&self, key: &EnvelopeKey, sealed: &[u8]) -> Result<Vec<u8>> {
        let start = Instant::now();
        let result = envelope::decode(key, sealed);
        self.record(&self.envelope_operations, start, result.is_ok());
        result
    }

    /// Snapshot of the operation counters
    #[must_use]
    pub fn get_metrics(&self) -> CryptoMetrics {
        CryptoMetrics {
            token_operations: self.token_operations.load(Ordering::Relaxed),
            envelope_operations: self.envelope_operations.load(Ordering::Relaxed),
            total_latency_us: self.total_latency_us.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }

    fn record(&self, counter: &AtomicU64, start: Instant, ok: bool) {
        counter.fetch_add(1, Ordering::Relaxed);
        let elapsed = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.total_latency_us.fetch_add(elapsed, Ordering::Relaxed);
        if !ok {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Operation counters reported by the health endpoint
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CryptoMetrics {
    /// Tokens minted or opened
    pub token_operations: u64,
    /// Envelopes sealed or opened
    pub envelope_operations: u64,
    /// Accumulated latency in microseconds
    pub total_latency_us: u64,
    /// Failed operations
    pub error_count: u64,
}

impl CryptoMetrics {
    /// Total operations of both kinds
    #[must_use]
    pub fn total_operations(&self) -> u64 {
        self.token_operations + self.envelope_operations
    }

    /// Returns the average latency per operation in microseconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_latency_us(&self) -> f64 {
        let total_ops = self.total_operations();
        if total_ops == 0 {
            0.0
        } else {
            self.total_latency_us as f64 / total_ops as f64
        }
    }

    /// Returns the error rate as a percentage of total operations
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn error_rate_percent(&self) -> f64 {
        let total_ops = self.total_operations();
        if total_ops == 0 {
            0.0
        } else {
            (self.error_count as f64 / total_ops as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> CryptoService {
        let tokens = SessionTokenCodec::new(&[1u8; 16], &[2u8; 16]).unwrap();
        CryptoService::new(tokens, EnvelopeKey::from_slice(DEFAULT_LOGIN_KEY.as_bytes()).unwrap())
    }

    #[test]
    fn test_login_key_is_ascii() {
        assert_eq!(DEFAULT_LOGIN_KEY.len(), envelope::KEY_LEN);
        assert!(DEFAULT_LOGIN_KEY.bytes().all(|b| b.is_ascii_graphic()));
        assert_eq!(DEFAULT_LOGIN_KEY.as_bytes()[25], b'\\');
    }

    #[test]
    fn test_session_and_envelope_through_service() {
        let service = service();
        let minted = service.mint_session(12345, true);
        let opened = service.open_session(&minted.session_id).unwrap();
        assert_eq!(opened.user_id, 12345);

        let sealed = service.seal(&opened.key, b"{}");
        assert_eq!(service.unseal(&minted.envelope_key(), &sealed).unwrap(), b"{}");
    }

    #[test]
    fn test_metrics_counting() {
        let service = service();
        let _ = service.mint_session(1, false);
        assert!(service.open_session("nope").is_err());
        let _ = service.seal(service.login_key(), b"x");

        let metrics = service.get_metrics();
        assert_eq!(metrics.token_operations, 2);
        assert_eq!(metrics.envelope_operations, 1);
        assert_eq!(metrics.error_count, 1);
        assert!((metrics.error_rate_percent() - 33.333).abs() < 0.01);
    }

    #[test]
    fn test_metrics_math() {
        let metrics = CryptoMetrics {
            token_operations: 100,
            envelope_operations: 200,
            total_latency_us: 300,
            error_count: 5,
        };

        assert!((metrics.average_latency_us() - 1.0).abs() < f64::EPSILON);
        assert!((metrics.error_rate_percent() - 1.666).abs() < 0.01);
    }
}
