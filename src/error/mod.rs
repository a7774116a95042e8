//! # Error Handling Module
//!
//! One error type for both sides of the protocol. The client call engine uses
//! it to separate recoverable conditions from terminal ones, and the server
//! middleware uses it to pick the structured error code that goes on the wire.
//!
//! ## Wire Mapping
//!
//! Nothing in this module is ever sent to a peer verbatim. At the server's
//! protocol boundary every error collapses to an [`ErrorNumber`] via
//! [`ReariseError::error_number`]:
//!
//! - `Api` keeps the code the handler raised
//! - `InvalidToken` becomes *session disconnected*, which clients recover from
//! - everything else becomes the generic *server error*
//!
//! ## Client Categories
//!
//! - **Transport**: timeouts and connection failures, retried locally
//! - **Protocol**: terminal structured errors carrying request and response text
//! - **Terminated**: cooperative cancellation, never counted as a failure

use crate::wire::{ApiErrorBody, ErrorNumber};
use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, ReariseError>;

/// Boxed source error carried by several variants
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error conditions raised by the codecs, the client engine and the server
#[derive(Error, Debug)]
pub enum ReariseError {
    /// Envelope ciphertext failed to decrypt
    ///
    /// Raised on a short envelope, a ciphertext that is not a whole number of
    /// blocks, or bad PKCS#7 padding (usually a wrong key).
    #[error("Envelope decryption failed: {message}")]
    Decryption {
        /// Internal error message for logging
        message: String,
    },

    /// Session token could not be opened
    ///
    /// The token carries no integrity field, so this only fires for tokens
    /// that are not exactly one hex-encoded cipher block.
    #[error("Invalid session token: {message}")]
    InvalidToken {
        /// Internal error message for logging
        message: String,
    },

    /// Response declared a content type outside the recognized set
    #[error("Unexpected response content type: {content_type}")]
    UnexpectedContentType {
        /// Declared content type (empty when the header was absent)
        content_type: String,
        /// Raw response body kept for offline diagnosis
        body: Vec<u8>,
    },

    /// Transport-level failure (timeout, refused connection, reset)
    #[error("Transport error: {message}")]
    Transport {
        /// Internal error message for logging
        message: String,
        /// Whether the failure was a per-attempt timeout
        timeout: bool,
        /// Optional source error for error chain analysis
        #[source]
        source: Option<BoxError>,
    },

    /// Terminal structured error returned by the peer
    ///
    /// Carries the request and the decoded response for post-mortem use.
    #[error("Error fetching data from server: {}", .body.error_number)]
    Protocol {
        /// Decoded structured error body
        body: ApiErrorBody,
        /// API path and serialized request body
        request: String,
        /// Serialized response body
        response: String,
    },

    /// Specific protocol error code raised by a server-side handler
    #[error("Protocol error code {0}")]
    Api(ErrorNumber),

    /// Cooperative cancellation was observed
    #[error("Terminated by shutdown request")]
    Terminated,

    /// More than one session failed in a single harness run
    #[error("Multiple errors ({})", .0.len())]
    Aggregate(Vec<ReariseError>),

    /// Malformed request (bad wrapper, missing header, oversized body)
    #[error("Invalid request: {message}")]
    Request {
        /// Internal error message for logging
        message: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Internal error message for logging
        message: String,
        /// Optional source error for error chain analysis
        #[source]
        source: Option<BoxError>,
    },

    /// HTTP server failure (bind, accept, response building)
    #[error("Server error: {message}")]
    Server {
        /// Internal error message for logging
        message: String,
        /// Optional source error for error chain analysis
        #[source]
        source: Option<BoxError>,
    },

    /// Unexpected internal failure
    #[error("Internal error: {message}")]
    Internal {
        /// Internal error message for logging
        message: String,
        /// Optional source error for error chain analysis
        #[source]
        source: Option<BoxError>,
    },
}

impl ReariseError {
    /// Create a decryption error
    #[inline]
    pub fn decryption<T: Into<String>>(message: T) -> Self {
        Self::Decryption {
            message: message.into(),
        }
    }

    /// Create an invalid token error
    #[inline]
    pub fn invalid_token<T: Into<String>>(message: T) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Create a transport error
    #[inline]
    pub fn transport<T: Into<String>>(message: T, timeout: bool, source: Option<BoxError>) -> Self {
        Self::Transport {
            message: message.into(),
            timeout,
            source,
        }
    }

    /// Create a request error
    #[inline]
    pub fn request_error<T: Into<String>>(message: T) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[inline]
    pub fn config_error<T: Into<String>>(message: T, source: Option<BoxError>) -> Self {
        Self::Config {
            message: message.into(),
            source,
        }
    }

    /// Create a server error
    #[inline]
    pub fn server_error<T: Into<String>>(message: T, source: Option<BoxError>) -> Self {
        Self::Server {
            message: message.into(),
            source,
        }
    }

    /// Create an internal error
    #[inline]
    pub fn internal_error<T: Into<String>>(message: T, source: Option<BoxError>) -> Self {
        Self::Internal {
            message: message.into(),
            source,
        }
    }

    /// Code placed in the structured error envelope at the server boundary
    #[must_use]
    pub fn error_number(&self) -> ErrorNumber {
        match self {
            Self::Api(number) => *number,
            Self::InvalidToken { .. } => ErrorNumber::DISCONNECTED_SESSION,
            _ => ErrorNumber::SERVER_ERROR,
        }
    }

    /// Code carried by a terminal protocol error, if any
    #[must_use]
    pub fn protocol_error_number(&self) -> Option<ErrorNumber> {
        match self {
            Self::Protocol { body, .. } => Some(body.error_number),
            Self::Api(number) => Some(*number),
            _ => None,
        }
    }

    /// Whether this is the cooperative termination signal
    #[inline]
    #[must_use]
    pub fn is_termination(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Whether this is a per-attempt transport timeout
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport { timeout: true, .. })
    }

    /// Whether the server should log this at ERROR rather than WARN
    ///
    /// Handler-raised codes, bad tokens and malformed requests are expected
    /// traffic; everything else points at a real fault.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        !matches!(
            self,
            Self::Api(_) | Self::InvalidToken { .. } | Self::Request { .. } | Self::Terminated
        )
    }

    /// Detailed message for internal logging only
    #[must_use]
    pub fn internal_message(&self) -> String {
        match self {
            Self::Decryption { message }
            | Self::InvalidToken { message }
            | Self::Request { message }
            | Self::Transport { message, .. }
            | Self::Config { message, .. }
            | Self::Server { message, .. }
            | Self::Internal { message, .. } => message.clone(),
            Self::Protocol { request, response, .. } => {
                format!("{request}\n<< {response}")
            }
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for ReariseError {
    #[inline]
    fn from(err: std::io::Error) -> Self {
        Self::server_error(format!("I/O error: {err}"), Some(Box::new(err)))
    }
}

impl From<serde_json::Error> for ReariseError {
    #[inline]
    fn from(err: serde_json::Error) -> Self {
        Self::request_error(format!("JSON parsing error: {err}"))
    }
}

impl From<hyper::Error> for ReariseError {
    #[inline]
    fn from(err: hyper::Error) -> Self {
        Self::server_error(format!("Hyper error: {err}"), Some(Box::new(err)))
    }
}

impl From<hyper::http::Error> for ReariseError {
    #[inline]
    fn from(err: hyper::http::Error) -> Self {
        Self::server_error(format!("HTTP error: {err}"), Some(Box::new(err)))
    }
}

impl From<reqwest::Error> for ReariseError {
    fn from(err: reqwest::Error) -> Self {
        let timeout = err.is_timeout();
        Self::transport(format!("HTTP client error: {err}"), timeout, Some(Box::new(err)))
    }
}
