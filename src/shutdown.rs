//! # Cooperative Shutdown
//!
//! One cancellation handle is threaded explicitly through every session, every
//! artificial delay and every in-flight call. Triggering it wakes all pending
//! waits at once; each resolves with [`ReariseError::Terminated`], which the
//! run harness never counts as an application failure.
//!
//! ```no_run
//! # async fn demo() -> rearise_wire::Result<()> {
//! use rearise_wire::shutdown::Shutdown;
//! use std::time::Duration;
//!
//! let shutdown = Shutdown::new();
//! let waiter = shutdown.clone();
//! tokio::spawn(async move { waiter.sleep(Duration::from_secs(60)).await });
//! shutdown.trigger();
//! # Ok(())
//! # }
//! ```

use crate::error::{ReariseError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared cancellation handle
///
/// Cloning is cheap; all clones observe the same trigger.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Create an untriggered handle
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every pending wait; idempotent
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been requested
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Handle cancelled by this one but not the other way round
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Underlying token, for integration with other tokio-util consumers
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Resolve once shutdown has been requested
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Sleep unless shutdown is requested first
    ///
    /// ## Errors
    /// Returns [`ReariseError::Terminated`] when shutdown wins.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.guard(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }

    /// Run `future` unless shutdown is requested first
    ///
    /// The future is dropped (and its I/O aborted) on shutdown.
    pub async fn guard<T, F>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(ReariseError::Terminated),
            result = future => result,
        }
    }

    /// Trigger on SIGINT, SIGTERM or SIGHUP
    ///
    /// ## Returns
    /// Name of the signal received
    ///
    /// ## Errors
    /// Fails if a signal handler cannot be installed.
    pub async fn listen_for_signals(&self) -> Result<&'static str> {
        let received = wait_for_signal().await?;
        info!(signal = received, "Received shutdown signal");
        self.trigger();
        Ok(received)
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<&'static str> {
    use signal::unix::{signal as unix_signal, SignalKind};

    let install = |kind: SignalKind, name: &str| {
        unix_signal(kind).map_err(|e| {
            ReariseError::internal_error(format!("Failed to install {name} handler"), Some(Box::new(e)))
        })
    };
    let mut terminate = install(SignalKind::terminate(), "SIGTERM")?;
    let mut hangup = install(SignalKind::hangup(), "SIGHUP")?;

    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            Ok("SIGINT")
        }
        _ = terminate.recv() => Ok("SIGTERM"),
        _ = hangup.recv() => Ok("SIGHUP"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<&'static str> {
    signal::ctrl_c().await?;
    Ok("SIGINT")
}
