//! Run harness for many concurrent sessions.
//!
//! The first real failure triggers shutdown so every other session stops at
//! its next wait. Terminations caused by that shutdown are not failures.

use crate::error::{ReariseError, Result};
use crate::shutdown::Shutdown;
use std::future::Future;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Run every session to completion or shutdown
///
/// ## Returns
/// Values of the sessions that finished, in submission order. Sessions that
/// ended in [`ReariseError::Terminated`] contribute nothing.
///
/// ## Errors
/// - the single failure, when exactly one session failed
/// - [`ReariseError::Aggregate`] when several did
pub async fn run_sessions<I, F, T>(shutdown: &Shutdown, sessions: I) -> Result<Vec<T>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let mut tasks = JoinSet::new();
    for (index, session) in sessions.into_iter().enumerate() {
        tasks.spawn(async move { (index, session.await) });
    }
    info!(sessions = tasks.len(), "Sessions started");

    let mut finished = Vec::new();
    let mut errors = Vec::new();
    let mut terminated = 0usize;

    while let Some(joined) = tasks.join_next().await {
        let outcome = match joined {
            Ok((index, Ok(value))) => {
                finished.push((index, value));
                continue;
            }
            Ok((_, Err(err))) => err,
            Err(join_error) => ReariseError::internal_error(
                "Session task panicked or was aborted",
                Some(Box::new(join_error)),
            ),
        };

        if outcome.is_termination() {
            terminated += 1;
            continue;
        }
        if !shutdown.is_triggered() {
            error!(error = %outcome, "Session failed, stopping the rest");
        }
        shutdown.trigger();
        errors.push(outcome);
    }

    info!(
        finished = finished.len(),
        failed = errors.len(),
        terminated,
        "Sessions done"
    );

    match errors.len() {
        0 => {
            finished.sort_by_key(|(index, _)| *index);
            Ok(finished.into_iter().map(|(_, value)| value).collect())
        }
        1 => Err(errors.remove(0)),
        _ => Err(ReariseError::Aggregate(errors)),
    }
}
