//! Deduplication of concurrent password restores.
//!
//! Impatient players resend the restore request while the first one is still
//! running. [`SingleFlight`] runs the work once per key; duplicates arriving
//! meanwhile wait for the leader's result instead of repeating it.

use crate::error::{ReariseError, Result};
use crate::wire::ErrorNumber;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tracing::debug;

type Outcome<V> = Option<std::result::Result<V, ErrorNumber>>;

/// Map of in-flight work keyed by `K`
#[derive(Debug)]
pub struct SingleFlight<K, V> {
    in_flight: Mutex<HashMap<K, watch::Receiver<Outcome<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    /// Create an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` unless the same key is already running
    ///
    /// Followers receive a clone of the leader's value. A leader failure
    /// reaches followers as [`ReariseError::Api`] with the same wire code.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let sender = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match in_flight.get(&key) {
                Some(receiver) => Err(receiver.clone()),
                None => {
                    let (sender, receiver) = watch::channel(None);
                    in_flight.insert(key.clone(), receiver);
                    Ok(sender)
                }
            }
        };

        match sender {
            Ok(sender) => {
                let _slot = Slot { owner: self, key: &key };
                let result = work().await;
                let shared = match &result {
                    Ok(value) => Ok(value.clone()),
                    Err(err) => Err(err.error_number()),
                };
                sender.send_replace(Some(shared));
                result
            }
            Err(mut receiver) => {
                debug!(?key, "Awaiting in-flight work");
                let outcome = receiver
                    .wait_for(Option::is_some)
                    .await
                    .map_err(|_| ReariseError::internal_error("in-flight work was abandoned", None))?
                    .clone();
                match outcome {
                    Some(Ok(value)) => Ok(value),
                    Some(Err(code)) => Err(ReariseError::Api(code)),
                    None => Err(ReariseError::internal_error("in-flight work produced no result", None)),
                }
            }
        }
    }

    /// Number of keys currently running
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Removes the leader's entry when it finishes or is dropped mid-flight.
struct Slot<'a, K: Eq + Hash, V> {
    owner: &'a SingleFlight<K, V>,
    key: &'a K,
}

impl<K: Eq + Hash, V> Drop for Slot<'_, K, V> {
    fn drop(&mut self) {
        self.owner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.key);
    }
}
