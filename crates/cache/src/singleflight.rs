//! Keyed single-flight: at most one build per fingerprint is in flight;
//! later arrivals attach to the leader's outcome broadcast.
//!
//! The leader guard completes exactly once. Dropping it without a
//! result broadcasts an abandonment error so followers never hang.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use sv_domain::error::ErrorClass;

/// What followers receive: the built value, or the leader's error class
/// and message.
pub type FlightOutcome<T> = Result<T, (ErrorClass, String)>;

struct Inner<T> {
    inflight: Mutex<HashMap<String, broadcast::Sender<FlightOutcome<T>>>>,
}

/// Begin result: either you are the leader (build, then `complete()`),
/// or a follower holding a receiver for the leader's outcome.
pub enum FlightTicket<T> {
    Leader(LeaderGuard<T>),
    Follower(broadcast::Receiver<FlightOutcome<T>>),
}

pub struct SingleFlight<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                inflight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn begin(&self, key: &str) -> FlightTicket<T> {
        let mut inflight = self.inner.inflight.lock();
        if let Some(tx) = inflight.get(key) {
            return FlightTicket::Follower(tx.subscribe());
        }
        let (tx, _) = broadcast::channel(1);
        inflight.insert(key.to_string(), tx);
        FlightTicket::Leader(LeaderGuard {
            key: key.to_string(),
            inner: self.inner.clone(),
            completed: false,
        })
    }

    /// Number of keys currently being built (for monitoring).
    pub fn inflight_count(&self) -> usize {
        self.inner.inflight.lock().len()
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LeaderGuard<T> {
    key: String,
    inner: Arc<Inner<T>>,
    completed: bool,
}

impl<T: Clone> LeaderGuard<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Broadcast the outcome to all followers and release the key.
    pub fn complete(mut self, outcome: FlightOutcome<T>) {
        self.broadcast(outcome);
        self.completed = true;
    }

    fn broadcast(&self, outcome: FlightOutcome<T>) {
        if let Some(tx) = self.inner.inflight.lock().remove(&self.key) {
            // No receivers is fine; the leader was alone.
            let _ = tx.send(outcome);
        }
    }
}

impl<T> Drop for LeaderGuard<T> {
    fn drop(&mut self) {
        if !self.completed {
            if let Some(tx) = self.inner.inflight.lock().remove(&self.key) {
                let _ = tx.send(Err((
                    ErrorClass::Internal,
                    "build abandoned by leader".to_string(),
                )));
            }
        }
    }
}
