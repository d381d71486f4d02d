//! Idempotent submission: `Idempotency-Key` replays return the stored
//! response, and concurrent duplicates share exactly one execution via
//! the same single-flight primitive the cache uses.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;

use sv_cache::{FlightOutcome, FlightTicket, LeaderGuard, SingleFlight};

/// A stored API response: status plus the JSON body that was sent.
#[derive(Debug, Clone)]
pub struct StoredResponse {
    pub status: u16,
    pub body: serde_json::Value,
    pub headers: Vec<(String, String)>,
}

/// Outcome of checking a key before running a turn.
pub enum IdemTicket {
    /// Duplicate of a completed request: return this verbatim.
    Replay(StoredResponse),
    /// Duplicate of an in-flight request: await the original's result.
    Wait(broadcast::Receiver<FlightOutcome<StoredResponse>>),
    /// First submission: run the turn, then `complete()` the guard.
    Fresh(LeaderGuard<StoredResponse>),
}

pub struct IdempotencyStore {
    flight: SingleFlight<StoredResponse>,
    done: Mutex<HashMap<String, (StoredResponse, Instant)>>,
    ttl: Duration,
}

impl IdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            flight: SingleFlight::new(),
            done: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Check a key. Keys are scoped by the caller (session + header
    /// value) so different sessions never collide.
    pub fn check(&self, key: &str) -> IdemTicket {
        {
            let mut done = self.done.lock();
            // Lazy expiry.
            if done.len() > 10_000 {
                let ttl = self.ttl;
                done.retain(|_, (_, at)| at.elapsed() < ttl);
            }
            if let Some((stored, at)) = done.get(key) {
                if at.elapsed() < self.ttl {
                    return IdemTicket::Replay(stored.clone());
                }
                done.remove(key);
            }
        }
        match self.flight.begin(key) {
            FlightTicket::Leader(guard) => IdemTicket::Fresh(guard),
            FlightTicket::Follower(rx) => IdemTicket::Wait(rx),
        }
    }

    /// Record the response for a fresh submission and release waiters.
    pub fn complete(&self, key: &str, guard: LeaderGuard<StoredResponse>, response: StoredResponse) {
        self.done
            .lock()
            .insert(key.to_string(), (response.clone(), Instant::now()));
        guard.complete(Ok(response));
    }
}
