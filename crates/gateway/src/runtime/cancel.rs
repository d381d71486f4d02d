//! Per-turn cancellation tokens, tagged by route so a guardian state
//! change can cancel outstanding deep work without touching the rest.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use sv_domain::turn::Route;

/// Tracks active cancellation tokens per trace id.
pub struct CancelMap {
    tokens: Mutex<HashMap<String, (CancellationToken, Route)>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a token for a turn.
    pub fn register(&self, trace_id: &str, route: Route) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens
            .lock()
            .insert(trace_id.to_owned(), (token.clone(), route));
        token
    }

    /// Remove the token when the turn's dispatch completes.
    pub fn remove(&self, trace_id: &str) {
        self.tokens.lock().remove(trace_id);
    }

    /// Cooperatively cancel every outstanding turn on `route`. Returns
    /// how many were signalled.
    pub fn cancel_route(&self, route: Route) -> usize {
        let tokens = self.tokens.lock();
        let mut cancelled = 0;
        for (token, token_route) in tokens.values() {
            if *token_route == route && !token.is_cancelled() {
                token.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn active_count(&self) -> usize {
        self.tokens.lock().len()
    }
}
