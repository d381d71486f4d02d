//! Classic closed / open / half-open circuit breakers, one per
//! dependency (NLU, each backend, each tool).
//!
//! Error-rate over a bounded outcome window with a minimum sample size;
//! an open breaker cools down, then admits a bounded number of probes.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use sv_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config & state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Error rate that opens the circuit.
    pub failure_rate_threshold: f64,
    /// Outcomes required before the rate is meaningful.
    pub min_calls: usize,
    /// Outcome window length.
    pub window: usize,
    /// Cooldown before an open circuit admits probes.
    pub cooldown_ms: u64,
    /// Probe budget in half-open.
    pub half_open_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            min_calls: 10,
            window: 50,
            cooldown_ms: 30_000,
            half_open_probes: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

struct Inner {
    state: BreakerState,
    outcomes: VecDeque<bool>,
    opened_at_ms: u64,
    probes_left: u32,
    probe_failures: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Breaker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One dependency's breaker. Clock-injected (`now_ms`) for testability;
/// the registry supplies wall-clock time.
pub struct Breaker {
    name: String,
    cfg: BreakerConfig,
    inner: Mutex<Inner>,
}

impl Breaker {
    pub fn new(name: impl Into<String>, cfg: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            cfg,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                outcomes: VecDeque::new(),
                opened_at_ms: 0,
                probes_left: 0,
                probe_failures: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Whether a call may proceed. `Err` carries the remaining cooldown
    /// in seconds for `Retry-After`.
    pub fn allow(&self, now_ms: u64) -> Result<(), u64> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = now_ms.saturating_sub(inner.opened_at_ms);
                if elapsed >= self.cfg.cooldown_ms {
                    self.set_state(&mut inner, BreakerState::HalfOpen);
                    inner.probes_left = self.cfg.half_open_probes;
                    inner.probe_failures = 0;
                    inner.probes_left -= 1;
                    Ok(())
                } else {
                    let remaining_s = (self.cfg.cooldown_ms - elapsed).div_ceil(1_000);
                    Err(remaining_s.max(1))
                }
            }
            BreakerState::HalfOpen => {
                if inner.probes_left > 0 {
                    inner.probes_left -= 1;
                    Ok(())
                } else {
                    Err(self.cfg.cooldown_ms.div_ceil(1_000))
                }
            }
        }
    }

    /// Record a call outcome.
    pub fn record(&self, success: bool, now_ms: u64) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.outcomes.push_back(success);
                while inner.outcomes.len() > self.cfg.window {
                    inner.outcomes.pop_front();
                }
                if inner.outcomes.len() >= self.cfg.min_calls {
                    let failures = inner.outcomes.iter().filter(|ok| !**ok).count();
                    let rate = failures as f64 / inner.outcomes.len() as f64;
                    if rate >= self.cfg.failure_rate_threshold {
                        self.set_state(&mut inner, BreakerState::Open);
                        inner.opened_at_ms = now_ms;
                        inner.outcomes.clear();
                    }
                }
            }
            BreakerState::HalfOpen => {
                if success {
                    // All probes back without a failure closes the circuit.
                    if inner.probes_left == 0 && inner.probe_failures == 0 {
                        self.set_state(&mut inner, BreakerState::Closed);
                        inner.outcomes.clear();
                    }
                } else {
                    inner.probe_failures += 1;
                    self.set_state(&mut inner, BreakerState::Open);
                    inner.opened_at_ms = now_ms;
                }
            }
            // A late result for a call admitted before the trip.
            BreakerState::Open => {}
        }
    }

    fn set_state(&self, inner: &mut Inner, to: BreakerState) {
        if inner.state != to {
            TraceEvent::BreakerTransition {
                dependency: self.name.clone(),
                from: inner.state.as_str().to_string(),
                to: to.as_str().to_string(),
            }
            .emit();
            inner.state = to;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Snapshot row for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub dependency: String,
    pub state: BreakerState,
}

/// Get-or-create registry of breakers keyed by dependency name.
pub struct BreakerRegistry {
    cfg: BreakerConfig,
    breakers: RwLock<HashMap<String, Arc<Breaker>>>,
    epoch: Instant,
}

impl BreakerRegistry {
    pub fn new(cfg: BreakerConfig) -> Self {
        Self {
            cfg,
            breakers: RwLock::new(HashMap::new()),
            epoch: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn breaker(&self, name: &str) -> Arc<Breaker> {
        if let Some(b) = self.breakers.read().get(name) {
            return b.clone();
        }
        let mut map = self.breakers.write();
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(Breaker::new(name, self.cfg.clone())))
            .clone()
    }

    /// Convenience: allow-check by name with wall-clock time.
    pub fn allow(&self, name: &str) -> Result<(), u64> {
        self.breaker(name).allow(self.now_ms())
    }

    /// Convenience: record by name with wall-clock time.
    pub fn record(&self, name: &str, success: bool) {
        self.breaker(name).record(success, self.now_ms());
    }

    pub fn snapshot(&self) -> Vec<BreakerStatus> {
        let mut rows: Vec<BreakerStatus> = self
            .breakers
            .read()
            .values()
            .map(|b| BreakerStatus {
                dependency: b.name().to_string(),
                state: b.state(),
            })
            .collect();
        rows.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> BreakerConfig {
        BreakerConfig {
            failure_rate_threshold: 0.5,
            min_calls: 4,
            window: 8,
            cooldown_ms: 10_000,
            half_open_probes: 2,
        }
    }

    #[test]
    fn stays_closed_below_threshold() {
        let b = Breaker::new("nlu", cfg());
        for i in 0..8 {
            assert!(b.allow(i).is_ok());
            b.record(i % 4 != 0, i); // 25% failures
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn opens_at_threshold_with_min_samples() {
        let b = Breaker::new("nlu", cfg());
        // Three failures are below min_calls; no trip yet.
        for i in 0..3 {
            b.record(false, i);
        }
        assert_eq!(b.state(), BreakerState::Closed);
        b.record(false, 3);
        assert_eq!(b.state(), BreakerState::Open);
        assert!(b.allow(4).is_err());
    }

    #[test]
    fn open_reports_remaining_cooldown() {
        let b = Breaker::new("deep", cfg());
        for i in 0..4 {
            b.record(false, i);
        }
        let retry = b.allow(1_000).unwrap_err();
        assert_eq!(retry, 10); // ceil((10000 - 997) / 1000)

        // After cooldown, a probe is admitted.
        assert!(b.allow(10_004).is_ok());
        assert_eq!(b.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn half_open_probe_budget_is_bounded() {
        let b = Breaker::new("tool", cfg());
        for i in 0..4 {
            b.record(false, i);
        }
        assert!(b.allow(10_010).is_ok()); // probe 1
        assert!(b.allow(10_011).is_ok()); // probe 2
        assert!(b.allow(10_012).is_err()); // budget spent
    }

    #[test]
    fn successful_probes_close_the_circuit() {
        let b = Breaker::new("tool", cfg());
        for i in 0..4 {
            b.record(false, i);
        }
        assert!(b.allow(10_010).is_ok());
        assert!(b.allow(10_011).is_ok());
        b.record(true, 10_020);
        b.record(true, 10_021);
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.allow(10_022).is_ok());
    }

    #[test]
    fn failed_probe_reopens() {
        let b = Breaker::new("tool", cfg());
        for i in 0..4 {
            b.record(false, i);
        }
        assert!(b.allow(10_010).is_ok());
        b.record(false, 10_020);
        assert_eq!(b.state(), BreakerState::Open);
        assert!(b.allow(10_021).is_err());
    }

    #[test]
    fn registry_returns_same_breaker_for_same_name() {
        let reg = BreakerRegistry::new(cfg());
        let a = reg.breaker("nlu");
        let b = reg.breaker("nlu");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.snapshot().len(), 1);
    }
}
