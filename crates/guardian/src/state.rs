//! The admission state machine. Pure and clock-injected: every method
//! takes `now_ms`, which is what makes the hysteresis rules testable
//! without sleeping.
//!
//! Transitions step one state at a time, at most one step per sample,
//! so escalation from NORMAL to EMERGENCY under a hard breach takes two
//! consecutive samples (~2 s at the default cadence).

use std::collections::VecDeque;

use serde::Serialize;

use sv_domain::config::GuardianConfig;
use sv_domain::turn::{GuardianState, Route};

use crate::sampler::HostSample;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admission policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The outcome of an `admit()` check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum Admission {
    Allow,
    /// Proceed, but with reduced capability (smaller RAG context,
    /// strict schema).
    Degrade { reason: String },
    Reject { reason: String, retry_after_s: u64 },
}

/// Derived per-state admission policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AdmissionPolicy {
    pub allow_deep: bool,
    pub allow_planner: bool,
    pub planner_degraded: bool,
    pub max_concurrent_deep: usize,
    /// Scalar applied to per-route quota windows.
    pub quota_scalar: f64,
}

impl AdmissionPolicy {
    pub fn for_state(state: GuardianState) -> Self {
        match state {
            GuardianState::Normal => Self {
                allow_deep: true,
                allow_planner: true,
                planner_degraded: false,
                max_concurrent_deep: 1,
                quota_scalar: 1.0,
            },
            GuardianState::Brownout => Self {
                allow_deep: false,
                allow_planner: true,
                planner_degraded: true,
                max_concurrent_deep: 0,
                quota_scalar: 0.5,
            },
            GuardianState::Emergency | GuardianState::Lockdown => Self {
                allow_deep: false,
                allow_planner: false,
                planner_degraded: true,
                max_concurrent_deep: 0,
                quota_scalar: 0.25,
            },
        }
    }

    /// O(1) route gate.
    pub fn admit(&self, state: GuardianState, route: Route, retry_after_s: u64) -> Admission {
        match route {
            Route::Micro => Admission::Allow,
            Route::Planner if self.allow_planner => {
                if self.planner_degraded {
                    Admission::Degrade {
                        reason: format!("planner degraded in {state} state"),
                    }
                } else {
                    Admission::Allow
                }
            }
            Route::Deep if self.allow_deep => Admission::Allow,
            _ => Admission::Reject {
                reason: format!("{route} blocked in {state} state"),
                retry_after_s,
            },
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A completed transition, for logging and the status API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub from: GuardianState,
    pub to: GuardianState,
    pub reasons: Vec<String>,
    pub at_ms: u64,
}

/// Per-sample breach flags kept in the sliding window.
#[derive(Debug, Clone, Copy)]
struct Breach {
    soft: bool,
}

pub struct StateMachine {
    cfg: GuardianConfig,
    state: GuardianState,
    entered_at_ms: u64,
    window: VecDeque<Breach>,
    below_recover_since_ms: Option<u64>,
    kill_events: VecDeque<u64>,
}

impl StateMachine {
    pub fn new(cfg: GuardianConfig, now_ms: u64) -> Self {
        Self {
            cfg,
            state: GuardianState::Normal,
            entered_at_ms: now_ms,
            window: VecDeque::new(),
            below_recover_since_ms: None,
            kill_events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> GuardianState {
        self.state
    }

    pub fn entered_at_ms(&self) -> u64 {
        self.entered_at_ms
    }

    /// Feed one host sample. Returns a transition when one fired.
    pub fn on_sample(&mut self, sample: &HostSample, now_ms: u64) -> Option<Transition> {
        let soft = sample.ram_pct >= self.cfg.ram_soft_pct || sample.cpu_pct >= self.cfg.cpu_soft_pct;
        self.window.push_back(Breach { soft });
        while self.window.len() > self.cfg.window {
            self.window.pop_front();
        }

        let mut hard_reasons = Vec::new();
        if sample.ram_pct >= self.cfg.ram_hard_pct {
            hard_reasons.push("ram_hard".to_string());
        }
        if sample.temp_c.is_some_and(|t| t >= self.cfg.temp_hard_c) {
            hard_reasons.push("temp_hard".to_string());
        }
        if sample
            .battery_pct
            .is_some_and(|b| b <= self.cfg.battery_hard_pct)
        {
            hard_reasons.push("battery_hard".to_string());
        }
        let hard = !hard_reasons.is_empty();

        let soft_sustained =
            self.window.len() == self.cfg.window && self.window.iter().all(|b| b.soft);

        // Recovery band: ram and cpu below recover AND no hard breach,
        // otherwise the machine would flap straight back out of NORMAL.
        let below_recover = sample.ram_pct <= self.cfg.ram_recover_pct
            && sample.cpu_pct <= self.cfg.cpu_recover_pct
            && !hard;
        if below_recover {
            self.below_recover_since_ms.get_or_insert(now_ms);
        } else {
            self.below_recover_since_ms = None;
        }
        let recovered = self
            .below_recover_since_ms
            .is_some_and(|since| now_ms.saturating_sub(since) >= self.cfg.recover_dwell_s * 1_000);

        self.prune_kills(now_ms);

        match self.state {
            GuardianState::Normal => {
                if hard {
                    Some(self.transition(GuardianState::Brownout, hard_reasons, now_ms))
                } else if soft_sustained {
                    Some(self.transition(
                        GuardianState::Brownout,
                        vec!["soft_sustained".to_string()],
                        now_ms,
                    ))
                } else {
                    None
                }
            }
            GuardianState::Brownout => {
                if hard {
                    Some(self.transition(GuardianState::Emergency, hard_reasons, now_ms))
                } else if recovered {
                    Some(self.transition(
                        GuardianState::Normal,
                        vec!["recovered".to_string()],
                        now_ms,
                    ))
                } else {
                    None
                }
            }
            GuardianState::Emergency => {
                if recovered {
                    Some(self.transition(
                        GuardianState::Normal,
                        vec!["recovered".to_string()],
                        now_ms,
                    ))
                } else {
                    None
                }
            }
            GuardianState::Lockdown => {
                let expired = now_ms.saturating_sub(self.entered_at_ms)
                    >= self.cfg.lockdown_exit_s * 1_000;
                if recovered {
                    Some(self.transition(
                        GuardianState::Normal,
                        vec!["recovered".to_string()],
                        now_ms,
                    ))
                } else if expired {
                    Some(self.transition(
                        GuardianState::Emergency,
                        vec!["lockdown_expired".to_string()],
                        now_ms,
                    ))
                } else {
                    None
                }
            }
        }
    }

    /// Record a kill action (cancellation of outstanding deep work).
    /// Exceeding the configured rate while in EMERGENCY escalates to
    /// LOCKDOWN.
    pub fn record_kill(&mut self, now_ms: u64) -> Option<Transition> {
        self.kill_events.push_back(now_ms);
        self.prune_kills(now_ms);
        if self.state == GuardianState::Emergency
            && self.kill_events.len() > self.cfg.kill_max as usize
        {
            return Some(self.transition(
                GuardianState::Lockdown,
                vec!["kill_rate_exceeded".to_string()],
                now_ms,
            ));
        }
        None
    }

    fn prune_kills(&mut self, now_ms: u64) {
        let horizon = self.cfg.kill_window_min * 60 * 1_000;
        while let Some(&front) = self.kill_events.front() {
            if now_ms.saturating_sub(front) > horizon {
                self.kill_events.pop_front();
            } else {
                break;
            }
        }
    }

    fn transition(&mut self, to: GuardianState, reasons: Vec<String>, now_ms: u64) -> Transition {
        let from = self.state;
        self.state = to;
        self.entered_at_ms = now_ms;
        // Leaving a state invalidates the recovery dwell accumulated
        // inside it, except the recovery transition itself.
        if to != GuardianState::Normal {
            self.below_recover_since_ms = None;
        }
        Transition {
            from,
            to,
            reasons,
            at_ms: now_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> GuardianConfig {
        GuardianConfig::default()
    }

    fn sample(ram: f32, cpu: f32) -> HostSample {
        HostSample {
            ram_pct: ram,
            cpu_pct: cpu,
            temp_c: Some(45.0),
            battery_pct: Some(80.0),
            proc_rss_mb: 100,
            sys_used_mb: 4_000,
        }
    }

    #[test]
    fn sustained_soft_breach_enters_brownout() {
        let mut sm = StateMachine::new(cfg(), 0);
        for i in 0..4 {
            assert!(sm.on_sample(&sample(85.0, 20.0), i * 1_000).is_none());
            assert_eq!(sm.state(), GuardianState::Normal);
        }
        // Fifth consecutive breach fills the window.
        let t = sm.on_sample(&sample(85.0, 20.0), 4_000).expect("transition");
        assert_eq!(t.to, GuardianState::Brownout);
        assert_eq!(t.reasons, vec!["soft_sustained"]);
    }

    #[test]
    fn below_soft_threshold_never_trips() {
        let mut sm = StateMachine::new(cfg(), 0);
        for i in 0..20 {
            assert!(sm.on_sample(&sample(79.9, 69.0), i * 1_000).is_none());
        }
        assert_eq!(sm.state(), GuardianState::Normal);
    }

    #[test]
    fn interrupted_breach_resets_the_window() {
        let mut sm = StateMachine::new(cfg(), 0);
        for i in 0..4 {
            sm.on_sample(&sample(85.0, 20.0), i * 1_000);
        }
        // One clean sample breaks the run.
        sm.on_sample(&sample(50.0, 20.0), 4_000);
        for i in 5..9 {
            assert!(sm.on_sample(&sample(85.0, 20.0), i * 1_000).is_none());
        }
        assert_eq!(sm.state(), GuardianState::Normal);
    }

    #[test]
    fn hard_breach_escalates_stepwise_to_emergency() {
        let mut sm = StateMachine::new(cfg(), 0);
        let t = sm.on_sample(&sample(95.0, 20.0), 0).expect("to brownout");
        assert_eq!(t.to, GuardianState::Brownout);
        assert_eq!(t.reasons, vec!["ram_hard"]);

        let t = sm.on_sample(&sample(95.0, 20.0), 1_000).expect("to emergency");
        assert_eq!(t.to, GuardianState::Emergency);
    }

    #[test]
    fn low_battery_is_a_hard_breach() {
        let mut sm = StateMachine::new(cfg(), 0);
        let mut s = sample(50.0, 20.0);
        s.battery_pct = Some(20.0);
        let t = sm.on_sample(&s, 0).expect("transition");
        assert_eq!(t.reasons, vec!["battery_hard"]);
    }

    #[test]
    fn recovery_requires_the_full_dwell() {
        let mut sm = StateMachine::new(cfg(), 0);
        sm.on_sample(&sample(95.0, 20.0), 0);
        sm.on_sample(&sample(95.0, 20.0), 1_000);
        assert_eq!(sm.state(), GuardianState::Emergency);

        // Dwell is measured from the first below-band sample, so the
        // 60th second after it is the first eligible one.
        for i in 0..=60 {
            let t = sm.on_sample(&sample(50.0, 30.0), 2_000 + i * 1_000);
            if i < 60 {
                assert!(t.is_none(), "recovered too early at sample {i}");
            } else {
                assert_eq!(t.expect("recovery").to, GuardianState::Normal);
            }
        }
    }

    #[test]
    fn recovery_dwell_resets_on_spike() {
        let mut sm = StateMachine::new(cfg(), 0);
        sm.on_sample(&sample(95.0, 20.0), 0);
        sm.on_sample(&sample(95.0, 20.0), 1_000);

        for i in 0..30 {
            sm.on_sample(&sample(50.0, 30.0), 2_000 + i * 1_000);
        }
        // Spike above the recover band resets the dwell clock.
        sm.on_sample(&sample(75.0, 30.0), 33_000);
        for i in 0..59 {
            let t = sm.on_sample(&sample(50.0, 30.0), 34_000 + i * 1_000);
            assert!(t.is_none());
        }
        assert_eq!(sm.state(), GuardianState::Emergency);
    }

    #[test]
    fn kill_rate_escalates_emergency_to_lockdown() {
        let mut sm = StateMachine::new(cfg(), 0);
        sm.on_sample(&sample(95.0, 20.0), 0);
        sm.on_sample(&sample(95.0, 20.0), 1_000);
        assert_eq!(sm.state(), GuardianState::Emergency);

        assert!(sm.record_kill(2_000).is_none());
        assert!(sm.record_kill(3_000).is_none());
        assert!(sm.record_kill(4_000).is_none());
        let t = sm.record_kill(5_000).expect("lockdown");
        assert_eq!(t.to, GuardianState::Lockdown);
        assert_eq!(t.reasons, vec!["kill_rate_exceeded"]);
    }

    #[test]
    fn old_kills_age_out_of_the_rate_window() {
        let mut sm = StateMachine::new(cfg(), 0);
        sm.on_sample(&sample(95.0, 20.0), 0);
        sm.on_sample(&sample(95.0, 20.0), 1_000);

        sm.record_kill(2_000);
        sm.record_kill(3_000);
        sm.record_kill(4_000);
        // 31 minutes later the window is empty again.
        let later = 4_000 + 31 * 60 * 1_000;
        assert!(sm.record_kill(later).is_none());
        assert_eq!(sm.state(), GuardianState::Emergency);
    }

    #[test]
    fn lockdown_expires_back_to_emergency() {
        let c = cfg();
        let mut sm = StateMachine::new(c.clone(), 0);
        sm.on_sample(&sample(95.0, 20.0), 0);
        sm.on_sample(&sample(95.0, 20.0), 1_000);
        for i in 0..4 {
            sm.record_kill(2_000 + i * 100);
        }
        assert_eq!(sm.state(), GuardianState::Lockdown);

        let after = 2_400 + c.lockdown_exit_s * 1_000;
        let t = sm.on_sample(&sample(95.0, 20.0), after).expect("expiry");
        assert_eq!(t.to, GuardianState::Emergency);
        assert_eq!(t.reasons, vec!["lockdown_expired"]);
    }

    #[test]
    fn admission_policy_by_state() {
        let normal = AdmissionPolicy::for_state(GuardianState::Normal);
        assert_eq!(normal.admit(GuardianState::Normal, Route::Deep, 30), Admission::Allow);

        let brownout = AdmissionPolicy::for_state(GuardianState::Brownout);
        assert!(matches!(
            brownout.admit(GuardianState::Brownout, Route::Deep, 30),
            Admission::Reject { .. }
        ));
        assert!(matches!(
            brownout.admit(GuardianState::Brownout, Route::Planner, 30),
            Admission::Degrade { .. }
        ));
        assert_eq!(
            brownout.admit(GuardianState::Brownout, Route::Micro, 30),
            Admission::Allow
        );

        let emergency = AdmissionPolicy::for_state(GuardianState::Emergency);
        assert!(matches!(
            emergency.admit(GuardianState::Emergency, Route::Planner, 30),
            Admission::Reject { retry_after_s: 30, .. }
        ));
        assert_eq!(
            emergency.admit(GuardianState::Emergency, Route::Micro, 30),
            Admission::Allow
        );
    }
}
