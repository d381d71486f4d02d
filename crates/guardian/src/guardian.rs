//! The shared guardian handle: a single-writer sampler task publishes
//! snapshots through a `watch` channel; `admit()`/`state()` are cheap
//! reads of the latest snapshot and never touch a lock on the data path.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use sv_domain::config::GuardianConfig;
use sv_domain::trace::TraceEvent;
use sv_domain::turn::{GuardianState, Route};

use crate::sampler::{HostSample, HostSampler};
use crate::state::{Admission, AdmissionPolicy, StateMachine, Transition};

/// How many past transitions the status API can see.
const TRANSITION_HISTORY: usize = 32;

/// The immutable view readers get. Published atomically per sample, so
/// every `admit()` observes one consistent (state, policy) pair.
#[derive(Debug, Clone, Serialize)]
pub struct GuardianSnapshot {
    pub state: GuardianState,
    pub since: DateTime<Utc>,
    pub policy: AdmissionPolicy,
    pub last_sample: Option<HostSample>,
}

/// A past transition with wall-clock timestamps, for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionRecord {
    pub from: GuardianState,
    pub to: GuardianState,
    pub reasons: Vec<String>,
    pub at: DateTime<Utc>,
}

pub struct Guardian {
    cfg: GuardianConfig,
    machine: Mutex<StateMachine>,
    snapshot_tx: watch::Sender<GuardianSnapshot>,
    transitions: Mutex<VecDeque<TransitionRecord>>,
    epoch: Instant,
}

impl Guardian {
    pub fn new(cfg: GuardianConfig) -> Arc<Self> {
        let epoch = Instant::now();
        let initial = GuardianSnapshot {
            state: GuardianState::Normal,
            since: Utc::now(),
            policy: AdmissionPolicy::for_state(GuardianState::Normal),
            last_sample: None,
        };
        let (snapshot_tx, _) = watch::channel(initial);
        Arc::new(Self {
            machine: Mutex::new(StateMachine::new(cfg.clone(), 0)),
            cfg,
            snapshot_tx,
            transitions: Mutex::new(VecDeque::new()),
            epoch,
        })
    }

    /// Spawn the background sampler. Sampling failures keep the current
    /// state (fail safe); they never propagate to the data path.
    pub fn spawn_sampler(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let guardian = self.clone();
        tokio::spawn(async move {
            let mut sampler = HostSampler::new();
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(
                guardian.cfg.sample_interval_ms,
            ));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                match sampler.sample() {
                    Some(sample) => guardian.apply_sample(sample),
                    None => {
                        tracing::warn!("host sampling failed; guardian keeps current state");
                    }
                }
            }
        })
    }

    /// Feed one sample through the state machine and publish the new
    /// snapshot. Public so tests can drive the guardian without a host.
    pub fn apply_sample(&self, sample: HostSample) {
        let now_ms = self.now_ms();
        let transition = {
            let mut machine = self.machine.lock();
            machine.on_sample(&sample, now_ms)
        };
        if let Some(t) = &transition {
            self.record_transition(t);
        }
        self.publish(Some(sample));
    }

    /// O(1) admission check against the latest snapshot.
    pub fn admit(&self, route: Route) -> Admission {
        let snap = self.snapshot_tx.borrow();
        snap.policy
            .admit(snap.state, route, self.cfg.reject_retry_after_s)
    }

    pub fn state(&self) -> GuardianState {
        self.snapshot_tx.borrow().state
    }

    pub fn snapshot(&self) -> GuardianSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Subscribe to snapshot updates. The orchestrator watches this to
    /// cancel outstanding deep work when the state leaves NORMAL.
    pub fn subscribe(&self) -> watch::Receiver<GuardianSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Record a kill action (deep-work cancellation). May escalate
    /// EMERGENCY to LOCKDOWN when the rate limit is exceeded.
    pub fn record_kill(&self) {
        let now_ms = self.now_ms();
        let transition = {
            let mut machine = self.machine.lock();
            machine.record_kill(now_ms)
        };
        if let Some(t) = &transition {
            self.record_transition(t);
            self.publish(None);
        }
    }

    pub fn recent_transitions(&self) -> Vec<TransitionRecord> {
        self.transitions.lock().iter().cloned().collect()
    }

    pub fn config(&self) -> &GuardianConfig {
        &self.cfg
    }

    // ── Private ──────────────────────────────────────────────────────

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn record_transition(&self, t: &Transition) {
        TraceEvent::GuardianTransition {
            from: t.from,
            to: t.to,
            reasons: t.reasons.clone(),
        }
        .emit();
        let mut history = self.transitions.lock();
        history.push_back(TransitionRecord {
            from: t.from,
            to: t.to,
            reasons: t.reasons.clone(),
            at: Utc::now(),
        });
        while history.len() > TRANSITION_HISTORY {
            history.pop_front();
        }
    }

    fn publish(&self, sample: Option<HostSample>) {
        let (state, _entered) = {
            let machine = self.machine.lock();
            (machine.state(), machine.entered_at_ms())
        };
        self.snapshot_tx.send_modify(|snap| {
            if snap.state != state {
                snap.since = Utc::now();
            }
            snap.state = state;
            snap.policy = AdmissionPolicy::for_state(state);
            if let Some(s) = sample {
                snap.last_sample = Some(s);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn admit_reflects_published_state() {
        let guardian = Guardian::new(GuardianConfig::default());
        assert_eq!(guardian.admit(Route::Deep), Admission::Allow);

        // Drive into brownout: five sustained soft breaches.
        for _ in 0..5 {
            guardian.apply_sample(sample(85.0, 20.0));
        }
        assert_eq!(guardian.state(), GuardianState::Brownout);
        assert!(matches!(
            guardian.admit(Route::Deep),
            Admission::Reject { .. }
        ));
        assert!(matches!(
            guardian.admit(Route::Planner),
            Admission::Degrade { .. }
        ));
        assert_eq!(guardian.admit(Route::Micro), Admission::Allow);
    }

    #[test]
    fn transitions_are_recorded_with_reasons() {
        let guardian = Guardian::new(GuardianConfig::default());
        for _ in 0..5 {
            guardian.apply_sample(sample(85.0, 20.0));
        }
        let history = guardian.recent_transitions();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].to, GuardianState::Brownout);
        assert_eq!(history[0].reasons, vec!["soft_sustained"]);
    }

    #[tokio::test]
    async fn subscribers_see_state_changes() {
        let guardian = Guardian::new(GuardianConfig::default());
        let mut rx = guardian.subscribe();
        assert_eq!(rx.borrow().state, GuardianState::Normal);

        for _ in 0..5 {
            guardian.apply_sample(sample(85.0, 20.0));
        }
        rx.changed().await.expect("watch alive");
        assert_eq!(rx.borrow_and_update().state, GuardianState::Brownout);
    }
}
