//! Per-route sliding-window quotas and concurrency slots.
//!
//! Request counts evict on wall-clock age; concurrency is a semaphore
//! per route (deep is pinned to one slot). Admission is atomic: a
//! window entry is committed only together with a held slot. The
//! router consults `available()` so the bandit never wins an arm that
//! cannot run.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use sv_domain::config::QuotaConfig;
use sv_domain::turn::Route;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Returned when a route's window is exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaExceeded {
    pub route: Route,
    pub retry_after_s: u64,
}

/// A held concurrency slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct RouteSlot {
    _permit: OwnedSemaphorePermit,
    pub route: Route,
}

/// Snapshot of one route's window, for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct RouteWindowStats {
    pub route: Route,
    pub requests_in_window: u32,
    pub errors_in_window: u32,
    pub max_requests: u32,
    pub slots_available: usize,
}

struct Window {
    requests: VecDeque<u64>,
    errors: VecDeque<u64>,
}

impl Window {
    fn new() -> Self {
        Self {
            requests: VecDeque::new(),
            errors: VecDeque::new(),
        }
    }

    fn evict(&mut self, now_ms: u64, horizon_ms: u64) {
        for queue in [&mut self.requests, &mut self.errors] {
            while let Some(&front) = queue.front() {
                if now_ms.saturating_sub(front) > horizon_ms {
                    queue.pop_front();
                } else {
                    break;
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RouteQuotas
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RouteQuotas {
    cfg: QuotaConfig,
    windows: Mutex<HashMap<Route, Window>>,
    planner_slots: Arc<Semaphore>,
    deep_slots: Arc<Semaphore>,
    micro_slots: Arc<Semaphore>,
    epoch: Instant,
}

impl RouteQuotas {
    pub fn new(cfg: QuotaConfig, planner_concurrent: usize, deep_concurrent: usize) -> Self {
        Self {
            cfg,
            windows: Mutex::new(HashMap::new()),
            // MICRO is bounded by the worker pool, not a tight slot
            // count; a generous semaphore still caps pathological fanout.
            micro_slots: Arc::new(Semaphore::new(64)),
            planner_slots: Arc::new(Semaphore::new(planner_concurrent.max(1))),
            deep_slots: Arc::new(Semaphore::new(deep_concurrent.max(1))),
            epoch: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn semaphore(&self, route: Route) -> &Arc<Semaphore> {
        match route {
            Route::Micro => &self.micro_slots,
            Route::Planner => &self.planner_slots,
            Route::Deep => &self.deep_slots,
        }
    }

    /// Admit a request onto a route: window headroom and a concurrency
    /// slot, atomically under one lock. The window entry is committed
    /// only once the slot is held, so an attempt the caller abandons
    /// (demoting to another arm) never pollutes this route's counts.
    /// `scalar` comes from the guardian policy and shrinks the cap
    /// under pressure.
    pub fn try_acquire(&self, route: Route, scalar: f64) -> Result<RouteSlot, QuotaExceeded> {
        let now_ms = self.now_ms();
        let horizon_ms = self.cfg.route_window_s * 1_000;
        let max = ((self.cfg.route_max(route) as f64) * scalar).floor() as u32;

        let mut windows = self.windows.lock();
        let window = windows.entry(route).or_insert_with(Window::new);
        window.evict(now_ms, horizon_ms);

        if window.requests.len() as u32 >= max.max(1) {
            let retry_after_s = window
                .requests
                .front()
                .map(|&oldest| {
                    let age_ms = now_ms.saturating_sub(oldest);
                    horizon_ms.saturating_sub(age_ms).div_ceil(1_000)
                })
                .unwrap_or(self.cfg.route_window_s)
                .max(1);
            return Err(QuotaExceeded {
                route,
                retry_after_s,
            });
        }

        let permit = match self.semaphore(route).clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => {
                // All slots busy: nothing is recorded for an attempt
                // that never ran.
                return Err(QuotaExceeded {
                    route,
                    retry_after_s: 1,
                });
            }
        };
        window.requests.push_back(now_ms);
        Ok(RouteSlot {
            _permit: permit,
            route,
        })
    }

    /// Record a failed dispatch for the route window stats.
    pub fn record_error(&self, route: Route) {
        let now_ms = self.now_ms();
        let mut windows = self.windows.lock();
        let window = windows.entry(route).or_insert_with(Window::new);
        window.errors.push_back(now_ms);
    }

    /// Whether the route could run right now (window headroom and a
    /// free slot). Used to mask bandit arms.
    pub fn available(&self, route: Route, scalar: f64) -> bool {
        if self.semaphore(route).available_permits() == 0 {
            return false;
        }
        let now_ms = self.now_ms();
        let horizon_ms = self.cfg.route_window_s * 1_000;
        let max = ((self.cfg.route_max(route) as f64) * scalar).floor() as u32;
        let mut windows = self.windows.lock();
        let window = windows.entry(route).or_insert_with(Window::new);
        window.evict(now_ms, horizon_ms);
        (window.requests.len() as u32) < max.max(1)
    }

    pub fn snapshot(&self) -> Vec<RouteWindowStats> {
        let now_ms = self.now_ms();
        let horizon_ms = self.cfg.route_window_s * 1_000;
        let mut windows = self.windows.lock();
        Route::ALL
            .iter()
            .map(|&route| {
                let window = windows.entry(route).or_insert_with(Window::new);
                window.evict(now_ms, horizon_ms);
                RouteWindowStats {
                    route,
                    requests_in_window: window.requests.len() as u32,
                    errors_in_window: window.errors.len() as u32,
                    max_requests: self.cfg.route_max(route),
                    slots_available: self.semaphore(route).available_permits(),
                }
            })
            .collect()
    }
}
