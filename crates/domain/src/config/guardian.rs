use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Guardian (admission control)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Thresholds and dwell times for the admission-control state machine.
///
/// Invariant enforced by `Config::validate()`: `ram_recover_pct <
/// ram_soft_pct < ram_hard_pct`, and likewise for the CPU pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianConfig {
    #[serde(default = "d_ram_soft")]
    pub ram_soft_pct: f32,
    #[serde(default = "d_ram_hard")]
    pub ram_hard_pct: f32,
    #[serde(default = "d_ram_recover")]
    pub ram_recover_pct: f32,
    #[serde(default = "d_cpu_soft")]
    pub cpu_soft_pct: f32,
    #[serde(default = "d_cpu_recover")]
    pub cpu_recover_pct: f32,
    #[serde(default = "d_temp_hard")]
    pub temp_hard_c: f32,
    #[serde(default = "d_battery_hard")]
    pub battery_hard_pct: f32,

    /// Sampling cadence for the background task.
    #[serde(default = "d_sample_interval_ms")]
    pub sample_interval_ms: u64,
    /// Sliding window length (samples) for soft-threshold predicates.
    #[serde(default = "d_window")]
    pub window: usize,
    /// Continuous time below the recover band before returning to NORMAL.
    #[serde(default = "d_recover_dwell_s")]
    pub recover_dwell_s: u64,

    /// Kill-action rate limit: more than this many within
    /// `kill_window_min` minutes escalates EMERGENCY to LOCKDOWN.
    #[serde(default = "d_kill_max")]
    pub kill_max: u32,
    #[serde(default = "d_kill_window_min")]
    pub kill_window_min: u64,
    /// LOCKDOWN auto-exits after this many seconds.
    #[serde(default = "d_lockdown_exit_s")]
    pub lockdown_exit_s: u64,

    /// `Retry-After` seconds attached to guardian rejections.
    #[serde(default = "d_reject_retry_after_s")]
    pub reject_retry_after_s: u64,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            ram_soft_pct: d_ram_soft(),
            ram_hard_pct: d_ram_hard(),
            ram_recover_pct: d_ram_recover(),
            cpu_soft_pct: d_cpu_soft(),
            cpu_recover_pct: d_cpu_recover(),
            temp_hard_c: d_temp_hard(),
            battery_hard_pct: d_battery_hard(),
            sample_interval_ms: d_sample_interval_ms(),
            window: d_window(),
            recover_dwell_s: d_recover_dwell_s(),
            kill_max: d_kill_max(),
            kill_window_min: d_kill_window_min(),
            lockdown_exit_s: d_lockdown_exit_s(),
            reject_retry_after_s: d_reject_retry_after_s(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_ram_soft() -> f32 {
    80.0
}
fn d_ram_hard() -> f32 {
    92.0
}
fn d_ram_recover() -> f32 {
    70.0
}
fn d_cpu_soft() -> f32 {
    80.0
}
fn d_cpu_recover() -> f32 {
    70.0
}
fn d_temp_hard() -> f32 {
    85.0
}
fn d_battery_hard() -> f32 {
    25.0
}
fn d_sample_interval_ms() -> u64 {
    1_000
}
fn d_window() -> usize {
    5
}
fn d_recover_dwell_s() -> u64 {
    60
}
fn d_kill_max() -> u32 {
    3
}
fn d_kill_window_min() -> u64 {
    30
}
fn d_lockdown_exit_s() -> u64 {
    3_600
}
fn d_reject_retry_after_s() -> u64 {
    30
}
