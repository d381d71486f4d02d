//! Host metric sampling via `sysinfo`, plus battery capacity from the
//! power-supply class on Linux.

use serde::Serialize;
use sysinfo::{Components, System};

/// One host health sample.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HostSample {
    pub ram_pct: f32,
    pub cpu_pct: f32,
    pub temp_c: Option<f32>,
    pub battery_pct: Option<f32>,
    /// Resident memory of this process, MB.
    pub proc_rss_mb: u64,
    /// Used system memory, MB.
    pub sys_used_mb: u64,
}

/// Wraps the `sysinfo` handles. Refreshing mutates internal state, so
/// the sampler lives on the single guardian task and is never shared.
pub struct HostSampler {
    system: System,
    components: Components,
    pid: Option<sysinfo::Pid>,
}

impl HostSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            components: Components::new_with_refreshed_list(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    /// Take one sample. Returns `None` when the host reports nothing
    /// usable (the guardian then fails safe and keeps its state).
    pub fn sample(&mut self) -> Option<HostSample> {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();

        let total = self.system.total_memory();
        if total == 0 {
            return None;
        }
        let used = self.system.used_memory();
        let ram_pct = (used as f32 / total as f32) * 100.0;
        let cpu_pct = self.system.global_cpu_info().cpu_usage();

        self.components.refresh();
        let temp_c = self
            .components
            .iter()
            .map(|c| c.temperature())
            .fold(None, |acc: Option<f32>, t| {
                Some(acc.map_or(t, |a| a.max(t)))
            });

        let proc_rss_mb = self
            .pid
            .and_then(|pid| {
                self.system.refresh_process(pid);
                self.system.process(pid).map(|p| p.memory() / (1024 * 1024))
            })
            .unwrap_or(0);

        Some(HostSample {
            ram_pct,
            cpu_pct,
            temp_c,
            battery_pct: read_battery_pct(),
            proc_rss_mb,
            sys_used_mb: used / (1024 * 1024),
        })
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Battery capacity percentage, when the platform exposes one.
fn read_battery_pct() -> Option<f32> {
    let entries = std::fs::read_dir("/sys/class/power_supply").ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with("BAT") {
            let capacity = std::fs::read_to_string(entry.path().join("capacity")).ok()?;
            return capacity.trim().parse::<f32>().ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampler_produces_percentages_in_range() {
        let mut sampler = HostSampler::new();
        // First CPU reading after construction can be zero; take two.
        let _ = sampler.sample();
        if let Some(sample) = sampler.sample() {
            assert!((0.0..=100.0).contains(&sample.ram_pct));
            assert!(sample.cpu_pct >= 0.0);
        }
    }
}
