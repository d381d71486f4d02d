//! The energy model: elapsed time × configured baseline draw × a
//! per-route weight. Not a physical measurement — stable enough for
//! trend detection and the bandit's energy term.

use sv_domain::config::TelemetryConfig;
use sv_domain::turn::Route;

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Estimated energy for one turn, in watt-hours.
pub fn estimate_energy_wh(cfg: &TelemetryConfig, route: Route, elapsed_ms: u64) -> f64 {
    let hours = elapsed_ms as f64 / MS_PER_HOUR;
    hours * cfg.baseline_watts * cfg.route_weight(route)
}
