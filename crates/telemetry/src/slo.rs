//! SLO gate evaluation over the recorder's rolling windows. The
//! external release harness consumes this through the status API; a
//! failing gate blocks a build.

use serde::Serialize;

use sv_domain::turn::Route;

use crate::recorder::TelemetrySnapshot;

/// One evaluated gate.
#[derive(Debug, Clone, Serialize)]
pub struct GateResult {
    pub name: &'static str,
    pub pass: bool,
    pub actual: f64,
    pub target: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SloReport {
    pub pass: bool,
    pub gates: Vec<GateResult>,
}

fn gate(name: &'static str, actual: f64, target: f64, at_most: bool) -> GateResult {
    let pass = if at_most {
        actual <= target
    } else {
        actual >= target
    };
    GateResult {
        name,
        pass,
        actual,
        target,
    }
}

/// Evaluate the fixed gate set against a snapshot. Routes with no
/// observations pass their latency gates vacuously (actual 0).
pub fn evaluate_slo(snapshot: &TelemetrySnapshot) -> SloReport {
    let stats = |route: Route| snapshot.routes.iter().find(|r| r.route == route);

    let micro_first_p95 = stats(Route::Micro).map_or(0, |s| s.p95_first_ms) as f64;
    let planner_first_p95 = stats(Route::Planner).map_or(0, |s| s.p95_first_ms) as f64;
    let planner_full_p95 = stats(Route::Planner).map_or(0, |s| s.p95_full_ms) as f64;
    let deep_full_p95 = stats(Route::Deep).map_or(0, |s| s.p95_full_ms) as f64;

    let gates = vec![
        gate("micro_first_p95_ms", micro_first_p95, 250.0, true),
        gate("planner_first_p95_ms", planner_first_p95, 900.0, true),
        gate("planner_full_p95_ms", planner_full_p95, 1_500.0, true),
        gate("deep_full_p95_ms", deep_full_p95, 3_000.0, true),
        gate("tool_success_rate", snapshot.tool_success_rate, 0.95, false),
        gate("cache_hit_rate", snapshot.cache_hit_rate, 0.40, false),
        gate(
            "emergency_entries",
            snapshot.emergency_entries as f64,
            0.0,
            true,
        ),
    ];

    SloReport {
        pass: gates.iter().all(|g| g.pass),
        gates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::RouteLatencyStats;

    fn snapshot(micro_p95: u64, hit_rate: f64, emergencies: u64) -> TelemetrySnapshot {
        TelemetrySnapshot {
            turns: 100,
            cache_hit_rate: hit_rate,
            tool_success_rate: 0.99,
            emergency_entries: emergencies,
            routes: vec![RouteLatencyStats {
                route: Route::Micro,
                count: 100,
                p50_first_ms: micro_p95 / 2,
                p95_first_ms: micro_p95,
                p50_full_ms: micro_p95,
                p95_full_ms: micro_p95 * 2,
            }],
        }
    }

    #[test]
    fn healthy_snapshot_passes_all_gates() {
        let report = evaluate_slo(&snapshot(120, 0.55, 0));
        assert!(report.pass, "failing gates: {:?}", report.gates);
    }

    #[test]
    fn slow_micro_first_token_fails_its_gate() {
        let report = evaluate_slo(&snapshot(400, 0.55, 0));
        assert!(!report.pass);
        let failed = report.gates.iter().find(|g| !g.pass).unwrap();
        assert_eq!(failed.name, "micro_first_p95_ms");
    }

    #[test]
    fn low_cache_hit_rate_fails() {
        let report = evaluate_slo(&snapshot(120, 0.2, 0));
        assert!(report.gates.iter().any(|g| g.name == "cache_hit_rate" && !g.pass));
    }

    #[test]
    fn any_emergency_under_steady_load_fails() {
        let report = evaluate_slo(&snapshot(120, 0.55, 1));
        assert!(report
            .gates
            .iter()
            .any(|g| g.name == "emergency_entries" && !g.pass));
    }
}
