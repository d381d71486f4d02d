//! The telemetry recorder: a bounded channel to a background JSONL
//! writer plus in-memory rolling windows for the status API and the
//! SLO gates. Recording never blocks or fails a turn.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use sv_domain::trace::TraceEvent;
use sv_domain::turn::{CacheTier, GuardianState, Route, Turn};

use crate::event::TurnEvent;

/// Bounded queue to the writer; overflow drops the event with a log
/// line rather than stalling the turn.
const WRITER_QUEUE: usize = 1_024;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rolling stats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
struct LatencyWindow {
    first_ms: VecDeque<u64>,
    full_ms: VecDeque<u64>,
}

#[derive(Debug, Default)]
struct Counters {
    turns: u64,
    cache_hits: u64,
    cache_lookups: u64,
    tool_calls: u64,
    tool_ok: u64,
    emergency_entries: u64,
}

/// Per-route latency percentiles exported by the status API.
#[derive(Debug, Clone, Serialize)]
pub struct RouteLatencyStats {
    pub route: Route,
    pub count: usize,
    pub p50_first_ms: u64,
    pub p95_first_ms: u64,
    pub p50_full_ms: u64,
    pub p95_full_ms: u64,
}

/// Aggregate snapshot for `/api/status/*` and the SLO gates.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub turns: u64,
    pub cache_hit_rate: f64,
    pub tool_success_rate: f64,
    pub emergency_entries: u64,
    pub routes: Vec<RouteLatencyStats>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TelemetryRecorder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TelemetryRecorder {
    tx: mpsc::Sender<TurnEvent>,
    window_len: usize,
    latencies: Mutex<HashMap<Route, LatencyWindow>>,
    counters: Mutex<Counters>,
}

impl TelemetryRecorder {
    /// Create the recorder and spawn its writer task appending to
    /// `<data_dir>/YYYY-MM-DD/events.jsonl`.
    pub fn spawn(data_dir: PathBuf, window_len: usize) -> std::sync::Arc<Self> {
        let (tx, rx) = mpsc::channel(WRITER_QUEUE);
        tokio::spawn(writer_task(data_dir, rx));
        std::sync::Arc::new(Self {
            tx,
            window_len: window_len.max(16),
            latencies: Mutex::new(HashMap::new()),
            counters: Mutex::new(Counters::default()),
        })
    }

    /// Record one finished turn: build the event, update the rolling
    /// windows, enqueue the event for the writer.
    pub fn record(&self, turn: &Turn) {
        let event = TurnEvent::from_turn(turn);

        {
            let mut counters = self.counters.lock();
            counters.turns += 1;
            if turn.cache_tier != CacheTier::Bypass {
                counters.cache_lookups += 1;
                if turn.cache_tier.is_hit() {
                    counters.cache_hits += 1;
                }
            }
            for tc in &turn.tool_calls {
                counters.tool_calls += 1;
                if tc.class.is_ok() {
                    counters.tool_ok += 1;
                }
            }
            if turn.guardian_exit == Some(GuardianState::Emergency)
                && turn.guardian_entry != GuardianState::Emergency
            {
                counters.emergency_entries += 1;
            }
        }

        if let (Some(route), Some(full_ms)) = (turn.route, turn.e2e_full_ms()) {
            let first_ms = turn.timings.backend_first_ms.unwrap_or(full_ms);
            let mut latencies = self.latencies.lock();
            let window = latencies.entry(route).or_default();
            window.first_ms.push_back(first_ms);
            window.full_ms.push_back(full_ms);
            while window.first_ms.len() > self.window_len {
                window.first_ms.pop_front();
            }
            while window.full_ms.len() > self.window_len {
                window.full_ms.pop_front();
            }
        }

        if let Err(e) = self.tx.try_send(event) {
            tracing::warn!(error = %e, "telemetry queue full; dropping event");
        }
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let counters = self.counters.lock();
        let latencies = self.latencies.lock();

        let routes = Route::ALL
            .iter()
            .map(|&route| {
                let window = latencies.get(&route);
                let first: Vec<u64> = window
                    .map(|w| w.first_ms.iter().copied().collect())
                    .unwrap_or_default();
                let full: Vec<u64> = window
                    .map(|w| w.full_ms.iter().copied().collect())
                    .unwrap_or_default();
                RouteLatencyStats {
                    route,
                    count: full.len(),
                    p50_first_ms: percentile(&first, 50.0),
                    p95_first_ms: percentile(&first, 95.0),
                    p50_full_ms: percentile(&full, 50.0),
                    p95_full_ms: percentile(&full, 95.0),
                }
            })
            .collect();

        TelemetrySnapshot {
            turns: counters.turns,
            cache_hit_rate: ratio(counters.cache_hits, counters.cache_lookups),
            tool_success_rate: ratio(counters.tool_ok, counters.tool_calls),
            emergency_entries: counters.emergency_entries,
            routes,
        }
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        // No observations: report the healthy extreme so cold starts
        // don't trip SLO gates.
        1.0
    } else {
        part as f64 / whole as f64
    }
}

/// Nearest-rank percentile over an unsorted window.
fn percentile(values: &[u64], pct: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Writer task & retention
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn writer_task(data_dir: PathBuf, mut rx: mpsc::Receiver<TurnEvent>) {
    let mut written_since_trace = 0usize;
    while let Some(event) = rx.recv().await {
        if let Err(e) = append_event(&data_dir, &event).await {
            tracing::warn!(error = %e, "telemetry append failed");
            continue;
        }
        written_since_trace += 1;
        if written_since_trace >= 100 {
            TraceEvent::TelemetryFlushed {
                events: written_since_trace,
            }
            .emit();
            written_since_trace = 0;
        }
    }
}

async fn append_event(data_dir: &Path, event: &TurnEvent) -> std::io::Result<()> {
    let day = &event.ts[..10]; // YYYY-MM-DD of the RFC 3339 timestamp
    let dir = data_dir.join(day);
    tokio::fs::create_dir_all(&dir).await?;
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("events.jsonl"))
        .await?;
    file.write_all(&line).await?;
    Ok(())
}

/// Delete day directories older than the retention window. Returns the
/// number of removed directories.
pub fn sweep_retention(data_dir: &Path, retention_days: u32, now: DateTime<Utc>) -> usize {
    let Ok(entries) = std::fs::read_dir(data_dir) else {
        return 0;
    };
    let cutoff = now.date_naive() - chrono::Duration::days(retention_days as i64);
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(day) = name.to_str() else { continue };
        let Ok(date) = NaiveDate::parse_from_str(day, "%Y-%m-%d") else {
            continue;
        };
        if date < cutoff && std::fs::remove_dir_all(entry.path()).is_ok() {
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use sv_domain::error::ToolCallClass;
    use sv_domain::turn::ToolCallRecord;

    fn finished_turn(route: Route, full_ms: i64, cache: CacheTier) -> Turn {
        let mut turn = Turn::new("s-1", "sv", "hej", GuardianState::Normal);
        turn.route = Some(route);
        turn.cache_tier = cache;
        turn.finished_at = Some(turn.received_at + chrono::Duration::milliseconds(full_ms));
        turn.timings.backend_first_ms = Some((full_ms / 2).max(1) as u64);
        turn.guardian_exit = Some(GuardianState::Normal);
        turn
    }

    #[tokio::test]
    async fn records_update_windows_and_counters() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = TelemetryRecorder::spawn(dir.path().to_path_buf(), 64);

        recorder.record(&finished_turn(Route::Micro, 100, CacheTier::L1));
        recorder.record(&finished_turn(Route::Micro, 200, CacheTier::Miss));

        let snap = recorder.snapshot();
        assert_eq!(snap.turns, 2);
        assert_eq!(snap.cache_hit_rate, 0.5);
        let micro = snap.routes.iter().find(|r| r.route == Route::Micro).unwrap();
        assert_eq!(micro.count, 2);
        assert!(micro.p95_full_ms >= micro.p50_full_ms);
    }

    #[tokio::test]
    async fn events_land_in_daily_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = TelemetryRecorder::spawn(dir.path().to_path_buf(), 64);
        recorder.record(&finished_turn(Route::Micro, 100, CacheTier::L1));

        // Give the writer task a beat.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let day = Utc::now().format("%Y-%m-%d").to_string();
        let content =
            std::fs::read_to_string(dir.path().join(&day).join("events.jsonl")).unwrap();
        let event: TurnEvent = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert!(event.verify_hash());
        assert_eq!(event.route, "micro");
    }

    #[tokio::test]
    async fn tool_success_rate_counts_classes() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = TelemetryRecorder::spawn(dir.path().to_path_buf(), 64);
        let mut turn = finished_turn(Route::Planner, 500, CacheTier::Miss);
        turn.tool_calls = vec![
            ToolCallRecord {
                name: "calendar.create".into(),
                class: ToolCallClass::Ok,
                lat_ms: 20,
            },
            ToolCallRecord {
                name: "email.draft".into(),
                class: ToolCallClass::Timeout,
                lat_ms: 800,
            },
        ];
        recorder.record(&turn);
        assert_eq!(recorder.snapshot().tool_success_rate, 0.5);
    }

    #[test]
    fn percentile_nearest_rank() {
        let values: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&values, 50.0), 50);
        assert_eq!(percentile(&values, 95.0), 95);
        assert_eq!(percentile(&[42], 95.0), 42);
        assert_eq!(percentile(&[], 95.0), 0);
    }

    #[test]
    fn retention_sweep_removes_old_days() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("2020-01-01")).unwrap();
        std::fs::create_dir_all(dir.path().join("2099-01-01")).unwrap();
        let removed = sweep_retention(dir.path(), 7, Utc::now());
        assert_eq!(removed, 1);
        assert!(dir.path().join("2099-01-01").exists());
    }
}
