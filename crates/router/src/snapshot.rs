//! Atomic snapshot persistence for bandit arm state: write a temp file,
//! fsync, rename. A corrupt or version-skewed snapshot loads as `None`
//! and the router reinitializes cleanly.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use sv_domain::trace::TraceEvent;
use sv_domain::turn::Route;

use crate::bandit::ArmState;

const SNAPSHOT_VERSION: u32 = 1;
const SNAPSHOT_FILE: &str = "arms.snap";

type BucketMap = HashMap<String, HashMap<Route, ArmState>>;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    written_at_epoch: i64,
    buckets: BucketMap,
}

/// Write the arm state atomically under `dir`.
pub fn write_snapshot(dir: &Path, buckets: &BucketMap) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let snapshot = SnapshotFile {
        version: SNAPSHOT_VERSION,
        written_at_epoch: chrono::Utc::now().timestamp(),
        buckets: buckets.clone(),
    };
    let raw = serde_json::to_vec_pretty(&snapshot)?;

    let tmp_path = dir.join(format!("{SNAPSHOT_FILE}.tmp"));
    let final_path = dir.join(SNAPSHOT_FILE);
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&raw)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, &final_path)?;

    let arms = buckets.values().map(|m| m.len()).sum();
    TraceEvent::SnapshotWritten {
        path: final_path.display().to_string(),
        arms,
    }
    .emit();
    Ok(())
}

/// Load the latest snapshot. Missing, corrupt, or version-skewed files
/// all return `None` (clean reinitialization).
pub fn load_latest(dir: &Path) -> Option<BucketMap> {
    let raw = std::fs::read(dir.join(SNAPSHOT_FILE)).ok()?;
    let snapshot: SnapshotFile = serde_json::from_slice(&raw).ok()?;
    if snapshot.version != SNAPSHOT_VERSION {
        tracing::warn!(
            found = snapshot.version,
            expected = SNAPSHOT_VERSION,
            "bandit snapshot version skew; reinitializing"
        );
        return None;
    }
    Some(snapshot.buckets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> BucketMap {
        let mut arms = HashMap::new();
        arms.insert(
            Route::Micro,
            ArmState {
                mean: 0.8,
                pulls: 42,
                last_update_epoch: 1_700_000_000,
                quarantined: false,
            },
        );
        let mut buckets = HashMap::new();
        buckets.insert("high:short:q:tok".to_string(), arms);
        buckets
    }

    #[test]
    fn snapshot_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path(), &state()).unwrap();
        let loaded = load_latest(dir.path()).unwrap();
        let arm = &loaded["high:short:q:tok"][&Route::Micro];
        assert_eq!(arm.pulls, 42);
        assert!((arm.mean - 0.8).abs() < 1e-9);
    }

    #[test]
    fn missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_latest(dir.path()).is_none());
    }

    #[test]
    fn corrupt_snapshot_reinitializes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SNAPSHOT_FILE), b"{ trasig json").unwrap();
        assert!(load_latest(dir.path()).is_none());
    }

    #[test]
    fn no_partial_files_survive_a_write() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path(), &state()).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
