//! E2E outcome records: one JSON line per executed scenario, appended
//! under the tests data dir and consumed by the external SLO gate.

use std::io::Write;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub v: String,
    pub ts: String,
    pub scenario: String,
    pub pass: bool,
    #[serde(default)]
    pub detail: String,
}

impl OutcomeRecord {
    pub fn new(scenario: impl Into<String>, pass: bool, detail: impl Into<String>) -> Self {
        Self {
            v: crate::event::EVENT_VERSION.to_string(),
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            scenario: scenario.into(),
            pass,
            detail: detail.into(),
        }
    }
}

/// Append one outcome to `<tests_dir>/outcomes.jsonl`.
pub fn append_outcome(tests_dir: &Path, record: &OutcomeRecord) -> std::io::Result<()> {
    std::fs::create_dir_all(tests_dir)?;
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(tests_dir.join("outcomes.jsonl"))?;
    file.write_all(&line)
}
