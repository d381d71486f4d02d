//! Builtin tool implementations and response rendering.
//!
//! Builtins run in-process and are deterministic for a given clock;
//! rendering maps the closed `render_instruction` set onto the final
//! Swedish reply text.

use std::collections::BTreeMap;

use chrono::{DateTime, Timelike};
use chrono_tz::Tz;
use serde_json::Value;

use sv_domain::plan::Plan;
use sv_domain::{Error, Result};

/// Execute a builtin tool. Unknown names are schema errors (the
/// registry should have caught them earlier).
pub fn run_builtin(
    name: &str,
    _args: &BTreeMap<String, Value>,
    now: DateTime<Tz>,
) -> Result<String> {
    match name {
        "none" => Ok(String::new()),
        "time.now" => Ok(format!(
            "Klockan är {:02}:{:02}.",
            now.hour(),
            now.minute()
        )),
        "greeting.reply" => Ok("Hej! Vad kan jag hjälpa dig med?".to_string()),
        other => Err(Error::Schema(format!("unknown builtin tool {other}"))),
    }
}

/// Map the render instruction and tool output onto the reply text.
/// Empty output falls back to the plan's reason, then to a neutral
/// acknowledgement.
pub fn render_response(plan: &Plan, tool_output: &str) -> String {
    let body = if tool_output.is_empty() {
        if plan.reason.is_empty() {
            "Okej."
        } else {
            plan.reason.as_str()
        }
    } else {
        tool_output
    };

    match plan.render_instruction.as_str() {
        "confirm" => format!("Klart! {body}"),
        "list" => format!("Här är vad jag hittade:\n{body}"),
        "card" => body.to_string(),
        "error" => format!("Något gick fel: {body}"),
        // "speak" and anything future-compatible: plain text.
        _ => body.to_string(),
    }
}
