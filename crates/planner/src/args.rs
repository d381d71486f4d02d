//! Deterministic tool-argument construction.
//!
//! When `planner.args_from_model` is false (the default), the model's
//! `args` are hints only: arguments are rebuilt here from the NLU slot
//! hints and the tool's arg schema, with datetime slots resolved
//! through the canonicalizer. The same slots always produce the same
//! args.

use std::collections::BTreeMap;

use chrono::DateTime;
use chrono_tz::Tz;
use regex::Regex;
use serde_json::Value;

use sv_domain::{Error, Result};

use crate::registry::{ArgKind, ToolSpec};

/// Build the argument map for `spec` from slot hints.
///
/// `model_args` are consulted only for optional string arguments the
/// slots don't cover (they cannot override a slot, and never satisfy a
/// required argument on their own unless `trust_model` is set).
pub fn build_args(
    spec: &ToolSpec,
    slots: &BTreeMap<String, String>,
    model_args: &BTreeMap<String, Value>,
    trust_model: bool,
    now: DateTime<Tz>,
) -> Result<BTreeMap<String, Value>> {
    let email_re = Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$")
        .expect("static regex");
    let mut args = BTreeMap::new();

    for (name, arg_spec) in &spec.args {
        let slot_value = slots.get(name).map(String::as_str);
        let model_value = model_args.get(name).and_then(Value::as_str);

        let candidate = match (slot_value, model_value, trust_model) {
            (Some(s), _, _) => Some(s),
            (None, Some(m), true) => Some(m),
            // Untrusted model values may only fill optional strings.
            (None, Some(m), false) if !arg_spec.required && arg_spec.kind == ArgKind::String => {
                Some(m)
            }
            _ => None,
        };

        let resolved = match (candidate, arg_spec.kind) {
            (Some(raw), ArgKind::Datetime) => {
                let iso = sv_canon::resolve_when(raw, now).ok_or_else(|| {
                    Error::Schema(format!("argument {name} is not a resolvable datetime: {raw}"))
                })?;
                Some(Value::String(iso))
            }
            (Some(raw), ArgKind::Email) => {
                if !email_re.is_match(raw) {
                    return Err(Error::Schema(format!(
                        "argument {name} is not a valid email address"
                    )));
                }
                Some(Value::String(raw.to_string()))
            }
            (Some(raw), ArgKind::String) => Some(Value::String(raw.to_string())),
            (None, _) => None,
        };

        match resolved {
            Some(value) => {
                args.insert(name.clone(), value);
            }
            None if arg_spec.required => {
                return Err(Error::Schema(format!(
                    "required argument {name} missing for tool {}",
                    spec.name
                )));
            }
            None => {}
        }
    }

    Ok(args)
}
