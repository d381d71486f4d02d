//! Strict plan validation with a bounded auto-repair pass.
//!
//! Validation is two-phased: shape (strict deserialization, unknown
//! keys forbidden) and membership (tool / render_instruction against
//! the registry). Repair replaces known enum synonyms and strips
//! placeholder tokens, at most once per turn; anything else fails with
//! a schema error.

use serde_json::Value;

use sv_domain::plan::Plan;
use sv_domain::trace::TraceEvent;
use sv_domain::{Error, Result};

use crate::registry::ToolRegistry;

/// Placeholder tokens some models emit for unknown argument values.
const PLACEHOLDERS: &[&str] = &["<UNKNOWN>", "<unknown>", "N/A", "null", ""];

/// A plan that passed shape and membership validation.
#[derive(Debug, Clone)]
pub struct ValidatedPlan {
    pub plan: Plan,
    /// Whether the repair pass changed anything.
    pub repaired: bool,
}

/// Validate raw planner output against the registry.
///
/// `repair_budget` bounds the auto-repair attempts (at most one per
/// turn; 0 disables repair entirely, the strict brownout mode).
pub fn validate_plan(
    raw: &str,
    registry: &ToolRegistry,
    repair_budget: u32,
) -> Result<ValidatedPlan> {
    let plan = parse_strict(raw)?;

    match check_membership(&plan, registry) {
        Ok(()) => Ok(ValidatedPlan {
            plan,
            repaired: false,
        }),
        Err(first_error) => {
            if repair_budget == 0 {
                return Err(first_error);
            }
            let repaired = repair(plan, registry);
            check_membership(&repaired, registry).map_err(|_| first_error)?;
            Ok(ValidatedPlan {
                plan: repaired,
                repaired: true,
            })
        }
    }
}

fn parse_strict(raw: &str) -> Result<Plan> {
    serde_json::from_str::<Plan>(raw)
        .map_err(|e| Error::Schema(format!("plan failed strict parse: {e}")))
}

fn check_membership(plan: &Plan, registry: &ToolRegistry) -> Result<()> {
    if !registry.is_known_tool(&plan.tool) {
        return Err(Error::Schema(format!("unknown tool \"{}\"", plan.tool)));
    }
    if !registry.is_known_render(&plan.render_instruction) {
        return Err(Error::Schema(format!(
            "unknown render_instruction \"{}\"",
            plan.render_instruction
        )));
    }
    if !(0.0..=1.0).contains(&plan.confidence) {
        return Err(Error::Schema(format!(
            "confidence {} out of [0, 1]",
            plan.confidence
        )));
    }
    Ok(())
}

/// The bounded repair pass: enum synonyms from the registry's fixed
/// maps, placeholder argument removal. Never invents values.
fn repair(mut plan: Plan, registry: &ToolRegistry) -> Plan {
    let mut fixes = 0usize;

    if !registry.is_known_tool(&plan.tool) {
        if let Some(canonical) = registry.tool_synonym(&plan.tool) {
            plan.tool = canonical.to_string();
            fixes += 1;
        }
    }
    if !registry.is_known_render(&plan.render_instruction) {
        if let Some(canonical) = registry.render_synonym(&plan.render_instruction) {
            plan.render_instruction = canonical.to_string();
            fixes += 1;
        }
    }

    let before = plan.args.len();
    plan.args.retain(|_, value| match value {
        Value::String(s) => !PLACEHOLDERS.contains(&s.as_str()),
        Value::Null => false,
        _ => true,
    });
    fixes += before - plan.args.len();

    if fixes > 0 {
        TraceEvent::PlanRepaired {
            tool: plan.tool.clone(),
            fixes,
        }
        .emit();
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ToolRegistry {
        ToolRegistry::from_toml(
            r#"
version = "1"
render_instructions = ["speak", "confirm"]

[[tools]]
name = "none"
kind = "builtin"

[[tools]]
name = "calendar.create"
kind = "http"
endpoint = "http://127.0.0.1:9301/x"

[repair.tool_synonyms]
"calendar.add" = "calendar.create"

[repair.render_synonyms]
"say" = "speak"
"#,
        )
        .unwrap()
    }

    fn plan_json(tool: &str, render: &str) -> String {
        format!(
            r#"{{"intent":"calendar.create","tool":"{tool}","args":{{"when":"2025-03-02T14:00","with":"Anna"}},"render_instruction":"{render}","confidence":0.9,"reason":"booking"}}"#
        )
    }

    #[test]
    fn valid_plan_passes_without_repair() {
        let v = validate_plan(&plan_json("calendar.create", "confirm"), &registry(), 1).unwrap();
        assert!(!v.repaired);
        assert_eq!(v.plan.tool, "calendar.create");
    }

    #[test]
    fn unknown_key_fails_strict_parse() {
        let raw = r#"{"intent":"x","tool":"none","render_instruction":"speak","confidence":1.0,"reason":"","hallucinated":true}"#;
        let err = validate_plan(raw, &registry(), 1).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn tool_synonym_is_repaired_once() {
        let v = validate_plan(&plan_json("calendar.add", "confirm"), &registry(), 1).unwrap();
        assert!(v.repaired);
        assert_eq!(v.plan.tool, "calendar.create");
    }

    #[test]
    fn render_synonym_is_repaired() {
        let v = validate_plan(&plan_json("calendar.create", "say"), &registry(), 1).unwrap();
        assert!(v.repaired);
        assert_eq!(v.plan.render_instruction, "speak");
    }

    #[test]
    fn unknown_enum_fails_after_one_repair_attempt() {
        let err = validate_plan(&plan_json("rocket.launch", "confirm"), &registry(), 1).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
        assert!(err.to_string().contains("rocket.launch"));
    }

    #[test]
    fn zero_budget_disables_repair() {
        let err = validate_plan(&plan_json("calendar.add", "confirm"), &registry(), 0).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn placeholder_args_are_stripped() {
        let raw = r#"{"intent":"calendar.create","tool":"calendar.add","args":{"when":"2025-03-02T14:00","with":"<UNKNOWN>","title":null},"render_instruction":"confirm","confidence":0.9,"reason":""}"#;
        let v = validate_plan(raw, &registry(), 1).unwrap();
        assert!(v.repaired);
        assert!(v.plan.args.contains_key("when"));
        assert!(!v.plan.args.contains_key("with"));
        assert!(!v.plan.args.contains_key("title"));
    }

    #[test]
    fn out_of_range_confidence_is_schema_error() {
        let raw = r#"{"intent":"x","tool":"none","render_instruction":"speak","confidence":1.7,"reason":""}"#;
        let err = validate_plan(raw, &registry(), 1).unwrap_err();
        assert!(err.to_string().contains("confidence"));
    }
}
