//! The versioned tool & render registry, loaded from TOML at startup.
//! `tool` and `render_instruction` enum membership is defined here and
//! nowhere else.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use sv_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// Executed in-process, deterministic.
    Builtin,
    /// Invoked over HTTP with its own timeout and breaker.
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    String,
    Datetime,
    Email,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArgSpec {
    #[serde(rename = "type")]
    pub kind: ArgKind,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub kind: ToolKind,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub args: HashMap<String, ArgSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RepairMaps {
    #[serde(default)]
    tool_synonyms: HashMap<String, String>,
    #[serde(default)]
    render_synonyms: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    version: String,
    render_instructions: Vec<String>,
    tools: Vec<ToolSpec>,
    #[serde(default)]
    repair: RepairMaps,
    #[serde(default)]
    fallbacks: HashMap<String, Vec<String>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Immutable, loaded once at startup (and on config reload).
pub struct ToolRegistry {
    pub version: String,
    render_instructions: Vec<String>,
    tools: HashMap<String, ToolSpec>,
    tool_synonyms: HashMap<String, String>,
    render_synonyms: HashMap<String, String>,
    fallbacks: HashMap<String, Vec<String>>,
}

impl ToolRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
            .map_err(|e| Error::Config(format!("tool registry {}: {e}", path.display())))
    }

    pub fn from_toml(raw: &str) -> std::result::Result<Self, String> {
        let file: RegistryFile = toml::from_str(raw).map_err(|e| e.to_string())?;
        if file.version.is_empty() {
            return Err("registry version must not be empty".into());
        }
        if file.render_instructions.is_empty() {
            return Err("registry must define render_instructions".into());
        }
        let mut tools = HashMap::new();
        for tool in file.tools {
            if tool.kind == ToolKind::Http && tool.endpoint.is_none() {
                return Err(format!("http tool {} needs an endpoint", tool.name));
            }
            if tools.insert(tool.name.clone(), tool).is_some() {
                return Err("duplicate tool name in registry".into());
            }
        }
        for (intent, chain) in &file.fallbacks {
            for name in chain {
                if !tools.contains_key(name) {
                    return Err(format!(
                        "fallback chain for {intent} references unknown tool {name}"
                    ));
                }
            }
        }
        Ok(Self {
            version: file.version,
            render_instructions: file.render_instructions,
            tools,
            tool_synonyms: file.repair.tool_synonyms,
            render_synonyms: file.repair.render_synonyms,
            fallbacks: file.fallbacks,
        })
    }

    pub fn tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    pub fn is_known_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn is_known_render(&self, name: &str) -> bool {
        self.render_instructions.iter().any(|r| r == name)
    }

    /// Repair synonym for a tool name, if the map knows one.
    pub fn tool_synonym(&self, name: &str) -> Option<&str> {
        self.tool_synonyms.get(name).map(String::as_str)
    }

    pub fn render_synonym(&self, name: &str) -> Option<&str> {
        self.render_synonyms.get(name).map(String::as_str)
    }

    /// Fallback chain for an intent (primary first). Missing intent =
    /// no fallback, surface the failure.
    pub fn fallback_chain(&self, intent: &str) -> &[String] {
        self.fallbacks
            .get(intent)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"
version = "1"
render_instructions = ["speak", "confirm"]

[[tools]]
name = "none"
kind = "builtin"

[[tools]]
name = "calendar.create"
kind = "http"
endpoint = "http://127.0.0.1:9301/calendar/create"
timeout_ms = 800

[tools.args.when]
type = "datetime"
required = true

[tools.args.with]
type = "string"
required = true

[repair.tool_synonyms]
"calendar.add" = "calendar.create"

[repair.render_synonyms]
"say" = "speak"

[fallbacks]
"calendar.create" = ["calendar.create", "none"]
"#;

    #[test]
    fn loads_tools_and_enums() {
        let reg = ToolRegistry::from_toml(REGISTRY).unwrap();
        assert_eq!(reg.version, "1");
        assert!(reg.is_known_tool("calendar.create"));
        assert!(reg.is_known_tool("none"));
        assert!(!reg.is_known_tool("rocket.launch"));
        assert!(reg.is_known_render("speak"));
        assert!(!reg.is_known_render("dance"));

        let spec = reg.tool("calendar.create").unwrap();
        assert_eq!(spec.kind, ToolKind::Http);
        assert!(spec.args["when"].required);
        assert_eq!(spec.args["when"].kind, ArgKind::Datetime);
    }

    #[test]
    fn synonyms_resolve() {
        let reg = ToolRegistry::from_toml(REGISTRY).unwrap();
        assert_eq!(reg.tool_synonym("calendar.add"), Some("calendar.create"));
        assert_eq!(reg.tool_synonym("okänd"), None);
        assert_eq!(reg.render_synonym("say"), Some("speak"));
    }

    #[test]
    fn fallback_chain_is_primary_first() {
        let reg = ToolRegistry::from_toml(REGISTRY).unwrap();
        assert_eq!(
            reg.fallback_chain("calendar.create"),
            &["calendar.create".to_string(), "none".to_string()]
        );
        assert!(reg.fallback_chain("okänd.intent").is_empty());
    }

    #[test]
    fn http_tool_without_endpoint_is_rejected() {
        let bad = r#"
version = "1"
render_instructions = ["speak"]

[[tools]]
name = "broken.tool"
kind = "http"
"#;
        assert!(ToolRegistry::from_toml(bad).is_err());
    }

    #[test]
    fn fallback_to_unknown_tool_is_rejected() {
        let bad = r#"
version = "1"
render_instructions = ["speak"]

[[tools]]
name = "none"
kind = "builtin"

[fallbacks]
"x" = ["ghost.tool"]
"#;
        assert!(ToolRegistry::from_toml(bad).is_err());
    }

    #[test]
    fn shipped_registry_file_parses() {
        let raw = include_str!("../../../config/tool_registry.toml");
        let reg = ToolRegistry::from_toml(raw).unwrap();
        assert!(reg.is_known_tool("calendar.create"));
        assert!(reg.is_known_tool("time.now"));
        assert!(reg.is_known_render("speak"));
    }
}
