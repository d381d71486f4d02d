mod backends;
mod cache;
mod guardian;
mod nlu;
mod planner;
mod privacy;
mod quota;
mod router;
mod server;
mod telemetry;

pub use backends::*;
pub use cache::*;
pub use guardian::*;
pub use nlu::*;
pub use planner::*;
pub use privacy::*;
pub use quota::*;
pub use router::*;
pub use server::*;
pub use telemetry::*;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The single immutable configuration struct, populated at startup from
/// TOML. Hot reload swaps a fresh `Arc<Config>`; in-flight turns keep
/// the snapshot they started with.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub guardian: GuardianConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub nlu: NluConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub privacy: PrivacyConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
}

impl Config {
    /// Load and parse a TOML config file.
    pub fn load(path: &Path) -> crate::Result<Config> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| crate::Error::Config(format!("{}: {e}", path.display())))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

fn err(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Error,
        field: field.into(),
        message: message.into(),
    }
}

fn warn(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Warning,
        field: field.into(),
        message: message.into(),
    }
}

fn check_url(issues: &mut Vec<ConfigError>, field: &str, url: &str) {
    if url.is_empty() {
        issues.push(err(field, "must not be empty"));
    } else if !url.starts_with("http://") && !url.starts_with("https://") {
        issues.push(err(
            field,
            format!("must start with http:// or https:// (got \"{url}\")"),
        ));
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good. Startup aborts
    /// on any `Error`-severity issue.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut issues = Vec::new();

        // ── Server ───────────────────────────────────────────────────
        if self.server.port == 0 {
            issues.push(err("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            issues.push(err("server.host", "host must not be empty"));
        }
        if let Some(rl) = &self.server.rate_limit {
            if rl.requests_per_second == 0 {
                issues.push(err(
                    "server.rate_limit.requests_per_second",
                    "must be greater than 0",
                ));
            }
            if rl.burst_size == 0 {
                issues.push(err("server.rate_limit.burst_size", "must be greater than 0"));
            }
        }
        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            issues.push(warn(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        // ── Guardian threshold ordering ──────────────────────────────
        let g = &self.guardian;
        if !(g.ram_recover_pct < g.ram_soft_pct && g.ram_soft_pct < g.ram_hard_pct) {
            issues.push(err(
                "guardian.ram_*_pct",
                format!(
                    "must satisfy recover < soft < hard (got {} / {} / {})",
                    g.ram_recover_pct, g.ram_soft_pct, g.ram_hard_pct
                ),
            ));
        }
        if g.cpu_recover_pct >= g.cpu_soft_pct {
            issues.push(err(
                "guardian.cpu_*_pct",
                "recover threshold must be below the soft threshold",
            ));
        }
        if g.window == 0 {
            issues.push(err("guardian.window", "window must be at least 1 sample"));
        }
        if g.sample_interval_ms == 0 {
            issues.push(err("guardian.sample_interval_ms", "must be greater than 0"));
        }

        // ── Cache ────────────────────────────────────────────────────
        let c = &self.cache;
        if !(0.0 < c.semantic_threshold && c.semantic_threshold <= 1.0) {
            issues.push(err(
                "cache.semantic_threshold",
                format!("must be in (0, 1] (got {})", c.semantic_threshold),
            ));
        }
        if c.ttl_easy_s == 0 || c.ttl_medium_s == 0 || c.ttl_hard_s == 0 {
            issues.push(err("cache.ttl_*_s", "TTLs must be greater than 0"));
        }
        if c.max_payload_kb == 0 || c.max_evidence_kb == 0 {
            issues.push(err("cache.max_*_kb", "size bounds must be greater than 0"));
        }
        if c.schema_version.is_empty() || c.deps_version.is_empty() {
            issues.push(err(
                "cache.schema_version",
                "namespace version components must not be empty",
            ));
        }

        // ── Router ───────────────────────────────────────────────────
        let r = &self.router;
        if !(0.0..=1.0).contains(&r.canary_share) {
            issues.push(err("router.canary_share", "must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&r.micro_max_share) {
            issues.push(err("router.micro_max_share", "must be in [0, 1]"));
        }
        if r.deep_max_concurrent > 1 {
            issues.push(warn(
                "router.deep_max_concurrent",
                "values above 1 defeat the deep-route wallclock kill switch",
            ));
        }

        // ── URLs ─────────────────────────────────────────────────────
        check_url(&mut issues, "nlu.base_url", &self.nlu.base_url);
        if let Some(url) = &self.nlu.entailment_url {
            check_url(&mut issues, "nlu.entailment_url", url);
        }
        check_url(&mut issues, "backends.micro.base_url", &self.backends.micro.base_url);
        check_url(
            &mut issues,
            "backends.planner.base_url",
            &self.backends.planner.base_url,
        );
        check_url(&mut issues, "backends.deep.base_url", &self.backends.deep.base_url);

        // ── Budgets ──────────────────────────────────────────────────
        for (field, ep) in [
            ("backends.micro", &self.backends.micro),
            ("backends.planner", &self.backends.planner),
            ("backends.deep", &self.backends.deep),
        ] {
            if ep.first_token_budget_ms == 0 || ep.full_budget_ms == 0 {
                issues.push(err(field, "latency budgets must be greater than 0"));
            }
            if ep.first_token_budget_ms > ep.full_budget_ms {
                issues.push(err(
                    field,
                    "first-token budget must not exceed the full budget",
                ));
            }
        }
        if self.nlu.timeout_ms == 0 {
            issues.push(err("nlu.timeout_ms", "must be greater than 0"));
        }

        // ── Planner ──────────────────────────────────────────────────
        if self.planner.repair_budget > 1 {
            issues.push(warn(
                "planner.repair_budget",
                "repair budgets above 1 are outside the validated envelope",
            ));
        }
        if self.planner.registry_path.as_os_str().is_empty() {
            issues.push(err("planner.registry_path", "must not be empty"));
        }

        // ── Quota ────────────────────────────────────────────────────
        if self.quota.session_rpm == 0 {
            issues.push(err("quota.session_rpm", "must be greater than 0"));
        }
        if self.quota.route_window_s == 0 {
            issues.push(err("quota.route_window_s", "must be greater than 0"));
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
