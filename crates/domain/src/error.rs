//! Error taxonomy shared across all Svara crates.
//!
//! The taxonomy is a closed set: every failure anywhere in the turn
//! pipeline maps to exactly one [`ErrorClass`], and tool invocations map
//! onto the narrower [`ToolCallClass`] set recorded in telemetry.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ErrorClass — the closed taxonomy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Closed error classification. Serialized snake_case into telemetry
/// events and API error payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Auth,
    Validation,
    RateLimited,
    GuardianReject,
    BreakerOpen,
    Timeout,
    Backend5xx,
    Schema,
    ToolFailure,
    CacheError,
    Internal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Auth => "auth",
            ErrorClass::Validation => "validation",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::GuardianReject => "guardian_reject",
            ErrorClass::BreakerOpen => "breaker_open",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Backend5xx => "backend_5xx",
            ErrorClass::Schema => "schema",
            ErrorClass::ToolFailure => "tool_failure",
            ErrorClass::CacheError => "cache_error",
            ErrorClass::Internal => "internal",
        }
    }

    /// HTTP status this class surfaces as.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorClass::Auth => 401,
            ErrorClass::Validation => 400,
            ErrorClass::RateLimited => 429,
            ErrorClass::GuardianReject | ErrorClass::BreakerOpen => 503,
            ErrorClass::Timeout => 504,
            ErrorClass::Backend5xx => 502,
            ErrorClass::Schema => 502,
            ErrorClass::ToolFailure => 502,
            ErrorClass::CacheError | ErrorClass::Internal => 500,
        }
    }

    /// Whether a failure of this class is deterministic for identical
    /// input. Deterministic failures are eligible for the negative cache;
    /// transient ones (timeouts, 5xx) are not.
    pub fn is_deterministic(&self) -> bool {
        matches!(self, ErrorClass::Schema | ErrorClass::Validation)
    }

    /// Whether the fallback matrix may be consulted for this class.
    /// Exactly one fallback chain per turn; never an automatic retry on
    /// the same arm.
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self,
            ErrorClass::Timeout | ErrorClass::Backend5xx | ErrorClass::ToolFailure
        )
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolCallClass — per-tool-call outcome recorded in telemetry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome class of a single tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolCallClass {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "timeout")]
    Timeout,
    #[serde(rename = "5xx")]
    FiveXx,
    #[serde(rename = "429")]
    TooManyRequests,
    #[serde(rename = "schema")]
    Schema,
    #[serde(rename = "other")]
    Other,
}

impl ToolCallClass {
    pub fn is_ok(&self) -> bool {
        matches!(self, ToolCallClass::Ok)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error — shared error type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared error type used across all Svara crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("auth: {0}")]
    Auth(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("rate limited, retry after {retry_after_s}s")]
    RateLimited { retry_after_s: u64 },

    #[error("guardian rejected request in {state} state")]
    GuardianReject { state: String, retry_after_s: u64 },

    #[error("breaker open for dependency {dependency}")]
    BreakerOpen {
        dependency: String,
        retry_after_s: u64,
    },

    #[error("timeout in {stage} after {elapsed_ms}ms")]
    Timeout { stage: String, elapsed_ms: u64 },

    #[error("backend {route} returned {status}: {message}")]
    Backend {
        route: String,
        status: u16,
        message: String,
    },

    #[error("schema: {0}")]
    Schema(String),

    #[error("tool {tool} failed: {message}")]
    Tool {
        tool: String,
        class: ToolCallClass,
        message: String,
    },

    #[error("cache: {0}")]
    Cache(String),

    #[error("NLU: {0}")]
    Nlu(String),

    #[error("config: {0}")]
    Config(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to its class in the closed taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Auth(_) => ErrorClass::Auth,
            Error::Validation(_) | Error::Config(_) => ErrorClass::Validation,
            Error::RateLimited { .. } => ErrorClass::RateLimited,
            Error::GuardianReject { .. } => ErrorClass::GuardianReject,
            Error::BreakerOpen { .. } => ErrorClass::BreakerOpen,
            Error::Timeout { .. } => ErrorClass::Timeout,
            Error::Backend { status, .. } if *status == 429 => ErrorClass::RateLimited,
            Error::Backend { .. } => ErrorClass::Backend5xx,
            Error::Schema(_) => ErrorClass::Schema,
            Error::Tool { .. } => ErrorClass::ToolFailure,
            Error::Cache(_) => ErrorClass::CacheError,
            Error::Nlu(_) => ErrorClass::Timeout,
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => ErrorClass::Internal,
        }
    }

    /// `Retry-After` seconds to surface, when the class carries one.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Error::RateLimited { retry_after_s }
            | Error::GuardianReject { retry_after_s, .. }
            | Error::BreakerOpen { retry_after_s, .. } => Some(*retry_after_s),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
