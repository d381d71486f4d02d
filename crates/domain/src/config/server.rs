use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Environment variable holding the API bearer token. Unset or
    /// empty = dev mode (no auth enforced).
    #[serde(default = "d_api_token_env")]
    pub api_token_env: String,
    /// Environment variable holding the webhook HMAC secret. Unset =
    /// HMAC verification disabled.
    #[serde(default = "d_hmac_secret_env")]
    pub hmac_secret_env: String,
    /// Accepted clock skew for HMAC-signed requests, in seconds.
    #[serde(default = "d_hmac_window_s")]
    pub hmac_window_s: u64,
    /// How long idempotency-key replays return the stored response.
    #[serde(default = "d_idempotency_ttl_s")]
    pub idempotency_ttl_s: u64,
    /// Hard cap on concurrently served requests (backpressure).
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Per-IP token-bucket rate limit. `None` disables it.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            api_token_env: d_api_token_env(),
            hmac_secret_env: d_hmac_secret_env(),
            hmac_window_s: d_hmac_window_s(),
            idempotency_ttl_s: d_idempotency_ttl_s(),
            max_concurrent: d_max_concurrent(),
            cors: CorsConfig::default(),
            rate_limit: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. Use `["*"]` for permissive (NOT
    /// recommended). Defaults to localhost-only.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: u64,
    pub burst_size: u32,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_port() -> u16 {
    8180
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_api_token_env() -> String {
    "SVARA_API_TOKEN".into()
}
fn d_hmac_secret_env() -> String {
    "SVARA_HMAC_SECRET".into()
}
fn d_hmac_window_s() -> u64 {
    300
}
fn d_idempotency_ttl_s() -> u64 {
    3_600
}
fn d_max_concurrent() -> usize {
    256
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}
