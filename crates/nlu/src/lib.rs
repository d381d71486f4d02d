//! The NLU gateway: deterministic intent guard, the remote classifier
//! call under a strict budget, optional entailment second opinion, and
//! the rule-based fallback.
//!
//! `parse()` never fails and never mutates its input; degraded paths
//! produce a fallback intent instead of an error.

mod fallback;
mod guard;

pub use fallback::fallback_intent;
pub use guard::IntentGuard;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sv_domain::config::NluConfig;
use sv_domain::turn::{IntentResult, IntentSource, Route};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    v: &'static str,
    text: &'a str,
    lang: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    intent: String,
    confidence: f32,
    #[serde(default)]
    slots: BTreeMap<String, String>,
    #[serde(default)]
    route_hint: Option<Route>,
    #[serde(default)]
    mood_score: Option<f32>,
}

#[derive(Debug, Serialize)]
struct EntailmentRequest<'a> {
    v: &'static str,
    premise: &'a str,
    hypothesis: String,
}

#[derive(Debug, Deserialize)]
struct EntailmentResponse {
    entailed: bool,
    #[serde(default)]
    confidence: f32,
}

/// `parse()` output: the intent plus whether a remote call happened and
/// succeeded (for the caller's breaker bookkeeping).
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub result: IntentResult,
    /// `None` = no remote call was made (guard hit or remote not
    /// allowed); `Some(ok)` = a call happened and succeeded or not.
    pub remote_ok: Option<bool>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// NluClient
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct NluClient {
    cfg: NluConfig,
    http: reqwest::Client,
    guard: IntentGuard,
}

impl NluClient {
    pub fn new(cfg: NluConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms.max(cfg.entailment_timeout_ms)))
            .build()
            .unwrap_or_default();
        Self {
            cfg,
            http,
            guard: IntentGuard::new(),
        }
    }

    /// Deterministic guard check only — no network, no fallback. The
    /// orchestrator uses this for cheap admission decisions while the
    /// guardian is shedding load.
    pub fn guard_check(&self, text: &str) -> Option<IntentResult> {
        self.guard.check(text)
    }

    /// Classify one turn.
    ///
    /// 1. Deterministic guard — short-circuits with a strong confidence.
    /// 2. Remote classifier under the configured budget (when
    ///    `allow_remote`; the orchestrator clears it while the NLU
    ///    breaker is open).
    /// 3. On low confidence, entailment second opinion (if configured).
    /// 4. Rule-based fallback on any failure.
    pub async fn parse(&self, text: &str, lang: &str, allow_remote: bool) -> ParseOutcome {
        if let Some(result) = self.guard.check(text) {
            return ParseOutcome {
                result,
                remote_ok: None,
            };
        }

        if !allow_remote {
            return ParseOutcome {
                result: fallback_intent(text),
                remote_ok: None,
            };
        }

        match self.classify_remote(text, lang).await {
            Ok(mut result) => {
                if result.confidence < self.cfg.low_confidence {
                    if let Some(verified) = self.entail(text, &result.intent).await {
                        result = verified;
                    }
                }
                ParseOutcome {
                    result,
                    remote_ok: Some(true),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "NLU classify failed; using rule fallback");
                ParseOutcome {
                    result: fallback_intent(text),
                    remote_ok: Some(false),
                }
            }
        }
    }

    async fn classify_remote(&self, text: &str, lang: &str) -> Result<IntentResult, String> {
        let url = format!("{}/classify", self.cfg.base_url.trim_end_matches('/'));
        let body = ClassifyRequest {
            v: "1",
            text,
            lang,
        };

        let response = tokio::time::timeout(
            Duration::from_millis(self.cfg.timeout_ms),
            self.http.post(&url).json(&body).send(),
        )
        .await
        .map_err(|_| format!("classify timed out after {}ms", self.cfg.timeout_ms))?
        .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("classify returned {}", response.status()));
        }
        let wire: ClassifyResponse = response.json().await.map_err(|e| e.to_string())?;
        Ok(IntentResult {
            intent: wire.intent,
            confidence: wire.confidence,
            slots: wire.slots,
            route_hint: wire.route_hint,
            mood_score: wire.mood_score,
            source: IntentSource::Nlu,
        })
    }

    /// Entailment second opinion on a low-confidence classification.
    /// Returns a boosted result on agreement, `None` otherwise.
    async fn entail(&self, text: &str, intent: &str) -> Option<IntentResult> {
        let base = self.cfg.entailment_url.as_ref()?;
        let url = format!("{}/entail", base.trim_end_matches('/'));
        let body = EntailmentRequest {
            v: "1",
            premise: text,
            hypothesis: format!("användaren vill {intent}"),
        };

        let response = tokio::time::timeout(
            Duration::from_millis(self.cfg.entailment_timeout_ms),
            self.http.post(&url).json(&body).send(),
        )
        .await
        .ok()?
        .ok()?;
        let wire: EntailmentResponse = response.json().await.ok()?;

        wire.entailed.then(|| IntentResult {
            intent: intent.to_string(),
            confidence: wire.confidence.max(self.cfg.low_confidence),
            slots: BTreeMap::new(),
            route_hint: None,
            mood_score: None,
            source: IntentSource::Entailment,
        })
    }
}
