//! The turn orchestrator: one pass through admission, canonicalization,
//! the cache tiers, intent parsing, bandit routing, backend dispatch,
//! plan execution, cache store, bandit update, and telemetry.
//!
//! The turn is exclusively owned here for its lifetime; the telemetry
//! event is emitted exactly once, after all child work finished.

use std::time::{Duration, Instant};

use chrono::Utc;
use chrono_tz::Europe::Stockholm;
use tracing::Instrument;

use sv_backends::GenerateRequest;
use sv_cache::{CacheEntry, FlightTicket};
use sv_canon::{CanonicalRequest, Fingerprint};
use sv_domain::config::{CacheLevel, Config};
use sv_domain::error::ErrorClass;
use sv_domain::trace::TraceEvent;
use sv_domain::turn::{
    degrade_notice, CacheTier, DegradeReason, GuardianState, IntentResult, Route, Turn,
};
use sv_domain::{Error, Result};
use sv_guardian::Admission;
use sv_router::{compute_reward, RouteContext};
use sv_telemetry::estimate_energy_wh;

use crate::state::AppState;

/// Extra grace on the single-flight join beyond the deep full budget.
const FLIGHT_JOIN_GRACE_MS: u64 = 500;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input / output
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One inbound turn, already authenticated and size-checked.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub session_id: String,
    pub lang: String,
    pub message: String,
}

/// The reply surfaced to the API layer.
#[derive(Debug, Clone)]
pub struct TurnReply {
    pub trace_id: uuid::Uuid,
    pub text: String,
    pub route: Option<Route>,
    pub cache_tier: CacheTier,
    pub intent: String,
    pub route_hint: Option<Route>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn — entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one turn end to end. Always emits exactly one telemetry event,
/// success or failure.
pub async fn run_turn(state: &AppState, input: TurnInput) -> Result<TurnReply> {
    let cfg = state.config.get();
    let entry_state = state.guardian.state();

    let mut turn = Turn::new(&input.session_id, &input.lang, "", entry_state);
    // The turn record never holds raw text; mask before anything else.
    let (masked_text, was_masked) = if cfg.privacy.pii_masking {
        state.masker.mask(&input.message)
    } else {
        (input.message.clone(), false)
    };
    turn.text = masked_text;
    turn.pii_masked = was_masked;

    let span = tracing::info_span!(
        "turn",
        trace_id = %turn.trace_id,
        session_id = %input.session_id,
        "otel.kind" = "SERVER",
    );

    let result = run_turn_inner(state, &cfg, &mut turn, &input)
        .instrument(span)
        .await;

    // ── Finalize: one telemetry event per turn ───────────────────────
    turn.finished_at = Some(Utc::now());
    turn.guardian_exit = Some(state.guardian.state());
    if let Some(sample) = state.guardian.snapshot().last_sample {
        turn.ram_peak_proc_mb = sample.proc_rss_mb;
        turn.ram_peak_sys_mb = sample.sys_used_mb;
    }
    if let Some(route) = turn.route {
        turn.energy_wh =
            estimate_energy_wh(&cfg.telemetry, route, turn.e2e_full_ms().unwrap_or(0));
    }
    state.telemetry.record(&turn);

    result
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn_inner — the lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_turn_inner(
    state: &AppState,
    cfg: &Config,
    turn: &mut Turn,
    input: &TurnInput,
) -> Result<TurnReply> {
    // ── 1. Per-session rate limit ────────────────────────────────────
    state
        .session_limiter
        .check(&input.session_id)
        .map_err(|retry_after_s| Error::RateLimited { retry_after_s })?;

    // ── 2. Coarse guardian admission ─────────────────────────────────
    // In EMERGENCY/LOCKDOWN only turns the deterministic regex guard
    // recognizes may proceed: those classify without any network spend
    // and stay servable by MICRO or the cache. Everything else is shed
    // here, before canonicalization or NLU runs, so rejection under
    // overload costs O(1). The per-route admit clamp re-runs at
    // dispatch time.
    if matches!(
        turn.guardian_entry,
        GuardianState::Emergency | GuardianState::Lockdown
    ) && state.nlu.guard_check(&input.message).is_none()
    {
        return Err(Error::GuardianReject {
            state: turn.guardian_entry.to_string(),
            retry_after_s: state.guardian.config().reject_retry_after_s,
        });
    }

    // ── 3. Canonicalize ──────────────────────────────────────────────
    let now_tz = Utc::now().with_timezone(&Stockholm);
    let canonical = state.canonicalizer.canonicalize(&input.message, now_tz);
    let tokens: Vec<String> = canonical.split_whitespace().map(String::from).collect();

    // ── 4. Intent: guard first, NLU under budget, rule fallback ──────
    let nlu_started = Instant::now();
    let allow_remote = state.breakers.allow("nlu").is_ok();
    let parsed = state.nlu.parse(&input.message, &input.lang, allow_remote).await;
    turn.timings.nlu_ms = Some(nlu_started.elapsed().as_millis() as u64);
    if let Some(ok) = parsed.remote_ok {
        state.breakers.record("nlu", ok);
    }
    let intent = parsed.result;
    turn.intent = Some(intent.clone());

    // ── 5. Fingerprint ───────────────────────────────────────────────
    let hint_route = intent.route_hint.unwrap_or(Route::Micro);
    let time_bucket = IntentResult::is_time_sensitive(&intent.intent)
        .then(|| sv_canon::time_bucket(now_tz));
    let request = CanonicalRequest {
        text: canonical.clone(),
        intent: intent.intent.clone(),
        context_facts: Vec::new(),
        schema_version: cfg.cache.schema_version.clone(),
        deps_version: cfg.cache.deps_version.clone(),
        locale: input.lang.clone(),
        persona_mode: "neutral".into(),
        time_bucket,
        safety_mode: "standard".into(),
        model_id: state.backends.model_id(hint_route),
    };
    let fp = request.fingerprint();

    // ── 6. Cache tiers ───────────────────────────────────────────────
    let lookup_started = Instant::now();
    let outcome = state.cache.lookup(&fp, &tokens, Utc::now());
    turn.timings.cache_lookup_ms = Some(lookup_started.elapsed().as_millis() as u64);
    turn.cache_tier = outcome.tier;

    if let Some(entry) = outcome.entry {
        turn.route = Some(entry.route);
        return Ok(TurnReply {
            trace_id: turn.trace_id,
            text: entry.payload,
            route: Some(entry.route),
            cache_tier: outcome.tier,
            intent: intent.intent,
            route_hint: intent.route_hint,
        });
    }
    if let Some(negative) = outcome.negative {
        // Synthesized failure: the fixed degradation phrase, fast.
        tracing::debug!(
            reason = %negative.reason,
            remaining_s = negative.remaining_s(Utc::now()),
            "negative cache suppressed a retry"
        );
        return Ok(TurnReply {
            trace_id: turn.trace_id,
            text: degrade_notice(DegradeReason::LighterMode).to_string(),
            route: None,
            cache_tier: CacheTier::L3,
            intent: intent.intent,
            route_hint: intent.route_hint,
        });
    }

    // ── 7. Single-flight: one build per fingerprint ──────────────────
    if outcome.tier == CacheTier::Miss {
        match state.cache.flight().begin(&fp.key) {
            FlightTicket::Follower(mut rx) => {
                let join_budget =
                    Duration::from_millis(cfg.backends.deep.full_budget_ms + FLIGHT_JOIN_GRACE_MS);
                return match tokio::time::timeout(join_budget, rx.recv()).await {
                    Ok(Ok(Ok(entry))) => {
                        turn.route = Some(entry.route);
                        Ok(TurnReply {
                            trace_id: turn.trace_id,
                            text: entry.payload,
                            route: Some(entry.route),
                            cache_tier: CacheTier::Miss,
                            intent: intent.intent,
                            route_hint: intent.route_hint,
                        })
                    }
                    Ok(Ok(Err((class, message)))) => Err(error_from_class(class, message)),
                    _ => Err(Error::Timeout {
                        stage: "singleflight.join".into(),
                        elapsed_ms: join_budget.as_millis() as u64,
                    }),
                };
            }
            FlightTicket::Leader(leader) => {
                let built = build_response(state, cfg, turn, input, &intent, &fp, &tokens).await;
                return match built {
                    Ok((entry, fresh_text)) => {
                        store_entry(state, turn, &fp, &entry);
                        leader.complete(Ok(entry.clone()));
                        Ok(TurnReply {
                            trace_id: turn.trace_id,
                            text: fresh_text,
                            route: Some(entry.route),
                            cache_tier: turn.cache_tier,
                            intent: intent.intent,
                            route_hint: intent.route_hint,
                        })
                    }
                    Err(e) => {
                        let class = e.class();
                        state
                            .cache
                            .store_negative(&fp, class, e.to_string(), e.retry_after());
                        leader.complete(Err((class, e.to_string())));
                        Err(e)
                    }
                };
            }
        }
    }

    // Cache bypass: build without coordination.
    let (entry, fresh_text) = build_response(state, cfg, turn, input, &intent, &fp, &tokens).await?;
    Ok(TurnReply {
        trace_id: turn.trace_id,
        text: fresh_text,
        route: Some(entry.route),
        cache_tier: CacheTier::Bypass,
        intent: intent.intent,
        route_hint: intent.route_hint,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// build_response — the miss pipeline (routing, dispatch, plan, store)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn build_response(
    state: &AppState,
    cfg: &Config,
    turn: &mut Turn,
    input: &TurnInput,
    intent: &IntentResult,
    fp: &Fingerprint,
    tokens: &[String],
) -> Result<(CacheEntry, String)> {
    let snapshot = state.guardian.snapshot();
    let scalar = snapshot.policy.quota_scalar;

    // ── Admissible arm set: guardian, breakers, quotas, config ───────
    let mut admissible = Vec::new();
    let mut planner_degraded = false;
    let mut guardian_reject_seen = false;
    for route in Route::ALL {
        match state.guardian.admit(route) {
            Admission::Reject { .. } => {
                guardian_reject_seen = true;
                continue;
            }
            Admission::Degrade { .. } => planner_degraded = true,
            Admission::Allow => {}
        }
        if route == Route::Deep && !cfg.router.deep_enabled {
            continue;
        }
        if state.breakers.allow(&backend_dep(route)).is_err() {
            continue;
        }
        if !state.quotas.available(route, scalar) {
            continue;
        }
        admissible.push(route);
    }
    if admissible.is_empty() {
        return Err(if guardian_reject_seen {
            Error::GuardianReject {
                state: snapshot.state.to_string(),
                retry_after_s: state.guardian.config().reject_retry_after_s,
            }
        } else {
            Error::BreakerOpen {
                dependency: "backends".into(),
                retry_after_s: 30,
            }
        });
    }

    // ── Bandit proposes; caps demote afterwards ──────────────────────
    let ctx = RouteContext {
        intent_confidence: intent.confidence,
        text_len: input.message.chars().count(),
        has_question: input.message.contains('?'),
        cache_hint: intent.route_hint.is_some(),
        guardian_state: snapshot.state,
        last_tool_error: *state
            .session_tool_errors
            .lock()
            .get(&input.session_id)
            .unwrap_or(&false),
    };
    let proposed = state.bandit.choose(&ctx, &admissible);
    let mut route = proposed;

    // MICRO share cap under low NLU confidence: demote to the next
    // admissible arm instead of overloading the cheap answer.
    if route == Route::Micro && intent.confidence < 0.5 {
        let stats = state.quotas.snapshot();
        let total: u32 = stats.iter().map(|s| s.requests_in_window).sum();
        let micro: u32 = stats
            .iter()
            .filter(|s| s.route == Route::Micro)
            .map(|s| s.requests_in_window)
            .sum();
        let share = if total == 0 {
            0.0
        } else {
            micro as f64 / total as f64
        };
        if share > cfg.router.micro_max_share && admissible.contains(&Route::Planner) {
            route = Route::Planner;
        }
    }

    // Window admission + concurrency slot (atomic: the window entry
    // commits only with a held slot, so abandoned attempts leave no
    // trace), demoting down-chain when a cap or slot is unavailable.
    let _slot = loop {
        match state.quotas.try_acquire(route, scalar) {
            Ok(slot) => break slot,
            Err(denied) => match route.demote().filter(|r| admissible.contains(r)) {
                Some(next) => route = next,
                None => {
                    return Err(Error::RateLimited {
                        retry_after_s: denied.retry_after_s,
                    })
                }
            },
        }
    };

    TraceEvent::RouteChosen {
        route,
        proposed,
        demoted: route != proposed,
    }
    .emit();
    turn.route = Some(route);

    // ── Dispatch with cooperative cancellation ───────────────────────
    let degraded = planner_degraded && route != Route::Micro;
    let trace_id = turn.trace_id.to_string();
    let cancel = state.cancel_map.register(&trace_id, route);
    let dispatch_started = Instant::now();

    let generate_request = GenerateRequest {
        trace_id: trace_id.clone(),
        text: input.message.clone(),
        intent: intent.intent.clone(),
        slots: intent.slots.clone(),
        lang: input.lang.clone(),
        degraded,
        rag_top_k: if degraded {
            cfg.planner.rag_top_k_degraded
        } else {
            cfg.planner.rag_top_k
        },
        expect_plan: route != Route::Micro,
    };

    let mut used_fallback = false;
    let mut dispatch = dispatch_backend(state, route, &generate_request, &cancel).await;

    // Exactly one fallback per turn: a transient failure demotes the
    // arm once, never retries the same arm.
    let transient_failure = match &dispatch {
        Err(e) => {
            state.quotas.record_error(route);
            e.class().allows_fallback()
        }
        Ok(_) => false,
    };
    if transient_failure {
        if let Some(next) = route.demote().filter(|r| admissible.contains(r)) {
            tracing::info!(from = %route, to = %next, "backend fallback after transient failure");
            used_fallback = true;
            route = next;
            turn.route = Some(route);
            let retry_request = GenerateRequest {
                expect_plan: route != Route::Micro,
                ..generate_request.clone()
            };
            dispatch = dispatch_backend(state, route, &retry_request, &cancel).await;
            if dispatch.is_err() {
                state.quotas.record_error(route);
            }
        }
    }
    state.cancel_map.remove(&trace_id);

    let reply = match dispatch {
        Ok(reply) => reply,
        Err(e) => {
            update_bandit(state, cfg, &ctx, route, false, 0, 0.0);
            return Err(e);
        }
    };
    turn.timings.backend_first_ms = Some(reply.first_token_ms);
    turn.timings.backend_full_ms = Some(reply.full_ms);

    // ── Plan validation & execution (planner/deep routes) ────────────
    let now_tz = Utc::now().with_timezone(&Stockholm);
    let mut schema_ok = true;
    let mut success = true;
    let mut reply_text = reply.text.clone();

    if route != Route::Micro {
        let plan_started = Instant::now();
        // Brownout means strict schema: no repair budget.
        let repair_budget = if degraded { 0 } else { cfg.planner.repair_budget };
        match sv_planner::validate_plan(&reply.text, state.executor.registry(), repair_budget) {
            Ok(validated) => {
                let execution = state
                    .executor
                    .execute(&validated.plan, &intent.slots, now_tz)
                    .await;
                turn.tool_calls.extend(execution.tool_calls.iter().cloned());
                used_fallback = used_fallback || execution.used_fallback;
                success = execution.success;
                reply_text = execution.reply_text;
                state
                    .session_tool_errors
                    .lock()
                    .insert(input.session_id.clone(), !execution.success);

                // A deterministic tool schema failure is worth a
                // negative entry; transient classes are not.
                if !execution.success
                    && !execution.tool_calls.is_empty()
                    && execution
                        .tool_calls
                        .iter()
                        .all(|tc| tc.class == sv_domain::error::ToolCallClass::Schema)
                {
                    state.cache.store_negative(
                        fp,
                        ErrorClass::Schema,
                        "tool arguments failed schema validation",
                        None,
                    );
                }
            }
            Err(e) => {
                // One repair attempt happened inside validate_plan;
                // demote to the safe reply and remember the failure.
                tracing::warn!(error = %e, "plan failed validation; demoting to safe reply");
                state
                    .cache
                    .store_negative(fp, ErrorClass::Schema, e.to_string(), None);
                schema_ok = false;
                success = false;
                reply_text = degrade_notice(DegradeReason::LighterMode).to_string();
            }
        }
        turn.timings.plan_ms = Some(plan_started.elapsed().as_millis() as u64);
    }

    if degraded && success {
        reply_text = format!("{} {}", degrade_notice(DegradeReason::LighterMode), reply_text);
    }

    // ── Bandit reward ────────────────────────────────────────────────
    let full_ms = dispatch_started.elapsed().as_millis() as u64;
    let energy = estimate_energy_wh(&cfg.telemetry, route, full_ms);
    update_bandit(state, cfg, &ctx, route, success, full_ms, energy);

    // ── Assemble the entry (stored masked) ───────────────────────────
    let (stored_payload, _) = if cfg.privacy.pii_masking {
        state.masker.mask(&reply_text)
    } else {
        (reply_text.clone(), false)
    };
    let level = match route {
        Route::Micro => CacheLevel::Easy,
        Route::Planner => CacheLevel::Medium,
        Route::Deep => CacheLevel::Hard,
    };
    let entry = CacheEntry {
        route,
        intent: intent.intent.clone(),
        payload: stored_payload,
        evidence: None,
        created_at: Utc::now(),
        ttl_s: cfg.cache.ttl_for(level),
        level,
        schema_ok: schema_ok && success,
        tokens: tokens.to_vec(),
    };

    tracing::debug!(
        route = %route,
        success,
        used_fallback,
        full_ms,
        "turn built"
    );
    Ok((entry, reply_text))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn backend_dep(route: Route) -> String {
    format!("backend.{route}")
}

async fn dispatch_backend(
    state: &AppState,
    route: Route,
    request: &GenerateRequest,
    cancel: &tokio_util::sync::CancellationToken,
) -> Result<sv_backends::GenerateReply> {
    let backend = state.backends.get(route);
    let dep = backend_dep(route);
    if let Err(retry_after_s) = state.breakers.allow(&dep) {
        return Err(Error::BreakerOpen {
            dependency: dep,
            retry_after_s,
        });
    }

    let span = tracing::info_span!(
        "backend.call",
        route = %route,
        "otel.kind" = "CLIENT",
    );
    let result = tokio::select! {
        r = backend.generate(request).instrument(span) => r,
        _ = cancel.cancelled() => Err(Error::GuardianReject {
            state: state.guardian.state().to_string(),
            retry_after_s: state.guardian.config().reject_retry_after_s,
        }),
    };
    state.breakers.record(&dep, result.is_ok());
    result
}

fn update_bandit(
    state: &AppState,
    cfg: &Config,
    ctx: &RouteContext,
    route: Route,
    success: bool,
    full_ms: u64,
    energy_wh: f64,
) {
    let slo_full_ms = cfg.backends.endpoint(route).full_budget_ms;
    let reward = compute_reward(&cfg.router, success, full_ms, slo_full_ms, energy_wh);
    state.bandit.update(ctx, route, reward);
}

fn store_entry(state: &AppState, turn: &mut Turn, fp: &Fingerprint, entry: &CacheEntry) {
    let store_started = Instant::now();
    match state.cache.store(fp, entry.clone()) {
        Ok(()) => {}
        Err(e) => {
            // cache_error never fails the turn; it downgrades to bypass.
            tracing::debug!(error = %e, "response not cached");
        }
    }
    turn.timings.store_ms = Some(store_started.elapsed().as_millis() as u64);
}

/// Rebuild a follower-side error from the broadcast (class, message).
fn error_from_class(class: ErrorClass, message: String) -> Error {
    match class {
        ErrorClass::Timeout => Error::Timeout {
            stage: "singleflight.leader".into(),
            elapsed_ms: 0,
        },
        ErrorClass::Schema => Error::Schema(message),
        ErrorClass::Validation => Error::Validation(message),
        ErrorClass::RateLimited => Error::RateLimited { retry_after_s: 10 },
        ErrorClass::GuardianReject => Error::GuardianReject {
            state: GuardianState::Normal.to_string(),
            retry_after_s: 30,
        },
        ErrorClass::BreakerOpen => Error::BreakerOpen {
            dependency: "backends".into(),
            retry_after_s: 30,
        },
        ErrorClass::Backend5xx => Error::Backend {
            route: "unknown".into(),
            status: 502,
            message,
        },
        _ => Error::Internal(message),
    }
}
