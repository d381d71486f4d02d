//! Orchestrator-level scenarios with stub backends: cache warm-up,
//! plan execution against a mock tool service, negative-cache
//! suppression, guardian degradation, and the per-session rate limit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use sv_backends::{BackendClient, BackendRegistry, GenerateReply, GenerateRequest};
use sv_domain::config::Config;
use sv_domain::turn::{CacheTier, GuardianState, Route};
use sv_domain::{Error, Result};
use sv_gateway::bootstrap;
use sv_gateway::runtime::{run_turn, TurnInput};
use sv_gateway::state::AppState;
use sv_guardian::HostSample;
use sv_router::RouteContext;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stub backends
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct StubBackend {
    route: Route,
    reply: String,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl BackendClient for StubBackend {
    fn route(&self) -> Route {
        self.route
    }

    fn model_id(&self) -> &str {
        "stub-1b"
    }

    async fn generate(&self, _req: &GenerateRequest) -> Result<GenerateReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(GenerateReply {
            text: self.reply.clone(),
            first_token_ms: 5,
            full_ms: 10,
        })
    }
}

struct FailingBackend {
    route: Route,
}

#[async_trait]
impl BackendClient for FailingBackend {
    fn route(&self) -> Route {
        self.route
    }

    fn model_id(&self) -> &str {
        "stub-broken"
    }

    async fn generate(&self, _req: &GenerateRequest) -> Result<GenerateReply> {
        Err(Error::Backend {
            route: self.route.to_string(),
            status: 500,
            message: "stub failure".into(),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fixture
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Fixture {
    state: AppState,
    micro_calls: Arc<AtomicUsize>,
    planner_calls: Arc<AtomicUsize>,
    _dirs: tempfile::TempDir,
}

const PLAN_TIME: &str = r#"{"intent":"time.now","tool":"time.now","args":{},"render_instruction":"speak","confidence":0.95,"reason":"klockfråga"}"#;

fn registry_toml(calendar_endpoint: &str) -> String {
    format!(
        r#"
version = "1"
render_instructions = ["speak", "confirm"]

[[tools]]
name = "none"
kind = "builtin"

[[tools]]
name = "time.now"
kind = "builtin"

[[tools]]
name = "calendar.create"
kind = "http"
endpoint = "{calendar_endpoint}"
timeout_ms = 500

[tools.args.when]
type = "datetime"
required = true

[tools.args.with]
type = "string"
required = true

[fallbacks]
"calendar.create" = ["calendar.create"]
"#
    )
}

/// Assemble an AppState with stub backends and hermetic temp dirs.
fn fixture(planner_reply: &str, calendar_endpoint: &str, session_rpm: u32) -> Fixture {
    let dirs = tempfile::tempdir().unwrap();
    let registry_path = dirs.path().join("tool_registry.toml");
    std::fs::write(&registry_path, registry_toml(calendar_endpoint)).unwrap();

    let mut config = Config::default();
    config.cache.data_dir = dirs.path().join("cache");
    config.router.snapshot_dir = dirs.path().join("bandit");
    config.telemetry.data_dir = dirs.path().join("telemetry");
    config.planner.registry_path = registry_path;
    config.quota.session_rpm = session_rpm;
    // Deterministic arm selection: no canary coin in tests.
    config.router.canary_share = 0.0;
    // The NLU service does not exist in tests; the guard and the rule
    // fallback carry classification.
    config.nlu.base_url = "http://127.0.0.1:1".into();
    config.nlu.timeout_ms = 50;

    let micro_calls = Arc::new(AtomicUsize::new(0));
    let planner_calls = Arc::new(AtomicUsize::new(0));
    let backends = Arc::new(BackendRegistry::new(
        Arc::new(StubBackend {
            route: Route::Micro,
            reply: "Klockan är 14:00.".into(),
            calls: micro_calls.clone(),
        }),
        Arc::new(StubBackend {
            route: Route::Planner,
            reply: planner_reply.into(),
            calls: planner_calls.clone(),
        }),
        Arc::new(FailingBackend { route: Route::Deep }),
    ));

    let state = bootstrap::build_state(config, None, Some(backends)).unwrap();
    Fixture {
        state,
        micro_calls,
        planner_calls,
        _dirs: dirs,
    }
}

/// Pre-train the bandit so the exploit path deterministically prefers
/// `route` for the bucket this message lands in.
fn prefer_route(state: &AppState, message: &str, confidence: f32, route: Route) {
    let ctx = RouteContext {
        intent_confidence: confidence,
        text_len: message.chars().count(),
        has_question: message.contains('?'),
        cache_hint: true,
        guardian_state: GuardianState::Normal,
        last_tool_error: false,
    };
    for r in Route::ALL {
        let reward = if r == route { 0.9 } else { 0.05 };
        for _ in 0..30 {
            state.bandit.update(&ctx, r, reward);
        }
    }
}

fn input(session: &str, message: &str) -> TurnInput {
    TurnInput {
        session_id: session.into(),
        lang: "sv".into(),
        message: message.into(),
    }
}

fn brownout_sample() -> HostSample {
    HostSample {
        ram_pct: 85.0,
        cpu_pct: 20.0,
        temp_c: Some(45.0),
        battery_pct: Some(90.0),
        proc_rss_mb: 100,
        sys_used_mb: 4_000,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn warm_cache_serves_the_second_identical_turn_from_l1() {
    let fx = fixture(PLAN_TIME, "http://127.0.0.1:1/unused", 10);
    let message = "Vad är klockan?";
    prefer_route(&fx.state, message, 0.97, Route::Micro);

    let first = run_turn(&fx.state, input("s1", message)).await.unwrap();
    assert_eq!(first.route, Some(Route::Micro));
    assert_eq!(first.cache_tier, CacheTier::Miss);
    assert_eq!(first.intent, "time.now");
    assert_eq!(fx.micro_calls.load(Ordering::SeqCst), 1);

    let second = run_turn(&fx.state, input("s2", message)).await.unwrap();
    assert_eq!(second.cache_tier, CacheTier::L1);
    assert_eq!(second.text, "Klockan är 14:00.");
    // No second backend invocation.
    assert_eq!(fx.micro_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn planner_plan_executes_the_calendar_tool() {
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/calendar/create"))
        .and(body_partial_json(serde_json::json!({
            "v": "1",
            "tool": "calendar.create",
            "args": { "with": "anna" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "text": "Mötet med Anna är bokat."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let plan = r#"{"intent":"calendar.create","tool":"calendar.create","args":{},"render_instruction":"confirm","confidence":0.92,"reason":"bokning"}"#;
    let fx = fixture(plan, &format!("{}/calendar/create", server.uri()), 10);
    let message = "Boka möte med Anna imorgon kl 14";
    prefer_route(&fx.state, message, 0.97, Route::Planner);

    let reply = run_turn(&fx.state, input("s1", message)).await.unwrap();
    assert_eq!(reply.route, Some(Route::Planner));
    assert_eq!(reply.intent, "calendar.create");
    assert!(reply.text.starts_with("Klart!"), "got: {}", reply.text);
    assert_eq!(fx.planner_calls.load(Ordering::SeqCst), 1);

    // The executed tool call landed in telemetry as ok.
    let snapshot = fx.state.telemetry.snapshot();
    assert_eq!(snapshot.tool_success_rate, 1.0);
}

#[tokio::test]
async fn deterministic_schema_failure_is_suppressed_via_l3() {
    // The planner emits a tool outside the closed registry set.
    let bad_plan = r#"{"intent":"calendar.create","tool":"rocket.launch","args":{},"render_instruction":"confirm","confidence":0.9,"reason":""}"#;
    let fx = fixture(bad_plan, "http://127.0.0.1:1/unused", 10);
    let message = "Boka möte med Anna imorgon kl 14";
    prefer_route(&fx.state, message, 0.97, Route::Planner);

    let first = run_turn(&fx.state, input("s1", message)).await.unwrap();
    assert_eq!(first.cache_tier, CacheTier::Miss);
    assert_eq!(fx.planner_calls.load(Ordering::SeqCst), 1);

    // Second identical request: L3 short-circuits before any backend.
    let second = run_turn(&fx.state, input("s2", message)).await.unwrap();
    assert_eq!(second.cache_tier, CacheTier::L3);
    assert_eq!(fx.planner_calls.load(Ordering::SeqCst), 1);
    // Both calls surfaced the same graceful Swedish notice.
    assert_eq!(first.text, second.text);
}

#[tokio::test]
async fn emergency_keeps_micro_alive_and_avoids_heavier_arms() {
    let fx = fixture(PLAN_TIME, "http://127.0.0.1:1/unused", 20);

    // Drive the guardian to EMERGENCY (hard RAM breach, stepwise).
    let mut sample = brownout_sample();
    sample.ram_pct = 95.0;
    fx.state.guardian.apply_sample(sample);
    fx.state.guardian.apply_sample(sample);
    assert_eq!(fx.state.guardian.state(), GuardianState::Emergency);

    // A booking request would prefer the planner, but only MICRO is
    // admitted now.
    let message = "Boka möte med Anna imorgon kl 14";
    prefer_route(&fx.state, message, 0.97, Route::Planner);
    let reply = run_turn(&fx.state, input("s1", message)).await.unwrap();
    assert_eq!(reply.route, Some(Route::Micro));
    assert_eq!(fx.planner_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn emergency_sheds_non_deterministic_requests_before_nlu() {
    let fx = fixture(PLAN_TIME, "http://127.0.0.1:1/unused", 20);
    let mut sample = brownout_sample();
    sample.ram_pct = 95.0;
    fx.state.guardian.apply_sample(sample);
    fx.state.guardian.apply_sample(sample);
    assert_eq!(fx.state.guardian.state(), GuardianState::Emergency);

    // No guard pattern matches this: it is rejected at ingress, before
    // canonicalization, NLU, or any backend work.
    let err = run_turn(&fx.state, input("s1", "berätta en lång saga för mig"))
        .await
        .unwrap_err();
    match err {
        Error::GuardianReject { retry_after_s, .. } => assert!(retry_after_s >= 1),
        other => panic!("expected guardian reject, got {other:?}"),
    }
    assert_eq!(fx.micro_calls.load(Ordering::SeqCst), 0);
    assert_eq!(fx.planner_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn brownout_degrades_the_planner_and_blocks_deep() {
    let fx = fixture(PLAN_TIME, "http://127.0.0.1:1/unused", 20);
    for _ in 0..5 {
        fx.state.guardian.apply_sample(brownout_sample());
    }
    assert_eq!(fx.state.guardian.state(), GuardianState::Brownout);

    let message = "Vad är klockan just nu?";
    prefer_route(&fx.state, message, 0.97, Route::Planner);
    let reply = run_turn(&fx.state, input("s1", message)).await.unwrap();
    // Planner ran degraded: the reply carries the lighter-mode notice.
    assert_eq!(reply.route, Some(Route::Planner));
    assert!(reply.text.contains("lättare läge"), "got: {}", reply.text);
}

#[tokio::test]
async fn session_rate_limit_returns_retry_after() {
    let fx = fixture(PLAN_TIME, "http://127.0.0.1:1/unused", 2);
    let message = "Vad är klockan?";
    prefer_route(&fx.state, message, 0.97, Route::Micro);

    run_turn(&fx.state, input("s1", message)).await.unwrap();
    run_turn(&fx.state, input("s1", message)).await.unwrap();
    let err = run_turn(&fx.state, input("s1", message)).await.unwrap_err();
    match err {
        Error::RateLimited { retry_after_s } => assert!(retry_after_s >= 1),
        other => panic!("expected rate limit, got {other:?}"),
    }

    // A different session is unaffected.
    assert!(run_turn(&fx.state, input("s2", message)).await.is_ok());
}

#[tokio::test]
async fn semantically_similar_weather_queries_share_an_l2_entry() {
    let fx = fixture(PLAN_TIME, "http://127.0.0.1:1/unused", 20);
    // Token sets overlap 6-of-7 → similarity ≈ 0.857, over the 0.85 bar.
    let first_msg = "Hur blir vädret i Stockholm imorgon?";
    let second_msg = "Hur blir vädret i Stockholm imorgon då?";
    prefer_route(&fx.state, first_msg, 0.97, Route::Micro);

    let first = run_turn(&fx.state, input("s1", first_msg)).await.unwrap();
    assert_eq!(first.intent, "weather.lookup");
    assert_eq!(first.cache_tier, CacheTier::Miss);

    let second = run_turn(&fx.state, input("s2", second_msg)).await.unwrap();
    assert_eq!(second.intent, "weather.lookup");
    assert_eq!(second.cache_tier, CacheTier::L2);
    assert_eq!(fx.micro_calls.load(Ordering::SeqCst), 1);
}
