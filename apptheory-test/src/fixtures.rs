use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};

use apptheory_core::{
    auth_hook_fn, canonicalize_headers, drain_stream, event_bridge_pattern, event_bridge_rule,
    policy_hook_fn, App, CorsConfig, Error, Headers, LambdaContext, Limits, ObservabilityHooks,
    PolicyDecision, Query, Request, Response, SequenceIds,
};

use crate::registry;
use crate::ws::RecordingClientFactory;

/// One recorded scenario: app setup, a single input, and the expected
/// terminal response plus observability effects.
#[derive(Debug, Clone, Deserialize)]
pub struct Fixture {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub tier: String,
    #[serde(default)]
    pub setup: Setup,
    #[serde(default)]
    pub input: Input,
    #[serde(default)]
    pub expect: Expect,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Setup {
    pub routes: Vec<RouteSpec>,
    pub limits: Option<LimitsSpec>,
    pub cors: Option<CorsSpec>,
    pub middlewares: Vec<String>,
    pub sqs: Vec<QueueRouteSpec>,
    pub dynamodb: Vec<TableRouteSpec>,
    pub eventbridge: Vec<RuleRouteSpec>,
    pub websockets: Vec<SocketRouteSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteSpec {
    pub method: String,
    pub path: String,
    pub handler: String,
    #[serde(default)]
    pub auth_required: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LimitsSpec {
    pub max_request_bytes: usize,
    pub max_response_bytes: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CorsSpec {
    pub allowed_origins: Option<Vec<String>>,
    pub allow_credentials: bool,
    pub allow_headers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueRouteSpec {
    pub queue: String,
    pub handler: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableRouteSpec {
    pub table: String,
    pub handler: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuleRouteSpec {
    pub rule_name: String,
    pub source: String,
    pub detail_type: String,
    pub handler: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SocketRouteSpec {
    pub route_key: String,
    pub handler: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Input {
    pub request: Option<RequestSpec>,
    pub context: Option<ContextSpec>,
    pub aws_event: Option<AwsEventSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RequestSpec {
    pub method: String,
    pub path: String,
    pub query: Query,
    pub headers: BTreeMap<String, Value>,
    pub body: Option<BodySpec>,
    pub is_base64: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContextSpec {
    pub remaining_ms: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AwsEventSpec {
    #[serde(default)]
    pub source: String,
    pub event: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BodySpec {
    pub encoding: String,
    pub value: String,
}

impl BodySpec {
    pub fn decode(&self) -> Result<Bytes, String> {
        match self.encoding.as_str() {
            "utf8" => Ok(Bytes::from(self.value.clone())),
            "base64" => base64::engine::general_purpose::STANDARD
                .decode(&self.value)
                .map(Bytes::from)
                .map_err(|err| format!("invalid base64 body: {err}")),
            other => Err(format!("unknown body encoding {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Expect {
    pub response: Option<ResponseSpec>,
    pub logs: Vec<Value>,
    pub metrics: Vec<Value>,
    pub spans: Vec<Value>,
    pub output_json: Option<Value>,
    pub ws_calls: Vec<WsCallSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResponseSpec {
    pub status: u16,
    pub headers: BTreeMap<String, Value>,
    pub cookies: Vec<String>,
    pub is_base64: bool,
    pub body: Option<BodySpec>,
    pub body_json: Option<Value>,
    pub chunks: Vec<BodySpec>,
    pub stream_error_code: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WsCallSpec {
    pub op: String,
    pub endpoint: String,
    pub connection_id: String,
    pub data: Option<BodySpec>,
}

/// Load fixtures from tier-named directories, sorted by tier then id.
pub fn load_fixtures(root: &Path) -> Result<Vec<Fixture>, String> {
    const TIERS: &[&str] = &["p0", "p1", "p2", "m1", "m2", "m3", "m12", "m14"];

    let mut files: Vec<PathBuf> = Vec::new();
    for tier in TIERS {
        let dir = root.join(tier);
        if !dir.is_dir() {
            continue;
        }
        let mut tier_files: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|err| format!("read {}: {err}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        tier_files.sort();
        files.extend(tier_files);
    }

    if files.is_empty() {
        return Err("no fixtures found".to_string());
    }

    let mut fixtures = Vec::new();
    for file in files {
        let raw = std::fs::read_to_string(&file)
            .map_err(|err| format!("read {}: {err}", file.display()))?;
        let fixture: Fixture = serde_json::from_str(&raw)
            .map_err(|err| format!("parse {}: {err}", file.display()))?;
        if fixture.id.trim().is_empty() {
            return Err(format!("fixture {} missing id", file.display()));
        }
        fixtures.push(fixture);
    }
    fixtures.sort_by(|a, b| (tier_rank(&a.tier), &a.id).cmp(&(tier_rank(&b.tier), &b.id)));
    Ok(fixtures)
}

fn tier_rank(tier: &str) -> usize {
    match tier {
        "p0" => 0,
        "p1" => 1,
        "p2" => 2,
        "m1" => 3,
        "m2" => 4,
        "m3" => 5,
        "m12" => 6,
        "m14" => 7,
        _ => 8,
    }
}

#[derive(Default)]
struct RecordedEffects {
    logs: Mutex<Vec<Value>>,
    metrics: Mutex<Vec<Value>>,
    spans: Mutex<Vec<Value>>,
}

fn spec_headers(headers: &BTreeMap<String, Value>) -> Headers {
    let mut out = Headers::new();
    for (key, value) in headers {
        let values = match value {
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            Value::String(s) => vec![s.clone()],
            other => vec![other.to_string()],
        };
        out.insert(key.clone(), values);
    }
    out
}

fn fixture_auth_hook() -> apptheory_core::AuthHook {
    auth_hook_fn(|ctx| async move {
        let authorization = ctx.request().header("authorization");
        if authorization.trim().is_empty() {
            return Err(Error::unauthorized("unauthorized"));
        }
        if !ctx.request().header("x-force-forbidden").trim().is_empty() {
            return Err(Error::forbidden("forbidden"));
        }
        Ok("authorized".to_string())
    })
}

fn fixture_policy_hook() -> apptheory_core::PolicyHook {
    policy_hook_fn(|ctx| async move {
        let headers = &ctx.request().headers;
        let force_limit = apptheory_core::util::first_header_value(headers, "x-force-rate-limit");
        if !force_limit.trim().is_empty() {
            let mut extra = Headers::new();
            extra.insert("retry-after".to_string(), vec!["1".to_string()]);
            return Ok(Some(
                PolicyDecision::deny("app.rate_limited")
                    .with_message("rate limited")
                    .with_headers(extra),
            ));
        }
        let force_shed = apptheory_core::util::first_header_value(headers, "x-force-shed");
        if !force_shed.trim().is_empty() {
            let mut extra = Headers::new();
            extra.insert("retry-after".to_string(), vec!["1".to_string()]);
            return Ok(Some(
                PolicyDecision::deny("app.overloaded")
                    .with_message("overloaded")
                    .with_headers(extra),
            ));
        }
        Ok(None)
    })
}

fn capture_hooks(effects: Arc<RecordedEffects>) -> ObservabilityHooks {
    let logs = effects.clone();
    let metrics = effects.clone();
    let spans = effects;
    ObservabilityHooks::new()
        .on_log(move |record| {
            logs.logs.lock().unwrap().push(json!({
                "level": record.level,
                "event": record.event,
                "request_id": record.request_id,
                "tenant_id": record.tenant_id,
                "method": record.method,
                "path": record.path,
                "status": record.status,
                "error_code": record.error_code,
            }));
        })
        .on_metric(move |record| {
            metrics.metrics.lock().unwrap().push(json!({
                "name": record.name,
                "value": record.value,
                "tags": record.tags,
            }));
        })
        .on_span(move |record| {
            spans.spans.lock().unwrap().push(json!({
                "name": record.name,
                "attributes": record.attributes,
            }));
        })
}

fn build_http_app(
    fixture: &Fixture,
    tier: &str,
    effects: Arc<RecordedEffects>,
) -> Result<App, String> {
    let ids = SequenceIds::default();
    ids.push(&["req_test_123"]);

    let mut builder = apptheory_core::AppBuilder::new()
        .tier(tier)
        .ids(Arc::new(ids))
        .auth_hook(fixture_auth_hook());

    if let Some(limits) = &fixture.setup.limits {
        builder = builder.limits(Limits {
            max_request_bytes: limits.max_request_bytes,
            max_response_bytes: limits.max_response_bytes,
        });
    }
    if let Some(cors) = &fixture.setup.cors {
        builder = builder.cors(CorsConfig {
            allowed_origins: cors.allowed_origins.clone(),
            allow_credentials: cors.allow_credentials,
            allow_headers: cors.allow_headers.clone(),
        });
    }
    if tier == "p2" {
        builder = builder
            .policy_hook(fixture_policy_hook())
            .observability(capture_hooks(effects));
    }

    let mut app = builder.build();
    for name in &fixture.setup.middlewares {
        let middleware = registry::http_middleware(name)
            .ok_or_else(|| format!("unknown middleware {name:?}"))?;
        app.middleware(middleware);
    }
    for route in &fixture.setup.routes {
        let handler = registry::http_handler(&route.handler)
            .ok_or_else(|| format!("unknown handler {:?}", route.handler))?;
        if route.auth_required {
            app.handle_auth(&route.method, &route.path, handler);
        } else {
            app.handle(&route.method, &route.path, handler);
        }
    }
    Ok(app)
}

fn request_from_spec(spec: &RequestSpec) -> Result<Request, String> {
    let body = match &spec.body {
        Some(body) => body.decode()?,
        None => Bytes::new(),
    };
    Ok(Request {
        method: spec.method.clone(),
        path: spec.path.clone(),
        query: spec.query.clone(),
        headers: spec_headers(&spec.headers),
        cookies: BTreeMap::new(),
        body,
        is_base64: spec.is_base64,
    })
}

struct CanonicalOutcome {
    status: u16,
    headers: Headers,
    cookies: Vec<String>,
    body: Bytes,
    is_base64: bool,
    chunks: Vec<Bytes>,
    stream_error_code: String,
}

fn canonicalize_outcome(resp: Response) -> CanonicalOutcome {
    let streaming = resp.stream.is_some();
    let (resp, drained) = drain_stream(resp);
    CanonicalOutcome {
        status: resp.status,
        headers: canonicalize_headers(&resp.headers),
        cookies: resp.cookies,
        body: resp.body,
        is_base64: resp.is_base64,
        chunks: if streaming { drained.chunks } else { Vec::new() },
        stream_error_code: drained.error_code,
    }
}

fn canonical_from_apigw_v2(out: &Value) -> CanonicalOutcome {
    let is_base64 = out["isBase64Encoded"].as_bool().unwrap_or(false);
    let body_str = out["body"].as_str().unwrap_or_default();
    let body = if is_base64 {
        Bytes::from(
            base64::engine::general_purpose::STANDARD
                .decode(body_str)
                .unwrap_or_default(),
        )
    } else {
        Bytes::from(body_str.to_string())
    };

    let mut headers = Headers::new();
    if let Some(multi) = out["multiValueHeaders"].as_object().filter(|m| !m.is_empty()) {
        for (key, values) in multi {
            headers.insert(
                key.clone(),
                values
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .map(|v| v.as_str().unwrap_or_default().to_string())
                            .collect()
                    })
                    .unwrap_or_default(),
            );
        }
    } else if let Some(single) = out["headers"].as_object() {
        for (key, value) in single {
            headers.insert(key.clone(), vec![value.as_str().unwrap_or_default().to_string()]);
        }
    }

    let cookies = out["cookies"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|v| v.as_str().unwrap_or_default().to_string())
                .collect()
        })
        .unwrap_or_default();

    CanonicalOutcome {
        status: out["statusCode"].as_u64().unwrap_or(0) as u16,
        headers: canonicalize_headers(&headers),
        cookies,
        body,
        is_base64,
        chunks: Vec::new(),
        stream_error_code: String::new(),
    }
}

fn canonical_from_function_url(out: &Value) -> CanonicalOutcome {
    let is_base64 = out["isBase64Encoded"].as_bool().unwrap_or(false);
    let body_str = out["body"].as_str().unwrap_or_default();
    let body = if is_base64 {
        Bytes::from(
            base64::engine::general_purpose::STANDARD
                .decode(body_str)
                .unwrap_or_default(),
        )
    } else {
        Bytes::from(body_str.to_string())
    };

    let mut headers = Headers::new();
    if let Some(single) = out["headers"].as_object() {
        for (key, value) in single {
            headers.insert(key.clone(), vec![value.as_str().unwrap_or_default().to_string()]);
        }
    }

    let cookies = out["cookies"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|v| v.as_str().unwrap_or_default().to_string())
                .collect()
        })
        .unwrap_or_default();

    CanonicalOutcome {
        status: out["statusCode"].as_u64().unwrap_or(0) as u16,
        headers: canonicalize_headers(&headers),
        cookies,
        body,
        is_base64,
        chunks: Vec::new(),
        stream_error_code: String::new(),
    }
}

fn canonical_from_proxy(out: &Value) -> CanonicalOutcome {
    let mut canonical = canonical_from_apigw_v2(out);
    // Legacy proxy responses carry cookies in set-cookie headers.
    canonical.cookies = canonical
        .headers
        .remove("set-cookie")
        .unwrap_or_default();
    canonical
}

fn compare_outcome(
    fixture: &Fixture,
    actual: &CanonicalOutcome,
    effects: &RecordedEffects,
) -> Result<(), String> {
    let Some(expected) = &fixture.expect.response else {
        return Err("fixture missing expect.response".to_string());
    };

    if expected.status != actual.status {
        return Err(format!(
            "status: expected {}, got {}",
            expected.status, actual.status
        ));
    }
    if expected.is_base64 != actual.is_base64 {
        return Err("is_base64 mismatch".to_string());
    }
    if expected.cookies != actual.cookies {
        return Err(format!(
            "cookies mismatch: expected {:?}, got {:?}",
            expected.cookies, actual.cookies
        ));
    }

    let expected_headers = canonicalize_headers(&spec_headers(&expected.headers));
    if expected_headers != actual.headers {
        return Err(format!(
            "headers mismatch: expected {expected_headers:?}, got {:?}",
            actual.headers
        ));
    }

    if expected.stream_error_code != actual.stream_error_code {
        return Err(format!(
            "stream_error_code: expected {:?}, got {:?}",
            expected.stream_error_code, actual.stream_error_code
        ));
    }

    if let Some(body_json) = &expected.body_json {
        let actual_json: Value = serde_json::from_slice(&actual.body)
            .map_err(|err| format!("body is not JSON: {err}"))?;
        if *body_json != actual_json {
            return Err(format!(
                "body_json mismatch: expected {body_json}, got {actual_json}"
            ));
        }
    } else if !expected.chunks.is_empty() {
        let mut expected_chunks = Vec::new();
        for chunk in &expected.chunks {
            expected_chunks.push(chunk.decode()?);
        }
        if expected_chunks != actual.chunks {
            return Err("chunks mismatch".to_string());
        }
        let expected_body: Bytes = match &expected.body {
            Some(body) => body.decode()?,
            None => expected_chunks.concat().into(),
        };
        if expected_body != actual.body {
            return Err("body mismatch".to_string());
        }
    } else if let Some(body) = &expected.body {
        let expected_body = body.decode()?;
        if expected_body != actual.body {
            return Err(format!(
                "body mismatch: expected {:?}, got {:?}",
                String::from_utf8_lossy(&expected_body),
                String::from_utf8_lossy(&actual.body)
            ));
        }
    } else if !actual.body.is_empty() {
        return Err("body mismatch: expected empty body".to_string());
    }

    let actual_logs = effects.logs.lock().unwrap().clone();
    if fixture.expect.logs != actual_logs {
        return Err(format!(
            "logs mismatch: expected {:?}, got {actual_logs:?}",
            fixture.expect.logs
        ));
    }
    let actual_metrics = effects.metrics.lock().unwrap().clone();
    if fixture.expect.metrics != actual_metrics {
        return Err(format!(
            "metrics mismatch: expected {:?}, got {actual_metrics:?}",
            fixture.expect.metrics
        ));
    }
    let actual_spans = effects.spans.lock().unwrap().clone();
    if fixture.expect.spans != actual_spans {
        return Err(format!(
            "spans mismatch: expected {:?}, got {actual_spans:?}",
            fixture.expect.spans
        ));
    }

    Ok(())
}

async fn run_http_fixture(fixture: &Fixture, tier: &str) -> Result<(), String> {
    let effects = Arc::new(RecordedEffects::default());
    let app = build_http_app(fixture, tier, effects.clone())?;

    if let Some(aws_event) = &fixture.input.aws_event {
        let lambda = LambdaContext::default();
        let actual = match aws_event.source.trim().to_lowercase().as_str() {
            "apigw_v2" => canonical_from_apigw_v2(&app.serve_apigw_v2(&aws_event.event, &lambda).await),
            "lambda_function_url" => canonical_from_function_url(
                &app.serve_lambda_function_url(&aws_event.event, &lambda).await,
            ),
            "alb" | "apigw_proxy" => {
                canonical_from_proxy(&app.serve_alb(&aws_event.event, &lambda).await)
            }
            other => return Err(format!("unknown aws_event source {other:?}")),
        };
        return compare_outcome(fixture, &actual, &effects);
    }

    let Some(request_spec) = &fixture.input.request else {
        return Err("fixture missing input.request".to_string());
    };
    let request = request_from_spec(request_spec)?;
    let remaining_ms = fixture
        .input
        .context
        .as_ref()
        .map(|ctx| ctx.remaining_ms)
        .unwrap_or(0);

    let resp = app
        .serve(request, &LambdaContext::with_remaining_ms(remaining_ms))
        .await;
    let actual = canonicalize_outcome(resp);
    compare_outcome(fixture, &actual, &effects)
}

async fn run_event_fixture(fixture: &Fixture) -> Result<(), String> {
    let mut app = App::new("p0");
    for name in &fixture.setup.middlewares {
        let middleware = registry::event_middleware(name)
            .ok_or_else(|| format!("unknown event middleware {name:?}"))?;
        app.event_middleware(middleware);
    }
    for route in &fixture.setup.sqs {
        let handler = registry::record_handler(&route.handler)
            .ok_or_else(|| format!("unknown sqs handler {:?}", route.handler))?;
        app.sqs(&route.queue, handler);
    }
    for route in &fixture.setup.dynamodb {
        let handler = registry::record_handler(&route.handler)
            .ok_or_else(|| format!("unknown dynamodb handler {:?}", route.handler))?;
        app.dynamodb(&route.table, handler);
    }
    for route in &fixture.setup.eventbridge {
        let handler = registry::rule_handler(&route.handler)
            .ok_or_else(|| format!("unknown eventbridge handler {:?}", route.handler))?;
        let selector = if route.rule_name.trim().is_empty() {
            event_bridge_pattern(&route.source, &route.detail_type)
        } else {
            event_bridge_rule(&route.rule_name)
        };
        app.event_bridge(selector, handler);
    }

    let Some(aws_event) = &fixture.input.aws_event else {
        return Err("fixture missing input.aws_event".to_string());
    };
    let actual = app
        .handle_lambda(&aws_event.event, &LambdaContext::default())
        .await
        .map_err(|err| format!("handle_lambda failed: {err}"))?;

    let Some(expected) = &fixture.expect.output_json else {
        return Err("fixture missing expect.output_json".to_string());
    };
    if *expected != actual {
        return Err(format!("output_json mismatch: expected {expected}, got {actual}"));
    }
    Ok(())
}

async fn run_websocket_fixture(fixture: &Fixture) -> Result<(), String> {
    let factory = RecordingClientFactory::new();
    let mut app = apptheory_core::AppBuilder::new()
        .tier("p0")
        .websocket_client_factory(factory.factory())
        .build();
    for route in &fixture.setup.websockets {
        let handler = registry::websocket_handler(&route.handler)
            .ok_or_else(|| format!("unknown websocket handler {:?}", route.handler))?;
        app.websocket(&route.route_key, handler);
    }

    let Some(aws_event) = &fixture.input.aws_event else {
        return Err("fixture missing input.aws_event".to_string());
    };
    let out = app
        .serve_websocket(&aws_event.event, &LambdaContext::default())
        .await;
    let actual = canonical_from_proxy(&out);
    let effects = RecordedEffects::default();
    compare_outcome(fixture, &actual, &effects)?;

    let calls = factory.calls();
    let expected_calls = &fixture.expect.ws_calls;
    if expected_calls.len() != calls.len() {
        return Err(format!(
            "ws_calls length mismatch: expected {}, got {}",
            expected_calls.len(),
            calls.len()
        ));
    }
    for (idx, (expected, actual)) in expected_calls.iter().zip(calls.iter()).enumerate() {
        if expected.op.trim() != actual.op {
            return Err(format!("ws_calls[{idx}].op mismatch"));
        }
        let endpoint = expected.endpoint.trim();
        if !endpoint.is_empty() && endpoint != actual.endpoint {
            return Err(format!("ws_calls[{idx}].endpoint mismatch"));
        }
        if expected.connection_id.trim() != actual.connection_id {
            return Err(format!("ws_calls[{idx}].connection_id mismatch"));
        }
        match &expected.data {
            None => {
                if !actual.data.is_empty() {
                    return Err(format!("ws_calls[{idx}].data mismatch"));
                }
            }
            Some(body) => {
                if body.decode()?.as_ref() != actual.data.as_slice() {
                    return Err(format!("ws_calls[{idx}].data mismatch"));
                }
            }
        }
    }
    Ok(())
}

/// Replay one fixture against a freshly built app.
pub async fn run_fixture(fixture: &Fixture) -> Result<(), String> {
    match fixture.tier.trim().to_lowercase().as_str() {
        "p0" => run_http_fixture(fixture, "p0").await,
        "p1" | "m12" | "m14" => run_http_fixture(fixture, "p1").await,
        "p2" => run_http_fixture(fixture, "p2").await,
        "m1" => run_event_fixture(fixture).await,
        "m2" => run_websocket_fixture(fixture).await,
        "m3" => run_http_fixture(fixture, "p0").await,
        other => Err(format!("unknown tier {other:?}")),
    }
}

/// Load and replay every fixture under `root`, returning the pass count.
pub async fn run_fixture_dir(root: &Path) -> Result<usize, String> {
    let fixtures = load_fixtures(root)?;
    let mut failures = Vec::new();
    for fixture in &fixtures {
        if let Err(reason) = run_fixture(fixture).await {
            failures.push(format!("{}: {reason}", fixture.id));
        }
    }
    if !failures.is_empty() {
        return Err(failures.join("\n"));
    }
    Ok(fixtures.len())
}
