use std::sync::Arc;

use futures_util::FutureExt;
use serde::Deserialize;

use crate::clock::{Clock, SystemClock};
use crate::context::Context;
use crate::error::{error_response, Error, ErrorCode};
use crate::hooks::{
    AuthHook, LogRecord, MetricRecord, ObservabilityHooks, PolicyDecision, PolicyHook, SpanRecord,
};
use crate::ids::{IdGenerator, UuidIds};
use crate::middleware::{EventHandler, EventMiddleware, Handler, Middleware, Next};
use crate::request::{normalize_request, Request};
use crate::response::{normalize_response, Response};
use crate::router::{RouteMatch, Router};
use crate::socket::ManagementClientFactory;
use crate::util::{first_header_value, normalize_path, vary, Headers};

/// Progressive behavior level. Unknown or blank tiers normalize to the
/// fully observable tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    P0,
    P1,
    P2,
}

impl Tier {
    pub fn parse(value: &str) -> Tier {
        match value.trim().to_lowercase().as_str() {
            "p0" => Tier::P0,
            "p1" => Tier::P1,
            _ => Tier::P2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::P0 => "p0",
            Tier::P1 => "p1",
            Tier::P2 => "p2",
        }
    }

    fn at_least_p1(&self) -> bool {
        !matches!(self, Tier::P0)
    }

    fn is_p2(&self) -> bool {
        matches!(self, Tier::P2)
    }
}

/// Request/response byte limits; zero disables a limit.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_request_bytes: usize,
    pub max_response_bytes: usize,
}

/// CORS configuration. `allowed_origins: None` allows every origin; a
/// configured list matches the exact origin or a `"*"` entry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Option<Vec<String>>,
    pub allow_credentials: bool,
    pub allow_headers: Option<Vec<String>>,
}

/// Upstream invocation capabilities: the remaining execution budget, as
/// reported by the hosting runtime. Non-positive means unbounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct LambdaContext {
    pub remaining_ms: i64,
}

impl LambdaContext {
    pub fn with_remaining_ms(remaining_ms: i64) -> Self {
        Self { remaining_ms }
    }
}

/// Predicate a rule-event route uses to accept an event: a rule name
/// matched against the event's resources, or a (source, detail-type) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBridgeSelector {
    pub rule_name: String,
    pub source: String,
    pub detail_type: String,
}

impl EventBridgeSelector {
    pub fn is_empty(&self) -> bool {
        self.rule_name.trim().is_empty()
            && (self.source.trim().is_empty() || self.detail_type.trim().is_empty())
    }
}

/// Selector matching a configured rule name.
pub fn event_bridge_rule(rule_name: &str) -> EventBridgeSelector {
    EventBridgeSelector {
        rule_name: rule_name.trim().to_string(),
        ..Default::default()
    }
}

/// Selector matching a (source, detail-type) pair.
pub fn event_bridge_pattern(source: &str, detail_type: &str) -> EventBridgeSelector {
    EventBridgeSelector {
        source: source.trim().to_string(),
        detail_type: detail_type.trim().to_string(),
        ..Default::default()
    }
}

/// The application runtime: route table, middleware chains, hooks, limits,
/// and event-source routes. Immutable once serving begins; per-invocation
/// state lives in the [`Context`].
pub struct App {
    pub(crate) tier: Tier,
    pub(crate) router: Router,
    pub(crate) middlewares: Vec<Middleware>,
    pub(crate) event_middlewares: Vec<EventMiddleware>,
    pub(crate) sqs_routes: Vec<(String, EventHandler)>,
    pub(crate) dynamodb_routes: Vec<(String, EventHandler)>,
    pub(crate) kinesis_routes: Vec<(String, EventHandler)>,
    pub(crate) sns_routes: Vec<(String, EventHandler)>,
    pub(crate) eventbridge_routes: Vec<(EventBridgeSelector, EventHandler)>,
    pub(crate) websocket_routes: Vec<(String, Handler)>,
    pub(crate) limits: Limits,
    pub(crate) cors: Option<CorsConfig>,
    pub(crate) auth_hook: Option<AuthHook>,
    pub(crate) policy_hook: Option<PolicyHook>,
    pub(crate) observability: ObservabilityHooks,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) ws_client_factory: Option<ManagementClientFactory>,
}

/// Write-once construction surface for [`App`].
pub struct AppBuilder {
    tier: Tier,
    limits: Limits,
    cors: Option<CorsConfig>,
    auth_hook: Option<AuthHook>,
    policy_hook: Option<PolicyHook>,
    observability: ObservabilityHooks,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    ws_client_factory: Option<ManagementClientFactory>,
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self {
            tier: Tier::P2,
            limits: Limits::default(),
            cors: None,
            auth_hook: None,
            policy_hook: None,
            observability: ObservabilityHooks::default(),
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidIds),
            ws_client_factory: None,
        }
    }
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tier(mut self, tier: &str) -> Self {
        self.tier = Tier::parse(tier);
        self
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn cors(mut self, cors: CorsConfig) -> Self {
        self.cors = Some(cors);
        self
    }

    pub fn auth_hook(mut self, hook: AuthHook) -> Self {
        self.auth_hook = Some(hook);
        self
    }

    pub fn policy_hook(mut self, hook: PolicyHook) -> Self {
        self.policy_hook = Some(hook);
        self
    }

    pub fn observability(mut self, hooks: ObservabilityHooks) -> Self {
        self.observability = hooks;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn websocket_client_factory(mut self, factory: ManagementClientFactory) -> Self {
        self.ws_client_factory = Some(factory);
        self
    }

    pub fn build(self) -> App {
        App {
            tier: self.tier,
            router: Router::new(),
            middlewares: Vec::new(),
            event_middlewares: Vec::new(),
            sqs_routes: Vec::new(),
            dynamodb_routes: Vec::new(),
            kinesis_routes: Vec::new(),
            sns_routes: Vec::new(),
            eventbridge_routes: Vec::new(),
            websocket_routes: Vec::new(),
            limits: self.limits,
            cors: self.cors,
            auth_hook: self.auth_hook,
            policy_hook: self.policy_hook,
            observability: self.observability,
            clock: self.clock,
            ids: self.ids,
            ws_client_factory: self.ws_client_factory,
        }
    }
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    pub fn new(tier: &str) -> App {
        AppBuilder::new().tier(tier).build()
    }

    pub fn tier_name(&self) -> &'static str {
        self.tier.as_str()
    }

    /// Register a route. Unparseable patterns are ignored.
    pub fn handle(&mut self, method: &str, pattern: &str, handler: Handler) -> &mut Self {
        self.router.add(method, pattern, handler, false);
        self
    }

    /// Register a route behind the auth gate.
    pub fn handle_auth(&mut self, method: &str, pattern: &str, handler: Handler) -> &mut Self {
        self.router.add(method, pattern, handler, true);
        self
    }

    /// Register a route, failing on unparseable patterns.
    pub fn handle_strict(
        &mut self,
        method: &str,
        pattern: &str,
        handler: Handler,
        auth_required: bool,
    ) -> Result<(), Error> {
        self.router.add_strict(method, pattern, handler, auth_required)
    }

    pub fn get(&mut self, pattern: &str, handler: Handler) -> &mut Self {
        self.handle("GET", pattern, handler)
    }

    pub fn post(&mut self, pattern: &str, handler: Handler) -> &mut Self {
        self.handle("POST", pattern, handler)
    }

    pub fn put(&mut self, pattern: &str, handler: Handler) -> &mut Self {
        self.handle("PUT", pattern, handler)
    }

    pub fn delete(&mut self, pattern: &str, handler: Handler) -> &mut Self {
        self.handle("DELETE", pattern, handler)
    }

    /// Append an HTTP middleware to the chain.
    pub fn middleware(&mut self, middleware: Middleware) -> &mut Self {
        self.middlewares.push(middleware);
        self
    }

    /// Append an event middleware to the per-record chain.
    pub fn event_middleware(&mut self, middleware: EventMiddleware) -> &mut Self {
        self.event_middlewares.push(middleware);
        self
    }

    /// Route queue records by queue name. Blank names are ignored.
    pub fn sqs(&mut self, queue: &str, handler: EventHandler) -> &mut Self {
        let queue = queue.trim();
        if !queue.is_empty() {
            self.sqs_routes.push((queue.to_string(), handler));
        }
        self
    }

    /// Route table-stream records by table name. Blank names are ignored.
    pub fn dynamodb(&mut self, table: &str, handler: EventHandler) -> &mut Self {
        let table = table.trim();
        if !table.is_empty() {
            self.dynamodb_routes.push((table.to_string(), handler));
        }
        self
    }

    /// Route shard-stream records by stream name. Blank names are ignored.
    pub fn kinesis(&mut self, stream: &str, handler: EventHandler) -> &mut Self {
        let stream = stream.trim();
        if !stream.is_empty() {
            self.kinesis_routes.push((stream.to_string(), handler));
        }
        self
    }

    /// Route pub/sub events by topic name. Blank names are ignored.
    pub fn sns(&mut self, topic: &str, handler: EventHandler) -> &mut Self {
        let topic = topic.trim();
        if !topic.is_empty() {
            self.sns_routes.push((topic.to_string(), handler));
        }
        self
    }

    /// Route rule events by selector. Empty selectors are ignored.
    pub fn event_bridge(&mut self, selector: EventBridgeSelector, handler: EventHandler) -> &mut Self {
        if !selector.is_empty() {
            self.eventbridge_routes.push((selector, handler));
        }
        self
    }

    /// Route socket events by exact route key. Blank keys are ignored.
    pub fn websocket(&mut self, route_key: &str, handler: Handler) -> &mut Self {
        let route_key = route_key.trim();
        if !route_key.is_empty() {
            self.websocket_routes.push((route_key.to_string(), handler));
        }
        self
    }

    /// Serve one canonical request through the tiered pipeline.
    pub async fn serve(&self, request: Request, lambda: &LambdaContext) -> Response {
        let p1 = self.tier.at_least_p1();
        let p2 = self.tier.is_p2();

        let raw_method = request.method.trim().to_uppercase();
        let raw_path = normalize_path(&request.path);

        let normalized = match normalize_request(request) {
            Ok(req) => req,
            Err(err) => {
                let code = err.code.as_str().to_string();
                let resp = error_response(&err, "");
                self.record_raw(&raw_method, &raw_path, "", "", &resp, &code);
                return resp;
            }
        };

        let ctx = Context::new(normalized, self.clock.clone(), self.ids.clone());
        ctx.set_remaining_ms(lambda.remaining_ms);

        let mut request_id = String::new();
        let mut origin = String::new();

        if p1 {
            let inbound = ctx.request().header("x-request-id");
            request_id = if inbound.trim().is_empty() {
                self.ids.new_id()
            } else {
                inbound
            };
            ctx.set_request_id(request_id.clone());

            origin = ctx.request().header("origin");
            ctx.set_tenant_id(extract_tenant_id(ctx.request()));

            ctx.extend_trace(&["request_id", "recovery", "logging"]);
            if !origin.is_empty() {
                ctx.push_trace("cors");
            }

            // Preflight short-circuits before limits, policy, and routing.
            let requested_method = ctx.request().header("access-control-request-method");
            if ctx.request().method == "OPTIONS" && !requested_method.trim().is_empty() {
                let mut headers = Headers::new();
                headers.insert(
                    "access-control-allow-methods".to_string(),
                    vec![requested_method],
                );
                let resp = Response {
                    status: 204,
                    headers,
                    ..Default::default()
                };
                return self.finish(&ctx, resp, &request_id, &origin, "");
            }

            if self.limits.max_request_bytes > 0
                && ctx.request().body.len() > self.limits.max_request_bytes
            {
                let err = Error::too_large("request too large");
                return self.finish_error(&ctx, err, &request_id, &origin);
            }

            if p2 {
                if let Some(hook) = &self.policy_hook {
                    match catch_internal(hook(ctx.clone())).await {
                        Ok(Some(decision)) if !decision.code.trim().is_empty() => {
                            let err = policy_error(decision);
                            return self.finish_error(&ctx, err, &request_id, &origin);
                        }
                        Ok(_) => {}
                        Err(err) => {
                            return self.finish_error(&ctx, err, &request_id, &origin);
                        }
                    }
                }
            }
        }

        let (matched, allowed) = self
            .router
            .matches(&ctx.request().method, &ctx.request().path);
        let Some(matched) = matched else {
            let err = if allowed.is_empty() {
                Error::not_found("not found")
            } else {
                let mut headers = Headers::new();
                headers.insert(
                    "allow".to_string(),
                    vec![Router::format_allow_header(&allowed)],
                );
                Error::new(ErrorCode::MethodNotAllowed, "method not allowed").with_headers(headers)
            };
            return self.finish_error(&ctx, err, &request_id, &origin);
        };

        if let Err(err) = self.apply_auth_gate(&ctx, &matched, p1).await {
            return self.finish_error(&ctx, err, &request_id, &origin);
        }
        ctx.set_params(matched.params);
        if p1 {
            ctx.push_trace("handler");
        }

        let next = Next::new(self.middlewares.clone(), matched.handler);
        let resp = match catch_internal(next.run(ctx.clone())).await {
            Ok(resp) => normalize_response(resp),
            Err(err) => {
                return self.finish_error(&ctx, err, &request_id, &origin);
            }
        };

        if p1
            && self.limits.max_response_bytes > 0
            && resp.stream.is_none()
            && resp.body.len() > self.limits.max_response_bytes
        {
            let err = Error::too_large("response too large");
            return self.finish_error(&ctx, err, &request_id, &origin);
        }

        self.finish(&ctx, resp, &request_id, &origin, "")
    }

    async fn apply_auth_gate(
        &self,
        ctx: &Context,
        matched: &RouteMatch,
        p1: bool,
    ) -> Result<(), Error> {
        if !p1 || !matched.auth_required {
            return Ok(());
        }
        ctx.push_trace("auth");
        let Some(hook) = &self.auth_hook else {
            return Err(Error::unauthorized("unauthorized"));
        };
        let identity = catch_internal(hook(ctx.clone())).await?;
        if identity.trim().is_empty() {
            return Err(Error::unauthorized("unauthorized"));
        }
        ctx.set_auth_identity(identity);
        Ok(())
    }

    fn finish(
        &self,
        ctx: &Context,
        resp: Response,
        request_id: &str,
        origin: &str,
        error_code: &str,
    ) -> Response {
        let out = self.finalize(resp, request_id, origin);
        self.record_raw(
            &ctx.request().method,
            &ctx.request().path,
            &ctx.request_id(),
            &ctx.tenant_id(),
            &out,
            error_code,
        );
        out
    }

    fn finish_error(
        &self,
        ctx: &Context,
        err: Error,
        request_id: &str,
        origin: &str,
    ) -> Response {
        let code = err.code.as_str().to_string();
        let resp = error_response(&err, request_id);
        self.finish(ctx, resp, request_id, origin, &code)
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        let Some(cors) = &self.cors else {
            return true;
        };
        match &cors.allowed_origins {
            None => true,
            Some(list) => list.iter().any(|o| o == "*" || o == origin),
        }
    }

    fn finalize(&self, resp: Response, request_id: &str, origin: &str) -> Response {
        let mut resp = normalize_response(resp);
        if !self.tier.at_least_p1() {
            return resp;
        }

        if !request_id.is_empty() {
            resp.headers
                .insert("x-request-id".to_string(), vec![request_id.to_string()]);
        }

        if !origin.is_empty() && self.origin_allowed(origin) {
            resp.headers.insert(
                "access-control-allow-origin".to_string(),
                vec![origin.to_string()],
            );
            let existing = resp.headers.get("vary").cloned().unwrap_or_default();
            resp.headers.insert("vary".to_string(), vary(&existing, &["origin"]));

            if let Some(cors) = &self.cors {
                if cors.allow_credentials {
                    resp.headers.insert(
                        "access-control-allow-credentials".to_string(),
                        vec!["true".to_string()],
                    );
                }
                if let Some(allow_headers) = &cors.allow_headers {
                    let joined = allow_headers
                        .iter()
                        .map(|h| h.trim())
                        .filter(|h| !h.is_empty())
                        .collect::<Vec<_>>()
                        .join(", ");
                    if !joined.is_empty() {
                        resp.headers.insert(
                            "access-control-allow-headers".to_string(),
                            vec![joined],
                        );
                    }
                }
            }
        }

        resp
    }

    fn record_raw(
        &self,
        method: &str,
        path: &str,
        request_id: &str,
        tenant_id: &str,
        resp: &Response,
        error_code: &str,
    ) {
        if !self.tier.is_p2() {
            return;
        }

        let level = if resp.status >= 500 {
            "error"
        } else if resp.status >= 400 {
            "warn"
        } else {
            "info"
        };
        tracing::debug!(method, path, status = resp.status, error_code, "request completed");

        if let Some(log) = &self.observability.log {
            log(LogRecord {
                level: level.to_string(),
                event: "request.completed".to_string(),
                request_id: request_id.to_string(),
                tenant_id: tenant_id.to_string(),
                method: method.to_string(),
                path: path.to_string(),
                status: resp.status,
                error_code: error_code.to_string(),
            });
        }

        if let Some(metric) = &self.observability.metric {
            let mut tags = std::collections::BTreeMap::new();
            tags.insert("method".to_string(), method.to_string());
            tags.insert("path".to_string(), path.to_string());
            tags.insert("status".to_string(), resp.status.to_string());
            tags.insert("error_code".to_string(), error_code.to_string());
            tags.insert("tenant_id".to_string(), tenant_id.to_string());
            metric(MetricRecord {
                name: "apptheory.request".to_string(),
                value: 1,
                tags,
            });
        }

        if let Some(span) = &self.observability.span {
            let mut attributes = std::collections::BTreeMap::new();
            attributes.insert("http.method".to_string(), method.to_string());
            attributes.insert("http.route".to_string(), path.to_string());
            attributes.insert("http.status_code".to_string(), resp.status.to_string());
            attributes.insert("request.id".to_string(), request_id.to_string());
            attributes.insert("tenant.id".to_string(), tenant_id.to_string());
            attributes.insert("error.code".to_string(), error_code.to_string());
            span(SpanRecord {
                name: format!("http {method} {path}"),
                attributes,
            });
        }
    }
}

fn extract_tenant_id(request: &Request) -> String {
    let tenant = first_header_value(&request.headers, "x-tenant-id");
    if !tenant.is_empty() {
        return tenant;
    }
    request
        .query
        .get("tenant")
        .and_then(|values| values.first())
        .cloned()
        .unwrap_or_default()
}

fn policy_error(decision: PolicyDecision) -> Error {
    let code = decision.code.trim().to_string();
    let message = if decision.message.trim().is_empty() {
        PolicyDecision::default_message(&code).to_string()
    } else {
        decision.message
    };
    Error::new(ErrorCode::from_code(&code), message).with_headers(decision.headers)
}

/// Await a fallible future, mapping panics to `app.internal`.
pub(crate) async fn catch_internal<T>(
    fut: impl std::future::Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err(Error::internal("internal error")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{auth_hook_fn, policy_hook_fn};
    use crate::middleware::handler_fn;
    use crate::response::text;
    use serde_json::Value;

    fn ok_handler() -> Handler {
        handler_fn(|_ctx| async { Ok(text(200, "ok")) })
    }

    fn request(method: &str, path: &str) -> Request {
        Request::new(method, path)
    }

    fn header_request(method: &str, path: &str, pairs: &[(&str, &str)]) -> Request {
        let mut headers = Headers::new();
        for (key, value) in pairs {
            headers
                .entry(key.to_string())
                .or_default()
                .push(value.to_string());
        }
        Request::new(method, path).with_headers(headers)
    }

    #[test]
    fn tier_normalizes_unknown_to_p2() {
        assert_eq!(Tier::parse("p0"), Tier::P0);
        assert_eq!(Tier::parse(" P1 "), Tier::P1);
        assert_eq!(Tier::parse(""), Tier::P2);
        assert_eq!(Tier::parse("nope"), Tier::P2);
    }

    #[tokio::test]
    async fn p0_serves_plain_route() {
        let mut app = App::new("p0");
        app.get("/ping", handler_fn(|_ctx| async { Ok(text(200, "pong")) }));
        let resp = app.serve(request("GET", "/ping"), &LambdaContext::default()).await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body.as_ref(), b"pong");
        assert!(!resp.headers.contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn p0_routing_errors() {
        let mut app = App::new("p0");
        app.get("/", ok_handler());

        let missing = app.serve(request("GET", "/missing"), &LambdaContext::default()).await;
        assert_eq!(missing.status, 404);

        let wrong_method = app.serve(request("POST", "/"), &LambdaContext::default()).await;
        assert_eq!(wrong_method.status, 405);
        assert_eq!(wrong_method.headers.get("allow"), Some(&vec!["GET".to_string()]));
    }

    #[tokio::test]
    async fn taxonomy_errors_render_with_code() {
        let mut app = App::new("p0");
        app.get(
            "/conflict",
            handler_fn(|_ctx| async { Err(Error::conflict("conflict")) }),
        );
        let resp = app.serve(request("GET", "/conflict"), &LambdaContext::default()).await;
        assert_eq!(resp.status, 409);
        let body: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["error"]["code"], "app.conflict");
    }

    #[tokio::test]
    async fn handler_panic_maps_to_internal() {
        let mut app = App::new("p0");
        app.get("/boom", handler_fn(|_ctx| async { panic!("boom") }));
        let resp = app.serve(request("GET", "/boom"), &LambdaContext::default()).await;
        assert_eq!(resp.status, 500);
        let body: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["error"]["code"], "app.internal");
    }

    #[tokio::test]
    async fn p1_sets_request_id_from_header_or_mints() {
        let ids = std::sync::Arc::new(crate::ids::SequenceIds::new("req", 1));
        let mut app = App::builder().tier("p1").ids(ids).build();
        app.get("/", ok_handler());

        let resp = app
            .serve(
                header_request("GET", "/", &[("x-request-id", "req_inbound")]),
                &LambdaContext::default(),
            )
            .await;
        assert_eq!(resp.headers.get("x-request-id"), Some(&vec!["req_inbound".to_string()]));

        let resp = app.serve(request("GET", "/"), &LambdaContext::default()).await;
        assert_eq!(resp.headers.get("x-request-id"), Some(&vec!["req-1".to_string()]));
    }

    #[tokio::test]
    async fn p1_cors_preflight_short_circuits() {
        let mut app = App::builder()
            .tier("p1")
            .ids(std::sync::Arc::new(crate::ids::SequenceIds::new("req_test_123", 1)))
            .build();
        app.get("/anything", ok_handler());

        let resp = app
            .serve(
                header_request(
                    "OPTIONS",
                    "/anything",
                    &[
                        ("origin", "https://x.test"),
                        ("access-control-request-method", "GET"),
                    ],
                ),
                &LambdaContext::default(),
            )
            .await;
        assert_eq!(resp.status, 204);
        assert_eq!(
            resp.headers.get("access-control-allow-methods"),
            Some(&vec!["GET".to_string()])
        );
        assert_eq!(
            resp.headers.get("access-control-allow-origin"),
            Some(&vec!["https://x.test".to_string()])
        );
        assert_eq!(resp.headers.get("vary"), Some(&vec!["origin".to_string()]));
        assert!(resp.headers.contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn p1_gated_cors_blocks_unlisted_origin() {
        let mut app = App::builder()
            .tier("p1")
            .cors(CorsConfig {
                allowed_origins: Some(vec!["https://allowed.test".to_string()]),
                ..Default::default()
            })
            .build();
        app.get("/", ok_handler());

        let resp = app
            .serve(
                header_request("GET", "/", &[("origin", "https://evil.test")]),
                &LambdaContext::default(),
            )
            .await;
        assert!(!resp.headers.contains_key("access-control-allow-origin"));

        let resp = app
            .serve(
                header_request("GET", "/", &[("origin", "https://allowed.test")]),
                &LambdaContext::default(),
            )
            .await;
        assert_eq!(
            resp.headers.get("access-control-allow-origin"),
            Some(&vec!["https://allowed.test".to_string()])
        );
    }

    #[tokio::test]
    async fn p1_request_and_response_limits() {
        let mut app = App::builder()
            .tier("p1")
            .limits(Limits {
                max_request_bytes: 1,
                max_response_bytes: 0,
            })
            .build();
        app.post("/", ok_handler());
        let resp = app
            .serve(request("POST", "/").with_body("ab"), &LambdaContext::default())
            .await;
        assert_eq!(resp.status, 413);

        let mut app = App::builder()
            .tier("p1")
            .limits(Limits {
                max_request_bytes: 0,
                max_response_bytes: 1,
            })
            .build();
        app.get("/", handler_fn(|_ctx| async { Ok(text(200, "ab")) }));
        let resp = app.serve(request("GET", "/"), &LambdaContext::default()).await;
        assert_eq!(resp.status, 413);
    }

    #[tokio::test]
    async fn auth_gate_requires_identity() {
        let mut app = App::new("p2");
        app.handle_auth("GET", "/secure", ok_handler());
        let resp = app.serve(request("GET", "/secure"), &LambdaContext::default()).await;
        assert_eq!(resp.status, 401);

        let mut app = App::builder()
            .tier("p2")
            .auth_hook(auth_hook_fn(|_ctx| async { Ok("  ".to_string()) }))
            .build();
        app.handle_auth("GET", "/secure", ok_handler());
        let resp = app.serve(request("GET", "/secure"), &LambdaContext::default()).await;
        assert_eq!(resp.status, 401);

        let mut app = App::builder()
            .tier("p2")
            .auth_hook(auth_hook_fn(|_ctx| async { Ok("user_1".to_string()) }))
            .build();
        app.handle_auth("GET", "/secure", ok_handler());
        let resp = app.serve(request("GET", "/secure"), &LambdaContext::default()).await;
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn auth_hook_taxonomy_errors_propagate() {
        let mut app = App::builder()
            .tier("p2")
            .auth_hook(auth_hook_fn(|_ctx| async { Err(Error::forbidden("forbidden")) }))
            .build();
        app.handle_auth("GET", "/secure", ok_handler());
        let resp = app.serve(request("GET", "/secure"), &LambdaContext::default()).await;
        assert_eq!(resp.status, 403);
    }

    #[tokio::test]
    async fn policy_decision_short_circuits_with_default_message() {
        let mut app = App::builder()
            .tier("p2")
            .policy_hook(policy_hook_fn(|_ctx| async {
                Ok(Some(PolicyDecision::deny("app.rate_limited")))
            }))
            .build();
        app.get("/", ok_handler());
        let resp = app.serve(request("GET", "/"), &LambdaContext::default()).await;
        assert_eq!(resp.status, 429);
        let body: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["error"]["code"], "app.rate_limited");
        assert_eq!(body["error"]["message"], "rate limited");
    }

    #[tokio::test]
    async fn policy_decision_headers_merge() {
        let mut headers = Headers::new();
        headers.insert("retry-after".into(), vec!["1".into()]);
        let decision = PolicyDecision::deny("app.overloaded").with_headers(headers);
        let mut app = App::builder()
            .tier("p2")
            .policy_hook(policy_hook_fn(move |_ctx| {
                let decision = decision.clone();
                async move { Ok(Some(decision)) }
            }))
            .build();
        app.get("/", ok_handler());
        let resp = app.serve(request("GET", "/"), &LambdaContext::default()).await;
        assert_eq!(resp.status, 503);
        assert_eq!(resp.headers.get("retry-after"), Some(&vec!["1".to_string()]));
    }

    #[tokio::test]
    async fn policy_hook_error_propagates() {
        let mut app = App::builder()
            .tier("p2")
            .policy_hook(policy_hook_fn(|_ctx| async {
                Err(Error::overloaded("nope"))
            }))
            .build();
        app.get("/", ok_handler());
        let resp = app.serve(request("GET", "/"), &LambdaContext::default()).await;
        assert_eq!(resp.status, 503);
    }

    #[tokio::test]
    async fn p2_records_observability_effects_once() {
        let logs = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let metrics = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let spans = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let (l, m, s) = (logs.clone(), metrics.clone(), spans.clone());

        let hooks = ObservabilityHooks::new()
            .on_log(move |record| l.lock().unwrap().push(record))
            .on_metric(move |record| m.lock().unwrap().push(record))
            .on_span(move |record| s.lock().unwrap().push(record));

        let mut app = App::builder()
            .tier("p2")
            .ids(std::sync::Arc::new(crate::ids::SequenceIds::new("req", 1)))
            .policy_hook(policy_hook_fn(|_ctx| async {
                Ok(Some(PolicyDecision::deny("app.rate_limited")))
            }))
            .observability(hooks)
            .build();
        app.get("/", ok_handler());

        let resp = app.serve(request("GET", "/"), &LambdaContext::default()).await;
        assert_eq!(resp.status, 429);

        let logs = logs.lock().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, "warn");
        assert_eq!(logs[0].event, "request.completed");
        assert_eq!(logs[0].error_code, "app.rate_limited");

        let metrics = metrics.lock().unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].name, "apptheory.request");
        assert_eq!(metrics[0].value, 1);
        assert_eq!(
            metrics[0].tags.get("error_code"),
            Some(&"app.rate_limited".to_string())
        );

        let spans = spans.lock().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "http GET /");
        assert_eq!(
            spans[0].attributes.get("http.status_code"),
            Some(&"429".to_string())
        );
    }

    #[tokio::test]
    async fn remaining_ms_reaches_the_context() {
        let mut app = App::new("p2");
        app.get(
            "/",
            handler_fn(|ctx| async move {
                Ok(text(200, ctx.remaining_ms().to_string()))
            }),
        );
        let resp = app
            .serve(request("GET", "/"), &LambdaContext::with_remaining_ms(1234))
            .await;
        assert_eq!(resp.body.as_ref(), b"1234");
    }

    #[tokio::test]
    async fn middleware_trace_is_visible_to_handlers() {
        let mut app = App::builder()
            .tier("p1")
            .auth_hook(auth_hook_fn(|_ctx| async { Ok("user".to_string()) }))
            .build();
        app.middleware(crate::middleware::middleware_fn(|ctx: Context, next: Next| async move {
            ctx.push_trace("mw_a");
            next.run(ctx).await
        }));
        app.handle_auth(
            "GET",
            "/secure",
            handler_fn(|ctx| async move {
                Ok(crate::response::json(
                    200,
                    &serde_json::json!({ "trace": ctx.middleware_trace() }),
                ))
            }),
        );

        let resp = app.serve(request("GET", "/secure"), &LambdaContext::default()).await;
        let body: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(
            body["trace"],
            serde_json::json!(["request_id", "recovery", "logging", "auth", "handler", "mw_a"])
        );
    }

    #[tokio::test]
    async fn streaming_responses_skip_the_response_limit() {
        let mut app = App::builder()
            .tier("p1")
            .limits(Limits {
                max_request_bytes: 0,
                max_response_bytes: 1,
            })
            .build();
        app.get(
            "/",
            handler_fn(|_ctx| async {
                let chunks: Vec<Result<bytes::Bytes, Error>> =
                    vec![Ok(bytes::Bytes::from_static(b"abcdef"))];
                Ok(text(200, "").with_stream(Box::new(chunks.into_iter())))
            }),
        );
        let resp = app.serve(request("GET", "/"), &LambdaContext::default()).await;
        assert_eq!(resp.status, 200);
        assert!(resp.stream.is_some());
    }
}
