//! AppTheory core runtime.
//!
//! Mediates between cloud event sources (HTTP-style gateways, queue and
//! stream triggers, pub/sub, and socket gateways) and user-written
//! handlers: every invocation goes through canonicalization, routing, the
//! middleware chain, and response normalization, producing a deterministic
//! canonical request/response pair plus a fixed set of observability
//! effects regardless of which upstream shape delivered the event.

pub mod app;
pub mod clock;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod gateway;
pub mod hooks;
pub mod ids;
pub mod middleware;
pub mod request;
pub mod response;
pub mod router;
pub mod socket;
pub mod sse;
pub mod util;

pub use app::{
    event_bridge_pattern, event_bridge_rule, App, AppBuilder, CorsConfig, EventBridgeSelector,
    LambdaContext, Limits, Tier,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{init_tracing, AppConfig};
pub use context::{Context, EventContext};
pub use error::{error_response, Error, ErrorCode};
pub use hooks::{
    auth_hook_fn, policy_hook_fn, AuthHook, LogRecord, MetricRecord, ObservabilityHooks,
    PolicyDecision, PolicyHook, SpanRecord,
};
pub use ids::{IdGenerator, SequenceIds, UuidIds};
pub use middleware::{
    event_handler_fn, event_middleware_fn, handler_fn, middleware_fn, timeout_middleware,
    EventHandler, EventMiddleware, EventNext, Handler, Middleware, Next, TimeoutConfig,
};
pub use request::{normalize_request, Request};
pub use response::{
    binary, drain_stream, html, html_stream, json, normalize_response, safe_json_for_html, text,
    ByteStream, DrainedStream, Response,
};
pub use router::{RouteMatch, Router};
pub use socket::{
    management_endpoint, normalize_endpoint, ManagementClient, ManagementClientFactory,
    WebSocketContext,
};
pub use sse::{format_sse_event, sse, sse_event_stream, SseEvent};
pub use util::{canonicalize_headers, normalize_path, parse_cookies, vary, Headers, Query};
