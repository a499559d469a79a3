use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::context::{Context, EventContext};
use crate::error::Error;
use crate::response::Response;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response, Error>> + Send>>;

/// Terminal request handler.
pub type Handler = Arc<dyn Fn(Context) -> HandlerFuture + Send + Sync>;

/// HTTP middleware: receives the context and the rest of the chain.
pub type Middleware = Arc<dyn Fn(Context, Next) -> HandlerFuture + Send + Sync>;

/// Box an async closure into a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Error>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Box an async closure into a [`Middleware`].
pub fn middleware_fn<F, Fut>(f: F) -> Middleware
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Error>> + Send + 'static,
{
    Arc::new(move |ctx, next| Box::pin(f(ctx, next)))
}

/// The remainder of a middleware chain plus its terminal handler.
///
/// `run` executes the next middleware in order, or the handler once the
/// chain is exhausted. Composition is plain nesting: `m1(ctx, m2(ctx, ...
/// h))` with no dependence on any particular continuation mechanism.
pub struct Next {
    middlewares: Arc<[Middleware]>,
    endpoint: Handler,
}

impl Next {
    pub fn new(middlewares: Vec<Middleware>, endpoint: Handler) -> Self {
        Self {
            middlewares: middlewares.into(),
            endpoint,
        }
    }

    pub fn run(self, ctx: Context) -> HandlerFuture {
        match self.middlewares.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    middlewares: rest.to_vec().into(),
                    endpoint: self.endpoint.clone(),
                };
                head(ctx, next)
            }
            None => (self.endpoint)(ctx),
        }
    }
}

pub type EventFuture = Pin<Box<dyn Future<Output = Result<Value, Error>> + Send>>;

/// Terminal event handler. Record handlers return `Value::Null`; rule and
/// pub/sub handlers return a value that is passed through to the caller.
pub type EventHandler = Arc<dyn Fn(EventContext, Value) -> EventFuture + Send + Sync>;

/// Event middleware: the event is already in scope, so `next` is zero-arg.
pub type EventMiddleware = Arc<dyn Fn(EventContext, Value, EventNext) -> EventFuture + Send + Sync>;

/// Box an async closure into an [`EventHandler`].
pub fn event_handler_fn<F, Fut>(f: F) -> EventHandler
where
    F: Fn(EventContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, Error>> + Send + 'static,
{
    Arc::new(move |ctx, event| Box::pin(f(ctx, event)))
}

/// Box an async closure into an [`EventMiddleware`].
pub fn event_middleware_fn<F, Fut>(f: F) -> EventMiddleware
where
    F: Fn(EventContext, Value, EventNext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, Error>> + Send + 'static,
{
    Arc::new(move |ctx, event, next| Box::pin(f(ctx, event, next)))
}

/// Zero-arg continuation for event middleware chains.
pub struct EventNext {
    ctx: EventContext,
    event: Value,
    middlewares: Arc<[EventMiddleware]>,
    endpoint: EventHandler,
}

impl EventNext {
    pub fn new(
        ctx: EventContext,
        event: Value,
        middlewares: Vec<EventMiddleware>,
        endpoint: EventHandler,
    ) -> Self {
        Self {
            ctx,
            event,
            middlewares: middlewares.into(),
            endpoint,
        }
    }

    pub fn run(self) -> EventFuture {
        match self.middlewares.split_first() {
            Some((head, rest)) => {
                let next = EventNext {
                    ctx: self.ctx.clone(),
                    event: self.event.clone(),
                    middlewares: rest.to_vec().into(),
                    endpoint: self.endpoint.clone(),
                };
                head(self.ctx, self.event, next)
            }
            None => (self.endpoint)(self.ctx, self.event),
        }
    }
}

/// Timeout middleware configuration. A zero default budget normalizes to
/// 30 seconds; a blank message normalizes to `"request timeout"`.
/// Operation overrides key on `"<METHOD>:<path>"`.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub default_timeout_ms: i64,
    pub operation_timeouts_ms: HashMap<String, i64>,
    pub tenant_timeouts_ms: HashMap<String, i64>,
    pub timeout_message: String,
}

fn normalize_timeout_config(config: TimeoutConfig) -> TimeoutConfig {
    let default_timeout_ms = if config.default_timeout_ms == 0 {
        30_000
    } else {
        config.default_timeout_ms
    };
    let timeout_message = {
        let trimmed = config.timeout_message.trim();
        if trimmed.is_empty() {
            "request timeout".to_string()
        } else {
            trimmed.to_string()
        }
    };
    TimeoutConfig {
        default_timeout_ms,
        operation_timeouts_ms: config.operation_timeouts_ms,
        tenant_timeouts_ms: config.tenant_timeouts_ms,
        timeout_message,
    }
}

/// Effective budget: the minimum of the default, the tenant override, the
/// operation override, and `remaining_ms` when positive.
fn timeout_for_context(ctx: &Context, config: &TimeoutConfig) -> i64 {
    let mut timeout_ms = config.default_timeout_ms;

    let tenant = ctx.tenant_id();
    let tenant = tenant.trim();
    if !tenant.is_empty() {
        if let Some(override_ms) = config.tenant_timeouts_ms.get(tenant) {
            timeout_ms = timeout_ms.min(*override_ms);
        }
    }

    let request = ctx.request();
    let op_key = format!("{}:{}", request.method.trim().to_uppercase(), {
        let path = request.path.trim();
        if path.is_empty() {
            "/"
        } else {
            path
        }
    });
    if let Some(override_ms) = config.operation_timeouts_ms.get(&op_key) {
        timeout_ms = timeout_ms.min(*override_ms);
    }

    let remaining_ms = ctx.remaining_ms();
    if remaining_ms > 0 {
        timeout_ms = timeout_ms.min(remaining_ms);
    }

    timeout_ms
}

/// Run the downstream under a deadline in its own task.
///
/// Crossing the deadline aborts the task and raises `app.timeout`; nothing
/// the downstream does after the abort is observable. An in-budget error
/// propagates unchanged.
pub fn timeout_middleware(config: TimeoutConfig) -> Middleware {
    let config = Arc::new(normalize_timeout_config(config));
    Arc::new(move |ctx, next| {
        let config = config.clone();
        Box::pin(async move {
            let budget_ms = timeout_for_context(&ctx, &config);
            if budget_ms <= 0 {
                return next.run(ctx).await;
            }

            let mut task = tokio::spawn(next.run(ctx));
            tokio::select! {
                joined = &mut task => match joined {
                    Ok(result) => result,
                    Err(_) => Err(Error::internal("internal error")),
                },
                _ = tokio::time::sleep(Duration::from_millis(budget_ms as u64)) => {
                    task.abort();
                    tracing::warn!(budget_ms, "request exceeded timeout budget");
                    Err(Error::timeout(config.timeout_message.clone()))
                }
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::request::Request;
    use crate::response::text;

    fn ok_handler() -> Handler {
        handler_fn(|_ctx| async { Ok(text(200, "ok")) })
    }

    #[tokio::test]
    async fn chain_runs_in_registration_order() {
        let trace_mw = |name: &'static str| {
            middleware_fn(move |ctx: Context, next: Next| async move {
                ctx.push_trace(name);
                next.run(ctx).await
            })
        };
        let ctx = Context::for_request(Request::new("GET", "/"));
        let next = Next::new(vec![trace_mw("m1"), trace_mw("m2")], ok_handler());
        let resp = next.run(ctx.clone()).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(ctx.middleware_trace(), vec!["m1".to_string(), "m2".to_string()]);
    }

    #[tokio::test]
    async fn middleware_can_short_circuit() {
        let blocker = middleware_fn(|_ctx, _next| async { Err(Error::forbidden("nope")) });
        let ctx = Context::for_request(Request::new("GET", "/"));
        let next = Next::new(vec![blocker], ok_handler());
        let err = next.run(ctx).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Forbidden);
    }

    #[test]
    fn normalize_timeout_config_applies_defaults() {
        let cfg = normalize_timeout_config(TimeoutConfig {
            timeout_message: "  ".into(),
            ..Default::default()
        });
        assert_eq!(cfg.default_timeout_ms, 30_000);
        assert_eq!(cfg.timeout_message, "request timeout");
    }

    #[test]
    fn budget_is_the_minimum_of_all_bounds() {
        let ctx = Context::for_request(Request::new("get", "/p"));
        ctx.set_tenant_id("t1");
        ctx.set_remaining_ms(5);

        let cfg = normalize_timeout_config(TimeoutConfig {
            default_timeout_ms: 100,
            tenant_timeouts_ms: HashMap::from([("t1".to_string(), 50)]),
            operation_timeouts_ms: HashMap::from([("GET:/p".to_string(), 20)]),
            ..Default::default()
        });
        assert_eq!(timeout_for_context(&ctx, &cfg), 5);
    }

    #[tokio::test]
    async fn timeout_raises_app_timeout() {
        let slow = handler_fn(|_ctx| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(text(200, "late"))
        });
        let mw = timeout_middleware(TimeoutConfig {
            default_timeout_ms: 10,
            timeout_message: "too slow".into(),
            ..Default::default()
        });
        let ctx = Context::for_request(Request::new("GET", "/"));
        let next = Next::new(Vec::new(), slow);
        let err = mw(ctx, next).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
        assert_eq!(err.message, "too slow");
    }

    #[tokio::test]
    async fn in_budget_errors_propagate_unchanged() {
        let failing = handler_fn(|_ctx| async { Err(Error::conflict("conflict")) });
        let mw = timeout_middleware(TimeoutConfig {
            default_timeout_ms: 1_000,
            ..Default::default()
        });
        let ctx = Context::for_request(Request::new("GET", "/"));
        let err = mw(ctx, Next::new(Vec::new(), failing)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Conflict);
    }

    #[tokio::test]
    async fn non_positive_budget_forwards_unchanged() {
        let mw = timeout_middleware(TimeoutConfig {
            default_timeout_ms: -1,
            ..Default::default()
        });
        let ctx = Context::for_request(Request::new("GET", "/"));
        let resp = mw(ctx, Next::new(Vec::new(), ok_handler())).await.unwrap();
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn event_chain_runs_in_order_with_zero_arg_next() {
        use std::sync::Arc as StdArc;
        let clock = StdArc::new(crate::clock::SystemClock);
        let ids = StdArc::new(crate::ids::UuidIds);
        let ctx = EventContext::new(clock, ids, "", 0);

        let mw_a = event_middleware_fn(|ctx: EventContext, _event, next: EventNext| async move {
            ctx.set("trace", Value::from(vec!["evt_mw_a"]));
            next.run().await
        });
        let mw_b = event_middleware_fn(|ctx: EventContext, _event, next: EventNext| async move {
            let mut trace: Vec<String> = ctx
                .get("trace")
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default();
            trace.push("evt_mw_b".to_string());
            ctx.set("trace", serde_json::to_value(trace).unwrap());
            next.run().await
        });
        let handler = event_handler_fn(|ctx: EventContext, _event| async move {
            Ok(ctx.get("trace").unwrap_or(Value::Null))
        });

        let next = EventNext::new(ctx, Value::Null, vec![mw_a, mw_b], handler);
        let out = next.run().await.unwrap();
        assert_eq!(out, serde_json::json!(["evt_mw_a", "evt_mw_b"]));
    }
}
