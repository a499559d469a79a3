use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use apptheory_core::{
    App, AppBuilder, LambdaContext, ManualClock, Request, Response, SequenceIds,
};

/// Deterministic test environment: a pinned clock and a sequential id
/// source, pre-wired into app builders.
#[derive(Clone)]
pub struct TestEnv {
    pub clock: ManualClock,
    pub ids: SequenceIds,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            clock: ManualClock::epoch(),
            ids: SequenceIds::default(),
        }
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            clock: ManualClock::new(now),
            ids: SequenceIds::default(),
        }
    }

    /// An [`AppBuilder`] seeded with this environment's clock and ids.
    pub fn builder(&self) -> AppBuilder {
        AppBuilder::new()
            .clock(Arc::new(self.clock.clone()))
            .ids(Arc::new(self.ids.clone()))
    }

    pub async fn invoke(&self, app: &App, request: Request) -> Response {
        app.serve(request, &LambdaContext::default()).await
    }

    pub async fn invoke_with_remaining(
        &self,
        app: &App,
        request: Request,
        remaining_ms: i64,
    ) -> Response {
        app.serve(request, &LambdaContext::with_remaining_ms(remaining_ms))
            .await
    }

    pub async fn invoke_apigw_v2(&self, app: &App, event: &Value) -> Value {
        app.serve_apigw_v2(event, &LambdaContext::default()).await
    }

    pub async fn invoke_lambda_function_url(&self, app: &App, event: &Value) -> Value {
        app.serve_lambda_function_url(event, &LambdaContext::default())
            .await
    }

    pub async fn invoke_alb(&self, app: &App, event: &Value) -> Value {
        app.serve_alb(event, &LambdaContext::default()).await
    }

    pub async fn invoke_sqs(&self, app: &App, event: &Value) -> Value {
        app.serve_sqs(event, &LambdaContext::default()).await
    }

    pub async fn invoke_dynamodb_stream(&self, app: &App, event: &Value) -> Value {
        app.serve_dynamodb_stream(event, &LambdaContext::default())
            .await
    }

    pub async fn invoke_websocket(&self, app: &App, event: &Value) -> Value {
        app.serve_websocket(event, &LambdaContext::default()).await
    }

    pub async fn invoke_lambda(
        &self,
        app: &App,
        event: &Value,
    ) -> Result<Value, apptheory_core::Error> {
        app.handle_lambda(event, &LambdaContext::default()).await
    }

    /// A rate limiter over a fresh in-memory store, driven by this
    /// environment's clock.
    pub fn rate_limiter(&self) -> apptheory_rate_limit::RateLimiter {
        apptheory_rate_limit::RateLimiter::new(Arc::new(
            apptheory_rate_limit::InMemoryStore::new(),
        ))
        .with_clock(Arc::new(self.clock.clone()))
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apptheory_core::handler_fn;
    use apptheory_core::response::text;

    #[tokio::test]
    async fn builder_injects_the_manual_sources() {
        let env = TestEnv::new();
        env.ids.push(&["req_test_123"]);

        let mut app = env.builder().tier("p1").build();
        app.get("/", handler_fn(|_ctx| async { Ok(text(200, "ok")) }));

        let resp = env.invoke(&app, Request::new("GET", "/")).await;
        assert_eq!(
            resp.headers.get("x-request-id"),
            Some(&vec!["req_test_123".to_string()])
        );
    }

    #[tokio::test]
    async fn rate_limiter_uses_the_pinned_clock() {
        use apptheory_rate_limit::{FixedWindowStrategy, RateLimitKey};
        use chrono::Duration;

        let env = TestEnv::new();
        let limiter = env
            .rate_limiter()
            .with_strategy(Arc::new(FixedWindowStrategy::new(Duration::minutes(1), 2)));

        let key = RateLimitKey::new("i1", "/r", "GET");
        assert!(limiter.check_and_increment(&key).await.unwrap().allowed);
        assert!(limiter.check_and_increment(&key).await.unwrap().allowed);
        assert!(!limiter.check_and_increment(&key).await.unwrap().allowed);

        env.clock.advance(Duration::minutes(1));
        assert!(limiter.check_and_increment(&key).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn handlers_read_the_pinned_clock() {
        let env = TestEnv::new();
        let mut app = env.builder().tier("p0").build();
        app.get(
            "/now",
            handler_fn(|ctx| async move { Ok(text(200, ctx.now().timestamp().to_string())) }),
        );

        let resp = env.invoke(&app, Request::new("GET", "/now")).await;
        assert_eq!(resp.body.as_ref(), b"0");

        env.clock.advance(chrono::Duration::seconds(42));
        let resp = env.invoke(&app, Request::new("GET", "/now")).await;
        assert_eq!(resp.body.as_ref(), b"42");
    }
}
