use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Error;
use crate::util::Headers;

pub type AuthFuture = Pin<Box<dyn Future<Output = Result<String, Error>> + Send>>;

/// Called on auth-required routes after the `auth` trace marker. Returns
/// the authenticated identity; a blank identity is treated as
/// `app.unauthorized`.
pub type AuthHook = Arc<dyn Fn(Context) -> AuthFuture + Send + Sync>;

/// Box an async closure into an [`AuthHook`].
pub fn auth_hook_fn<F, Fut>(f: F) -> AuthHook
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, Error>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Outcome of the policy gate. A non-blank `code` short-circuits the
/// pipeline into an error response; attached headers (e.g. `retry-after`)
/// merge into that response.
#[derive(Debug, Clone, Default)]
pub struct PolicyDecision {
    pub code: String,
    pub message: String,
    pub headers: Headers,
}

impl PolicyDecision {
    pub fn deny(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: String::new(),
            headers: Headers::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Message used when the decision leaves it blank.
    pub fn default_message(code: &str) -> &'static str {
        match code {
            "app.rate_limited" => "rate limited",
            "app.overloaded" => "overloaded",
            _ => "internal error",
        }
    }
}

pub type PolicyFuture = Pin<Box<dyn Future<Output = Result<Option<PolicyDecision>, Error>> + Send>>;

/// Pre-routing policy gate, invoked only at the observable tier.
pub type PolicyHook = Arc<dyn Fn(Context) -> PolicyFuture + Send + Sync>;

/// Box an async closure into a [`PolicyHook`].
pub fn policy_hook_fn<F, Fut>(f: F) -> PolicyHook
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<PolicyDecision>, Error>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// One structured log line per terminal response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: String,
    pub event: String,
    pub request_id: String,
    pub tenant_id: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub error_code: String,
}

/// One counter metric per terminal response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRecord {
    pub name: String,
    pub value: i64,
    pub tags: BTreeMap<String, String>,
}

/// One span per terminal response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanRecord {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
}

pub type LogSink = Arc<dyn Fn(LogRecord) + Send + Sync>;
pub type MetricSink = Arc<dyn Fn(MetricRecord) + Send + Sync>;
pub type SpanSink = Arc<dyn Fn(SpanRecord) + Send + Sync>;

/// Observability sinks, called exactly once per terminal response after
/// finalization. Unset sinks are skipped.
#[derive(Clone, Default)]
pub struct ObservabilityHooks {
    pub log: Option<LogSink>,
    pub metric: Option<MetricSink>,
    pub span: Option<SpanSink>,
}

impl ObservabilityHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_log(mut self, sink: impl Fn(LogRecord) + Send + Sync + 'static) -> Self {
        self.log = Some(Arc::new(sink));
        self
    }

    pub fn on_metric(mut self, sink: impl Fn(MetricRecord) + Send + Sync + 'static) -> Self {
        self.metric = Some(Arc::new(sink));
        self
    }

    pub fn on_span(mut self, sink: impl Fn(SpanRecord) + Send + Sync + 'static) -> Self {
        self.span = Some(Arc::new(sink));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_messages_by_code() {
        assert_eq!(PolicyDecision::default_message("app.rate_limited"), "rate limited");
        assert_eq!(PolicyDecision::default_message("app.overloaded"), "overloaded");
        assert_eq!(PolicyDecision::default_message("app.conflict"), "internal error");
    }

    #[test]
    fn hooks_fire_when_set() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let hooks = ObservabilityHooks::new().on_metric(move |record| {
            seen_clone.lock().unwrap().push(record.name.clone());
        });

        if let Some(metric) = &hooks.metric {
            metric(MetricRecord {
                name: "apptheory.request".into(),
                value: 1,
                tags: BTreeMap::new(),
            });
        }
        assert_eq!(seen.lock().unwrap().as_slice(), ["apptheory.request"]);
    }
}
