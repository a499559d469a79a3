use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::error::Error;
use crate::ids::{IdGenerator, UuidIds};
use crate::request::Request;
use crate::socket::WebSocketContext;

#[derive(Default)]
struct Scratch {
    params: BTreeMap<String, String>,
    request_id: String,
    tenant_id: String,
    auth_identity: String,
    remaining_ms: i64,
    middleware_trace: Vec<String>,
    values: HashMap<String, Value>,
}

struct ContextInner {
    request: Request,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    websocket: Option<WebSocketContext>,
    scratch: Mutex<Scratch>,
}

/// Per-invocation state carrier handed to hooks, middleware, and handlers.
///
/// The request is immutable after normalization; invocation scratch
/// (`request_id`, `tenant_id`, `auth_identity`, `remaining_ms`, the
/// middleware trace, path params, and string-keyed values) is owned by the
/// pipeline and mutated through the accessors below. Cloning is cheap and
/// all clones share the same scratch.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn new(request: Request, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                request,
                clock,
                ids,
                websocket: None,
                scratch: Mutex::new(Scratch::default()),
            }),
        }
    }

    pub fn for_request(request: Request) -> Self {
        Self::new(request, Arc::new(SystemClock), Arc::new(UuidIds))
    }

    pub(crate) fn with_websocket(request: Request, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>, websocket: WebSocketContext) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                request,
                clock,
                ids,
                websocket: Some(websocket),
                scratch: Mutex::new(Scratch::default()),
            }),
        }
    }

    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    /// Current time, always read through the injected clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Fresh id, always minted through the injected generator.
    pub fn new_id(&self) -> String {
        self.inner.ids.new_id()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.inner.clock.clone()
    }

    pub fn ids(&self) -> Arc<dyn IdGenerator> {
        self.inner.ids.clone()
    }

    /// The socket capability, present only for socket-gateway invocations.
    pub fn websocket(&self) -> Option<WebSocketContext> {
        self.inner.websocket.clone()
    }

    pub fn param(&self, name: &str) -> String {
        self.inner
            .scratch
            .lock()
            .unwrap()
            .params
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn params(&self) -> BTreeMap<String, String> {
        self.inner.scratch.lock().unwrap().params.clone()
    }

    pub fn set_params(&self, params: BTreeMap<String, String>) {
        self.inner.scratch.lock().unwrap().params = params;
    }

    pub fn request_id(&self) -> String {
        self.inner.scratch.lock().unwrap().request_id.clone()
    }

    pub fn set_request_id(&self, request_id: impl Into<String>) {
        self.inner.scratch.lock().unwrap().request_id = request_id.into();
    }

    pub fn tenant_id(&self) -> String {
        self.inner.scratch.lock().unwrap().tenant_id.clone()
    }

    pub fn set_tenant_id(&self, tenant_id: impl Into<String>) {
        self.inner.scratch.lock().unwrap().tenant_id = tenant_id.into();
    }

    pub fn auth_identity(&self) -> String {
        self.inner.scratch.lock().unwrap().auth_identity.clone()
    }

    pub fn set_auth_identity(&self, identity: impl Into<String>) {
        self.inner.scratch.lock().unwrap().auth_identity = identity.into();
    }

    /// Remaining invocation budget in milliseconds; non-positive means
    /// unbounded.
    pub fn remaining_ms(&self) -> i64 {
        self.inner.scratch.lock().unwrap().remaining_ms
    }

    pub fn set_remaining_ms(&self, remaining_ms: i64) {
        self.inner.scratch.lock().unwrap().remaining_ms = remaining_ms;
    }

    pub fn middleware_trace(&self) -> Vec<String> {
        self.inner.scratch.lock().unwrap().middleware_trace.clone()
    }

    pub fn push_trace(&self, marker: impl Into<String>) {
        self.inner
            .scratch
            .lock()
            .unwrap()
            .middleware_trace
            .push(marker.into());
    }

    pub fn extend_trace(&self, markers: &[&str]) {
        let mut scratch = self.inner.scratch.lock().unwrap();
        scratch
            .middleware_trace
            .extend(markers.iter().map(|m| m.to_string()));
    }

    /// Invocation-scoped key-value scratch shared with middleware.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.scratch.lock().unwrap().values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.scratch.lock().unwrap().values.get(key).cloned()
    }

    /// Parse the request body as JSON. Requires an `application/json`
    /// content type; an empty body parses as `null`.
    pub fn json_value(&self) -> Result<Value, Error> {
        let headers = &self.inner.request.headers;
        let is_json = headers
            .get("content-type")
            .map(|values| {
                values
                    .iter()
                    .any(|v| v.trim().to_lowercase().starts_with("application/json"))
            })
            .unwrap_or(false);
        if !is_json {
            return Err(Error::bad_request("invalid json"));
        }
        if self.inner.request.body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&self.inner.request.body)
            .map_err(|_| Error::bad_request("invalid json"))
    }
}

struct EventInner {
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    request_id: String,
    remaining_ms: i64,
    values: Mutex<HashMap<String, Value>>,
}

/// Invocation state for event-source handlers (queue, stream, pub/sub,
/// rule). Carries the same time/id injection and key-value scratch as
/// [`Context`], without an HTTP request.
#[derive(Clone)]
pub struct EventContext {
    inner: Arc<EventInner>,
}

impl EventContext {
    pub fn new(
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        request_id: impl Into<String>,
        remaining_ms: i64,
    ) -> Self {
        Self {
            inner: Arc::new(EventInner {
                clock,
                ids,
                request_id: request_id.into(),
                remaining_ms,
                values: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    pub fn new_id(&self) -> String {
        self.inner.ids.new_id()
    }

    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    pub fn remaining_ms(&self) -> i64 {
        self.inner.remaining_ms
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.values.lock().unwrap().insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.values.lock().unwrap().get(key).cloned()
    }
}
