use serde_json::{json, Map, Value};

use crate::response::{normalize_response, Response};
use crate::util::{canonicalize_headers, Headers};

/// Closed error taxonomy. Every terminal failure in the runtime renders
/// through one of these codes; [`ErrorCode::Other`] carries codes minted by
/// policy hooks and maps to 500 like any unknown code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    BadRequest,
    ValidationFailed,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    Timeout,
    Conflict,
    TooLarge,
    RateLimited,
    Internal,
    Overloaded,
    Other(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::BadRequest => "app.bad_request",
            ErrorCode::ValidationFailed => "app.validation_failed",
            ErrorCode::Unauthorized => "app.unauthorized",
            ErrorCode::Forbidden => "app.forbidden",
            ErrorCode::NotFound => "app.not_found",
            ErrorCode::MethodNotAllowed => "app.method_not_allowed",
            ErrorCode::Timeout => "app.timeout",
            ErrorCode::Conflict => "app.conflict",
            ErrorCode::TooLarge => "app.too_large",
            ErrorCode::RateLimited => "app.rate_limited",
            ErrorCode::Internal => "app.internal",
            ErrorCode::Overloaded => "app.overloaded",
            ErrorCode::Other(code) => code.as_str(),
        }
    }

    /// Parse a wire code. Blank input collapses to `app.internal`; unknown
    /// codes are preserved verbatim.
    pub fn from_code(code: &str) -> ErrorCode {
        match code.trim() {
            "" | "app.internal" => ErrorCode::Internal,
            "app.bad_request" => ErrorCode::BadRequest,
            "app.validation_failed" => ErrorCode::ValidationFailed,
            "app.unauthorized" => ErrorCode::Unauthorized,
            "app.forbidden" => ErrorCode::Forbidden,
            "app.not_found" => ErrorCode::NotFound,
            "app.method_not_allowed" => ErrorCode::MethodNotAllowed,
            "app.timeout" => ErrorCode::Timeout,
            "app.conflict" => ErrorCode::Conflict,
            "app.too_large" => ErrorCode::TooLarge,
            "app.rate_limited" => ErrorCode::RateLimited,
            "app.overloaded" => ErrorCode::Overloaded,
            other => ErrorCode::Other(other.to_string()),
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            ErrorCode::BadRequest | ErrorCode::ValidationFailed => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::Forbidden => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::MethodNotAllowed => 405,
            ErrorCode::Timeout => 408,
            ErrorCode::Conflict => 409,
            ErrorCode::TooLarge => 413,
            ErrorCode::RateLimited => 429,
            ErrorCode::Overloaded => 503,
            ErrorCode::Internal | ErrorCode::Other(_) => 500,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime error carried through handlers, hooks, and middleware.
///
/// Optional enrichment fields (`details`, `request_id`, `trace_id`,
/// `timestamp`, `stack_trace`, `status_code`) appear in the rendered JSON
/// envelope only when set. `headers` attached to an error merge into the
/// terminal response (used for `allow` and `retry-after`).
#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub status_code: Option<u16>,
    pub details: Option<Value>,
    pub request_id: String,
    pub trace_id: String,
    pub timestamp: String,
    pub stack_trace: String,
    pub headers: Headers,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status_code: None,
            details: None,
            request_id: String::new(),
            trace_id: String::new(),
            timestamp: String::new(),
            stack_trace: String::new(),
            headers: Headers::new(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn too_large(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TooLarge, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RateLimited, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn overloaded(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Overloaded, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = stack_trace.into();
        self
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Effective response status: an explicit `status_code` wins over the
    /// taxonomy mapping.
    pub fn status(&self) -> u16 {
        match self.status_code {
            Some(code) if code > 0 => code,
            _ => self.code.status(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for Error {}

/// Render an error into the canonical JSON envelope response.
///
/// `fallback_request_id` is used when the error itself carries none. Keys in
/// the envelope are canonically sorted (serde_json's default map ordering).
pub fn error_response(err: &Error, fallback_request_id: &str) -> Response {
    let mut headers = canonicalize_headers(&err.headers);
    headers.insert(
        "content-type".to_string(),
        vec!["application/json; charset=utf-8".to_string()],
    );

    let mut error = Map::new();
    error.insert("code".to_string(), json!(err.code.as_str()));
    error.insert("message".to_string(), json!(err.message));
    if let Some(status_code) = err.status_code {
        if status_code > 0 {
            error.insert("status_code".to_string(), json!(status_code));
        }
    }
    if let Some(details) = &err.details {
        error.insert("details".to_string(), details.clone());
    }
    let request_id = if err.request_id.trim().is_empty() {
        fallback_request_id.trim()
    } else {
        err.request_id.trim()
    };
    if !request_id.is_empty() {
        error.insert("request_id".to_string(), json!(request_id));
    }
    if !err.trace_id.trim().is_empty() {
        error.insert("trace_id".to_string(), json!(err.trace_id));
    }
    if !err.timestamp.trim().is_empty() {
        error.insert("timestamp".to_string(), json!(err.timestamp));
    }
    if !err.stack_trace.trim().is_empty() {
        error.insert("stack_trace".to_string(), json!(err.stack_trace));
    }

    let body = serde_json::to_vec(&json!({ "error": Value::Object(error) }))
        .unwrap_or_else(|_| b"{}".to_vec());

    normalize_response(Response {
        status: err.status(),
        headers,
        cookies: Vec::new(),
        body: body.into(),
        is_base64: false,
        stream: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(ErrorCode::BadRequest.status(), 400);
        assert_eq!(ErrorCode::ValidationFailed.status(), 400);
        assert_eq!(ErrorCode::Unauthorized.status(), 401);
        assert_eq!(ErrorCode::Forbidden.status(), 403);
        assert_eq!(ErrorCode::NotFound.status(), 404);
        assert_eq!(ErrorCode::MethodNotAllowed.status(), 405);
        assert_eq!(ErrorCode::Timeout.status(), 408);
        assert_eq!(ErrorCode::Conflict.status(), 409);
        assert_eq!(ErrorCode::TooLarge.status(), 413);
        assert_eq!(ErrorCode::RateLimited.status(), 429);
        assert_eq!(ErrorCode::Internal.status(), 500);
        assert_eq!(ErrorCode::Overloaded.status(), 503);
        assert_eq!(ErrorCode::Other("x.y".into()).status(), 500);
    }

    #[test]
    fn from_code_round_trips_and_preserves_unknown() {
        assert_eq!(ErrorCode::from_code("app.conflict"), ErrorCode::Conflict);
        assert_eq!(ErrorCode::from_code("  "), ErrorCode::Internal);
        assert_eq!(
            ErrorCode::from_code("custom.thing"),
            ErrorCode::Other("custom.thing".into())
        );
    }

    #[test]
    fn error_response_renders_sorted_envelope() {
        let err = Error::rate_limited("rate limited");
        let resp = error_response(&err, "req_1");
        assert_eq!(resp.status, 429);
        assert_eq!(
            resp.headers.get("content-type"),
            Some(&vec!["application/json; charset=utf-8".to_string()])
        );
        let body: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["error"]["code"], "app.rate_limited");
        assert_eq!(body["error"]["request_id"], "req_1");
    }

    #[test]
    fn error_response_prefers_error_request_id_and_status_override() {
        let err = Error::bad_request("nope")
            .with_request_id("req_err")
            .with_status_code(422)
            .with_details(json!({"field": "name"}));
        let resp = error_response(&err, "req_other");
        assert_eq!(resp.status, 422);
        let body: Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["error"]["request_id"], "req_err");
        assert_eq!(body["error"]["status_code"], 422);
        assert_eq!(body["error"]["details"]["field"], "name");
    }

    #[test]
    fn error_headers_merge_into_response() {
        let mut headers = Headers::new();
        headers.insert("Retry-After".into(), vec!["1".into()]);
        let err = Error::rate_limited("slow down").with_headers(headers);
        let resp = error_response(&err, "");
        assert_eq!(resp.headers.get("retry-after"), Some(&vec!["1".to_string()]));
    }
}
