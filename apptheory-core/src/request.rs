use base64::Engine as _;
use bytes::Bytes;
use std::collections::BTreeMap;

use crate::error::Error;
use crate::util::{canonicalize_headers, normalize_path, parse_cookies, Headers, Query};

/// Shape-independent inbound request. Built by an adapter, normalized once,
/// then treated as immutable by the pipeline.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: Query,
    pub headers: Headers,
    pub cookies: BTreeMap<String, String>,
    pub body: Bytes,
    pub is_base64: bool,
}

impl Request {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_base64_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self.is_base64 = true;
        self
    }

    /// First value for a canonical header key, or empty.
    pub fn header(&self, key: &str) -> String {
        crate::util::first_header_value(&self.headers, key)
    }
}

/// Produce the canonical form: trimmed upper-case method, normalized path,
/// canonical headers, decoded body, and cookies derived from the `cookie`
/// header. Base64-marked bodies decode here so `body` is always raw bytes.
pub fn normalize_request(req: Request) -> Result<Request, Error> {
    let method = req.method.trim().to_uppercase();
    let path = normalize_path(&req.path);
    let headers = canonicalize_headers(&req.headers);

    let mut body = req.body;
    if req.is_base64 {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(body.as_ref())
            .map_err(|_| Error::bad_request("invalid base64"))?;
        body = Bytes::from(decoded);
    }

    let cookies = parse_cookies(headers.get("cookie").map(Vec::as_slice).unwrap_or(&[]));

    Ok(Request {
        method,
        path,
        query: req.query,
        headers,
        cookies,
        body,
        is_base64: req.is_base64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn normalize_uppercases_method_and_defaults_path() {
        let req = normalize_request(Request::new(" get ", "")).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/");
    }

    #[test]
    fn normalize_decodes_base64_body() {
        let req = Request::new("POST", "/").with_base64_body("aGVsbG8=");
        let out = normalize_request(req).unwrap();
        assert_eq!(out.body.as_ref(), b"hello");
    }

    #[test]
    fn normalize_rejects_invalid_base64() {
        let req = Request::new("POST", "/").with_base64_body("not-base64!!");
        let err = normalize_request(req).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadRequest);
    }

    #[test]
    fn normalize_extracts_cookies_from_header() {
        let mut headers = Headers::new();
        headers.insert("Cookie".into(), vec!["session=abc; theme=dark".into()]);
        let req = Request::new("GET", "/").with_headers(headers);
        let out = normalize_request(req).unwrap();
        assert_eq!(out.cookies.get("session"), Some(&"abc".to_string()));
        assert_eq!(out.cookies.get("theme"), Some(&"dark".to_string()));
    }
}
