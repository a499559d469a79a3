use std::collections::BTreeMap;

use base64::Engine as _;
use bytes::Bytes;
use serde_json::{json, Map, Value};

use crate::error::Error;
use crate::request::Request;
use crate::response::Response;
use crate::util::{normalize_path, value_to_string, Headers, Query};

pub(crate) fn str_field(value: &Value, key: &str) -> String {
    match value.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(found) => value_to_string(found),
    }
}

fn headers_from_single(headers: Option<&Value>, ignore_cookie_header: bool) -> Headers {
    let mut out = Headers::new();
    let Some(Value::Object(map)) = headers else {
        return out;
    };
    for (key, value) in map {
        if ignore_cookie_header && key.trim().to_lowercase() == "cookie" {
            continue;
        }
        out.insert(key.clone(), vec![value_to_string(value)]);
    }
    out
}

fn headers_from_multi(headers: Option<&Value>) -> Headers {
    let mut out = Headers::new();
    let Some(Value::Object(map)) = headers else {
        return out;
    };
    for (key, value) in map {
        let values = match value {
            Value::Array(items) => items.iter().map(value_to_string).collect(),
            Value::Null => Vec::new(),
            other => vec![value_to_string(other)],
        };
        out.insert(key.clone(), values);
    }
    out
}

fn query_from_single(query: Option<&Value>) -> Query {
    let mut out = Query::new();
    let Some(Value::Object(map)) = query else {
        return out;
    };
    for (key, value) in map {
        out.insert(key.clone(), vec![value_to_string(value)]);
    }
    out
}

fn query_from_multi(query: Option<&Value>) -> Query {
    let mut out = Query::new();
    let Some(Value::Object(map)) = query else {
        return out;
    };
    for (key, value) in map {
        let values = match value {
            Value::Array(items) => items.iter().map(value_to_string).collect(),
            Value::Null => Vec::new(),
            other => vec![value_to_string(other)],
        };
        out.insert(key.clone(), values);
    }
    out
}

fn parse_raw_query_string(raw: &str) -> Query {
    let mut out = Query::new();
    for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
        out.entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    out
}

fn request_from_http_event(event: &Value) -> Result<Request, Error> {
    if !event.is_object() {
        return Err(Error::internal("invalid http event"));
    }

    let cookies: Vec<String> = event
        .get("cookies")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(value_to_string).collect())
        .unwrap_or_default();

    let mut headers = headers_from_single(event.get("headers"), !cookies.is_empty());
    if !cookies.is_empty() {
        headers.insert("cookie".to_string(), cookies);
    }

    let raw_query_string = str_field(event, "rawQueryString");
    let raw_query_string = raw_query_string.trim_start_matches('?');
    let query = if raw_query_string.is_empty() {
        query_from_single(event.get("queryStringParameters"))
    } else {
        parse_raw_query_string(raw_query_string)
    };

    let http = event
        .get("requestContext")
        .and_then(|rc| rc.get("http"))
        .cloned()
        .unwrap_or(Value::Null);
    let method = str_field(&http, "method");
    let raw_path = {
        let path = str_field(event, "rawPath");
        if path.is_empty() {
            let fallback = str_field(&http, "path");
            if fallback.is_empty() {
                "/".to_string()
            } else {
                fallback
            }
        } else {
            path
        }
    };

    Ok(Request {
        method,
        path: raw_path,
        query,
        headers,
        cookies: BTreeMap::new(),
        body: Bytes::from(str_field(event, "body")),
        is_base64: event
            .get("isBase64Encoded")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

/// Canonicalize an HTTP v2 proxy event.
pub fn request_from_apigw_v2(event: &Value) -> Result<Request, Error> {
    request_from_http_event(event)
}

/// Canonicalize a function-URL event (same inbound shape as v2).
pub fn request_from_lambda_function_url(event: &Value) -> Result<Request, Error> {
    request_from_http_event(event)
}

/// Canonicalize a legacy proxy / load-balancer event. Multi-value maps win
/// over their single-value counterparts when non-empty.
pub fn request_from_apigw_proxy(event: &Value) -> Result<Request, Error> {
    if !event.is_object() {
        return Err(Error::internal("invalid http event"));
    }

    let multi_headers = headers_from_multi(event.get("multiValueHeaders"));
    let headers = if multi_headers.is_empty() {
        headers_from_single(event.get("headers"), false)
    } else {
        multi_headers
    };

    let multi_query = query_from_multi(event.get("multiValueQueryStringParameters"));
    let query = if multi_query.is_empty() {
        query_from_single(event.get("queryStringParameters"))
    } else {
        multi_query
    };

    Ok(Request {
        method: str_field(event, "httpMethod"),
        path: {
            let path = str_field(event, "path");
            if path.is_empty() {
                "/".to_string()
            } else {
                path
            }
        },
        query,
        headers,
        cookies: BTreeMap::new(),
        body: Bytes::from(str_field(event, "body")),
        is_base64: event
            .get("isBase64Encoded")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

/// Canonicalize a socket-gateway event (legacy-proxy request shape).
pub fn request_from_websocket_event(event: &Value) -> Result<Request, Error> {
    request_from_apigw_proxy(event)
}

fn wire_body(resp: &Response) -> String {
    if resp.is_base64 {
        base64::engine::general_purpose::STANDARD.encode(&resp.body)
    } else {
        String::from_utf8_lossy(&resp.body).into_owned()
    }
}

/// Re-encode onto the HTTP v2 proxy response shape.
pub fn apigw_v2_response(resp: &Response) -> Value {
    let mut headers = Map::new();
    let mut multi = Map::new();
    for (key, values) in &resp.headers {
        let Some(first) = values.first() else {
            continue;
        };
        headers.insert(key.clone(), json!(first));
        multi.insert(key.clone(), json!(values));
    }

    json!({
        "statusCode": resp.status,
        "headers": Value::Object(headers),
        "multiValueHeaders": Value::Object(multi),
        "body": wire_body(resp),
        "isBase64Encoded": resp.is_base64,
        "cookies": resp.cookies,
    })
}

/// Re-encode onto the function-URL response shape: multi-value headers are
/// comma-joined into a single map.
pub fn lambda_function_url_response(resp: &Response) -> Value {
    let mut headers = Map::new();
    for (key, values) in &resp.headers {
        if values.is_empty() {
            continue;
        }
        headers.insert(key.clone(), json!(values.join(",")));
    }

    json!({
        "statusCode": resp.status,
        "headers": Value::Object(headers),
        "body": wire_body(resp),
        "isBase64Encoded": resp.is_base64,
        "cookies": resp.cookies,
    })
}

/// Re-encode onto the legacy proxy / load-balancer response shape; cookies
/// embed as `set-cookie` headers.
pub fn apigw_proxy_response(resp: &Response) -> Value {
    let mut headers = Map::new();
    let mut multi = Map::new();
    for (key, values) in &resp.headers {
        let Some(first) = values.first() else {
            continue;
        };
        headers.insert(key.clone(), json!(first));
        multi.insert(key.clone(), json!(values));
    }

    if let Some(first) = resp.cookies.first() {
        headers.insert("set-cookie".to_string(), json!(first));
        multi.insert("set-cookie".to_string(), json!(resp.cookies));
    }

    json!({
        "statusCode": resp.status,
        "headers": Value::Object(headers),
        "multiValueHeaders": Value::Object(multi),
        "body": wire_body(resp),
        "isBase64Encoded": resp.is_base64,
    })
}

/// Inputs for synthesizing HTTP gateway events (test traffic, local
/// harnesses).
#[derive(Debug, Clone, Default)]
pub struct HttpEventParts {
    pub method: String,
    pub path: String,
    pub query: Query,
    pub headers: BTreeMap<String, String>,
    pub cookies: Vec<String>,
    pub body: Bytes,
    pub is_base64: bool,
}

fn split_path_and_query(path: &str, query: &Query) -> (String, String) {
    let raw = path.trim();
    let (raw_path, raw_query_from_path) = match raw.split_once('?') {
        Some((p, q)) => (p, q.to_string()),
        None => (raw, String::new()),
    };
    let normalized = normalize_path(raw_path);

    if query.is_empty() {
        return (normalized, raw_query_from_path);
    }

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, values) in query {
        for value in values {
            serializer.append_pair(key, value);
        }
    }
    (normalized, serializer.finish())
}

fn encoded_body(parts: &HttpEventParts) -> String {
    if parts.is_base64 {
        base64::engine::general_purpose::STANDARD.encode(&parts.body)
    } else {
        String::from_utf8_lossy(&parts.body).into_owned()
    }
}

fn single_value_query(query: &Query) -> Value {
    let mut out = Map::new();
    for (key, values) in query {
        if let Some(first) = values.first() {
            out.insert(key.clone(), json!(first));
        }
    }
    if out.is_empty() {
        Value::Null
    } else {
        Value::Object(out)
    }
}

/// Synthesize an HTTP v2 proxy event.
pub fn build_apigw_v2_event(parts: &HttpEventParts) -> Value {
    let (raw_path, raw_query_string) = split_path_and_query(&parts.path, &parts.query);
    json!({
        "version": "2.0",
        "routeKey": "$default",
        "rawPath": raw_path,
        "rawQueryString": raw_query_string,
        "cookies": parts.cookies,
        "headers": parts.headers,
        "queryStringParameters": single_value_query(&parts.query),
        "requestContext": {
            "http": {
                "method": parts.method.trim().to_uppercase(),
                "path": raw_path,
            }
        },
        "body": encoded_body(parts),
        "isBase64Encoded": parts.is_base64,
    })
}

/// Synthesize a function-URL event.
pub fn build_lambda_function_url_event(parts: &HttpEventParts) -> Value {
    let (raw_path, raw_query_string) = split_path_and_query(&parts.path, &parts.query);
    json!({
        "version": "2.0",
        "rawPath": raw_path,
        "rawQueryString": raw_query_string,
        "cookies": parts.cookies,
        "headers": parts.headers,
        "queryStringParameters": single_value_query(&parts.query),
        "requestContext": {
            "http": {
                "method": parts.method.trim().to_uppercase(),
                "path": raw_path,
            }
        },
        "body": encoded_body(parts),
        "isBase64Encoded": parts.is_base64,
    })
}
