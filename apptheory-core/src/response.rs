use bytes::Bytes;
use serde_json::Value;

use crate::error::{Error, ErrorCode};
use crate::util::{canonicalize_headers, Headers};

/// Finite, single-pass sequence of body chunks for streaming responses.
///
/// The adapter owns consumption: chunks yielded before an `Err` are
/// preserved, and the remainder of the sequence is not consumed.
pub type ByteStream = Box<dyn Iterator<Item = Result<Bytes, Error>> + Send>;

/// Shape-independent outbound response.
///
/// `stream` and a fully-materialized `body` are mutually exclusive in
/// practice; when a stream is present the pipeline skips the response byte
/// limit and the adapter drains the chunks.
#[derive(Default)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub cookies: Vec<String>,
    pub body: Bytes,
    pub is_base64: bool,
    pub stream: Option<ByteStream>,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("cookies", &self.cookies)
            .field("body_len", &self.body.len())
            .field("is_base64", &self.is_base64)
            .field("streaming", &self.stream.is_some())
            .finish()
    }
}

impl Response {
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.entry(key.into()).or_default().push(value.into());
        self
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookies.push(cookie.into());
        self
    }

    pub fn with_stream(mut self, stream: ByteStream) -> Self {
        self.stream = Some(stream);
        self
    }
}

fn content_type(value: &str) -> Headers {
    let mut headers = Headers::new();
    headers.insert("content-type".to_string(), vec![value.to_string()]);
    headers
}

/// Plain-text response.
pub fn text(status: u16, body: impl Into<String>) -> Response {
    normalize_response(Response {
        status,
        headers: content_type("text/plain; charset=utf-8"),
        body: Bytes::from(body.into()),
        ..Default::default()
    })
}

/// JSON response with canonically sorted keys.
pub fn json(status: u16, value: &Value) -> Response {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"null".to_vec());
    normalize_response(Response {
        status,
        headers: content_type("application/json; charset=utf-8"),
        body: body.into(),
        ..Default::default()
    })
}

/// Binary response; re-encoded as base64 on wire shapes that require it.
pub fn binary(status: u16, body: impl Into<Bytes>, content_type_value: Option<&str>) -> Response {
    let headers = match content_type_value {
        Some(value) => content_type(value),
        None => Headers::new(),
    };
    normalize_response(Response {
        status,
        headers,
        body: body.into(),
        is_base64: true,
        ..Default::default()
    })
}

/// HTML response.
pub fn html(status: u16, body: impl Into<String>) -> Response {
    normalize_response(Response {
        status,
        headers: content_type("text/html; charset=utf-8"),
        body: Bytes::from(body.into()),
        ..Default::default()
    })
}

/// Streaming HTML response from a chunk sequence.
pub fn html_stream(status: u16, stream: ByteStream) -> Response {
    normalize_response(Response {
        status,
        headers: content_type("text/html; charset=utf-8"),
        ..Default::default()
    })
    .with_stream(stream)
}

/// Serialize a value as JSON safe for embedding inside an HTML `<script>`
/// block: `<`, `&`, U+2028 and U+2029 are escaped.
pub fn safe_json_for_html(value: &Value) -> String {
    let raw = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '<' => out.push_str("\\u003c"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            other => out.push(other),
        }
    }
    out
}

/// Canonical form: zero status defaults to 200, headers canonicalized.
pub fn normalize_response(resp: Response) -> Response {
    Response {
        status: if resp.status == 0 { 200 } else { resp.status },
        headers: canonicalize_headers(&resp.headers),
        cookies: resp.cookies,
        body: resp.body,
        is_base64: resp.is_base64,
        stream: resp.stream,
    }
}

/// Drained streaming state: the chunks consumed in order and the taxonomy
/// code of the error that interrupted consumption, if any.
pub struct DrainedStream {
    pub chunks: Vec<Bytes>,
    pub error_code: String,
}

/// Consume a response's chunk sequence once, appending the chunks to the
/// materialized body. Headers were fixed when the handler returned, so
/// nothing mutated mid-stream can leak onto the wire.
pub fn drain_stream(resp: Response) -> (Response, DrainedStream) {
    let mut drained = DrainedStream {
        chunks: Vec::new(),
        error_code: String::new(),
    };

    let Some(stream) = resp.stream else {
        return (resp, drained);
    };

    let mut body = resp.body.to_vec();
    for item in stream {
        match item {
            Ok(chunk) => {
                body.extend_from_slice(&chunk);
                drained.chunks.push(chunk);
            }
            Err(err) => {
                drained.error_code = match err.code {
                    ErrorCode::Other(_) => ErrorCode::Internal.as_str().to_string(),
                    code => code.as_str().to_string(),
                };
                break;
            }
        }
    }

    (
        Response {
            status: resp.status,
            headers: resp.headers,
            cookies: resp.cookies,
            body: body.into(),
            is_base64: resp.is_base64,
            stream: None,
        },
        drained,
    )
}
