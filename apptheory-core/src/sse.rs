use bytes::Bytes;
use serde_json::Value;

use crate::error::Error;
use crate::response::{normalize_response, ByteStream, Response};
use crate::util::Headers;

/// A single server-sent event. `data` is framed line-by-line; non-string
/// values serialize as compact sorted JSON.
#[derive(Debug, Clone, Default)]
pub struct SseEvent {
    pub id: String,
    pub event: String,
    pub data: Value,
}

impl SseEvent {
    pub fn new(data: Value) -> Self {
        Self {
            id: String::new(),
            event: String::new(),
            data,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into().trim().to_string();
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = event.into().trim().to_string();
        self
    }
}

fn data_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Frame one event: optional `id:` and `event:` lines, one `data:` line per
/// newline in the payload, then a blank line.
pub fn format_sse_event(event: &SseEvent) -> Bytes {
    let mut out = String::new();
    if !event.id.is_empty() {
        out.push_str(&format!("id: {}\n", event.id));
    }
    if !event.event.is_empty() {
        out.push_str(&format!("event: {}\n", event.event));
    }

    let data = data_string(&event.data).replace("\r\n", "\n").replace('\r', "\n");
    for line in data.split('\n') {
        out.push_str(&format!("data: {line}\n"));
    }
    out.push('\n');
    Bytes::from(out)
}

fn sse_headers() -> Headers {
    let mut headers = Headers::new();
    headers.insert("content-type".into(), vec!["text/event-stream".into()]);
    headers.insert("cache-control".into(), vec!["no-cache".into()]);
    headers.insert("connection".into(), vec!["keep-alive".into()]);
    headers
}

/// Materialized SSE response: all events framed into one body.
pub fn sse(status: u16, events: &[SseEvent]) -> Response {
    let mut body = Vec::new();
    for event in events {
        body.extend_from_slice(&format_sse_event(event));
    }
    normalize_response(Response {
        status: if status == 0 { 200 } else { status },
        headers: sse_headers(),
        body: body.into(),
        ..Default::default()
    })
}

/// Lazy SSE chunk sequence, one framed event per chunk.
pub fn sse_event_stream(events: Vec<SseEvent>) -> ByteStream {
    Box::new(
        events
            .into_iter()
            .map(|event| Ok::<Bytes, Error>(format_sse_event(&event))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frames_id_event_and_data() {
        let event = SseEvent::new(json!({"ok": true}))
            .with_id("1")
            .with_event("message");
        let framed = format_sse_event(&event);
        assert_eq!(
            framed.as_ref(),
            b"id: 1\nevent: message\ndata: {\"ok\":true}\n\n"
        );
    }

    #[test]
    fn multiline_data_gets_one_line_per_chunk() {
        let event = SseEvent::new(Value::from("hello\r\nworld")).with_event("note");
        let framed = format_sse_event(&event);
        assert_eq!(framed.as_ref(), b"event: note\ndata: hello\ndata: world\n\n");
    }

    #[test]
    fn empty_data_still_emits_a_data_line() {
        let event = SseEvent::new(Value::Null).with_id("3");
        assert_eq!(format_sse_event(&event).as_ref(), b"id: 3\ndata: \n\n");
    }

    #[test]
    fn sse_response_sets_stream_headers() {
        let resp = sse(200, &[SseEvent::new(Value::from("x"))]);
        assert_eq!(
            resp.headers.get("content-type"),
            Some(&vec!["text/event-stream".to_string()])
        );
        assert_eq!(
            resp.headers.get("cache-control"),
            Some(&vec!["no-cache".to_string()])
        );
        assert!(resp.body.starts_with(b"data: x\n"));
    }

    #[test]
    fn event_stream_yields_one_chunk_per_event() {
        let stream = sse_event_stream(vec![
            SseEvent::new(Value::from("a")),
            SseEvent::new(Value::from("b")),
        ]);
        let chunks: Vec<_> = stream.map(Result::unwrap).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_ref(), b"data: a\n\n");
    }
}
