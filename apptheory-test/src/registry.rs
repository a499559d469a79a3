use bytes::Bytes;
use serde_json::{json, Value};

use apptheory_core::{
    event_handler_fn, event_middleware_fn, handler_fn, middleware_fn, response, sse,
    timeout_middleware, Error, EventHandler, EventMiddleware, Handler, Middleware, SseEvent,
    TimeoutConfig,
};
use apptheory_utils::{
    base_name, cache_control_isr, cache_control_ssg, cache_control_ssr, client_ip, etag,
    matches_if_none_match, normalize_stage, origin_url, resource_name,
};

use base64::Engine as _;

/// Resolve a built-in HTTP handler by name. A plain string-keyed registry
/// so fixtures can reference behavior without code.
pub fn http_handler(name: &str) -> Option<Handler> {
    let handler = match name {
        "static_pong" => handler_fn(|_ctx| async { Ok(response::text(200, "pong")) }),
        "echo_path_params" => handler_fn(|ctx| async move {
            Ok(response::json(200, &json!({ "params": ctx.params() })))
        }),
        "echo_request" => handler_fn(|ctx| async move {
            let req = ctx.request();
            Ok(response::json(
                200,
                &json!({
                    "method": req.method,
                    "path": req.path,
                    "query": req.query,
                    "headers": req.headers,
                    "cookies": req.cookies,
                    "body_b64": base64::engine::general_purpose::STANDARD.encode(&req.body),
                    "is_base64": req.is_base64,
                }),
            ))
        }),
        "echo_context" => handler_fn(|ctx| async move {
            Ok(response::json(
                200,
                &json!({
                    "request_id": ctx.request_id(),
                    "tenant_id": ctx.tenant_id(),
                    "auth_identity": ctx.auth_identity(),
                    "remaining_ms": ctx.remaining_ms(),
                }),
            ))
        }),
        "echo_middleware_trace" => handler_fn(|ctx| async move {
            Ok(response::json(200, &json!({ "trace": ctx.middleware_trace() })))
        }),
        "echo_ctx_value_and_trace" => handler_fn(|ctx| async move {
            Ok(response::json(
                200,
                &json!({
                    "mw": ctx.get("mw"),
                    "trace": ctx.middleware_trace(),
                }),
            ))
        }),
        "parse_json_echo" => handler_fn(|ctx| async move {
            let value = ctx.json_value()?;
            Ok(response::json(200, &value))
        }),
        "panic" => handler_fn(|_ctx| async { panic!("boom") }),
        "binary_body" => handler_fn(|_ctx| async {
            Ok(response::binary(
                200,
                vec![0u8, 1, 2],
                Some("application/octet-stream"),
            ))
        }),
        "unauthorized" => {
            handler_fn(|_ctx| async { Err(Error::unauthorized("unauthorized")) })
        }
        "validation_failed" => {
            handler_fn(|_ctx| async { Err(Error::validation_failed("validation failed")) })
        }
        "large_response" => handler_fn(|_ctx| async { Ok(response::text(200, "12345")) }),
        "sleep_50ms" => handler_fn(|_ctx| async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(response::text(200, "done"))
        }),
        "header_multivalue" => handler_fn(|_ctx| async {
            Ok(response::text(200, "ok")
                .with_header("x-multi", "a")
                .with_header("x-multi", "b"))
        }),
        "cookies_from_set_cookie_header" => handler_fn(|_ctx| async {
            Ok(response::text(200, "ok")
                .with_header("set-cookie", "a=b; Path=/")
                .with_header("set-cookie", "c=d; Path=/")
                .with_cookie("e=f; Path=/"))
        }),
        "html_basic" => handler_fn(|_ctx| async { Ok(response::html(200, "<h1>Hello</h1>")) }),
        "html_stream_two_chunks" => handler_fn(|_ctx| async {
            let chunks: Vec<Result<Bytes, Error>> = vec![
                Ok(Bytes::from_static(b"<h1>")),
                Ok(Bytes::from_static(b"Hello</h1>")),
            ];
            Ok(response::html_stream(200, Box::new(chunks.into_iter())))
        }),
        "safe_json_for_html" => handler_fn(|_ctx| async {
            Ok(response::text(
                200,
                response::safe_json_for_html(&json!({
                    "html": "</script><div>&</div><",
                    "amp": "a&b",
                })),
            ))
        }),
        "sse_single_event" => handler_fn(|_ctx| async {
            Ok(sse(
                200,
                &[SseEvent::new(json!({"ok": true}))
                    .with_id("1")
                    .with_event("message")],
            ))
        }),
        "stream_error_after_first_chunk" => handler_fn(|_ctx| async {
            let chunks: Vec<Result<Bytes, Error>> = vec![
                Ok(Bytes::from_static(b"hello")),
                Err(Error::internal("boom")),
            ];
            Ok(response::text(200, "").with_stream(Box::new(chunks.into_iter())))
        }),
        "cache_helpers" => handler_fn(|ctx| async move {
            let tag = etag(b"hello");
            Ok(response::json(
                200,
                &json!({
                    "cache_control_ssr": cache_control_ssr(),
                    "cache_control_ssg": cache_control_ssg(),
                    "cache_control_isr": cache_control_isr(60, 30),
                    "etag": tag,
                    "if_none_match_hit": matches_if_none_match(&ctx.request().headers, &tag),
                    "vary": apptheory_core::vary(
                        &["origin".to_string()],
                        &["accept-encoding", "Origin"],
                    ),
                }),
            ))
        }),
        "cloudfront_helpers" => handler_fn(|ctx| async move {
            Ok(response::json(
                200,
                &json!({
                    "origin_url": origin_url(&ctx.request().headers),
                    "client_ip": client_ip(&ctx.request().headers),
                }),
            ))
        }),
        "naming_helpers" => handler_fn(|_ctx| async {
            Ok(response::json(
                200,
                &json!({
                    "normalized": {
                        "prod": normalize_stage("prod"),
                        "stg": normalize_stage("stg"),
                        "custom": normalize_stage("  Foo_Bar  "),
                    },
                    "base": base_name("Pay Theory", "prod", "Tenant_1"),
                    "resource": resource_name("Pay Theory", "WS Api", "prod", "Tenant_1"),
                }),
            ))
        }),
        _ => return None,
    };
    Some(handler)
}

/// Resolve a built-in HTTP middleware by name.
pub fn http_middleware(name: &str) -> Option<Middleware> {
    let middleware = match name {
        "mw_a" => middleware_fn(|ctx, next| async move {
            ctx.set("mw", Value::from("ok"));
            ctx.push_trace("mw_a");
            let resp = next.run(ctx).await?;
            Ok(resp.with_header("x-middleware", "1"))
        }),
        "mw_b" => middleware_fn(|ctx, next| async move {
            ctx.push_trace("mw_b");
            next.run(ctx).await
        }),
        "timeout_5ms" => timeout_middleware(TimeoutConfig {
            default_timeout_ms: 5,
            ..Default::default()
        }),
        _ => return None,
    };
    Some(middleware)
}

/// Resolve a built-in event middleware by name.
pub fn event_middleware(name: &str) -> Option<EventMiddleware> {
    let middleware = match name {
        "evt_mw_a" => event_middleware_fn(|ctx, _event, next| async move {
            ctx.set("mw", Value::from("ok"));
            ctx.set("trace", json!(["evt_mw_a"]));
            next.run().await
        }),
        "evt_mw_b" => event_middleware_fn(|ctx, _event, next| async move {
            let mut trace: Vec<String> = ctx
                .get("trace")
                .and_then(|value| serde_json::from_value(value).ok())
                .unwrap_or_default();
            trace.push("evt_mw_b".to_string());
            ctx.set("trace", json!(trace));
            next.run().await
        }),
        _ => return None,
    };
    Some(middleware)
}

fn record_str(record: &Value, key: &str) -> String {
    record
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Resolve a built-in record handler (queue / table-stream) by name.
pub fn record_handler(name: &str) -> Option<EventHandler> {
    let handler = match name {
        "sqs_noop" | "ddb_noop" => event_handler_fn(|_ctx, _record| async { Ok(Value::Null) }),
        "sqs_always_fail" | "ddb_always_fail" => {
            event_handler_fn(|_ctx, _record| async { Err(Error::internal("fail")) })
        }
        "sqs_fail_on_body" => event_handler_fn(|_ctx, record| async move {
            if record_str(&record, "body") == "fail" {
                return Err(Error::internal("fail"));
            }
            Ok(Value::Null)
        }),
        "ddb_fail_on_event_name_remove" => event_handler_fn(|_ctx, record| async move {
            if record_str(&record, "eventName") == "REMOVE" {
                return Err(Error::internal("fail"));
            }
            Ok(Value::Null)
        }),
        "sqs_requires_event_middleware" | "ddb_requires_event_middleware" => {
            event_handler_fn(|ctx, _record| async move {
                if ctx.get("mw") != Some(Value::from("ok")) {
                    return Err(Error::internal("missing middleware value"));
                }
                if ctx.get("trace") != Some(json!(["evt_mw_a", "evt_mw_b"])) {
                    return Err(Error::internal("bad trace"));
                }
                Ok(Value::Null)
            })
        }
        _ => return None,
    };
    Some(handler)
}

/// Resolve a built-in rule-event handler by name.
pub fn rule_handler(name: &str) -> Option<EventHandler> {
    let handler = match name {
        "eventbridge_static_a" => {
            event_handler_fn(|_ctx, _event| async { Ok(json!({"handler": "a"})) })
        }
        "eventbridge_static_b" => {
            event_handler_fn(|_ctx, _event| async { Ok(json!({"handler": "b"})) })
        }
        "eventbridge_echo_event_middleware" => event_handler_fn(|ctx, _event| async move {
            Ok(json!({
                "mw": ctx.get("mw"),
                "trace": ctx.get("trace"),
            }))
        }),
        _ => return None,
    };
    Some(handler)
}

/// Resolve a built-in socket handler by name.
pub fn websocket_handler(name: &str) -> Option<Handler> {
    fn ws_echo(kind: &'static str, send: bool) -> Handler {
        handler_fn(move |ctx| async move {
            let ws = ctx
                .websocket()
                .ok_or_else(|| Error::internal("missing websocket context"))?;
            if send {
                ws.send_json_message(&json!({"ok": true})).await?;
            }
            let mut body = json!({
                "handler": kind,
                "route_key": ws.route_key(),
                "event_type": ws.event_type(),
                "connection_id": ws.connection_id(),
                "management_endpoint": ws.management_endpoint(),
                "request_id": ctx.request_id(),
            });
            if send {
                body["sent"] = Value::from(true);
            }
            Ok(response::json(200, &body))
        })
    }

    let handler = match name {
        "ws_connect_ok" => ws_echo("connect", false),
        "ws_disconnect_ok" => ws_echo("disconnect", false),
        "ws_default_send_json_ok" => ws_echo("default", true),
        "ws_bad_request" => handler_fn(|_ctx| async { Err(Error::bad_request("bad request")) }),
        _ => return None,
    };
    Some(handler)
}
