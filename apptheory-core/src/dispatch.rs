use serde_json::{json, Value};

use crate::app::{catch_internal, App, LambdaContext};
use crate::context::{Context, EventContext};
use crate::error::{error_response, Error};
use crate::events::{
    dynamodb_table_name_from_stream_arn, eventbridge_rule_name_from_arn,
    kinesis_stream_name_from_arn, sns_topic_name_from_arn, sqs_queue_name_from_arn,
};
use crate::gateway::{
    apigw_proxy_response, apigw_v2_response, lambda_function_url_response, request_from_apigw_proxy,
    request_from_apigw_v2, request_from_lambda_function_url, request_from_websocket_event,
    str_field,
};
use crate::middleware::{EventHandler, EventNext, Next};
use crate::request::normalize_request;
use crate::response::{drain_stream, normalize_response, Response};
use crate::socket::{management_endpoint, WebSocketContext};

enum RecordSource {
    Queue,
    TableStream,
    ShardStream,
}

impl RecordSource {
    fn selector_name(&self, record: &Value) -> String {
        let arn = str_field(record, "eventSourceARN");
        match self {
            RecordSource::Queue => sqs_queue_name_from_arn(&arn),
            RecordSource::TableStream => dynamodb_table_name_from_stream_arn(&arn),
            RecordSource::ShardStream => kinesis_stream_name_from_arn(&arn),
        }
    }

    fn id_field(&self) -> &'static str {
        match self {
            RecordSource::Queue => "messageId",
            RecordSource::TableStream | RecordSource::ShardStream => "eventID",
        }
    }
}

impl App {
    /// Detect the upstream shape of a raw event and dispatch it.
    ///
    /// Batch sources return the partial-batch failure report; rule and
    /// pub/sub sources pass the handler's value through (an unmatched rule
    /// event yields `Value::Null`); HTTP-ish sources return the wire-shaped
    /// proxy response.
    pub async fn handle_lambda(&self, event: &Value, lambda: &LambdaContext) -> Result<Value, Error> {
        if let Some(records) = event.get("Records").and_then(Value::as_array) {
            if let Some(first) = records.first() {
                let mut source = str_field(first, "eventSource");
                if source.is_empty() {
                    source = str_field(first, "EventSource");
                }
                tracing::debug!(source, records = records.len(), "dispatching record batch");
                return match source.as_str() {
                    "aws:sqs" => Ok(self.serve_sqs(event, lambda).await),
                    "aws:dynamodb" => Ok(self.serve_dynamodb_stream(event, lambda).await),
                    "aws:kinesis" => Ok(self.serve_kinesis(event, lambda).await),
                    "aws:sns" => self.serve_sns(event, lambda).await,
                    _ => Err(Error::internal("unknown event type")),
                };
            }
            return Err(Error::internal("unknown event type"));
        }

        if event.get("detail-type").is_some() || event.get("detailType").is_some() {
            return self.serve_eventbridge(event, lambda).await;
        }

        if let Some(request_context) = event.get("requestContext") {
            if !str_field(request_context, "connectionId").is_empty() {
                return Ok(self.serve_websocket(event, lambda).await);
            }
            if str_field(event, "version") == "2.0" || request_context.get("http").is_some() {
                return Ok(self.serve_apigw_v2(event, lambda).await);
            }
            if event.get("routeKey").is_some() {
                return Ok(self.serve_apigw_v2(event, lambda).await);
            }
            return Ok(self.serve_apigw_proxy(event, lambda).await);
        }

        Err(Error::internal("unknown event type"))
    }

    /// Serve an HTTP v2 proxy event.
    pub async fn serve_apigw_v2(&self, event: &Value, lambda: &LambdaContext) -> Value {
        let resp = match request_from_apigw_v2(event) {
            Ok(request) => self.serve(request, lambda).await,
            Err(err) => error_response(&err, ""),
        };
        let (resp, _) = drain_stream(resp);
        apigw_v2_response(&resp)
    }

    /// Serve a function-URL event.
    pub async fn serve_lambda_function_url(&self, event: &Value, lambda: &LambdaContext) -> Value {
        let resp = match request_from_lambda_function_url(event) {
            Ok(request) => self.serve(request, lambda).await,
            Err(err) => error_response(&err, ""),
        };
        let (resp, _) = drain_stream(resp);
        lambda_function_url_response(&resp)
    }

    /// Serve a legacy proxy event.
    pub async fn serve_apigw_proxy(&self, event: &Value, lambda: &LambdaContext) -> Value {
        let resp = match request_from_apigw_proxy(event) {
            Ok(request) => self.serve(request, lambda).await,
            Err(err) => error_response(&err, ""),
        };
        let (resp, _) = drain_stream(resp);
        apigw_proxy_response(&resp)
    }

    /// Serve a load-balancer event (legacy proxy shape).
    pub async fn serve_alb(&self, event: &Value, lambda: &LambdaContext) -> Value {
        self.serve_apigw_proxy(event, lambda).await
    }

    /// Serve a queue batch, reporting per-record failures.
    pub async fn serve_sqs(&self, event: &Value, lambda: &LambdaContext) -> Value {
        self.serve_record_batch(event, lambda, RecordSource::Queue, &self.sqs_routes)
            .await
    }

    /// Serve a table-stream batch, reporting per-record failures.
    pub async fn serve_dynamodb_stream(&self, event: &Value, lambda: &LambdaContext) -> Value {
        self.serve_record_batch(event, lambda, RecordSource::TableStream, &self.dynamodb_routes)
            .await
    }

    /// Serve a shard-stream batch, reporting per-record failures.
    pub async fn serve_kinesis(&self, event: &Value, lambda: &LambdaContext) -> Value {
        self.serve_record_batch(event, lambda, RecordSource::ShardStream, &self.kinesis_routes)
            .await
    }

    async fn serve_record_batch(
        &self,
        event: &Value,
        lambda: &LambdaContext,
        source: RecordSource,
        routes: &[(String, EventHandler)],
    ) -> Value {
        let records = event
            .get("Records")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let selector = records
            .first()
            .map(|record| source.selector_name(record))
            .unwrap_or_default();
        let handler = if selector.is_empty() {
            None
        } else {
            routes
                .iter()
                .find(|(name, _)| *name == selector)
                .map(|(_, handler)| handler.clone())
        };

        let mut failures = Vec::new();
        match handler {
            None => {
                // No route: report every identifiable record as failed so the
                // upstream retries the whole batch.
                for record in &records {
                    let id = str_field(record, source.id_field());
                    if !id.trim().is_empty() {
                        failures.push(json!({ "itemIdentifier": id }));
                    }
                }
            }
            Some(handler) => {
                for record in &records {
                    let ctx = EventContext::new(
                        self.clock.clone(),
                        self.ids.clone(),
                        "",
                        lambda.remaining_ms,
                    );
                    let next = EventNext::new(
                        ctx,
                        record.clone(),
                        self.event_middlewares.clone(),
                        handler.clone(),
                    );
                    if let Err(err) = catch_internal(next.run()).await {
                        let id = str_field(record, source.id_field());
                        tracing::warn!(%err, item = %id, "record handler failed");
                        if !id.trim().is_empty() {
                            failures.push(json!({ "itemIdentifier": id }));
                        }
                    }
                }
            }
        }

        json!({ "batchItemFailures": failures })
    }

    /// Serve a pub/sub event with a single handler call; the handler's
    /// return value is passed through.
    pub async fn serve_sns(&self, event: &Value, lambda: &LambdaContext) -> Result<Value, Error> {
        let topic = event
            .get("Records")
            .and_then(Value::as_array)
            .and_then(|records| records.first())
            .map(|record| {
                let sns = record.get("Sns").cloned().unwrap_or(Value::Null);
                sns_topic_name_from_arn(&str_field(&sns, "TopicArn"))
            })
            .unwrap_or_default();

        let handler = if topic.is_empty() {
            None
        } else {
            self.sns_routes
                .iter()
                .find(|(name, _)| *name == topic)
                .map(|(_, handler)| handler.clone())
        };
        let Some(handler) = handler else {
            return Err(Error::internal("unrecognized sns topic"));
        };

        let ctx = EventContext::new(self.clock.clone(), self.ids.clone(), "", lambda.remaining_ms);
        let next = EventNext::new(ctx, event.clone(), self.event_middlewares.clone(), handler);
        catch_internal(next.run()).await
    }

    /// Serve a rule event. Selectors match a configured rule name against
    /// the event's resources, or a (source, detail-type) pair. An unmatched
    /// event yields `Value::Null`.
    pub async fn serve_eventbridge(
        &self,
        event: &Value,
        lambda: &LambdaContext,
    ) -> Result<Value, Error> {
        let rule_names: Vec<String> = event
            .get("resources")
            .and_then(Value::as_array)
            .map(|resources| {
                resources
                    .iter()
                    .map(|arn| eventbridge_rule_name_from_arn(&crate::util::value_to_string(arn)))
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let source = str_field(event, "source");
        let detail_type = {
            let value = str_field(event, "detail-type");
            if value.is_empty() {
                str_field(event, "detailType")
            } else {
                value
            }
        };

        for (selector, handler) in &self.eventbridge_routes {
            let rule_match = !selector.rule_name.trim().is_empty()
                && rule_names.iter().any(|name| name == selector.rule_name.trim());
            let pattern_match = !selector.source.trim().is_empty()
                && !selector.detail_type.trim().is_empty()
                && selector.source.trim() == source
                && selector.detail_type.trim() == detail_type;
            if !rule_match && !pattern_match {
                continue;
            }

            let ctx =
                EventContext::new(self.clock.clone(), self.ids.clone(), "", lambda.remaining_ms);
            let next = EventNext::new(
                ctx,
                event.clone(),
                self.event_middlewares.clone(),
                handler.clone(),
            );
            return catch_internal(next.run()).await;
        }

        Ok(Value::Null)
    }

    /// Serve a socket-gateway event: route by exact route key and attach
    /// the management capability to the context.
    pub async fn serve_websocket(&self, event: &Value, lambda: &LambdaContext) -> Value {
        let resp = self.websocket_response(event, lambda).await;
        let (resp, _) = drain_stream(resp);
        apigw_proxy_response(&resp)
    }

    async fn websocket_response(&self, event: &Value, lambda: &LambdaContext) -> Response {
        let request = match request_from_websocket_event(event) {
            Ok(request) => request,
            Err(err) => return error_response(&err, ""),
        };
        let normalized = match normalize_request(request) {
            Ok(req) => req,
            Err(err) => return error_response(&err, ""),
        };

        let request_context = event.get("requestContext").cloned().unwrap_or(Value::Null);
        let route_key = str_field(&request_context, "routeKey");
        let connection_id = str_field(&request_context, "connectionId");
        let domain_name = str_field(&request_context, "domainName");
        let stage = str_field(&request_context, "stage");
        let event_type = str_field(&request_context, "eventType");
        let ws_request_id = str_field(&request_context, "requestId");

        let handler = self
            .websocket_routes
            .iter()
            .find(|(key, _)| *key == route_key)
            .map(|(_, handler)| handler.clone());
        let Some(handler) = handler else {
            return error_response(&Error::not_found("not found"), "");
        };

        let endpoint = management_endpoint(&domain_name, &stage, &normalized.path);
        let socket = WebSocketContext::new(
            connection_id,
            route_key,
            event_type,
            domain_name,
            stage,
            endpoint,
            self.ws_client_factory.clone(),
        );
        let ctx = Context::with_websocket(normalized, self.clock.clone(), self.ids.clone(), socket);
        ctx.set_request_id(ws_request_id.clone());
        ctx.set_remaining_ms(lambda.remaining_ms);

        let next = Next::new(self.middlewares.clone(), handler);
        match catch_internal(next.run(ctx)).await {
            Ok(resp) => normalize_response(resp),
            Err(err) => error_response(&err, &ws_request_id),
        }
    }
}
