use base64::Engine as _;
use serde_json::{json, Map, Value};

use crate::gateway::str_field;
use crate::util::value_to_string;

fn arn_resource(arn: &str) -> String {
    arn.trim().rsplit(':').next().unwrap_or_default().to_string()
}

/// Queue name from a queue ARN (the final `:` segment).
pub fn sqs_queue_name_from_arn(arn: &str) -> String {
    if arn.trim().is_empty() {
        return String::new();
    }
    arn_resource(arn)
}

/// Stream name from a shard-stream ARN (`…:stream/<name>`).
pub fn kinesis_stream_name_from_arn(arn: &str) -> String {
    arn_resource(arn)
        .strip_prefix("stream/")
        .unwrap_or_default()
        .to_string()
}

/// Table name from a table-stream ARN (`…:table/<name>/stream/<ts>`).
pub fn dynamodb_table_name_from_stream_arn(arn: &str) -> String {
    let resource = arn_resource(arn);
    let mut parts = resource.split('/');
    match (parts.next(), parts.next()) {
        (Some("table"), Some(name)) => name.to_string(),
        _ => String::new(),
    }
}

/// Topic name from a topic ARN (the final `:` segment).
pub fn sns_topic_name_from_arn(arn: &str) -> String {
    if arn.trim().is_empty() {
        return String::new();
    }
    arn_resource(arn)
}

/// Rule name from a rule ARN (`…:rule/<name>`).
pub fn eventbridge_rule_name_from_arn(arn: &str) -> String {
    arn_resource(arn)
        .strip_prefix("rule/")
        .unwrap_or_default()
        .to_string()
}

/// Task token from a callback payload; accepts the casings emitted by the
/// common orchestration shapes.
pub fn stepfunctions_task_token(value: &Value) -> String {
    for key in ["taskToken", "TaskToken", "task_token"] {
        let token = str_field(value, key);
        let token = token.trim();
        if !token.is_empty() {
            return token.to_string();
        }
    }
    String::new()
}

/// Synthesize a queue event with sensible record defaults.
pub fn build_sqs_event(queue_arn: &str, records: &[Value]) -> Value {
    let arn = queue_arn.trim();
    let out_records: Vec<Value> = records
        .iter()
        .enumerate()
        .map(|(idx, record)| {
            let message_id = {
                let id = str_field(record, "messageId");
                if id.is_empty() {
                    format!("msg-{}", idx + 1)
                } else {
                    id
                }
            };
            let source_arn = {
                let value = str_field(record, "eventSourceARN");
                if value.is_empty() {
                    arn.to_string()
                } else {
                    value
                }
            };
            json!({
                "messageId": message_id,
                "receiptHandle": str_field(record, "receiptHandle"),
                "body": str_field(record, "body"),
                "attributes": record.get("attributes").cloned().unwrap_or_else(|| json!({})),
                "messageAttributes": record
                    .get("messageAttributes")
                    .cloned()
                    .unwrap_or_else(|| json!({})),
                "md5OfBody": str_field(record, "md5OfBody"),
                "eventSource": "aws:sqs",
                "eventSourceARN": source_arn,
                "awsRegion": default_str(record, "awsRegion", "us-east-1"),
            })
        })
        .collect();
    json!({ "Records": out_records })
}

fn default_str(record: &Value, key: &str, fallback: &str) -> String {
    let value = str_field(record, key);
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

/// Synthesize a rule event; a `rule_arn` lands in `resources`.
pub fn build_eventbridge_event(
    rule_arn: Option<&str>,
    source: &str,
    detail_type: &str,
    detail: Value,
) -> Value {
    let mut resources: Vec<String> = Vec::new();
    if let Some(arn) = rule_arn {
        if !arn.trim().is_empty() {
            resources.push(arn.trim().to_string());
        }
    }
    json!({
        "version": "0",
        "id": "evt-1",
        "detail-type": if detail_type.is_empty() { "Scheduled Event" } else { detail_type },
        "source": if source.is_empty() { "aws.events" } else { source },
        "account": "000000000000",
        "time": "1970-01-01T00:00:00Z",
        "region": "us-east-1",
        "resources": resources,
        "detail": detail,
    })
}

/// Synthesize a table-stream event.
pub fn build_dynamodb_stream_event(stream_arn: &str, records: &[Value]) -> Value {
    let arn = stream_arn.trim();
    let out_records: Vec<Value> = records
        .iter()
        .enumerate()
        .map(|(idx, record)| {
            json!({
                "eventID": default_str(record, "eventID", &format!("evt-{}", idx + 1)),
                "eventName": default_str(record, "eventName", "MODIFY"),
                "eventVersion": default_str(record, "eventVersion", "1.1"),
                "eventSource": "aws:dynamodb",
                "awsRegion": default_str(record, "awsRegion", "us-east-1"),
                "dynamodb": record.get("dynamodb").cloned().unwrap_or_else(|| json!({
                    "SequenceNumber": (idx + 1).to_string(),
                    "SizeBytes": 1,
                    "StreamViewType": "NEW_AND_OLD_IMAGES",
                })),
                "eventSourceARN": default_str(record, "eventSourceARN", arn),
            })
        })
        .collect();
    json!({ "Records": out_records })
}

/// Synthesize a shard-stream event; raw `data` is base64-encoded.
pub fn build_kinesis_event(stream_arn: &str, records: &[Value]) -> Value {
    let arn = stream_arn.trim();
    let out_records: Vec<Value> = records
        .iter()
        .enumerate()
        .map(|(idx, record)| {
            let kinesis = record
                .get("kinesis")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_else(Map::new);

            let mut data_b64 = str_field(record, "data_b64");
            if data_b64.trim().is_empty() {
                data_b64 = str_field(record, "dataBase64");
            }
            let data_b64 = if data_b64.trim().is_empty() {
                let raw = record
                    .get("data")
                    .or_else(|| kinesis.get("data"))
                    .map(value_to_string)
                    .unwrap_or_default();
                base64::engine::general_purpose::STANDARD.encode(raw.as_bytes())
            } else {
                data_b64.trim().to_string()
            };

            let partition_key = {
                let from_kinesis = kinesis.get("partitionKey").map(value_to_string);
                from_kinesis
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| default_str(record, "partitionKey", &format!("pk-{}", idx + 1)))
            };
            let sequence_number = {
                let from_kinesis = kinesis.get("sequenceNumber").map(value_to_string);
                from_kinesis
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| default_str(record, "sequenceNumber", &(idx + 1).to_string()))
            };

            json!({
                "eventID": default_str(record, "eventID", &format!("evt-{}", idx + 1)),
                "eventName": default_str(record, "eventName", "aws:kinesis:record"),
                "eventVersion": default_str(record, "eventVersion", "1.0"),
                "eventSource": "aws:kinesis",
                "awsRegion": default_str(record, "awsRegion", "us-east-1"),
                "invokeIdentityArn": str_field(record, "invokeIdentityArn"),
                "eventSourceARN": default_str(record, "eventSourceARN", arn),
                "kinesis": {
                    "data": data_b64,
                    "partitionKey": partition_key,
                    "sequenceNumber": sequence_number,
                    "kinesisSchemaVersion": kinesis
                        .get("kinesisSchemaVersion")
                        .map(value_to_string)
                        .filter(|v| !v.is_empty())
                        .unwrap_or_else(|| "1.0".to_string()),
                },
            })
        })
        .collect();
    json!({ "Records": out_records })
}

/// Synthesize a pub/sub event.
pub fn build_sns_event(topic_arn: &str, records: &[Value]) -> Value {
    let arn = topic_arn.trim();
    let out_records: Vec<Value> = records
        .iter()
        .enumerate()
        .map(|(idx, record)| {
            let sns = record
                .get("Sns")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_else(Map::new);
            let field = |sns_key: &str, record_key: &str, fallback: String| -> String {
                sns.get(sns_key)
                    .map(value_to_string)
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| {
                        let value = str_field(record, record_key);
                        if value.is_empty() {
                            fallback
                        } else {
                            value
                        }
                    })
            };
            json!({
                "EventSource": "aws:sns",
                "EventVersion": default_str(record, "EventVersion", "1.0"),
                "EventSubscriptionArn": str_field(record, "EventSubscriptionArn"),
                "Sns": {
                    "MessageId": field("MessageId", "messageId", format!("sns-{}", idx + 1)),
                    "TopicArn": field("TopicArn", "topicArn", arn.to_string()),
                    "Subject": field("Subject", "subject", String::new()),
                    "Message": field("Message", "message", String::new()),
                    "Timestamp": field("Timestamp", "timestamp", "1970-01-01T00:00:00Z".to_string()),
                },
            })
        })
        .collect();
    json!({ "Records": out_records })
}

/// Synthesize a socket-gateway event.
#[allow(clippy::too_many_arguments)]
pub fn build_websocket_event(
    route_key: &str,
    event_type: &str,
    connection_id: &str,
    domain_name: &str,
    stage: &str,
    request_id: &str,
    body: &str,
) -> Value {
    json!({
        "path": "/",
        "httpMethod": "POST",
        "headers": {},
        "queryStringParameters": {},
        "requestContext": {
            "stage": stage.trim(),
            "requestId": request_id.trim(),
            "connectionId": connection_id.trim(),
            "domainName": domain_name.trim(),
            "eventType": event_type.trim(),
            "routeKey": route_key.trim(),
        },
        "body": body,
        "isBase64Encoded": false,
    })
}
