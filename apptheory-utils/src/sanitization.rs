use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

const REDACTED: &str = "[REDACTED]";

/// Fields that look sensitive by substring but are safe to log.
const ALLOWED_FIELDS: &[&str] = &["card_bin", "card_brand", "card_type"];

enum Masking {
    Fully,
    Partial,
}

static SENSITIVE_FIELDS: Lazy<HashMap<&'static str, Masking>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for field in [
        "cvv",
        "security_code",
        "cvv2",
        "cvc",
        "cvc2",
        "cardholder",
        "cardholder_name",
        "password",
        "secret",
        "private_key",
        "secret_key",
        "api_token",
        "authorization",
        "authorization_id",
        "authorization_header",
    ] {
        map.insert(field, Masking::Fully);
    }
    for field in [
        "card_number",
        "number",
        "account_number",
        "ssn",
        "tin",
        "tax_id",
        "ein",
        "api_key_id",
    ] {
        map.insert(field, Masking::Partial);
    }
    map
});

const BLOCKED_SUBSTRINGS: &[&str] = &[
    "secret",
    "token",
    "password",
    "private_key",
    "client_secret",
    "api_key",
    "authorization",
];

/// Strip CR/LF so values cannot forge log lines. Convergent.
pub fn sanitize_log_string(value: &str) -> String {
    value.replace(['\r', '\n'], "")
}

fn strip_non_digits(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

/// Masked output must survive a second pass unchanged, so the partial
/// maskers treat their own output as terminal.
fn already_masked(value: &str) -> bool {
    value == REDACTED || value.contains('*') || value.starts_with("...")
}

fn mask_restricted_string(value: &str) -> String {
    let raw = value.trim();
    if raw.is_empty() {
        return REDACTED.to_string();
    }
    if already_masked(raw) {
        return raw.to_string();
    }

    let digits = strip_non_digits(raw);
    if digits.len() >= 4 {
        if digits.len() == 4 {
            return "****".to_string();
        }
        return format!("{}{}", "*".repeat(digits.len() - 4), &digits[digits.len() - 4..]);
    }

    let chars: Vec<char> = raw.chars().collect();
    if chars.len() >= 4 {
        let tail: String = chars[chars.len() - 4..].iter().collect();
        return format!("...{tail}");
    }
    REDACTED.to_string()
}

fn mask_card_number_string(value: &str) -> String {
    let raw = value.trim();
    if raw.is_empty() {
        return REDACTED.to_string();
    }
    if already_masked(raw) {
        return raw.to_string();
    }

    let digits = strip_non_digits(raw);
    if digits.len() < 4 {
        return REDACTED.to_string();
    }
    if digits.len() > 10 {
        return format!(
            "{}{}{}",
            &digits[..6],
            "*".repeat(digits.len() - 10),
            &digits[digits.len() - 4..]
        );
    }
    if digits.len() > 4 {
        return format!("{}{}", "*".repeat(digits.len() - 4), &digits[digits.len() - 4..]);
    }
    "****".to_string()
}

/// Sanitize one field by name: allow-listed fields pass through, known
/// sensitive fields mask fully or partially, names containing a blocked
/// substring redact entirely.
pub fn sanitize_field_value(key: &str, value: &Value) -> Value {
    let k = key.trim().to_lowercase();
    if k.is_empty() || ALLOWED_FIELDS.contains(&k.as_str()) {
        return sanitize_value(value);
    }

    if let Some(masking) = SENSITIVE_FIELDS.get(k.as_str()) {
        return match masking {
            Masking::Fully => Value::from(REDACTED),
            Masking::Partial => {
                let raw = value_as_plain_string(value);
                if k == "card_number" || k == "number" {
                    Value::from(mask_card_number_string(&raw))
                } else {
                    Value::from(mask_restricted_string(&raw))
                }
            }
        };
    }

    for blocked in BLOCKED_SUBSTRINGS {
        if k.contains(blocked) {
            return Value::from(REDACTED);
        }
    }

    sanitize_value(value)
}

fn value_as_plain_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) => Value::from(sanitize_log_string(s)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), sanitize_field_value(key, value)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Sanitize a JSON payload for logging: recursive field masking with
/// pretty, canonically sorted output. Nested JSON carried in a `body`
/// string field is parsed, sanitized, and re-embedded compactly.
pub fn sanitize_json(raw: &[u8]) -> String {
    if raw.is_empty() {
        return "(empty)".to_string();
    }

    let parsed: Value = match serde_json::from_slice(raw) {
        Ok(value) => value,
        Err(err) => return format!("(malformed JSON: {err})"),
    };

    let sanitized = sanitize_json_value(&parsed);
    serde_json::to_string_pretty(&sanitized)
        .unwrap_or_else(|_| "(error marshaling sanitized JSON)".to_string())
}

fn sanitize_json_value(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(sanitize_json_value).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, raw) in map {
                if key == "body" {
                    if let Value::String(body) = raw {
                        if let Ok(parsed) = serde_json::from_str::<Value>(body) {
                            let embedded = sanitize_json_value(&parsed);
                            out.insert(
                                key.clone(),
                                Value::from(
                                    serde_json::to_string(&embedded).unwrap_or_default(),
                                ),
                            );
                            continue;
                        }
                    }
                }
                out.insert(key.clone(), sanitize_field_value(key, raw));
            }
            Value::Object(out)
        }
        other => sanitize_value(other),
    }
}

/// One tag-masking rule for XML payloads.
pub struct XmlSanitizationPattern {
    pub name: &'static str,
    pattern: Regex,
    mask: fn(&str) -> String,
}

/// Apply each pattern's masking function to its matches.
pub fn sanitize_xml(xml: &str, patterns: &[XmlSanitizationPattern]) -> String {
    let mut out = xml.to_string();
    for pattern in patterns {
        out = pattern
            .pattern
            .replace_all(&out, |caps: &regex::Captures<'_>| (pattern.mask)(&caps[0]))
            .into_owned();
    }
    out
}

fn tag_content_bounds(value: &str) -> Option<(usize, usize)> {
    let escaped = value.contains("&gt;");
    let (start, end) = if escaped {
        (value.find("&gt;")? + 4, value.rfind("&lt;")?)
    } else {
        (value.find('>')? + 1, value.rfind('<')?)
    };
    Some((start, end))
}

fn mask_card_number_xml(value: &str) -> String {
    match tag_content_bounds(value) {
        Some((start, end)) if end > start => {
            let masked = mask_card_number_string(&value[start..end]);
            format!("{}{}{}", &value[..start], masked, &value[end..])
        }
        _ => value.to_string(),
    }
}

fn mask_completely_xml(value: &str) -> String {
    match tag_content_bounds(value) {
        Some((start, end)) if end >= start => {
            format!("{}{}{}", &value[..start], REDACTED, &value[end..])
        }
        _ => value.to_string(),
    }
}

fn mask_token_last_four_xml(value: &str) -> String {
    if value.contains("><") || value.contains("&gt;&lt;") {
        return value.to_string();
    }
    match tag_content_bounds(value) {
        Some((start, end)) if end > start => {
            let token: Vec<char> = value[start..end].chars().collect();
            if token.len() > 4 {
                let tail: String = token[token.len() - 4..].iter().collect();
                let masked = format!("{}{}", "*".repeat(token.len() - 4), tail);
                return format!("{}{}{}", &value[..start], masked, &value[end..]);
            }
            value.to_string()
        }
        _ => value.to_string(),
    }
}

fn tag_pattern(tag: &str) -> Regex {
    Regex::new(&format!(
        r"(?i)(<{tag}>[^<]*</{tag}>|&lt;{tag}&gt;[^&]*&lt;/{tag}&gt;)"
    ))
    .expect("valid tag pattern")
}

/// Masking rules for card-processing XML payloads.
pub static PAYMENT_XML_PATTERNS: Lazy<Vec<XmlSanitizationPattern>> = Lazy::new(|| {
    let card: fn(&str) -> String = mask_card_number_xml;
    let full: fn(&str) -> String = mask_completely_xml;
    let token: fn(&str) -> String = mask_token_last_four_xml;
    vec![
        XmlSanitizationPattern { name: "AcctNum", pattern: tag_pattern("AcctNum"), mask: card },
        XmlSanitizationPattern { name: "CardNum", pattern: tag_pattern("CardNum"), mask: card },
        XmlSanitizationPattern { name: "CardNumber", pattern: tag_pattern("CardNumber"), mask: card },
        XmlSanitizationPattern { name: "TrackData", pattern: tag_pattern("TrackData"), mask: full },
        XmlSanitizationPattern { name: "CVV", pattern: tag_pattern("CVV"), mask: full },
        XmlSanitizationPattern { name: "CVV2", pattern: tag_pattern("CVV2"), mask: full },
        XmlSanitizationPattern { name: "CVC", pattern: tag_pattern("CVC"), mask: full },
        XmlSanitizationPattern { name: "ExpDate", pattern: tag_pattern("ExpDate"), mask: full },
        XmlSanitizationPattern { name: "ExpiryDate", pattern: tag_pattern("ExpiryDate"), mask: full },
        XmlSanitizationPattern { name: "Password", pattern: tag_pattern("Password"), mask: full },
        XmlSanitizationPattern {
            name: "TransArmorToken",
            pattern: tag_pattern("TransArmorToken"),
            mask: token,
        },
    ]
});

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn log_strings_lose_line_breaks() {
        assert_eq!(sanitize_log_string("a\r\nb\nc"), "abc");
        assert_eq!(sanitize_log_string(""), "");
    }

    #[test]
    fn fully_masked_fields_redact() {
        assert_eq!(
            sanitize_field_value("cvv", &json!("123")),
            json!("[REDACTED]")
        );
        assert_eq!(
            sanitize_field_value("Password", &json!("hunter2")),
            json!("[REDACTED]")
        );
    }

    #[test]
    fn card_numbers_keep_bin_and_last_four() {
        assert_eq!(
            sanitize_field_value("card_number", &json!("4111111111111111")),
            json!("411111******1111")
        );
        assert_eq!(sanitize_field_value("card_number", &json!("12")), json!("[REDACTED]"));
    }

    #[test]
    fn restricted_fields_keep_last_four() {
        assert_eq!(
            sanitize_field_value("ssn", &json!("123-45-6789")),
            json!("*****6789")
        );
    }

    #[test]
    fn allow_listed_fields_pass_through() {
        assert_eq!(sanitize_field_value("card_bin", &json!("411111")), json!("411111"));
    }

    #[test]
    fn blocked_substrings_redact_unknown_fields() {
        assert_eq!(
            sanitize_field_value("my_api_key_value", &json!("k")),
            json!("[REDACTED]")
        );
        assert_eq!(sanitize_field_value("plain", &json!("ok")), json!("ok"));
    }

    #[test]
    fn sanitize_json_handles_empty_and_malformed_input() {
        assert_eq!(sanitize_json(b""), "(empty)");
        assert!(sanitize_json(b"{nope").starts_with("(malformed JSON"));
    }

    #[test]
    fn sanitize_json_recurses_into_nested_body_strings() {
        let payload = json!({
            "body": "{\"password\":\"hunter2\",\"ok\":1}",
            "cvv": "123",
        });
        let out = sanitize_json(serde_json::to_string(&payload).unwrap().as_bytes());
        assert!(out.contains("[REDACTED]"));
        assert!(!out.contains("hunter2"));
        assert!(!out.contains("123"));
    }

    #[test]
    fn sanitization_is_convergent() {
        let payload = json!({
            "card_number": "4111111111111111",
            "nested": {"secret": "x", "note": "line1\nline2"},
        });
        let once = sanitize_json(serde_json::to_string(&payload).unwrap().as_bytes());
        let twice = sanitize_json(once.as_bytes());
        assert_eq!(once, twice);
    }

    #[test]
    fn masked_values_pass_through_unchanged() {
        assert_eq!(
            sanitize_field_value("card_number", &json!("411111******1111")),
            json!("411111******1111")
        );
        assert_eq!(
            sanitize_field_value("ssn", &json!("*****6789")),
            json!("*****6789")
        );
        assert_eq!(
            sanitize_field_value("cvv", &json!("[REDACTED]")),
            json!("[REDACTED]")
        );
    }

    #[test]
    fn xml_card_numbers_mask_in_plain_and_escaped_forms() {
        let xml = "<CardNumber>4111111111111111</CardNumber>";
        let out = sanitize_xml(xml, &PAYMENT_XML_PATTERNS);
        assert_eq!(out, "<CardNumber>411111******1111</CardNumber>");

        let escaped = "&lt;CVV&gt;123&lt;/CVV&gt;";
        let out = sanitize_xml(escaped, &PAYMENT_XML_PATTERNS);
        assert_eq!(out, "&lt;CVV&gt;[REDACTED]&lt;/CVV&gt;");
    }

    #[test]
    fn xml_tokens_keep_last_four() {
        let xml = "<TransArmorToken>abcdefgh1234</TransArmorToken>";
        let out = sanitize_xml(xml, &PAYMENT_XML_PATTERNS);
        assert_eq!(out, "<TransArmorToken>********1234</TransArmorToken>");

        let empty = "<TransArmorToken></TransArmorToken>";
        assert_eq!(sanitize_xml(empty, &PAYMENT_XML_PATTERNS), empty);
    }
}
