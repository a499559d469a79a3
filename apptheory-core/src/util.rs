use std::collections::BTreeMap;

use serde_json::Value;

/// Canonical header map: lower-cased keys, ordered values, sorted iteration.
pub type Headers = BTreeMap<String, Vec<String>>;

/// Query map: case-preserving keys, ordered multi-values.
pub type Query = BTreeMap<String, Vec<String>>;

/// Strip the query/fragment suffix and guarantee a leading slash.
///
/// Empty and whitespace-only paths normalize to `/`.
pub fn normalize_path(path: &str) -> String {
    let mut value = path.trim().to_string();
    if value.is_empty() {
        return "/".to_string();
    }
    if let Some(idx) = value.find('?') {
        value.truncate(idx);
    }
    if !value.starts_with('/') {
        value.insert(0, '/');
    }
    if value.is_empty() {
        return "/".to_string();
    }
    value
}

/// Lower-case keys, drop blank keys, and collect values in sorted key order.
///
/// Keys that differ only in case merge; their values concatenate in the
/// sorted order of the original keys. Idempotent.
pub fn canonicalize_headers(headers: &Headers) -> Headers {
    let mut out = Headers::new();
    for (key, values) in headers {
        let lower = key.trim().to_lowercase();
        if lower.is_empty() {
            continue;
        }
        out.entry(lower).or_default().extend(values.iter().cloned());
    }
    out
}

/// Parse `cookie` header values into a name -> first-value map.
///
/// Parts without `=` or with a blank name are skipped; later values for the
/// same name win, matching how upstream gateways collapse duplicates.
pub fn parse_cookies(cookie_headers: &[String]) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for header in cookie_headers {
        for part in header.split(';') {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Some((name, value)) = trimmed.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            out.insert(name.to_string(), value.trim().to_string());
        }
    }
    out
}

/// First value for a canonical (lower-case) header key, or empty.
pub fn first_header_value(headers: &Headers, key: &str) -> String {
    headers
        .get(&key.trim().to_lowercase())
        .and_then(|values| values.first())
        .cloned()
        .unwrap_or_default()
}

/// Merge `Vary` tokens: split on commas, lower-case, dedupe, sort.
pub fn vary(existing: &[String], add: &[&str]) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    for value in existing.iter().map(String::as_str).chain(add.iter().copied()) {
        for token in value.split(',') {
            let token = token.trim().to_lowercase();
            if !token.is_empty() {
                seen.insert(token);
            }
        }
    }
    seen.into_iter().collect()
}

/// Stable stringification for loosely-typed upstream values.
///
/// Strings pass through unquoted; everything else renders as its JSON form
/// (`null`, `true`, numbers, nested structures).
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_defaults_and_strips_query() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("   "), "/");
        assert_eq!(normalize_path("a/b"), "/a/b");
        assert_eq!(normalize_path("/a/b?x=1"), "/a/b");
        assert_eq!(normalize_path("?x=1"), "/");
    }

    #[test]
    fn canonicalize_headers_lowers_and_merges() {
        let mut headers = Headers::new();
        headers.insert("Content-Type".into(), vec!["text/plain".into()]);
        headers.insert("X-Multi".into(), vec!["a".into()]);
        headers.insert("x-multi".into(), vec!["b".into()]);
        headers.insert("  ".into(), vec!["dropped".into()]);

        let out = canonicalize_headers(&headers);
        assert_eq!(out.get("content-type"), Some(&vec!["text/plain".to_string()]));
        assert_eq!(
            out.get("x-multi"),
            Some(&vec!["a".to_string(), "b".to_string()])
        );
        assert!(!out.contains_key("  "));
    }

    #[test]
    fn canonicalize_headers_is_idempotent() {
        let mut headers = Headers::new();
        headers.insert("A".into(), vec!["1".into()]);
        headers.insert("b".into(), vec!["2".into(), "3".into()]);
        let once = canonicalize_headers(&headers);
        let twice = canonicalize_headers(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn parse_cookies_skips_malformed_parts() {
        let headers = vec!["a=1; b=2;; noeq; =blank; c = 3 ".to_string()];
        let cookies = parse_cookies(&headers);
        assert_eq!(cookies.get("a"), Some(&"1".to_string()));
        assert_eq!(cookies.get("b"), Some(&"2".to_string()));
        assert_eq!(cookies.get("c"), Some(&"3".to_string()));
        assert_eq!(cookies.len(), 3);
    }

    #[test]
    fn vary_dedupes_and_sorts() {
        let existing = vec!["Origin, accept-encoding".to_string()];
        assert_eq!(
            vary(&existing, &["origin", "Accept"]),
            vec!["accept", "accept-encoding", "origin"]
        );
    }

    #[test]
    fn value_to_string_is_stable() {
        assert_eq!(value_to_string(&Value::Null), "null");
        assert_eq!(value_to_string(&Value::Bool(true)), "true");
        assert_eq!(value_to_string(&Value::String("x".into())), "x");
        assert_eq!(value_to_string(&serde_json::json!(2)), "2");
    }
}
