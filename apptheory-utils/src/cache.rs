use sha2::{Digest, Sha256};

use apptheory_core::util::{canonicalize_headers, Headers};

/// Server-rendered pages are never cached at the edge.
pub fn cache_control_ssr() -> &'static str {
    "private, no-store"
}

/// Static pages cache at the edge indefinitely and revalidate in the
/// browser.
pub fn cache_control_ssg() -> &'static str {
    "public, max-age=0, s-maxage=31536000"
}

/// Incremental regeneration: edge-cached for `revalidate_seconds` with an
/// optional stale-while-revalidate grace period.
pub fn cache_control_isr(revalidate_seconds: i64, stale_while_revalidate_seconds: i64) -> String {
    let revalidate = revalidate_seconds.max(0);
    let stale = stale_while_revalidate_seconds.max(0);

    let mut parts = vec![
        "public".to_string(),
        "max-age=0".to_string(),
        format!("s-maxage={revalidate}"),
    ];
    if stale > 0 {
        parts.push(format!("stale-while-revalidate={stale}"));
    }
    parts.join(", ")
}

/// Strong entity tag: quoted SHA-256 of the body.
pub fn etag(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!("\"{digest:x}\"")
}

fn split_comma_values(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|part| !part.is_empty())
}

/// Whether an `if-none-match` header matches the given tag. Weak (`W/`)
/// prefixes and the `*` wildcard are honored.
pub fn matches_if_none_match(headers: &Headers, etag_value: &str) -> bool {
    let tag = etag_value.trim();
    if tag.is_empty() {
        return false;
    }

    let headers = canonicalize_headers(headers);
    let Some(values) = headers.get("if-none-match") else {
        return false;
    };
    for raw in values {
        for token in split_comma_values(raw) {
            if token == "*" {
                return true;
            }
            let token = if token.to_lowercase().starts_with("w/") {
                token[2..].trim()
            } else {
                token
            };
            if token == tag {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(key: &str, value: &str) -> Headers {
        let mut headers = Headers::new();
        headers.insert(key.to_string(), vec![value.to_string()]);
        headers
    }

    #[test]
    fn cache_control_directives() {
        assert_eq!(cache_control_ssr(), "private, no-store");
        assert_eq!(cache_control_ssg(), "public, max-age=0, s-maxage=31536000");
        assert_eq!(
            cache_control_isr(60, 30),
            "public, max-age=0, s-maxage=60, stale-while-revalidate=30"
        );
        assert_eq!(cache_control_isr(-5, 0), "public, max-age=0, s-maxage=0");
    }

    #[test]
    fn etag_is_quoted_and_stable() {
        let tag = etag(b"hello");
        assert!(tag.starts_with('"') && tag.ends_with('"'));
        assert_eq!(tag, etag(b"hello"));
        assert_ne!(tag, etag(b"world"));
    }

    #[test]
    fn if_none_match_honors_exact_weak_and_wildcard() {
        let tag = etag(b"hello");
        assert!(matches_if_none_match(&headers_with("If-None-Match", &tag), &tag));
        assert!(matches_if_none_match(
            &headers_with("if-none-match", &format!("W/{tag}")),
            &tag
        ));
        assert!(matches_if_none_match(&headers_with("if-none-match", "*"), &tag));
        assert!(!matches_if_none_match(
            &headers_with("if-none-match", "\"other\""),
            &tag
        ));
        assert!(!matches_if_none_match(&Headers::new(), &tag));
        assert!(!matches_if_none_match(&headers_with("if-none-match", "*"), " "));
    }
}
