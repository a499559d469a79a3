use std::collections::HashMap;

use apptheory_core::util::{canonicalize_headers, first_header_value, Headers};

fn first_comma_token(value: &str) -> &str {
    value.split(',').next().unwrap_or_default()
}

fn parse_forwarded(value: &str) -> HashMap<String, String> {
    let raw = value.trim();
    let mut out = HashMap::new();
    if raw.is_empty() {
        return out;
    }

    let first = first_comma_token(raw);
    for part in first.split(';') {
        let Some((key, val)) = part.trim().split_once('=') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let val = val.trim().trim_matches('"');
        if (key == "proto" || key == "host") && !val.is_empty() && !out.contains_key(&key) {
            out.insert(key, val.to_string());
        }
    }
    out
}

/// Reconstruct the externally visible origin URL from the edge-forwarded
/// header chain.
pub fn origin_url(headers: &Headers) -> String {
    let headers = canonicalize_headers(headers);
    let forwarded = parse_forwarded(&first_header_value(&headers, "forwarded"));

    let host = {
        let value = first_header_value(&headers, "x-forwarded-host");
        if !value.is_empty() {
            value
        } else if let Some(host) = forwarded.get("host") {
            host.clone()
        } else {
            first_header_value(&headers, "host")
        }
    };
    let host = first_comma_token(&host).trim().to_string();
    if host.is_empty() {
        return String::new();
    }

    let proto = {
        let value = first_header_value(&headers, "cloudfront-forwarded-proto");
        if !value.is_empty() {
            value
        } else {
            let value = first_header_value(&headers, "x-forwarded-proto");
            if !value.is_empty() {
                value
            } else {
                forwarded.get("proto").cloned().unwrap_or_default()
            }
        }
    };
    let proto = first_comma_token(&proto).trim().to_lowercase();
    let proto = if proto.is_empty() { "https".to_string() } else { proto };

    format!("{proto}://{host}")
}

fn parse_viewer_address(value: &str) -> String {
    let raw = value.trim().trim_matches('"');
    if raw.is_empty() {
        return String::new();
    }

    // Bracketed IPv6 with a port suffix.
    if raw.starts_with('[') {
        if let Some(end) = raw.find(']') {
            return raw[1..end].trim().to_string();
        }
    }

    let Some(idx) = raw.rfind(':') else {
        return raw.to_string();
    };
    if idx == 0 {
        return raw.to_string();
    }
    let ip = raw[..idx].trim();
    let port = raw[idx + 1..].trim();
    if ip.is_empty() || port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
        return raw.to_string();
    }
    ip.to_string()
}

/// Best-effort client IP: the edge's viewer address first, then the
/// leftmost `x-forwarded-for` hop.
pub fn client_ip(headers: &Headers) -> String {
    let headers = canonicalize_headers(headers);

    let viewer = first_header_value(&headers, "cloudfront-viewer-address");
    if !viewer.is_empty() {
        let ip = parse_viewer_address(&viewer);
        if !ip.is_empty() {
            return ip;
        }
    }

    let xff = first_header_value(&headers, "x-forwarded-for");
    if !xff.is_empty() {
        let ip = first_comma_token(&xff).trim();
        if !ip.is_empty() {
            return ip.to_string();
        }
    }

    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        let mut out = Headers::new();
        for (key, value) in pairs {
            out.insert(key.to_string(), vec![value.to_string()]);
        }
        out
    }

    #[test]
    fn origin_url_prefers_forwarded_host_chain() {
        let h = headers(&[("x-forwarded-host", "app.example.com"), ("host", "internal")]);
        assert_eq!(origin_url(&h), "https://app.example.com");

        let h = headers(&[("host", "plain.example.com"), ("x-forwarded-proto", "http")]);
        assert_eq!(origin_url(&h), "http://plain.example.com");

        let h = headers(&[("forwarded", "for=1.2.3.4;host=fwd.example.com;proto=http")]);
        assert_eq!(origin_url(&h), "http://fwd.example.com");

        assert_eq!(origin_url(&Headers::new()), "");
    }

    #[test]
    fn origin_url_takes_the_first_comma_token() {
        let h = headers(&[("x-forwarded-host", "a.example.com, b.example.com")]);
        assert_eq!(origin_url(&h), "https://a.example.com");
    }

    #[test]
    fn client_ip_prefers_viewer_address() {
        let h = headers(&[
            ("cloudfront-viewer-address", "1.2.3.4:52000"),
            ("x-forwarded-for", "9.9.9.9"),
        ]);
        assert_eq!(client_ip(&h), "1.2.3.4");

        let h = headers(&[("cloudfront-viewer-address", "[2001:db8::1]:443")]);
        assert_eq!(client_ip(&h), "2001:db8::1");

        let h = headers(&[("x-forwarded-for", "9.9.9.9, 10.0.0.1")]);
        assert_eq!(client_ip(&h), "9.9.9.9");

        assert_eq!(client_ip(&Headers::new()), "");
    }
}
