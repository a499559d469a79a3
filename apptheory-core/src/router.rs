use std::collections::BTreeMap;

use crate::error::Error;
use crate::middleware::Handler;
use crate::util::normalize_path;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
    Proxy(String),
}

struct Route {
    method: String,
    pattern: String,
    segments: Vec<Segment>,
    handler: Handler,
    auth_required: bool,
    static_count: usize,
    param_count: usize,
    has_proxy: bool,
    order: usize,
}

/// A matched route: the handler, the extracted path params, and whether the
/// auth gate applies.
pub struct RouteMatch {
    pub handler: Handler,
    pub params: BTreeMap<String, String>,
    pub auth_required: bool,
    pub pattern: String,
}

/// Pattern-compiling router. Built once at app construction and immutable
/// during serving.
///
/// Patterns are `/`-separated segments: literals, `{name}` params, and a
/// trailing `{name+}` proxy that captures the remaining segments joined by
/// `/`. `/:name` is accepted as an alias for `/{name}`.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route, silently ignoring unparseable patterns.
    pub fn add(&mut self, method: &str, pattern: &str, handler: Handler, auth_required: bool) {
        let _ = self.add_strict(method, pattern, handler, auth_required);
    }

    /// Register a route, rejecting unparseable patterns.
    pub fn add_strict(
        &mut self,
        method: &str,
        pattern: &str,
        handler: Handler,
        auth_required: bool,
    ) -> Result<(), Error> {
        let method = method.trim().to_uppercase();
        let compiled = parse_segments(&split_path(pattern))
            .ok_or_else(|| Error::bad_request(format!("invalid route pattern {pattern:?}")))?;

        self.routes.push(Route {
            method,
            pattern: compiled.canonical,
            segments: compiled.segments,
            handler,
            auth_required,
            static_count: compiled.static_count,
            param_count: compiled.param_count,
            has_proxy: compiled.has_proxy,
            order: self.routes.len(),
        });
        Ok(())
    }

    /// Match a request against the table.
    ///
    /// Returns the most specific route for the method, plus every method
    /// that matched the path (for `Allow` rendering on 405s).
    pub fn matches(&self, method: &str, path: &str) -> (Option<RouteMatch>, Vec<String>) {
        let method = method.trim().to_uppercase();
        let path_segments = split_path(&normalize_path(path));

        let mut allowed = Vec::new();
        let mut best: Option<(&Route, BTreeMap<String, String>)> = None;

        for route in &self.routes {
            let Some(params) = match_segments(&route.segments, &path_segments) else {
                continue;
            };
            allowed.push(route.method.clone());
            if route.method != method {
                continue;
            }
            let replace = match &best {
                None => true,
                Some((current, _)) => more_specific(route, current),
            };
            if replace {
                best = Some((route, params));
            }
        }

        let matched = best.map(|(route, params)| RouteMatch {
            handler: route.handler.clone(),
            params,
            auth_required: route.auth_required,
            pattern: route.pattern.clone(),
        });
        (matched, allowed)
    }

    /// Render the `Allow` header: unique upper-case methods, sorted,
    /// comma-space separated.
    pub fn format_allow_header(methods: &[String]) -> String {
        let mut unique: Vec<String> = methods
            .iter()
            .map(|m| m.trim().to_uppercase())
            .filter(|m| !m.is_empty())
            .collect();
        unique.sort();
        unique.dedup();
        unique.join(", ")
    }
}

fn split_path(path: &str) -> Vec<String> {
    let value = normalize_path(path);
    let trimmed = value.trim_start_matches('/');
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split('/').map(|s| s.to_string()).collect()
}

struct CompiledPattern {
    segments: Vec<Segment>,
    canonical: String,
    static_count: usize,
    param_count: usize,
    has_proxy: bool,
}

fn parse_segments(raw_segments: &[String]) -> Option<CompiledPattern> {
    let mut segments = Vec::new();
    let mut canonical = Vec::new();
    let mut static_count = 0;
    let mut param_count = 0;
    let mut has_proxy = false;

    for (idx, raw) in raw_segments.iter().enumerate() {
        let mut value = raw.trim().to_string();
        if value.is_empty() {
            return None;
        }

        if let Some(name) = value.strip_prefix(':') {
            if !name.is_empty() {
                value = format!("{{{name}}}");
            }
        }

        if value.len() > 2 && value.starts_with('{') && value.ends_with('}') {
            let inner = value[1..value.len() - 1].trim();
            if let Some(name) = inner.strip_suffix('+') {
                let name = name.trim();
                if name.is_empty() || idx != raw_segments.len() - 1 {
                    return None;
                }
                segments.push(Segment::Proxy(name.to_string()));
                canonical.push(format!("{{{name}+}}"));
                has_proxy = true;
                continue;
            }
            if inner.is_empty() {
                return None;
            }
            segments.push(Segment::Param(inner.to_string()));
            canonical.push(format!("{{{inner}}}"));
            param_count += 1;
            continue;
        }

        segments.push(Segment::Static(value.clone()));
        canonical.push(value);
        static_count += 1;
    }

    let canonical = if canonical.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", canonical.join("/"))
    };

    Some(CompiledPattern {
        segments,
        canonical,
        static_count,
        param_count,
        has_proxy,
    })
}

fn match_segments(
    pattern: &[Segment],
    path_segments: &[String],
) -> Option<BTreeMap<String, String>> {
    if pattern.is_empty() {
        return if path_segments.is_empty() {
            Some(BTreeMap::new())
        } else {
            None
        };
    }

    if let Segment::Proxy(name) = &pattern[pattern.len() - 1] {
        let prefix_len = pattern.len() - 1;
        if path_segments.len() <= prefix_len {
            return None;
        }
        let mut params = match_exact(&pattern[..prefix_len], &path_segments[..prefix_len])?;
        params.insert(name.clone(), path_segments[prefix_len..].join("/"));
        return Some(params);
    }

    if pattern.len() != path_segments.len() {
        return None;
    }
    match_exact(pattern, path_segments)
}

fn match_exact(pattern: &[Segment], path_segments: &[String]) -> Option<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();
    for (segment, value) in pattern.iter().zip(path_segments.iter()) {
        if value.is_empty() {
            return None;
        }
        match segment {
            Segment::Static(literal) => {
                if literal != value {
                    return None;
                }
            }
            Segment::Param(name) => {
                params.insert(name.clone(), value.clone());
            }
            Segment::Proxy(_) => return None,
        }
    }
    Some(params)
}

/// Lexicographic specificity: static count desc, param count desc, no-proxy
/// over proxy, more segments over fewer, earlier registration wins ties.
fn more_specific(a: &Route, b: &Route) -> bool {
    if a.static_count != b.static_count {
        return a.static_count > b.static_count;
    }
    if a.param_count != b.param_count {
        return a.param_count > b.param_count;
    }
    if a.has_proxy != b.has_proxy {
        return !a.has_proxy && b.has_proxy;
    }
    if a.segments.len() != b.segments.len() {
        return a.segments.len() > b.segments.len();
    }
    a.order < b.order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::handler_fn;
    use crate::response::text;

    fn handler() -> Handler {
        handler_fn(|_ctx| async { Ok(text(200, "ok")) })
    }

    #[test]
    fn static_route_matches_exactly() {
        let mut router = Router::new();
        router.add("GET", "/ping", handler(), false);
        let (matched, allowed) = router.matches("GET", "/ping");
        assert!(matched.is_some());
        assert_eq!(allowed, vec!["GET".to_string()]);
        assert!(router.matches("GET", "/ping/extra").0.is_none());
    }

    #[test]
    fn params_are_extracted() {
        let mut router = Router::new();
        router.add("GET", "/users/{id}", handler(), false);
        let (matched, _) = router.matches("GET", "/users/42");
        let matched = matched.unwrap();
        assert_eq!(matched.params.get("id"), Some(&"42".to_string()));
    }

    #[test]
    fn colon_alias_is_accepted() {
        let mut router = Router::new();
        router.add("GET", "/users/:id", handler(), false);
        let (matched, _) = router.matches("GET", "/users/7");
        let matched = matched.unwrap();
        assert_eq!(matched.params.get("id"), Some(&"7".to_string()));
        assert_eq!(matched.pattern, "/users/{id}");
    }

    #[test]
    fn proxy_captures_remaining_segments() {
        let mut router = Router::new();
        router.add("GET", "/{path+}", handler(), false);
        let (matched, _) = router.matches("GET", "/p/q/r");
        let matched = matched.unwrap();
        assert_eq!(matched.params.get("path"), Some(&"p/q/r".to_string()));
    }

    #[test]
    fn proxy_requires_at_least_one_segment() {
        let mut router = Router::new();
        router.add("GET", "/files/{path+}", handler(), false);
        assert!(router.matches("GET", "/files").0.is_none());
        assert!(router.matches("GET", "/files/a").0.is_some());
    }

    #[test]
    fn specificity_prefers_static_then_param_then_proxy() {
        let mut router = Router::new();
        router.add("GET", "/a/b", handler(), false);
        router.add("GET", "/a/{x}", handler(), false);
        router.add("GET", "/{y+}", handler(), false);

        let (matched, _) = router.matches("GET", "/a/b");
        assert_eq!(matched.unwrap().pattern, "/a/b");

        let (matched, _) = router.matches("GET", "/a/c");
        let matched = matched.unwrap();
        assert_eq!(matched.pattern, "/a/{x}");
        assert_eq!(matched.params.get("x"), Some(&"c".to_string()));

        let (matched, _) = router.matches("GET", "/p/q/r");
        let matched = matched.unwrap();
        assert_eq!(matched.pattern, "/{y+}");
        assert_eq!(matched.params.get("y"), Some(&"p/q/r".to_string()));
    }

    #[test]
    fn ties_break_by_registration_order() {
        let mut router = Router::new();
        router.add("GET", "/a/{x}", handler(), false);
        router.add("GET", "/a/{y}", handler(), false);
        let (matched, _) = router.matches("GET", "/a/1");
        assert_eq!(matched.unwrap().pattern, "/a/{x}");
    }

    #[test]
    fn method_mismatch_reports_allowed_methods() {
        let mut router = Router::new();
        router.add("GET", "/thing", handler(), false);
        router.add("post", "/thing", handler(), false);
        let (matched, allowed) = router.matches("DELETE", "/thing");
        assert!(matched.is_none());
        assert_eq!(Router::format_allow_header(&allowed), "GET, POST");
    }

    #[test]
    fn invalid_patterns_are_ignored_by_add() {
        let mut router = Router::new();
        router.add("GET", "/{}", handler(), false);
        router.add("GET", "/{p+}/x", handler(), false);
        assert!(router.matches("GET", "/anything").0.is_none());
    }

    #[test]
    fn add_strict_rejects_invalid_patterns() {
        let mut router = Router::new();
        assert!(router
            .add_strict("GET", "/{proxy+}/x", handler(), false)
            .is_err());
        assert!(router.add_strict("GET", "/ok/{id}", handler(), false).is_ok());
    }

    #[test]
    fn empty_path_segment_never_matches() {
        let mut router = Router::new();
        router.add("GET", "/a/{x}", handler(), false);
        assert!(router.matches("GET", "/a/").0.is_none());
    }

    #[test]
    fn root_pattern_matches_root_only() {
        let mut router = Router::new();
        router.add("GET", "/", handler(), false);
        assert!(router.matches("GET", "/").0.is_some());
        assert!(router.matches("GET", "/x").0.is_none());
    }
}
