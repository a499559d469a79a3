use once_cell::sync::Lazy;
use regex::Regex;

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9-]+").unwrap());
static MULTI_DASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"-+").unwrap());

fn sanitize_part(value: &str) -> String {
    let out = value.trim().to_lowercase();
    if out.is_empty() {
        return String::new();
    }
    let out = out.replace(['_', ' '], "-");
    let out = NON_ALNUM.replace_all(&out, "-");
    let out = MULTI_DASH.replace_all(&out, "-");
    out.trim_matches('-').to_string()
}

/// Collapse stage aliases onto the canonical set.
pub fn normalize_stage(stage: &str) -> String {
    let value = stage.trim().to_lowercase();
    match value.as_str() {
        "prod" | "production" | "live" => "live".to_string(),
        "dev" | "development" => "dev".to_string(),
        "stg" | "stage" | "staging" => "stage".to_string(),
        "test" | "testing" => "test".to_string(),
        "local" => "local".to_string(),
        _ => sanitize_part(&value),
    }
}

/// `<app>[-<tenant>]-<stage>` with every part sanitized.
pub fn base_name(app_name: &str, stage: &str, tenant: &str) -> String {
    let app = sanitize_part(app_name);
    let tenant = sanitize_part(tenant);
    let stage = normalize_stage(stage);
    if tenant.is_empty() {
        format!("{app}-{stage}")
    } else {
        format!("{app}-{tenant}-{stage}")
    }
}

/// `<app>[-<tenant>]-<resource>-<stage>` with every part sanitized.
pub fn resource_name(app_name: &str, resource: &str, stage: &str, tenant: &str) -> String {
    let app = sanitize_part(app_name);
    let tenant = sanitize_part(tenant);
    let resource = sanitize_part(resource);
    let stage = normalize_stage(stage);
    if tenant.is_empty() {
        format!("{app}-{resource}-{stage}")
    } else {
        format!("{app}-{tenant}-{resource}-{stage}")
    }
}
