//! Pure utility surfaces shared across AppTheory services: log
//! sanitization, cache-control helpers, resource naming, and edge header
//! parsing.

pub mod cache;
pub mod cloudfront;
pub mod naming;
pub mod sanitization;

pub use cache::{
    cache_control_isr, cache_control_ssg, cache_control_ssr, etag, matches_if_none_match,
};
pub use cloudfront::{client_ip, origin_url};
pub use naming::{base_name, normalize_stage, resource_name};
pub use sanitization::{
    sanitize_field_value, sanitize_json, sanitize_log_string, sanitize_xml,
    XmlSanitizationPattern, PAYMENT_XML_PATTERNS,
};
