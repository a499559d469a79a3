use serde::Deserialize;

use crate::app::{AppBuilder, CorsConfig, Limits};

fn env_trimmed(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_usize(key: &str) -> usize {
    env_trimmed(key)
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

fn env_bool(key: &str) -> bool {
    matches!(
        env_trimmed(key).as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("yes")
    )
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env_trimmed(key).map(|value| {
        value
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    })
}

/// Process-environment application configuration.
///
/// | Variable | Meaning |
/// |---|---|
/// | `APPTHEORY_TIER` | `p0` / `p1` / `p2` (default `p2`) |
/// | `APPTHEORY_MAX_REQUEST_BYTES` | request byte limit, `0` = off |
/// | `APPTHEORY_MAX_RESPONSE_BYTES` | response byte limit, `0` = off |
/// | `APPTHEORY_CORS_ALLOWED_ORIGINS` | comma list; unset = allow-all |
/// | `APPTHEORY_CORS_ALLOW_CREDENTIALS` | `true`/`1` |
/// | `APPTHEORY_CORS_ALLOW_HEADERS` | comma list |
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tier: String,
    pub limits: Limits,
    pub cors: Option<CorsConfig>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let allowed_origins = env_list("APPTHEORY_CORS_ALLOWED_ORIGINS");
        let allow_credentials = env_bool("APPTHEORY_CORS_ALLOW_CREDENTIALS");
        let allow_headers = env_list("APPTHEORY_CORS_ALLOW_HEADERS");
        let cors = if allowed_origins.is_some() || allow_credentials || allow_headers.is_some() {
            Some(CorsConfig {
                allowed_origins,
                allow_credentials,
                allow_headers,
            })
        } else {
            None
        };

        Self {
            tier: env_trimmed("APPTHEORY_TIER").unwrap_or_default(),
            limits: Limits {
                max_request_bytes: env_usize("APPTHEORY_MAX_REQUEST_BYTES"),
                max_response_bytes: env_usize("APPTHEORY_MAX_RESPONSE_BYTES"),
            },
            cors,
        }
    }
}

impl AppBuilder {
    /// Start a builder from process-environment configuration.
    pub fn from_env() -> Self {
        let config = AppConfig::from_env();
        let mut builder = AppBuilder::new().tier(&config.tier).limits(config.limits);
        if let Some(cors) = config.cors {
            builder = builder.cors(cors);
        }
        builder
    }
}

/// Install a global `tracing` subscriber honoring `RUST_LOG`; safe to call
/// more than once.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
