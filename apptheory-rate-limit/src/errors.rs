use crate::store::StoreError;

/// Failure classification exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InternalError,
    RateLimitExceeded,
    InvalidInput,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InternalError => "internal_error",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::InvalidInput => "invalid_input",
        }
    }
}

/// Limiter error wrapping an optional store-level cause.
#[derive(Debug)]
pub struct RateLimiterError {
    pub kind: ErrorKind,
    pub message: String,
    pub source: Option<StoreError>,
}

impl std::fmt::Display for RateLimiterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.message, source),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RateLimiterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source as &(dyn std::error::Error + 'static))
    }
}

pub fn new_error(kind: ErrorKind, message: impl Into<String>) -> RateLimiterError {
    RateLimiterError {
        kind,
        message: message.into(),
        source: None,
    }
}

pub fn wrap_error(
    source: StoreError,
    kind: ErrorKind,
    message: impl Into<String>,
) -> RateLimiterError {
    RateLimiterError {
        kind,
        message: message.into(),
        source: Some(source),
    }
}
