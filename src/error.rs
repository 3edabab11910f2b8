//! Closed error taxonomy (C1) and the classifier that maps raw provider
//! failures into it.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// The closed set of error classes the router reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    RateLimited,
    Transient,
    AuthError,
    Exhausted,
    Error,
}

/// Errors surfaced across the crate boundary.
///
/// Every failure a caller sees is one of these variants; lower-level
/// transport/parse failures are wrapped via `anyhow` at the provider-client
/// boundary and classified into this taxonomy before they reach callers of
/// the router or orchestrator.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("provider {provider} authentication failed: {message}")]
    Authentication { provider: String, message: String },

    #[error("provider {provider} quota exhausted ({error_type}): {message}")]
    QuotaExhausted {
        provider: String,
        message: String,
        error_type: QuotaErrorType,
        retry_after: Option<f64>,
    },

    #[error("provider {provider} transient failure: {message}")]
    Transient {
        provider: String,
        message: String,
        retry_after: Option<f64>,
    },

    #[error("generation cancelled")]
    Cancelled,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no provider available for phase {phase}")]
    NoProviderAvailable { phase: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Distinguishes a soft rate-limit from a hard quota/credit exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaErrorType {
    Exhausted,
    RateLimited,
}

impl std::fmt::Display for QuotaErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaErrorType::Exhausted => write!(f, "exhausted"),
            QuotaErrorType::RateLimited => write!(f, "rate_limited"),
        }
    }
}

static RETRY_AFTER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(retry after|retry in)\s+([0-9]+(?:\.[0-9]+)?)").unwrap()
});

/// Classify a provider failure into the closed taxonomy, applying the
/// ordered rules of the spec (first match wins).
pub fn classify(message: &str, status_code: Option<u16>) -> ErrorClass {
    let lower = message.to_lowercase();

    if matches!(status_code, Some(401) | Some(403))
        || lower.contains("invalid api key")
        || lower.contains("permission denied")
        || lower.contains("unauthorized")
        || lower.contains("forbidden")
    {
        return ErrorClass::AuthError;
    }

    if lower.contains("quota exceeded")
        || lower.contains("resource_exhausted")
        || lower.contains("insufficient_quota")
        || lower.contains("exceeded your current quota")
        || status_code == Some(402)
    {
        return ErrorClass::Exhausted;
    }

    if status_code == Some(429)
        || lower.contains("rate limit")
        || lower.contains("rate-limited")
        || lower.contains("retry after")
        || lower.contains("retry in")
    {
        return ErrorClass::RateLimited;
    }

    if matches!(status_code, Some(500) | Some(502) | Some(503) | Some(504))
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("read timed out")
        || lower.contains("connection reset")
        || lower.contains("sslv3_alert_bad_record_mac")
        || lower.contains("bad record mac")
        || lower.contains("ssl:")
    {
        return ErrorClass::Transient;
    }

    ErrorClass::Error
}

/// Extract a retry-after duration (in seconds) from a message, falling back
/// to the regex when no explicit value is supplied by the caller.
pub fn extract_retry_after_seconds(explicit: Option<f64>, message: &str) -> Option<f64> {
    if let Some(value) = explicit {
        if value > 0.0 {
            return Some(value);
        }
        return None;
    }
    let caps = RETRY_AFTER_RE.captures(message)?;
    let value: f64 = caps.get(2)?.as_str().parse().ok()?;
    if value > 0.0 {
        Some(value)
    } else {
        None
    }
}
