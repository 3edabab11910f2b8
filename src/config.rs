//! Typed configuration, loaded once from the environment at [`crate::core::Core`]
//! construction time (spec §6, §10.2).

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::breaker::BreakerConfig;
use crate::error::CoreError;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub provider_concurrency: HashMap<String, usize>,
    pub provider_rpm: HashMap<String, u32>,
    pub max_inflight_per_tenant: usize,

    pub breaker: BreakerConfig,
    pub retry: RetryPolicy,

    pub inter_section_delay: Duration,

    pub fallback_chain_generate: Vec<String>,
    pub fallback_chain_cleanup: Vec<String>,

    pub max_input_tokens_generate: u32,
    pub max_output_tokens_generate: u32,
    pub max_input_tokens_cleanup: u32,
    pub max_output_tokens_cleanup: u32,

    pub fallback_on_quota: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider_concurrency: HashMap::new(),
            provider_rpm: HashMap::new(),
            max_inflight_per_tenant: 2,
            breaker: BreakerConfig::default(),
            retry: RetryPolicy::default(),
            inter_section_delay: Duration::from_secs_f64(2.0),
            fallback_chain_generate: Vec::new(),
            fallback_chain_cleanup: vec!["degraded".to_string()],
            max_input_tokens_generate: 6000,
            max_output_tokens_generate: 1400,
            max_input_tokens_cleanup: 3000,
            max_output_tokens_cleanup: 800,
            fallback_on_quota: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// spec's stated defaults for anything unset. Malformed values (e.g. a
    /// non-numeric `CB_FAILURES`) are rejected rather than silently
    /// ignored.
    pub fn from_env() -> Result<Self, CoreError> {
        let mut config = Config::default();

        if let Some(v) = parse_env_u32("CB_FAILURES")? {
            config.breaker.failures_threshold = v;
        }
        if let Some(v) = parse_env_u64("CB_WINDOW_SEC")? {
            config.breaker.window = Duration::from_secs(v);
        }
        if let Some(v) = parse_env_u64("CB_OPEN_SEC")? {
            config.breaker.open_duration = Duration::from_secs(v);
        }
        if let Some(v) = parse_env_u32("CB_HALF_OPEN_MAX_TRIALS")? {
            config.breaker.half_open_max_trials = v;
        }

        if let Some(v) = parse_env_f64("RETRY_JITTER")? {
            config.retry.jitter = v;
        }
        if let Some(v) = parse_env_f64("RETRY_CAP_SECONDS")? {
            config.retry.cap_seconds = v;
        }
        if let Some(v) = parse_env_u32("RATE_LIMIT_RETRIES")? {
            config.retry.max_rate_limited_retries = v;
        }
        if let Some(v) = parse_env_u32("TRANSIENT_RETRIES")? {
            config.retry.max_transient_retries = v;
        }

        if let Some(v) = parse_env_f64("INTER_SECTION_DELAY_S")? {
            config.inter_section_delay = Duration::from_secs_f64(v);
        }

        if let Some(v) = parse_env_usize("MAX_INFLIGHT_PER_TENANT")? {
            config.max_inflight_per_tenant = v;
        }

        if let Ok(raw) = env::var("FALLBACK_CHAIN_GENERATE") {
            config.fallback_chain_generate = parse_chain(&raw);
        }
        if let Ok(raw) = env::var("FALLBACK_CHAIN_CLEANUP") {
            config.fallback_chain_cleanup = parse_chain(&raw);
        }

        if let Some(v) = parse_env_u32("LLM_MAX_INPUT_TOKENS_GENERATE")? {
            config.max_input_tokens_generate = v;
        }
        if let Some(v) = parse_env_u32("LLM_MAX_OUTPUT_TOKENS_GENERATE")? {
            config.max_output_tokens_generate = v;
        }
        if let Some(v) = parse_env_u32("LLM_MAX_INPUT_TOKENS_CLEANUP")? {
            config.max_input_tokens_cleanup = v;
        }
        if let Some(v) = parse_env_u32("LLM_MAX_OUTPUT_TOKENS_CLEANUP")? {
            config.max_output_tokens_cleanup = v;
        }

        if let Ok(raw) = env::var("AI_FALLBACK_ON_QUOTA") {
            config.fallback_on_quota = parse_bool(&raw)
                .ok_or_else(|| CoreError::Configuration(format!("invalid boolean for AI_FALLBACK_ON_QUOTA: {raw}")))?;
        }

        Ok(config)
    }
}

/// Normalize a comma-separated provider chain: lowercase, trim, drop
/// empties, dedup preserving first occurrence, recognize `DEGRADED`
/// case-insensitively as the literal sentinel `degraded`.
pub fn parse_chain(raw: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for part in raw.split(',') {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        let normalized = if trimmed.eq_ignore_ascii_case("degraded") {
            "degraded".to_string()
        } else {
            trimmed.to_lowercase()
        };
        if seen.insert(normalized.clone()) {
            out.push(normalized);
        }
    }
    out
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_env_u32(name: &str) -> Result<Option<u32>, CoreError> {
    parse_env(name)
}

fn parse_env_u64(name: &str) -> Result<Option<u64>, CoreError> {
    parse_env(name)
}

fn parse_env_usize(name: &str) -> Result<Option<usize>, CoreError> {
    parse_env(name)
}

fn parse_env_f64(name: &str) -> Result<Option<f64>, CoreError> {
    parse_env(name)
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, CoreError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| CoreError::Configuration(format!("invalid value for {name}: {raw}"))),
        Err(_) => Ok(None),
    }
}
