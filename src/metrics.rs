//! Provider metrics (C7): in-memory health state, probe snapshots, and
//! quota/rate window tracking.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const ONE_MINUTE: Duration = Duration::from_secs(60);
const FIFTEEN_MINUTES: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorEventKind {
    Timeout,
    RateLimit,
    Exhausted,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Unknown,
    Exhausted,
    RateLimited,
    Degraded,
    Ok,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Ok,
    RateLimited,
    Exhausted,
    AuthError,
    Error,
    Unverified,
}

#[derive(Debug, Clone)]
pub struct ProbeSnapshot {
    pub status: ProbeStatus,
    pub detail: String,
    pub retry_after_seconds: Option<f64>,
    pub latency_ms: Option<u64>,
}

struct QuotaCounters {
    month_key: String,
    tokens: u64,
    requests: u64,
}

struct ProviderRuntime {
    request_times: VecDeque<Instant>,
    error_events: VecDeque<(Instant, ErrorEventKind)>,
    ema_latency_ms: Option<f64>,
    rate_limited_until: Option<Instant>,
    exhausted: bool,
    quota: QuotaCounters,
    last_probe: Option<ProbeSnapshot>,
}

impl ProviderRuntime {
    fn new() -> Self {
        Self {
            request_times: VecDeque::new(),
            error_events: VecDeque::new(),
            ema_latency_ms: None,
            rate_limited_until: None,
            exhausted: false,
            quota: QuotaCounters { month_key: current_month_key(), tokens: 0, requests: 0 },
            last_probe: None,
        }
    }

    fn trim(&mut self, now: Instant) {
        while let Some(front) = self.request_times.front() {
            if now.duration_since(*front) >= ONE_MINUTE {
                self.request_times.pop_front();
            } else {
                break;
            }
        }
        while let Some((ts, _)) = self.error_events.front() {
            if now.duration_since(*ts) >= FIFTEEN_MINUTES {
                self.error_events.pop_front();
            } else {
                break;
            }
        }
        let month_key = current_month_key();
        if month_key != self.quota.month_key {
            self.quota.month_key = month_key;
            self.quota.tokens = 0;
            self.quota.requests = 0;
        }
    }

    fn timeout_errors_last_15m(&self) -> usize {
        self.error_events.iter().filter(|(_, kind)| *kind == ErrorEventKind::Timeout).count()
    }
}

fn current_month_key() -> String {
    let now = chrono::Utc::now();
    format!("{}-{:02}", now.format("%Y"), now.format("%m"))
}

/// Estimate token count from character count, rounding up. This is
/// intentionally the metrics service's own local computation: it is
/// answering "how much quota to charge", which wants to round up, whereas
/// the router's budgeter (§4.9) wants to round down to stay under budget.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4).max(if chars == 0 { 0 } else { 1 })
}

pub struct ProviderMetrics {
    providers: Mutex<HashMap<String, ProviderRuntime>>,
}

impl ProviderMetrics {
    pub fn new() -> Self {
        Self { providers: Mutex::new(HashMap::new()) }
    }

    pub async fn record_success(&self, provider: &str, latency_ms: u64, prompt_text: &str, response_text: &str) {
        let now = Instant::now();
        let mut providers = self.providers.lock().await;
        let entry = providers.entry(provider.to_string()).or_insert_with(ProviderRuntime::new);
        entry.trim(now);
        entry.request_times.push_back(now);
        entry.ema_latency_ms = Some(match entry.ema_latency_ms {
            Some(ema) => 0.7 * ema + 0.3 * (latency_ms as f64),
            None => latency_ms as f64,
        });
        entry.quota.tokens += estimate_tokens(prompt_text) + estimate_tokens(response_text);
        entry.quota.requests += 1;
        entry.exhausted = false;
    }

    pub async fn record_error(&self, provider: &str, _message: &str, latency_ms: Option<u64>, kind: Option<ErrorEventKind>) {
        let now = Instant::now();
        let mut providers = self.providers.lock().await;
        let entry = providers.entry(provider.to_string()).or_insert_with(ProviderRuntime::new);
        entry.trim(now);
        entry.error_events.push_back((now, kind.unwrap_or(ErrorEventKind::Other)));
        if let Some(latency) = latency_ms {
            entry.ema_latency_ms = Some(match entry.ema_latency_ms {
                Some(ema) => 0.8 * ema + 0.2 * (latency as f64),
                None => latency as f64,
            });
        }
    }

    pub async fn record_rate_limited(&self, provider: &str, retry_after_seconds: f64, _message: &str) {
        let now = Instant::now();
        let mut providers = self.providers.lock().await;
        let entry = providers.entry(provider.to_string()).or_insert_with(ProviderRuntime::new);
        entry.trim(now);
        entry.rate_limited_until = Some(now + Duration::from_secs_f64(retry_after_seconds.max(1.0)));
        entry.error_events.push_back((now, ErrorEventKind::RateLimit));
    }

    pub async fn record_exhausted(&self, provider: &str, _message: &str) {
        let now = Instant::now();
        let mut providers = self.providers.lock().await;
        let entry = providers.entry(provider.to_string()).or_insert_with(ProviderRuntime::new);
        entry.trim(now);
        entry.exhausted = true;
        entry.error_events.push_back((now, ErrorEventKind::Exhausted));
    }

    /// Record a probe observation and reconcile runtime flags, exactly
    /// once: this method is the single source of truth for a probe
    /// outcome and must never be paired with a second `record_*` call for
    /// the same observation.
    pub async fn record_probe(
        &self,
        provider: &str,
        status: ProbeStatus,
        detail: &str,
        retry_after_seconds: Option<f64>,
        latency_ms: Option<u64>,
    ) {
        let now = Instant::now();
        let mut providers = self.providers.lock().await;
        let entry = providers.entry(provider.to_string()).or_insert_with(ProviderRuntime::new);
        entry.trim(now);

        match status {
            ProbeStatus::Ok => {
                entry.exhausted = false;
                entry.rate_limited_until = None;
            }
            ProbeStatus::Exhausted => {
                entry.exhausted = true;
            }
            ProbeStatus::RateLimited => {
                let wait = retry_after_seconds.unwrap_or(1.0).max(1.0);
                entry.rate_limited_until = Some(now + Duration::from_secs_f64(wait));
            }
            ProbeStatus::AuthError | ProbeStatus::Error | ProbeStatus::Unverified => {}
        }

        entry.last_probe = Some(ProbeSnapshot {
            status,
            detail: detail.to_string(),
            retry_after_seconds,
            latency_ms,
        });
    }

    /// Build the health snapshot for a provider's status payload.
    pub async fn payload_for_provider(&self, provider: &str, configured: bool) -> ProviderHealthPayload {
        let now = Instant::now();
        let mut providers = self.providers.lock().await;
        let entry = providers.entry(provider.to_string()).or_insert_with(ProviderRuntime::new);
        entry.trim(now);

        let health = if !configured {
            Health::Unknown
        } else if entry.exhausted {
            Health::Exhausted
        } else if entry.rate_limited_until.map(|until| now < until).unwrap_or(false) {
            Health::RateLimited
        } else if entry.timeout_errors_last_15m() >= 3 {
            Health::Degraded
        } else {
            Health::Ok
        };

        ProviderHealthPayload {
            health,
            avg_latency_ms: entry.ema_latency_ms,
            errors_last_15m: entry.error_events.len(),
            quota_tokens_used: entry.quota.tokens,
            quota_requests_used: entry.quota.requests,
            last_probe_detail: entry.last_probe.as_ref().map(|p| p.detail.clone()),
        }
    }
}

impl Default for ProviderMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct ProviderHealthPayload {
    pub health: Health,
    pub avg_latency_ms: Option<f64>,
    pub errors_last_15m: usize,
    pub quota_tokens_used: u64,
    pub quota_requests_used: u64,
    pub last_probe_detail: Option<String>,
}
