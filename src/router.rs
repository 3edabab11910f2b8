//! Provider router (C9): the central resilience state machine. Resolves a
//! candidate chain, walks it with retries and fallback, consults the
//! breaker, and reports structured incidents.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::breaker::CircuitBreaker;
use crate::cancellation::{sleep_cancellable, CancellationToken};
use crate::coordinator::ResourceCoordinator;
use crate::error::{classify, extract_retry_after_seconds, CoreError, ErrorClass, QuotaErrorType};
use crate::metrics::{ErrorEventKind, ProviderMetrics};
use crate::policy::PhasePolicyRegistry;
use crate::provider::ProviderClient;
use crate::types::{Incident, IncidentKind, LlmRequest, LlmResult, ResultStatus, SelectionMode, Severity};

const DEGRADED_SENTINEL: &str = "degraded";

/// Abstracts the passage of time so tests can run retry/backoff sequences
/// without real wall-clock delays while still asserting exact durations.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Sleep for `duration`, returning `true` if cut short by cancellation.
    async fn sleep(&self, duration: Duration, token: &CancellationToken) -> bool;
}

pub struct RealClock;

#[async_trait]
impl Clock for RealClock {
    async fn sleep(&self, duration: Duration, token: &CancellationToken) -> bool {
        sleep_cancellable(duration, token).await
    }
}

/// Forbidden tokens stripped (along with markdown noise) from the
/// degraded-mode local sanitization of request context.
const DEGRADED_FORBIDDEN_TOKENS: &[&str] = &["FIGURA DE EJEMPLO", "TABLA DE EJEMPLO"];

pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn ProviderClient>>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<ProviderMetrics>,
    coordinator: Arc<ResourceCoordinator>,
    phases: Arc<PhasePolicyRegistry>,
    retry: crate::retry::RetryPolicy,
    clock: Arc<dyn Clock>,
    rng: Mutex<Box<dyn FnMut() -> f64 + Send>>,
    generate_timeout: Duration,
}

impl ProviderRouter {
    pub fn new(
        providers: HashMap<String, Arc<dyn ProviderClient>>,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<ProviderMetrics>,
        coordinator: Arc<ResourceCoordinator>,
        phases: Arc<PhasePolicyRegistry>,
        retry: crate::retry::RetryPolicy,
    ) -> Self {
        Self {
            providers,
            breaker,
            metrics,
            coordinator,
            phases,
            retry,
            clock: Arc::new(RealClock),
            rng: Mutex::new(Box::new(crate::retry::fastrand_source())),
            generate_timeout: Duration::from_secs(45),
        }
    }

    /// Override the clock and RNG, for deterministic tests.
    pub fn with_clock_and_rng(mut self, clock: Arc<dyn Clock>, rng: Box<dyn FnMut() -> f64 + Send>) -> Self {
        self.clock = clock;
        self.rng = Mutex::new(rng);
        self
    }

    fn resolve_chain(&self, request: &LlmRequest, policy: &crate::policy::PhasePolicy) -> Vec<String> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();

        let mut push = |id: &str, seen: &mut HashSet<String>, chain: &mut Vec<String>| {
            let normalized = id.to_lowercase();
            if seen.insert(normalized.clone()) {
                chain.push(normalized);
            }
        };

        if let Some(preferred) = &request.preferred_provider {
            push(preferred, &mut seen, &mut chain);
        }
        for candidate in &request.candidate_providers {
            push(candidate, &mut seen, &mut chain);
        }
        if request.selection_mode == SelectionMode::Auto {
            for candidate in &policy.fallback_chain {
                if candidate == DEGRADED_SENTINEL {
                    continue;
                }
                push(candidate, &mut seen, &mut chain);
            }
        }
        if policy.allow_degraded && !seen.contains(DEGRADED_SENTINEL) {
            chain.push(DEGRADED_SENTINEL.to_string());
        }

        // Fixed mode already skipped injecting the phase's automatic
        // fallback chain above, so `chain` here is just the caller-supplied
        // primary plus any explicit contingency candidates (+ degraded).
        // Whether a contingency candidate is actually tried is enforced by
        // the terminal-error check after the primary's first attempt, not
        // by trimming the chain itself.
        chain
    }

    fn budget_prompt(prompt: &str, context: &str, max_input_tokens: u32, max_output_tokens: u32) -> String {
        let combined = format!("{prompt}{context}");
        let budget = max_input_tokens.saturating_sub(max_output_tokens);
        let estimated = (combined.chars().count() as u64) / 4;
        if estimated <= budget as u64 {
            return combined;
        }
        let char_budget = ((budget as usize) * 4).max(400);
        combined.chars().take(char_budget).collect()
    }

    fn degraded_cleanup_text(context: &str) -> String {
        let mut text = context.replace("```", "");
        text = text.replace('|', "");
        let mut lines: Vec<String> = Vec::new();
        for line in text.lines() {
            let mut trimmed = line.trim_start();
            for marker in ["- ", "* ", "+ "] {
                if let Some(stripped) = trimmed.strip_prefix(marker) {
                    trimmed = stripped;
                }
            }
            if DEGRADED_FORBIDDEN_TOKENS.iter().any(|tok| trimmed.to_uppercase().contains(tok)) {
                continue;
            }
            lines.push(trimmed.to_string());
        }
        lines.join("\n").trim().to_string()
    }

    fn incident(
        severity: Severity,
        phase: &str,
        provider: &str,
        message: &str,
        request: &LlmRequest,
        kind: IncidentKind,
    ) -> Incident {
        Incident {
            timestamp: chrono::Utc::now(),
            severity,
            phase: phase.to_string(),
            provider: provider.to_string(),
            message: message.to_string(),
            section_id: request.section_id.clone(),
            section_path: request.section_path.clone(),
            kind,
        }
    }

    /// Run one logical LLM call through the full resilience pipeline.
    pub async fn call_llm_with_resilience(
        &self,
        request: &LlmRequest,
        disabled_for_job: &mut HashSet<String>,
        cancel: &CancellationToken,
    ) -> Result<LlmResult, CoreError> {
        let policy = self
            .phases
            .get(&request.phase)
            .ok_or_else(|| CoreError::Configuration(format!("unknown phase: {}", request.phase)))?
            .clone();

        let chain = self.resolve_chain(request, &policy);
        let mut incidents = Vec::new();
        let mut last_error: Option<CoreError> = None;
        let mut total_retries = 0u32;

        for (position, candidate) in chain.iter().enumerate() {
            if candidate == DEGRADED_SENTINEL {
                if policy.allow_degraded && !policy.critical {
                    incidents.push(Self::incident(
                        Severity::Warning,
                        &request.phase,
                        DEGRADED_SENTINEL,
                        "falling back to local degraded sanitization",
                        request,
                        IncidentKind::Degraded,
                    ));
                    return Ok(LlmResult {
                        content: Self::degraded_cleanup_text(&request.context),
                        provider: DEGRADED_SENTINEL.to_string(),
                        status: ResultStatus::Degraded,
                        incidents,
                        retry_count: total_retries,
                    });
                }
                continue;
            }

            if disabled_for_job.contains(candidate) {
                continue;
            }
            let Some(provider) = self.providers.get(candidate) else { continue };
            if !provider.is_configured() {
                continue;
            }

            if !self.breaker.before_call(candidate).await {
                incidents.push(Self::incident(
                    Severity::Warning,
                    &request.phase,
                    candidate,
                    "circuit open",
                    request,
                    IncidentKind::CircuitOpen,
                ));
                continue;
            }

            let is_primary_first_attempt = position == 0 && request.selection_mode == SelectionMode::Fixed;
            let mut attempt = 0u32;
            let mut terminal_class = None;

            loop {
                if cancel.is_cancelled() {
                    return Err(CoreError::Cancelled);
                }

                let bounded_prompt =
                    Self::budget_prompt(&request.prompt, &request.context, policy.max_input_tokens, policy.max_output_tokens);

                let guard = self.coordinator.acquire(candidate, &request.tenant_id, cancel).await;
                let Some(guard) = guard else {
                    return Err(CoreError::Cancelled);
                };

                let started = std::time::Instant::now();
                let outcome = provider.generate(&bounded_prompt, self.generate_timeout, None).await;
                drop(guard);
                let latency_ms = started.elapsed().as_millis() as u64;

                match outcome {
                    Ok(content) => {
                        self.breaker.on_success(candidate).await;
                        self.metrics.record_success(candidate, latency_ms, &bounded_prompt, &content).await;
                        log::info!(
                            "provider={} phase={} section_id={:?} status=200 latency_ms={} retry_count={} tenant_id={}",
                            candidate,
                            request.phase,
                            request.section_id,
                            latency_ms,
                            attempt,
                            request.tenant_id
                        );
                        total_retries += attempt;
                        return Ok(LlmResult {
                            content,
                            provider: candidate.clone(),
                            status: ResultStatus::Ok,
                            incidents,
                            retry_count: total_retries,
                        });
                    }
                    Err(err) => {
                        let (class, message, status_code, explicit_retry_after) = describe_error(&err);
                        self.breaker.on_failure(candidate, &message).await;
                        let retry_after = extract_retry_after_seconds(explicit_retry_after, &message);
                        let error_kind = match class {
                            ErrorClass::RateLimited => Some(ErrorEventKind::RateLimit),
                            ErrorClass::Exhausted => Some(ErrorEventKind::Exhausted),
                            ErrorClass::Transient if message.to_lowercase().contains("timeout") => {
                                Some(ErrorEventKind::Timeout)
                            }
                            _ => None,
                        };
                        match class {
                            ErrorClass::RateLimited => {
                                self.metrics.record_rate_limited(candidate, retry_after.unwrap_or(1.0), &message).await;
                            }
                            ErrorClass::Exhausted => {
                                self.metrics.record_exhausted(candidate, &message).await;
                            }
                            _ => {
                                self.metrics.record_error(candidate, &message, Some(latency_ms), error_kind).await;
                            }
                        }

                        let severity = if policy.critical { Severity::Error } else { Severity::Warning };
                        incidents.push(Self::incident(severity, &request.phase, candidate, &message, request, IncidentKind::Provider));
                        log::warn!("provider={} phase={} error_class={:?} message={}", candidate, request.phase, class, message);

                        terminal_class = Some(class);
                        let _ = status_code;

                        if matches!(class, ErrorClass::Exhausted | ErrorClass::AuthError) {
                            disabled_for_job.insert(candidate.clone());
                            last_error = Some(err);
                            break;
                        }

                        if self.retry.should_retry(class, attempt) {
                            let mut rng = self.rng.lock().await;
                            let delay = self.retry.compute_backoff(attempt, retry_after, &mut *rng);
                            drop(rng);
                            incidents.push(Self::incident(
                                Severity::Warning,
                                &request.phase,
                                candidate,
                                &format!("retrying in {delay:.2}s"),
                                request,
                                IncidentKind::Retry,
                            ));
                            if self.clock.sleep(Duration::from_secs_f64(delay), cancel).await {
                                return Err(CoreError::Cancelled);
                            }
                            attempt += 1;
                            continue;
                        }

                        last_error = Some(err);
                        break;
                    }
                }
            }

            total_retries += attempt;

            if is_primary_first_attempt {
                let non_fallback_terminal = !matches!(terminal_class, Some(ErrorClass::Transient) | Some(ErrorClass::RateLimited));
                if non_fallback_terminal {
                    break;
                }
            }
        }

        if policy.allow_degraded && !policy.critical {
            incidents.push(Self::incident(
                Severity::Warning,
                &request.phase,
                DEGRADED_SENTINEL,
                "chain exhausted, falling back to degraded",
                request,
                IncidentKind::Degraded,
            ));
            return Ok(LlmResult {
                content: Self::degraded_cleanup_text(&request.context),
                provider: DEGRADED_SENTINEL.to_string(),
                status: ResultStatus::Degraded,
                incidents,
                retry_count: total_retries,
            });
        }

        match last_error {
            Some(err) => Err(err),
            None => Err(CoreError::NoProviderAvailable { phase: request.phase.clone() }),
        }
    }
}

fn describe_error(err: &CoreError) -> (ErrorClass, String, Option<u16>, Option<f64>) {
    match err {
        CoreError::Authentication { message, .. } => (ErrorClass::AuthError, message.clone(), None, None),
        CoreError::QuotaExhausted { message, error_type, retry_after, .. } => {
            let class = match error_type {
                QuotaErrorType::Exhausted => ErrorClass::Exhausted,
                QuotaErrorType::RateLimited => ErrorClass::RateLimited,
            };
            (class, message.clone(), None, *retry_after)
        }
        CoreError::Transient { message, retry_after, .. } => (ErrorClass::Transient, message.clone(), None, *retry_after),
        CoreError::Cancelled => (ErrorClass::Error, "cancelled".to_string(), None, None),
        CoreError::Validation(message) => (ErrorClass::Error, message.clone(), None, None),
        CoreError::NoProviderAvailable { phase } => (ErrorClass::Error, format!("no provider available for {phase}"), None, None),
        CoreError::Configuration(message) => (ErrorClass::Error, message.clone(), None, None),
        CoreError::Other(inner) => {
            let message = inner.to_string();
            (classify(&message, None), message, None, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::provider::scripted::{Scripted, ScriptedProvider};
    use std::collections::HashMap as Map;

    fn router_with(providers: Vec<(&str, Arc<dyn ProviderClient>)>, config: &Config) -> ProviderRouter {
        let mut map = Map::new();
        for (id, provider) in providers {
            map.insert(id.to_string(), provider);
        }
        ProviderRouter::new(
            map,
            Arc::new(CircuitBreaker::new(config.breaker)),
            Arc::new(ProviderMetrics::new()),
            Arc::new(ResourceCoordinator::new(config.provider_concurrency.clone(), config.provider_rpm.clone(), 0)),
            Arc::new(PhasePolicyRegistry::from_config(config)),
            crate::retry::RetryPolicy { jitter: 0.0, ..config.retry },
        )
        .with_clock_and_rng(Arc::new(NoopClock), Box::new(|| 0.5))
    }

    struct NoopClock;
    #[async_trait]
    impl Clock for NoopClock {
        async fn sleep(&self, _duration: Duration, token: &CancellationToken) -> bool {
            token.is_cancelled()
        }
    }

    fn base_request(phase: &str) -> LlmRequest {
        LlmRequest {
            phase: phase.to_string(),
            prompt: "write something".to_string(),
            context: String::new(),
            section_id: Some("sec-0001".to_string()),
            section_path: Some("Chapter 1".to_string()),
            tenant_id: "tenant-a".to_string(),
            preferred_provider: None,
            candidate_providers: vec!["primary".to_string(), "fallback".to_string()],
            selection_mode: SelectionMode::Auto,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn happy_path_uses_primary_with_no_incidents() {
        let mut config = Config::default();
        config.fallback_chain_generate = vec!["primary".to_string(), "fallback".to_string()];
        let primary = Arc::new(ScriptedProvider::new("primary", vec![Scripted::Ok("Content 1".into())]));
        let router = router_with(
            vec![(
                "primary",
                primary.clone() as Arc<dyn ProviderClient>,
            )],
            &config,
        );
        let cancel = CancellationToken::new();
        let mut disabled = HashSet::new();
        let result = router
            .call_llm_with_resilience(&base_request("generate_section"), &mut disabled, &cancel)
            .await
            .unwrap();
        assert_eq!(result.content, "Content 1");
        assert_eq!(result.provider, "primary");
        assert!(result.incidents.is_empty());
        assert_eq!(primary.call_count(), 1);
    }

    #[tokio::test]
    async fn quota_exhausted_falls_back_once() {
        let mut config = Config::default();
        config.fallback_chain_generate = vec!["primary".to_string(), "fallback".to_string()];
        let primary = Arc::new(ScriptedProvider::new(
            "primary",
            vec![Scripted::Err(CoreError::QuotaExhausted {
                provider: "primary".to_string(),
                message: "quota exceeded".to_string(),
                error_type: QuotaErrorType::Exhausted,
                retry_after: None,
            })],
        ));
        let fallback = Arc::new(ScriptedProvider::new("fallback", vec![Scripted::Ok("Fallback content.".into())]));
        let router = router_with(
            vec![
                ("primary", primary.clone() as Arc<dyn ProviderClient>),
                ("fallback", fallback.clone() as Arc<dyn ProviderClient>),
            ],
            &config,
        );
        let cancel = CancellationToken::new();
        let mut disabled = HashSet::new();
        let result = router
            .call_llm_with_resilience(&base_request("generate_section"), &mut disabled, &cancel)
            .await
            .unwrap();
        assert_eq!(result.content, "Fallback content.");
        assert_eq!(primary.call_count(), 1);
        assert_eq!(fallback.call_count(), 1);
        assert_eq!(result.incidents.len(), 1);
        assert_eq!(result.incidents[0].severity, Severity::Error);
    }

    #[tokio::test]
    async fn fixed_mode_does_not_fall_back_on_non_transient_error() {
        let mut config = Config::default();
        config.retry.max_transient_retries = 1;
        let primary = Arc::new(ScriptedProvider::new(
            "primary",
            vec![
                Scripted::Err(CoreError::Transient {
                    provider: "primary".to_string(),
                    message: "SSLV3_ALERT_BAD_RECORD_MAC".to_string(),
                    retry_after: None,
                }),
                Scripted::Err(CoreError::Transient {
                    provider: "primary".to_string(),
                    message: "SSLV3_ALERT_BAD_RECORD_MAC".to_string(),
                    retry_after: None,
                }),
            ],
        ));
        let fallback = Arc::new(ScriptedProvider::new("fallback", vec![Scripted::Ok("unused".into())]));
        let router = router_with(
            vec![
                ("primary", primary.clone() as Arc<dyn ProviderClient>),
                ("fallback", fallback.clone() as Arc<dyn ProviderClient>),
            ],
            &config,
        );
        let mut request = base_request("generate_section");
        request.selection_mode = SelectionMode::Fixed;
        request.candidate_providers = vec!["primary".to_string()];
        let cancel = CancellationToken::new();
        let mut disabled = HashSet::new();
        let result = router.call_llm_with_resilience(&request, &mut disabled, &cancel).await;
        assert!(result.is_err());
        assert_eq!(primary.call_count(), 2);
        assert_eq!(fallback.call_count(), 0);
    }

    #[test]
    fn budget_prompt_truncates_when_over_budget() {
        let long_context = "x".repeat(10_000);
        let bounded = ProviderRouter::budget_prompt("prompt", &long_context, 100, 50);
        assert!(bounded.chars().count() <= 400.max(50 * 4));
    }

    #[test]
    fn degraded_cleanup_strips_markup_and_forbidden_tokens() {
        let context = "```\n- FIGURA DE EJEMPLO\n| a | b |\nreal content\n```";
        let cleaned = ProviderRouter::degraded_cleanup_text(context);
        assert!(!cleaned.to_uppercase().contains("FIGURA DE EJEMPLO"));
        assert!(!cleaned.contains('|'));
        assert!(cleaned.contains("real content"));
    }
}
