//! Provider client abstraction (C6): the uniform contract the router
//! consumes remote LLMs through, plus one concrete HTTP-based
//! implementation and a scriptable in-memory client used by tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CoreError;

/// Minimal, low-cost health check result. Never throws — callers branch on
/// `status`.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub status: crate::metrics::ProbeStatus,
    pub detail: String,
    pub retry_after_seconds: Option<f64>,
    pub latency_ms: Option<u64>,
}

/// Uniform interface to a remote LLM provider. Implementations vary per
/// provider but all route failures through [`CoreError`]'s
/// `Authentication` / `QuotaExhausted` / `Transient` / `Other` variants so
/// the router can classify them (C1) uniformly.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Stable identifier used throughout the router, metrics, and breaker.
    fn id(&self) -> &str;

    /// True when credentials for this provider are present.
    fn is_configured(&self) -> bool;

    /// Synchronous (from the caller's perspective) text generation.
    async fn generate(&self, prompt: &str, timeout: Duration, model: Option<&str>) -> Result<String, CoreError>;

    /// A minimal real request used for health display.
    async fn probe(&self, timeout: Duration, model: Option<&str>) -> ProbeResult;
}

/// Configuration for the generic HTTP client, sufficient for any provider
/// speaking an OpenAI-compatible chat-completions wire format.
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub id: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub default_model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// A generic HTTP-based client speaking an OpenAI-compatible
/// chat-completions endpoint. Additional provider-specific clients can be
/// added against the same [`ProviderClient`] trait without touching the
/// router.
pub struct HttpProviderClient {
    config: HttpProviderConfig,
    http: reqwest::Client,
}

impl HttpProviderClient {
    pub fn new(config: HttpProviderConfig) -> Self {
        Self { config, http: reqwest::Client::new() }
    }

    fn auth_header_value(&self) -> Option<String> {
        self.config.api_key.as_ref().map(|key| format!("Bearer {key}"))
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    async fn generate(&self, prompt: &str, timeout: Duration, model: Option<&str>) -> Result<String, CoreError> {
        if !self.is_configured() {
            return Err(CoreError::Configuration(format!("{} is not configured", self.config.id)));
        }
        let model = model.unwrap_or(&self.config.default_model);
        let body = ChatRequest {
            model,
            messages: vec![ChatMessage { role: "user".to_string(), content: prompt.to_string() }],
            max_tokens: None,
        };

        let mut request = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .timeout(timeout)
            .json(&body);
        if let Some(header) = self.auth_header_value() {
            request = request.header("Authorization", header);
        }

        let response = request.send().await.map_err(|err| classify_transport_error(&self.config.id, err))?;
        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(classify_http_error(&self.config.id, status_code, &text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| CoreError::Other(anyhow::anyhow!("{}: malformed response: {err}", self.config.id)))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| CoreError::Other(anyhow::anyhow!("{}: empty choices list", self.config.id)))
    }

    async fn probe(&self, timeout: Duration, model: Option<&str>) -> ProbeResult {
        match self.generate("ping", timeout, model).await {
            Ok(_) => ProbeResult {
                status: crate::metrics::ProbeStatus::Ok,
                detail: "ok".to_string(),
                retry_after_seconds: None,
                latency_ms: None,
            },
            Err(CoreError::Authentication { message, .. }) => ProbeResult {
                status: crate::metrics::ProbeStatus::AuthError,
                detail: message,
                retry_after_seconds: None,
                latency_ms: None,
            },
            Err(CoreError::QuotaExhausted { message, retry_after, error_type, .. }) => ProbeResult {
                status: match error_type {
                    crate::error::QuotaErrorType::Exhausted => crate::metrics::ProbeStatus::Exhausted,
                    crate::error::QuotaErrorType::RateLimited => crate::metrics::ProbeStatus::RateLimited,
                },
                detail: message,
                retry_after_seconds: retry_after,
                latency_ms: None,
            },
            Err(CoreError::Transient { message, retry_after, .. }) => ProbeResult {
                status: crate::metrics::ProbeStatus::Error,
                detail: message,
                retry_after_seconds: retry_after,
                latency_ms: None,
            },
            Err(other) => ProbeResult {
                status: crate::metrics::ProbeStatus::Error,
                detail: other.to_string(),
                retry_after_seconds: None,
                latency_ms: None,
            },
        }
    }
}

fn classify_transport_error(provider: &str, err: reqwest::Error) -> CoreError {
    let message = err.to_string();
    match crate::error::classify(&message, None) {
        crate::error::ErrorClass::Transient => {
            CoreError::Transient { provider: provider.to_string(), message, retry_after: None }
        }
        _ => CoreError::Other(anyhow::anyhow!("{provider}: {message}")),
    }
}

fn classify_http_error(provider: &str, status_code: u16, body: &str) -> CoreError {
    let retry_after = crate::error::extract_retry_after_seconds(None, body);
    match crate::error::classify(body, Some(status_code)) {
        crate::error::ErrorClass::AuthError => {
            CoreError::Authentication { provider: provider.to_string(), message: body.to_string() }
        }
        crate::error::ErrorClass::Exhausted => CoreError::QuotaExhausted {
            provider: provider.to_string(),
            message: body.to_string(),
            error_type: crate::error::QuotaErrorType::Exhausted,
            retry_after,
        },
        crate::error::ErrorClass::RateLimited => CoreError::QuotaExhausted {
            provider: provider.to_string(),
            message: body.to_string(),
            error_type: crate::error::QuotaErrorType::RateLimited,
            retry_after,
        },
        crate::error::ErrorClass::Transient => {
            CoreError::Transient { provider: provider.to_string(), message: body.to_string(), retry_after }
        }
        crate::error::ErrorClass::Error => {
            CoreError::Other(anyhow::anyhow!("{provider}: http {status_code}: {body}"))
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod scripted {
    //! An in-memory, scriptable [`ProviderClient`] used throughout the
    //! test suite so no network access is required.
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    pub enum Scripted {
        Ok(String),
        Err(CoreError),
    }

    pub struct ScriptedProvider {
        id: String,
        configured: bool,
        script: Mutex<Vec<Scripted>>,
        call_count: AtomicUsize,
    }

    impl ScriptedProvider {
        pub fn new(id: &str, script: Vec<Scripted>) -> Self {
            Self { id: id.to_string(), configured: true, script: Mutex::new(script), call_count: AtomicUsize::new(0) }
        }

        pub fn unconfigured(id: &str) -> Self {
            Self { id: id.to_string(), configured: false, script: Mutex::new(vec![]), call_count: AtomicUsize::new(0) }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderClient for ScriptedProvider {
        fn id(&self) -> &str {
            &self.id
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn generate(&self, _prompt: &str, _timeout: Duration, _model: Option<&str>) -> Result<String, CoreError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().await;
            if script.is_empty() {
                return Err(CoreError::Other(anyhow::anyhow!("{}: script exhausted", self.id)));
            }
            match script.remove(0) {
                Scripted::Ok(content) => Ok(content),
                Scripted::Err(err) => Err(err),
            }
        }

        async fn probe(&self, timeout: Duration, model: Option<&str>) -> ProbeResult {
            match self.generate("ping", timeout, model).await {
                Ok(_) => ProbeResult {
                    status: crate::metrics::ProbeStatus::Ok,
                    detail: "ok".to_string(),
                    retry_after_seconds: None,
                    latency_ms: None,
                },
                Err(err) => ProbeResult {
                    status: crate::metrics::ProbeStatus::Error,
                    detail: err.to_string(),
                    retry_after_seconds: None,
                    latency_ms: None,
                },
            }
        }
    }

    #[tokio::test]
    async fn scripted_provider_replays_in_order() {
        let provider = ScriptedProvider::new("primary", vec![Scripted::Ok("first".into()), Scripted::Ok("second".into())]);
        let first = provider.generate("p", Duration::from_secs(1), None).await.unwrap();
        let second = provider.generate("p", Duration::from_secs(1), None).await.unwrap();
        assert_eq!(first, "first");
        assert_eq!(second, "second");
        assert_eq!(provider.call_count(), 2);
    }
}
