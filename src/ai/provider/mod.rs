//! Generation Backends
//!
//! A backend turns one system instruction plus one user prompt into free
//! text. Two HTTP backends ship with the crate: `openai` (metered, also any
//! OpenAI-compatible endpoint) and `ollama` (local). Clients are cached per
//! configuration in [`ProviderRegistry`].

mod ollama;
mod openai;
mod registry;

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use registry::{Backends, ProviderKey, ProviderRegistry};

pub use crate::types::{ErrorCategory, ErrorClassifier, LlmError};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::constants::network;
use crate::types::{DossierError, Result};

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system_prompt: String,
    /// Overrides the backend's configured model
    pub model: Option<String>,
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: system_prompt.into(),
            model: None,
            temperature: 0.0,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: String,
    /// Model that actually answered; empty when the backend did not say
    pub model: String,
    pub usage: TokenUsage,
    pub elapsed: Duration,
}

impl LlmResponse {
    pub fn content_only(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// HTTP client with the configured request timeout
pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| DossierError::Config(format!("Failed to create HTTP client: {e}")))
}

/// Classify a non-success status, or decode a success body as `T`
pub(crate) async fn decode_response<T: DeserializeOwned>(
    response: reqwest::Response,
    provider: &str,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(DossierError::Llm(ErrorClassifier::classify_http_status(
            status.as_u16(),
            &format!("HTTP {status}: {text}"),
            provider,
        )));
    }
    response.json::<T>().await.map_err(|e| {
        DossierError::Llm(LlmError::with_provider(
            ErrorCategory::EmptyResponse,
            format!("Unreadable response body: {e}"),
            provider,
        ))
    })
}

/// Reject blank generations
pub(crate) fn non_empty(content: Option<String>, provider: &str) -> Result<String> {
    content.filter(|c| !c.trim().is_empty()).ok_or_else(|| {
        DossierError::Llm(LlmError::with_provider(
            ErrorCategory::EmptyResponse,
            "Response contained no text",
            provider,
        ))
    })
}

pub type SharedProvider = Arc<dyn LlmProvider + Send + Sync>;

/// Settings for one backend; the API key is never serialized or printed
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// `openai` or `ollama`
    pub provider: String,
    pub model: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Overrides the provider's own metered/local classification
    #[serde(default)]
    pub metered: Option<bool>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("temperature", &self.temperature)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("max_tokens", &self.max_tokens)
            .field("metered", &self.metered)
            .finish()
    }
}

fn default_max_tokens() -> usize {
    network::DEFAULT_MAX_TOKENS
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: None,
            timeout_secs: network::DEFAULT_TIMEOUT_SECS,
            temperature: 0.0,
            api_key: None,
            api_base: None,
            max_tokens: network::DEFAULT_MAX_TOKENS,
            metered: None,
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<LlmResponse>;

    fn name(&self) -> &str;

    /// Default model when the request does not override it
    fn model(&self) -> &str;

    /// Billed calls count against the cost ceiling
    fn is_metered(&self) -> bool;

    /// `Ok(false)` means reachable but not usable as configured
    async fn health_check(&self) -> Result<bool>;
}

pub fn create_provider(config: &ProviderConfig) -> Result<SharedProvider> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(config.clone())?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config.clone())?)),
        other => Err(DossierError::Config(format!(
            "Unknown provider '{other}' (expected openai or ollama)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_api_key() {
        let config = ProviderConfig {
            provider: "openai".to_string(),
            api_key: Some("sk-live-123".to_string()),
            ..Default::default()
        };
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-live-123"));
    }

    #[test]
    fn test_token_usage_total_saturates() {
        assert_eq!(TokenUsage::new(3, 4).total(), 7);
        assert_eq!(TokenUsage::new(u32::MAX, 1).total(), u32::MAX);
    }

    #[test]
    fn test_blank_content_is_empty_response() {
        let err = non_empty(Some("  \n".into()), "p").unwrap_err();
        match err {
            DossierError::Llm(llm) => assert_eq!(llm.category, ErrorCategory::EmptyResponse),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(non_empty(Some("ok".into()), "p").unwrap(), "ok");
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = ProviderConfig {
            provider: "telepathy".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            create_provider(&config),
            Err(DossierError::Config(_))
        ));
    }
}
