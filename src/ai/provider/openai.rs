//! Chat Completions backend (metered)
//!
//! Works against api.openai.com or any compatible gateway set via `api_base`.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

use super::{
    GenerationRequest, LlmProvider, LlmResponse, ProviderConfig, TokenUsage, decode_response,
    http_client, non_empty,
};
use crate::types::{DossierError, ErrorClassifier, Result};

const NAME: &str = "openai";
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";
const API_KEY_ENV: &str = "OPENAI_API_KEY";

pub struct OpenAiProvider {
    api_key: SecretString,
    api_base: String,
    model: String,
    max_tokens: usize,
    metered: bool,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("metered", &self.metered)
            .finish_non_exhaustive()
    }
}

impl OpenAiProvider {
    /// Key from config, else from `OPENAI_API_KEY`
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let key = config
            .api_key
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                DossierError::Config(format!(
                    "No API key for the openai backend; set {API_KEY_ENV} or api_key"
                ))
            })?;

        Ok(Self {
            api_key: SecretString::from(key),
            api_base: config
                .api_base
                .as_deref()
                .unwrap_or(DEFAULT_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            model: config.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: config.max_tokens,
            metered: config.metered.unwrap_or(true),
            client: http_client(config.timeout_secs)?,
        })
    }

    fn body(&self, request: &GenerationRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if !request.system_prompt.is_empty() {
            messages.push(Message {
                role: "system",
                content: request.system_prompt.clone(),
            });
        }
        messages.push(Message {
            role: "user",
            content: request.prompt.clone(),
        });

        ChatRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            messages,
            temperature: request.temperature,
            max_tokens: self.max_tokens,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.api_base)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<LlmResponse> {
        let body = self.body(request);
        debug!(model = %body.model, temperature = body.temperature, "chat completion");

        let started = Instant::now();
        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| DossierError::Llm(ErrorClassifier::classify(&e.to_string(), NAME)))?;

        let reply: ChatResponse = decode_response(response, NAME).await?;
        let usage = reply
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();
        let content = non_empty(
            reply.choices.into_iter().next().and_then(|c| c.message.content),
            NAME,
        )?;

        Ok(LlmResponse {
            content,
            model: reply.model.unwrap_or(body.model),
            usage,
            elapsed: started.elapsed(),
        })
    }

    fn name(&self) -> &str {
        NAME
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_metered(&self) -> bool {
        self.metered
    }

    async fn health_check(&self) -> Result<bool> {
        let result = self
            .client
            .get(self.endpoint("models"))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => Ok(true),
            Ok(resp) => {
                warn!(status = %resp.status(), "openai health check rejected");
                Ok(false)
            }
            Err(e) => {
                warn!(error = %e, "openai unreachable");
                Ok(false)
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
