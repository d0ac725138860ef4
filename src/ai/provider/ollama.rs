//! Ollama backend (local, unmetered by default)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};
use url::Url;

use super::{
    GenerationRequest, LlmProvider, LlmResponse, ProviderConfig, TokenUsage, decode_response,
    http_client, non_empty,
};
use crate::types::{DossierError, ErrorClassifier, Result};

const NAME: &str = "ollama";
const DEFAULT_API_BASE: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3:latest";

#[derive(Debug)]
pub struct OllamaProvider {
    api_base: String,
    model: String,
    metered: bool,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let api_base = normalize_endpoint(config.api_base.as_deref().unwrap_or(DEFAULT_API_BASE))?;
        Ok(Self {
            api_base,
            model: config.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            metered: config.metered.unwrap_or(false),
            client: http_client(config.timeout_secs)?,
        })
    }

    fn body(&self, request: &GenerationRequest) -> GenerateRequest {
        GenerateRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            prompt: request.prompt.clone(),
            system: Some(request.system_prompt.clone()).filter(|s| !s.is_empty()),
            stream: false,
            options: Options {
                temperature: request.temperature,
            },
        }
    }

    /// Installed model names match with or without the `:latest` tag
    fn has_model(&self, installed: &[InstalledModel]) -> bool {
        let wanted = self.model.trim_end_matches(":latest");
        installed
            .iter()
            .any(|m| m.name == self.model || m.name.trim_end_matches(":latest") == wanted)
    }
}

/// Only http(s) endpoints are accepted; anything off-host is logged
fn normalize_endpoint(endpoint: &str) -> Result<String> {
    let url = Url::parse(endpoint)
        .map_err(|e| DossierError::Config(format!("Invalid ollama endpoint '{endpoint}': {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(DossierError::Config(format!(
            "ollama endpoint must be http or https, got '{}'",
            url.scheme()
        )));
    }

    if let Some(host) = url.host_str()
        && !matches!(host, "localhost" | "127.0.0.1" | "[::1]")
    {
        warn!(host, "ollama endpoint is not on this machine");
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<LlmResponse> {
        let body = self.body(request);
        debug!(model = %body.model, temperature = request.temperature, "ollama generate");

        let started = Instant::now();
        let response = self
            .client
            .post(format!("{}/api/generate", self.api_base))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let message = if e.is_connect() {
                    format!("connection refused at {} (is `ollama serve` running?)", self.api_base)
                } else {
                    e.to_string()
                };
                DossierError::Llm(ErrorClassifier::classify(&message, NAME))
            })?;

        let reply: GenerateResponse = decode_response(response, NAME).await?;
        Ok(LlmResponse {
            content: non_empty(Some(reply.response), NAME)?,
            model: reply.model.unwrap_or(body.model),
            usage: TokenUsage::new(
                reply.prompt_eval_count.unwrap_or(0),
                reply.eval_count.unwrap_or(0),
            ),
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
        let response = match self
            .client
            .get(format!("{}/api/tags", self.api_base))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                warn!(status = %resp.status(), "ollama health check rejected");
                return Ok(false);
            }
            Err(e) => {
                warn!(error = %e, "ollama unreachable");
                return Ok(false);
            }
        };

        match response.json::<TagsResponse>().await {
            Ok(tags) if !self.has_model(&tags.models) => {
                warn!(model = %self.model, "ollama is running but the model is not pulled");
                Ok(false)
            }
            _ => Ok(true),
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    options: Options,
}

#[derive(Debug, Serialize)]
struct Options {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<InstalledModel>,
}

#[derive(Debug, Deserialize)]
struct InstalledModel {
    name: String,
}
