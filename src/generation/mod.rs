//! Generative capability used for grounded answers and feedback judgments.
//!
//! The adapters issue HTTP requests directly to the runtime and report failures through
//! [`CapabilityError`] so callers can distinguish retry-safe failures from configuration issues.

use crate::config::{Config, GenerationProvider};
use crate::resilience::{CapabilityError, RetryPolicy, decode_json, http_client};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Prompt and sampling settings for one generation.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// User prompt.
    pub prompt: String,
    /// Optional system instruction.
    pub system: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
}

/// Interface implemented by generative backends.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Return free-form text for the request.
    async fn generate(&self, request: GenerationRequest) -> Result<String, CapabilityError>;

    /// Model identifier reported in introspection.
    fn model(&self) -> &str;
}

/// Build the generation client selected by configuration.
pub fn build_generation_client(
    config: &Config,
) -> Result<Arc<dyn GenerationClient>, CapabilityError> {
    let settings = &config.generation;
    let client: Arc<dyn GenerationClient> = match settings.provider {
        GenerationProvider::Ollama => Arc::new(OllamaGenerationClient::new(
            config.ollama_url.clone(),
            settings.model.clone(),
            config.resilience,
        )?),
        GenerationProvider::OpenAI => {
            let api_key = config.openai.api_key.clone().ok_or_else(|| {
                CapabilityError::NotConfigured("OPENAI_API_KEY is not set".into())
            })?;
            Arc::new(OpenAiGenerationClient::new(
                config.openai.base_url.clone(),
                api_key,
                settings.model.clone(),
                config.resilience,
            )?)
        }
    };
    tracing::info!(provider = ?settings.provider, model = client.model(), "Generation client initialized");
    Ok(client)
}

/// Ollama `/api/generate` adapter (non-streaming).
pub struct OllamaGenerationClient {
    http: Client,
    base_url: String,
    model: String,
    policy: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

impl OllamaGenerationClient {
    /// Create an adapter for the Ollama runtime at `base_url`.
    pub fn new(base_url: String, model: String, policy: RetryPolicy) -> Result<Self, CapabilityError> {
        Ok(Self {
            http: http_client("carelens/generation")?,
            base_url,
            model,
            policy,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl GenerationClient for OllamaGenerationClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, CapabilityError> {
        let mut payload = json!({
            "model": self.model,
            "prompt": request.prompt,
            "stream": false,
            "options": { "temperature": request.temperature },
        });
        if let Some(system) = &request.system {
            payload["system"] = Value::String(system.clone());
        }

        let body: OllamaResponse = self
            .policy
            .run("ollama.generate", || async {
                let response = self
                    .http
                    .post(self.endpoint())
                    .json(&payload)
                    .send()
                    .await
                    .map_err(CapabilityError::from_transport)?;
                decode_json(response).await
            })
            .await?;

        if !body.done {
            return Err(CapabilityError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }
        Ok(body.response.trim().to_string())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// OpenAI-compatible chat completions adapter.
pub struct OpenAiGenerationClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    policy: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiGenerationClient {
    /// Create an adapter for an OpenAI-compatible endpoint.
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        policy: RetryPolicy,
    ) -> Result<Self, CapabilityError> {
        Ok(Self {
            http: http_client("carelens/generation")?,
            base_url,
            api_key,
            model,
            policy,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl GenerationClient for OpenAiGenerationClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, CapabilityError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));
        let payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
        });

        let completion: ChatCompletion = self
            .policy
            .run("openai.generate", || async {
                let response = self
                    .http
                    .post(self.endpoint())
                    .bearer_auth(&self.api_key)
                    .json(&payload)
                    .send()
                    .await
                    .map_err(CapabilityError::from_transport)?;
                decode_json(response).await
            })
            .await?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| CapabilityError::InvalidResponse("completion had no content".into()))
    }

    fn model(&self) -> &str {
        &self.model
    }
}
