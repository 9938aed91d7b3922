use super::base::{CompletionRequest, Provider, Usage};
use super::configs::{OllamaProviderConfig, SamplingDefaults};
use super::utils::{create_openai_request_payload, get_openai_usage, openai_response_to_message};
use crate::models::message::Message;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

pub const OLLAMA_HOST: &str = "http://localhost:11434";
pub const OLLAMA_MODEL: &str = "qwen2.5";

/// Talks to the OpenAI compatible endpoint of a local Ollama server
pub struct OllamaProvider {
    client: Client,
    config: OllamaProviderConfig,
}

impl OllamaProvider {
    pub fn new(config: OllamaProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    async fn post(&self, payload: Value) -> Result<Value> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        let response = self.client.post(&url).json(&payload).send().await?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
                Err(anyhow!("Server error: {}", status))
            }
            _ => Err(anyhow!(
                "Request failed: {}\nPayload: {}",
                response.status(),
                payload
            )),
        }
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<(Message, Usage)> {
        let payload = create_openai_request_payload(
            &self.config.model,
            request,
            &self.config.sampling_defaults(),
        )?;

        tracing::debug!(model = %payload["model"], "sending ollama chat completion");

        let response = self.post(payload).await?;

        if let Some(error) = response.get("error") {
            return Err(anyhow!("Ollama API error: {}", error));
        }

        let message =
            openai_response_to_message(response.clone(), request.response_schema.is_some())?;
        // Older ollama builds omit usage on the compatible endpoint
        let usage = get_openai_usage(&response).unwrap_or_default();

        Ok((message, usage))
    }
}
