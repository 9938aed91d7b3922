use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

use super::base::{CompletionRequest, Provider, Usage};
use super::configs::{OpenAiProviderConfig, SamplingDefaults};
use super::utils::{
    check_openai_context_length_error, create_openai_request_payload, get_openai_usage,
    openai_response_to_message,
};
use crate::models::message::Message;

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
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

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
                Err(anyhow!("Server error: {}", status))
            }
            status => {
                // The body usually carries the api error, context length included
                let body: Value = response.json().await.unwrap_or(Value::Null);
                match body.get("error") {
                    Some(error) => Err(api_error(error)),
                    None => Err(anyhow!("Request failed: {}", status)),
                }
            }
        }
    }
}

fn api_error(error: &Value) -> anyhow::Error {
    match check_openai_context_length_error(error) {
        Some(err) => err.into(),
        None => anyhow!("OpenAI API error: {}", error),
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<(Message, Usage)> {
        let payload = create_openai_request_payload(
            &self.config.model,
            request,
            &self.config.sampling_defaults(),
        )?;

        tracing::debug!(
            model = %payload["model"],
            tools = request.tools.len(),
            schema = ?request.response_schema.as_ref().map(|s| &s.name),
            "sending chat completion"
        );

        let response = self.post(payload).await?;

        if let Some(error) = response.get("error") {
            return Err(api_error(error));
        }

        let message =
            openai_response_to_message(response.clone(), request.response_schema.is_some())?;
        let usage = get_openai_usage(&response)?;

        Ok((message, usage))
    }
}
