use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::content::ImageAttachment;
use crate::models::message::Message;
use crate::models::tool::Tool;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// How the model may select among the offered tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
}

/// A named json schema the response must conform to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: Value,
}

impl ResponseSchema {
    pub fn new<S: Into<String>>(name: S, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    /// Derive the schema from a rust type
    pub fn for_type<T: JsonSchema>(name: &str) -> Result<Self> {
        let mut schema = serde_json::to_value(schemars::schema_for!(T))?;
        // Chat completion endpoints reject the meta-schema key
        if let Some(object) = schema.as_object_mut() {
            object.remove("$schema");
        }
        Ok(Self::new(name, schema))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub max_tokens: Option<i32>,
}

/// Everything a provider needs for a single model call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionRequest {
    /// Overrides the provider's configured model
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub image: Option<ImageAttachment>,
    pub tools: Vec<Tool>,
    pub tool_choice: Option<ToolChoice>,
    pub response_schema: Option<ResponseSchema>,
    pub sampling: SamplingParams,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_image(mut self, image: Option<ImageAttachment>) -> Self {
        self.image = image;
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>, tool_choice: ToolChoice) -> Self {
        self.tools = tools;
        self.tool_choice = Some(tool_choice);
        self
    }

    pub fn with_response_schema(mut self, schema: ResponseSchema) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }
}

/// Base trait for structured completion clients (OpenAI, Ollama, etc)
///
/// When the request carries a response schema, the provider returns the model's object as
/// structured content in the message. Tool invocations come back as tool requests.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<(Message, Usage)>;
}
