use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize};

use super::LOW_TEMPERATURE_SAMPLING;
use crate::errors::InferenceError;
use crate::models::content::{ImageAttachment, ImageContent};
use crate::models::tool::ToolCall;
use crate::prompts::{act_system_prompt, act_tools, act_user_prompt, SKIP_TOOL};
use crate::providers::base::{CompletionRequest, Provider, ToolChoice};

/// Retries after the first attempt when the model answers without calling a tool
pub const DEFAULT_MAX_RETRIES: usize = 2;

const SCREENSHOT_DESCRIPTION: &str = "This is a screenshot of the current page state with the elements annotated on it. Each element id is to the left of the elements' border. Please use them to denote the element you want to act on.";

/// Input for resolving the next action
#[derive(Debug, Clone, Default)]
pub struct ActRequest {
    /// What the caller wants done
    pub action: String,
    /// The serialized element list of the current chunk
    pub dom_elements: String,
    /// Steps already executed, if any
    pub steps: Option<String>,
    pub screenshot: Option<ImageContent>,
    pub model: Option<String>,
}

impl ActRequest {
    pub fn new<A: Into<String>, D: Into<String>>(action: A, dom_elements: D) -> Self {
        Self {
            action: action.into(),
            dom_elements: dom_elements.into(),
            ..Default::default()
        }
    }

    pub fn with_steps<S: Into<String>>(mut self, steps: S) -> Self {
        self.steps = Some(steps.into());
        self
    }

    pub fn with_screenshot(mut self, screenshot: ImageContent) -> Self {
        self.screenshot = Some(screenshot);
        self
    }
}

/// A method to call on an element, as chosen by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub method: String,
    #[serde(deserialize_with = "element_id")]
    pub element: i64,
    pub args: Vec<String>,
    pub completed: bool,
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why: Option<String>,
}

// Some models write element ids as whole floats such as 7.0
fn element_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let number = serde_json::Number::deserialize(deserializer)?;
    if let Some(id) = number.as_i64() {
        return Ok(id);
    }
    match number.as_f64() {
        Some(id) if id.fract() == 0.0 && id.abs() < i64::MAX as f64 => Ok(id as i64),
        _ => Err(serde::de::Error::custom(format!(
            "element must be a whole number, got {}",
            number
        ))),
    }
}

/// How an act request ended
#[derive(Debug, Clone, PartialEq)]
pub enum ActOutcome {
    /// The model chose an action
    Resolved(ActionResult),
    /// The model reported that nothing in this chunk advances the goal
    Skipped { reason: Option<String> },
    /// The model never called a tool
    Exhausted { attempts: usize },
}

impl ActOutcome {
    pub fn action(&self) -> Option<&ActionResult> {
        match self {
            ActOutcome::Resolved(action) => Some(action),
            _ => None,
        }
    }

    /// Collapse skipped and exhausted into `None`
    pub fn into_action(self) -> Option<ActionResult> {
        match self {
            ActOutcome::Resolved(action) => Some(action),
            _ => None,
        }
    }
}

fn act_completion_request(request: &ActRequest) -> Result<CompletionRequest> {
    let messages = vec![
        act_system_prompt()?,
        act_user_prompt(&request.action, request.steps.as_deref(), &request.dom_elements)?,
    ];
    let image = request
        .screenshot
        .clone()
        .map(|screenshot| ImageAttachment::new(screenshot).with_description(SCREENSHOT_DESCRIPTION));

    Ok(CompletionRequest::new(messages)
        .with_model(request.model.clone())
        .with_image(image)
        .with_tools(act_tools(), ToolChoice::Auto)
        .with_sampling(LOW_TEMPERATURE_SAMPLING))
}

/// Ask the model for the next action to take on the page
///
/// Makes at most `max_retries + 1` calls. Only a response without any tool call is retried;
/// an unusable tool call fails the request immediately.
pub async fn act(
    provider: &dyn Provider,
    request: &ActRequest,
    max_retries: usize,
) -> Result<ActOutcome> {
    let completion = act_completion_request(request)?;
    let attempts = max_retries + 1;

    for attempt in 1..=attempts {
        tracing::debug!(attempt, attempts, "requesting next action");
        let (message, _usage) = provider.complete(&completion).await?;

        let Some(tool_request) = message.tool_requests().into_iter().next() else {
            tracing::warn!(attempt, attempts, "model answered without calling a tool");
            continue;
        };

        let ToolCall { name, arguments } =
            tool_request.tool_call.clone().map_err(InferenceError::from)?;

        if name == SKIP_TOOL {
            let reason = arguments
                .get("reason")
                .and_then(|r| r.as_str())
                .map(String::from);
            tracing::info!(reason = ?reason, "model skipped this section");
            return Ok(ActOutcome::Skipped { reason });
        }

        let action = serde_json::from_value::<ActionResult>(arguments)
            .map_err(|source| InferenceError::ToolArguments { tool: name, source })?;
        return Ok(ActOutcome::Resolved(action));
    }

    tracing::error!(
        attempts,
        action = %request.action,
        "no tool call after all attempts, giving up"
    );
    Ok(ActOutcome::Exhausted { attempts })
}
