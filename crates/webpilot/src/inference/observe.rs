use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{decode_structured, LOW_TEMPERATURE_SAMPLING};
use crate::models::content::{ImageAttachment, ImageContent};
use crate::prompts::{observe_system_prompt, observe_user_prompt};
use crate::providers::base::{CompletionRequest, Provider, ResponseSchema};

const SCREENSHOT_DESCRIPTION: &str = "This is a screenshot of the current page state with the elements annotated on it. Each element id is to the left of the elements' border. Please use them to denote the elements you want to observe.";

#[derive(Debug, Clone, Default)]
pub struct ObserveRequest {
    pub instruction: String,
    pub dom_elements: String,
    pub screenshot: Option<ImageContent>,
    pub model: Option<String>,
}

impl ObserveRequest {
    pub fn new<I: Into<String>, D: Into<String>>(instruction: I, dom_elements: D) -> Self {
        Self {
            instruction: instruction.into(),
            dom_elements: dom_elements.into(),
            ..Default::default()
        }
    }
}

/// A candidate element and why it matches the instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObservedElement {
    /// the number of the element
    pub element_id: i64,
    /// a description of the element and what it is relevant for
    pub description: String,
}

#[derive(Deserialize, JsonSchema)]
struct Observation {
    /// an array of elements that match the instruction
    elements: Vec<ObservedElement>,
}

/// Find the elements that match the instruction, in the order the model lists them
///
/// An empty list is a valid answer. A response without any structured object is an error.
pub async fn observe(
    provider: &dyn Provider,
    request: &ObserveRequest,
) -> Result<Vec<ObservedElement>> {
    let messages = vec![
        observe_system_prompt()?,
        observe_user_prompt(&request.instruction, &request.dom_elements)?,
    ];
    let image = request
        .screenshot
        .clone()
        .map(|screenshot| ImageAttachment::new(screenshot).with_description(SCREENSHOT_DESCRIPTION));
    let completion = CompletionRequest::new(messages)
        .with_model(request.model.clone())
        .with_image(image)
        .with_response_schema(ResponseSchema::for_type::<Observation>("Observation")?)
        .with_sampling(LOW_TEMPERATURE_SAMPLING);

    let (message, _usage) = provider.complete(&completion).await?;
    let observation: Observation = decode_structured("observe", &message)?;

    tracing::debug!(count = observation.elements.len(), "observed elements");
    Ok(observation.elements)
}
