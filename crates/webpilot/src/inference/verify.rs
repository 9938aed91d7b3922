use anyhow::Result;
use schemars::JsonSchema;
use serde_json::Value;

use super::LOW_TEMPERATURE_SAMPLING;
use crate::models::content::{ImageAttachment, ImageContent};
use crate::prompts::{verify_system_prompt, verify_user_prompt};
use crate::providers::base::{CompletionRequest, Provider, ResponseSchema};

const SCREENSHOT_DESCRIPTION: &str = "This is a screenshot of the whole visible page.";

#[derive(Debug, Clone, Default)]
pub struct VerifyRequest {
    pub goal: String,
    /// Log of the steps executed so far
    pub steps: String,
    pub dom_elements: Option<String>,
    pub screenshot: Option<ImageContent>,
    pub model: Option<String>,
}

impl VerifyRequest {
    pub fn new<G: Into<String>, S: Into<String>>(goal: G, steps: S) -> Self {
        Self {
            goal: goal.into(),
            steps: steps.into(),
            ..Default::default()
        }
    }
}

#[derive(JsonSchema)]
#[allow(dead_code)]
struct Verification {
    /// true if the goal is accomplished
    completed: bool,
}

/// Decide whether the goal has been reached
///
/// A response that is not an object with a boolean `completed` field counts as not completed.
/// Only failures of the provider call itself are returned as errors.
pub async fn verify_act_completion(
    provider: &dyn Provider,
    request: &VerifyRequest,
) -> Result<bool> {
    let messages = vec![
        verify_system_prompt()?,
        verify_user_prompt(&request.goal, &request.steps, request.dom_elements.as_deref())?,
    ];
    let image = request
        .screenshot
        .clone()
        .map(|screenshot| ImageAttachment::new(screenshot).with_description(SCREENSHOT_DESCRIPTION));
    let completion = CompletionRequest::new(messages)
        .with_model(request.model.clone())
        .with_image(image)
        .with_response_schema(ResponseSchema::for_type::<Verification>("Verification")?)
        .with_sampling(LOW_TEMPERATURE_SAMPLING);

    let (message, _usage) = provider.complete(&completion).await?;

    let completed = match message.as_structured() {
        Some(Value::Object(object)) => match object.get("completed").and_then(Value::as_bool) {
            Some(completed) => completed,
            None => {
                tracing::warn!(
                    response = ?object,
                    "verification response has no boolean completed field"
                );
                false
            }
        },
        Some(other) => {
            tracing::warn!(response = %other, "verification response is not an object");
            false
        }
        None => {
            tracing::warn!(text = %message.text(), "verification response is not structured");
            false
        }
    };

    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::Message;
    use crate::providers::mock::MockProvider;
    use serde_json::json;

    async fn verify_with(response: Message) -> Result<bool> {
        let provider = MockProvider::new(vec![response]);
        verify_act_completion(&provider, &VerifyRequest::new("log in", "clicked login")).await
    }

    #[tokio::test]
    async fn test_completed() -> Result<()> {
        let response = Message::assistant().with_structured(json!({"completed": true}));
        assert!(verify_with(response).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_not_completed() -> Result<()> {
        let response = Message::assistant().with_structured(json!({"completed": false}));
        assert!(!verify_with(response).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_responses_are_false() -> Result<()> {
        let responses = vec![
            Message::assistant().with_structured(json!({"done": true})),
            Message::assistant().with_structured(json!({"completed": "true"})),
            Message::assistant().with_structured(json!([true])),
            Message::assistant().with_structured(json!(null)),
            Message::assistant().with_text("yes, it is done"),
            Message::assistant(),
        ];

        for response in responses {
            assert!(!verify_with(response).await?);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_request_shape() -> Result<()> {
        let provider = MockProvider::new(vec![]);
        let request = VerifyRequest {
            dom_elements: Some("1:<a>Logout</a>".to_string()),
            screenshot: Some(ImageContent::png(b"png")),
            ..VerifyRequest::new("log in", "clicked login")
        };

        verify_act_completion(&provider, &request).await?;

        let sent = &provider.requests()[0];
        let schema = sent.response_schema.as_ref().unwrap();
        assert_eq!(schema.name, "Verification");
        assert_eq!(schema.schema["required"], json!(["completed"]));
        assert!(sent.tools.is_empty());
        assert!(sent.messages[1].text().contains("1:<a>Logout</a>"));
        assert!(sent.image.is_some());
        Ok(())
    }
}
