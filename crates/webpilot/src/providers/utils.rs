use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Value};

use super::base::{CompletionRequest, SamplingParams, Usage};
use crate::errors::ToolError;
use crate::models::content::{ImageAttachment, ImageContent};
use crate::models::message::{Message, MessageContent};
use crate::models::tool::{Tool, ToolCall};

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9_-]").unwrap();
    static ref VALID_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

/// Convert internal Message format to OpenAI's API message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let mut converted = json!({
            "role": message.role
        });
        let mut parts = Vec::new();
        let mut tool_calls = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text(text) => {
                    if !text.text.is_empty() {
                        parts.push(json!({"type": "text", "text": text.text}));
                    }
                }
                MessageContent::Image(image) => {
                    parts.push(convert_image(image));
                }
                MessageContent::Structured(structured) => {
                    parts.push(json!({"type": "text", "text": structured.value.to_string()}));
                }
                MessageContent::ToolRequest(request) => {
                    // Failed tool calls never went out as valid calls, nothing to replay
                    if let Ok(tool_call) = &request.tool_call {
                        tool_calls.push(json!({
                            "id": request.id,
                            "type": "function",
                            "function": {
                                "name": sanitize_function_name(&tool_call.name),
                                "arguments": tool_call.arguments.to_string(),
                            }
                        }));
                    }
                }
            }
        }

        // A lone text part is sent as a plain string
        match parts.as_slice() {
            [] => {}
            [single] if single["type"] == "text" => {
                converted["content"] = single["text"].clone();
            }
            _ => {
                converted["content"] = json!(parts);
            }
        }

        if !tool_calls.is_empty() {
            converted["tool_calls"] = json!(tool_calls);
        }

        if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
            messages_spec.push(converted);
        }
    }

    messages_spec
}

/// Convert an image content into an OpenAI image part
pub fn convert_image(image: &ImageContent) -> Value {
    json!({
        "type": "image_url",
        "image_url": {
            "url": format!("data:{};base64,{}", image.mime_type, image.data)
        }
    })
}

/// The attached screenshot goes last, as its own user message with the caption beside it
pub fn attachment_message(attachment: &ImageAttachment) -> Message {
    let message = Message::user().with_image(attachment.image.clone());
    match &attachment.description {
        Some(description) => message.with_text(description.clone()),
        None => message,
    }
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }

    Ok(result)
}

/// Build a chat completions payload for an OpenAI compatible endpoint
///
/// Sampling values on the request win over the provider's configured defaults.
pub fn create_openai_request_payload(
    model: &str,
    request: &CompletionRequest,
    defaults: &SamplingParams,
) -> Result<Value> {
    let mut messages_array = messages_to_openai_spec(&request.messages);
    if let Some(attachment) = &request.image {
        messages_array.extend(messages_to_openai_spec(&[attachment_message(attachment)]));
    }

    let mut payload = Map::new();
    payload.insert(
        "model".to_string(),
        json!(request.model.as_deref().unwrap_or(model)),
    );
    payload.insert("messages".to_string(), json!(messages_array));

    if !request.tools.is_empty() {
        payload.insert(
            "tools".to_string(),
            json!(tools_to_openai_spec(&request.tools)?),
        );
        if let Some(choice) = request.tool_choice {
            payload.insert("tool_choice".to_string(), json!(choice));
        }
    }

    if let Some(schema) = &request.response_schema {
        payload.insert(
            "response_format".to_string(),
            json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                }
            }),
        );
    }

    let sampling = &request.sampling;
    let optional = [
        ("temperature", sampling.temperature.or(defaults.temperature).map(|v| json!(v))),
        ("top_p", sampling.top_p.or(defaults.top_p).map(|v| json!(v))),
        (
            "frequency_penalty",
            sampling
                .frequency_penalty
                .or(defaults.frequency_penalty)
                .map(|v| json!(v)),
        ),
        (
            "presence_penalty",
            sampling
                .presence_penalty
                .or(defaults.presence_penalty)
                .map(|v| json!(v)),
        ),
        ("max_tokens", sampling.max_tokens.or(defaults.max_tokens).map(|v| json!(v))),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            payload.insert(key.to_string(), value);
        }
    }

    Ok(Value::Object(payload))
}

/// Convert OpenAI's API response to internal Message format
///
/// With `structured` set, text that parses as json becomes structured content. Text that
/// does not parse is kept as text and left for the caller to judge.
pub fn openai_response_to_message(response: Value, structured: bool) -> Result<Message> {
    let original = response["choices"][0]["message"].clone();
    let mut message = Message::assistant();

    if let Some(text) = original.get("content").and_then(|t| t.as_str()) {
        match serde_json::from_str::<Value>(text) {
            Ok(value) if structured => message = message.with_structured(value),
            _ => message = message.with_text(text),
        }
    }

    if let Some(tool_calls) = original.get("tool_calls").and_then(|t| t.as_array()) {
        for tool_call in tool_calls {
            let id = tool_call["id"].as_str().unwrap_or_default().to_string();
            let function_name = tool_call["function"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let arguments = tool_call["function"]["arguments"]
                .as_str()
                .unwrap_or_default()
                .to_string();

            if !is_valid_function_name(&function_name) {
                let error = ToolError::InvalidName(format!(
                    "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
                    function_name
                ));
                message = message.with_tool_request(id, Err(error));
                continue;
            }

            match serde_json::from_str::<Value>(&arguments) {
                Ok(params) => {
                    message =
                        message.with_tool_request(id, Ok(ToolCall::new(&function_name, params)));
                }
                Err(e) => {
                    let error = ToolError::InvalidParameters(format!(
                        "Could not interpret tool use parameters for id {}: {}",
                        id, e
                    ));
                    message = message.with_tool_request(id, Err(error));
                }
            }
        }
    }

    Ok(message)
}

pub fn get_openai_usage(data: &Value) -> Result<Usage> {
    let usage = data
        .get("usage")
        .ok_or_else(|| anyhow!("No usage data in response"))?;

    let input_tokens = usage
        .get("prompt_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32);

    let output_tokens = usage
        .get("completion_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32);

    let total_tokens = usage
        .get("total_tokens")
        .and_then(|v| v.as_i64())
        .map(|v| v as i32)
        .or_else(|| match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        });

    Ok(Usage::new(input_tokens, output_tokens, total_tokens))
}

fn sanitize_function_name(name: &str) -> String {
    INVALID_NAME_CHARS.replace_all(name, "_").to_string()
}

fn is_valid_function_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}

#[derive(Debug, thiserror::Error)]
#[error("Input message too long. Message: {0}")]
pub struct InitialMessageTooLargeError(String);

pub fn check_openai_context_length_error(error: &Value) -> Option<InitialMessageTooLargeError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(InitialMessageTooLargeError(message))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::base::{ResponseSchema, ToolChoice};

    const OPENAI_TOOL_USE_RESPONSE: &str = r#"{
        "choices": [{
            "role": "assistant",
            "message": {
                "tool_calls": [{
                    "id": "1",
                    "function": {
                        "name": "doAction",
                        "arguments": "{\"method\": \"click\", \"element\": 7}"
                    }
                }]
            }
        }],
        "usage": {
            "prompt_tokens": 10,
            "completion_tokens": 25
        }
    }"#;

    #[test]
    fn test_messages_to_openai_spec() {
        let messages = vec![
            Message::system().with_text("You are a browser automation assistant."),
            Message::user().with_text("click the submit button"),
        ];
        let spec = messages_to_openai_spec(&messages);

        assert_eq!(spec.len(), 2);
        assert_eq!(spec[0]["role"], "system");
        assert_eq!(spec[0]["content"], "You are a browser automation assistant.");
        assert_eq!(spec[1]["role"], "user");
        assert_eq!(spec[1]["content"], "click the submit button");
    }

    #[test]
    fn test_messages_to_openai_spec_mixed_content() {
        let message = Message::user()
            .with_text("What is on screen?")
            .with_image(ImageContent::new("abcd", "image/png"));
        let spec = messages_to_openai_spec(&[message]);

        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["content"][0]["type"], "text");
        assert_eq!(spec[0]["content"][1]["type"], "image_url");
        assert_eq!(
            spec[0]["content"][1]["image_url"]["url"],
            "data:image/png;base64,abcd"
        );
    }

    #[test]
    fn test_messages_to_openai_spec_tool_request() {
        let message = Message::assistant().with_tool_request(
            "call_1",
            Ok(ToolCall::new("do action", json!({"method": "click"}))),
        );
        let spec = messages_to_openai_spec(&[message]);

        assert_eq!(spec[0]["tool_calls"][0]["id"], "call_1");
        assert_eq!(spec[0]["tool_calls"][0]["function"]["name"], "do_action");
        assert!(spec[0].get("content").is_none());
    }

    #[test]
    fn test_attachment_message() {
        let attachment = ImageAttachment::new(ImageContent::new("abcd", "image/png"))
            .with_description("screenshot of the current page");
        let spec = messages_to_openai_spec(&[attachment_message(&attachment)]);

        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["role"], "user");
        assert_eq!(spec[0]["content"][0]["type"], "image_url");
        assert_eq!(
            spec[0]["content"][0]["image_url"]["url"],
            "data:image/png;base64,abcd"
        );
        assert_eq!(spec[0]["content"][1]["text"], "screenshot of the current page");
    }

    #[test]
    fn test_attachment_message_without_caption() {
        let attachment = ImageAttachment::new(ImageContent::new("abcd", "image/png"));
        let spec = messages_to_openai_spec(&[attachment_message(&attachment)]);

        assert_eq!(spec[0]["content"].as_array().map(|parts| parts.len()), Some(1));
        assert_eq!(spec[0]["content"][0]["type"], "image_url");
    }

    #[test]
    fn test_tools_to_openai_spec_duplicate() {
        let tool = Tool::new("doAction", "Act", json!({"type": "object"}));
        let result = tools_to_openai_spec(&[tool.clone(), tool]);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Duplicate tool name"));
    }

    #[test]
    fn test_create_payload_with_tools_and_sampling() -> Result<()> {
        let request = CompletionRequest::new(vec![Message::user().with_text("go")])
            .with_tools(
                vec![Tool::new("doAction", "Act", json!({"type": "object"}))],
                ToolChoice::Auto,
            )
            .with_sampling(SamplingParams {
                temperature: Some(0.1),
                top_p: Some(1.0),
                frequency_penalty: Some(0.0),
                presence_penalty: Some(0.0),
                max_tokens: None,
            });
        let defaults = SamplingParams {
            temperature: Some(0.7),
            max_tokens: Some(512),
            ..Default::default()
        };

        let payload = create_openai_request_payload("gpt-4o", &request, &defaults)?;

        assert_eq!(payload["model"], "gpt-4o");
        assert_eq!(payload["tool_choice"], "auto");
        assert_eq!(payload["tools"][0]["function"]["name"], "doAction");
        assert_eq!(payload["temperature"], json!(0.1f32));
        assert_eq!(payload["top_p"], json!(1.0f32));
        assert_eq!(payload["max_tokens"], 512);
        assert!(payload.get("response_format").is_none());
        Ok(())
    }

    #[test]
    fn test_create_payload_with_schema_and_image() -> Result<()> {
        let request = CompletionRequest::new(vec![Message::user().with_text("observe")])
            .with_model(Some("gpt-4o-mini".to_string()))
            .with_response_schema(ResponseSchema::new("Observation", json!({"type": "object"})))
            .with_image(Some(ImageAttachment::new(ImageContent::new("abcd", "image/png"))));

        let payload = create_openai_request_payload("gpt-4o", &request, &SamplingParams::default())?;

        assert_eq!(payload["model"], "gpt-4o-mini");
        assert_eq!(payload["response_format"]["type"], "json_schema");
        assert_eq!(payload["response_format"]["json_schema"]["name"], "Observation");
        assert_eq!(payload["messages"].as_array().map(|m| m.len()), Some(2));
        assert!(payload.get("tools").is_none());
        assert!(payload.get("temperature").is_none());
        Ok(())
    }

    #[test]
    fn test_openai_response_to_message_text() -> Result<()> {
        let response = json!({
            "choices": [{"message": {"content": "The page is a login form."}}]
        });

        let message = openai_response_to_message(response, false)?;
        assert_eq!(message.text(), "The page is a login form.");
        assert!(matches!(message.role, crate::models::role::Role::Assistant));
        Ok(())
    }

    #[test]
    fn test_openai_response_to_message_structured() -> Result<()> {
        let response = json!({
            "choices": [{"message": {"content": "{\"completed\": true}"}}]
        });

        let message = openai_response_to_message(response.clone(), true)?;
        assert_eq!(message.as_structured(), Some(&json!({"completed": true})));

        // Without a schema the same text is left alone
        let message = openai_response_to_message(response, false)?;
        assert!(message.as_structured().is_none());
        assert_eq!(message.text(), "{\"completed\": true}");
        Ok(())
    }

    #[test]
    fn test_openai_response_to_message_structured_not_json() -> Result<()> {
        let response = json!({
            "choices": [{"message": {"content": "sorry, I cannot tell"}}]
        });

        let message = openai_response_to_message(response, true)?;
        assert!(message.as_structured().is_none());
        assert_eq!(message.text(), "sorry, I cannot tell");
        Ok(())
    }

    #[test]
    fn test_openai_response_to_message_valid_tooluse() -> Result<()> {
        let response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE)?;
        let message = openai_response_to_message(response, false)?;

        let requests = message.tool_requests();
        assert_eq!(requests.len(), 1);
        let tool_call = requests[0].tool_call.as_ref().unwrap();
        assert_eq!(tool_call.name, "doAction");
        assert_eq!(tool_call.arguments, json!({"method": "click", "element": 7}));
        Ok(())
    }

    #[test]
    fn test_openai_response_to_message_invalid_func_name() -> Result<()> {
        let mut response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE)?;
        response["choices"][0]["message"]["tool_calls"][0]["function"]["name"] =
            json!("invalid fn");

        let message = openai_response_to_message(response, false)?;
        let requests = message.tool_requests();

        assert!(matches!(
            requests[0].tool_call,
            Err(ToolError::InvalidName(_))
        ));
        Ok(())
    }

    #[test]
    fn test_openai_response_to_message_json_decode_error() -> Result<()> {
        let mut response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE)?;
        response["choices"][0]["message"]["tool_calls"][0]["function"]["arguments"] =
            json!("invalid json {");

        let message = openai_response_to_message(response, false)?;
        let requests = message.tool_requests();

        match &requests[0].tool_call {
            Err(ToolError::InvalidParameters(msg)) => {
                assert!(msg.starts_with("Could not interpret tool use parameters"));
            }
            other => panic!("Expected InvalidParameters, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_get_openai_usage_calculated_total() -> Result<()> {
        let response: Value = serde_json::from_str(OPENAI_TOOL_USE_RESPONSE)?;
        let usage = get_openai_usage(&response)?;
        assert_eq!(usage.input_tokens, Some(10));
        assert_eq!(usage.output_tokens, Some(25));
        assert_eq!(usage.total_tokens, Some(35));
        Ok(())
    }

    #[test]
    fn test_sanitize_function_name() {
        assert_eq!(sanitize_function_name("hello-world"), "hello-world");
        assert_eq!(sanitize_function_name("hello world"), "hello_world");
        assert_eq!(sanitize_function_name("hello@world"), "hello_world");
    }

    #[test]
    fn test_check_openai_context_length_error() {
        let error = json!({
            "code": "context_length_exceeded",
            "message": "This message is too long"
        });

        let result = check_openai_context_length_error(&error);
        assert_eq!(
            result.unwrap().to_string(),
            "Input message too long. Message: This message is too long"
        );

        let error = json!({
            "code": "other_error",
            "message": "Some other error"
        });
        assert!(check_openai_context_length_error(&error).is_none());
    }
}
