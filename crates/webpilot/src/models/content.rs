use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextContent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageContent {
    /// Base64 encoded image bytes
    pub data: String,
    pub mime_type: String,
}

impl ImageContent {
    pub fn new<S: Into<String>, T: Into<String>>(data: S, mime_type: T) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Encode raw image bytes, such as a page screenshot
    pub fn from_bytes<T: Into<String>>(bytes: &[u8], mime_type: T) -> Self {
        Self::new(
            base64::engine::general_purpose::STANDARD.encode(bytes),
            mime_type,
        )
    }

    pub fn png(bytes: &[u8]) -> Self {
        Self::from_bytes(bytes, "image/png")
    }
}

/// A json object the provider produced against a requested response schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredContent {
    pub value: Value,
}

/// An image sent alongside the prompt messages, with an optional caption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub image: ImageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ImageAttachment {
    pub fn new(image: ImageContent) -> Self {
        Self {
            image,
            description: None,
        }
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }
}
