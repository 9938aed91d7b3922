//! The inference operations: act, verify, extract, observe and ask
//!
//! Each operation is an independent request against a [`Provider`]. Nothing is shared
//! between calls, so any number of them may run concurrently on the same provider.
//!
//! [`Provider`]: crate::providers::base::Provider
pub mod act;
pub mod ask;
pub mod extract;
pub mod observe;
pub mod pipeline;
pub mod verify;

use anyhow::Result;
use serde::de::DeserializeOwned;

use crate::errors::InferenceError;
use crate::models::message::Message;
use crate::providers::base::SamplingParams;

/// Low temperature with neutral nucleus and penalties, for operations that want repeatable
/// answers from models that are not deterministic
pub const LOW_TEMPERATURE_SAMPLING: SamplingParams = SamplingParams {
    temperature: Some(0.1),
    top_p: Some(1.0),
    frequency_penalty: Some(0.0),
    presence_penalty: Some(0.0),
    max_tokens: None,
};

/// Decode the structured object of a response into the expected type
pub(crate) fn decode_structured<T: DeserializeOwned>(
    operation: &'static str,
    message: &Message,
) -> Result<T> {
    let value = message
        .as_structured()
        .ok_or(InferenceError::EmptyResponse { operation })?;
    let decoded = serde_json::from_value(value.clone())
        .map_err(|source| InferenceError::InvalidResponse { operation, source })?;
    Ok(decoded)
}
