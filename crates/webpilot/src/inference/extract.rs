use anyhow::Result;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

use super::pipeline::{run_stage, Stage};
use super::{decode_structured, LOW_TEMPERATURE_SAMPLING};
use crate::models::message::Message;
use crate::prompts::{
    extract_system_prompt, extract_user_prompt, metadata_system_prompt, metadata_user_prompt,
    refine_system_prompt, refine_user_prompt,
};
use crate::providers::base::{CompletionRequest, Provider, ResponseSchema};

/// A caller defined shape for extracted content
///
/// The json schema handed to the model is derived from the type, and every stage decodes
/// straight back into it.
pub trait ExtractSchema: Serialize + DeserializeOwned + JsonSchema + Send + Sync {}

impl<T> ExtractSchema for T where T: Serialize + DeserializeOwned + JsonSchema + Send + Sync {}

/// The schema used when the caller has no shape of its own
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DefaultExtraction {
    /// The text extracted from the page
    pub extraction: String,
}

/// Progress of a scan that may span several chunks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Metadata {
    /// What has been found so far and what is still missing
    pub progress: String,
    /// true once the instruction is satisfied or no chunks remain
    pub completed: bool,
}

/// Extracted content with the scan metadata under the reserved `metadata` field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult<T> {
    #[serde(flatten)]
    pub data: T,
    pub metadata: Metadata,
}

#[derive(Debug, Clone)]
pub struct ExtractRequest<T> {
    pub instruction: String,
    /// Summary carried over from the previous chunk
    pub progress: String,
    pub previously_extracted: T,
    pub dom_elements: String,
    pub chunks_seen: usize,
    pub chunks_total: usize,
    pub model: Option<String>,
}

pub struct ExtractInput {
    pub instruction: String,
    pub dom_elements: String,
}

pub struct RefineInput<T> {
    pub instruction: String,
    pub previously_extracted: T,
    pub newly_extracted: T,
}

pub struct MetadataInput<T> {
    pub instruction: String,
    pub extracted: T,
    pub chunks_seen: usize,
    pub chunks_total: usize,
}

const EXTRACTION_SCHEMA: &str = "Extraction";
const METADATA_SCHEMA: &str = "Metadata";

fn stage_request(
    model: &Option<String>,
    messages: Vec<Message>,
    schema: ResponseSchema,
) -> CompletionRequest {
    CompletionRequest::new(messages)
        .with_model(model.clone())
        .with_response_schema(schema)
        .with_sampling(LOW_TEMPERATURE_SAMPLING)
}

/// Pulls the newly visible content out of the element list
pub struct ExtractStage<T> {
    model: Option<String>,
    schema: PhantomData<fn() -> T>,
}

impl<T> ExtractStage<T> {
    pub fn new(model: Option<String>) -> Self {
        Self {
            model,
            schema: PhantomData,
        }
    }
}

impl<T: ExtractSchema> Stage for ExtractStage<T> {
    type Input = ExtractInput;
    type Output = T;

    fn name(&self) -> &'static str {
        "extract"
    }

    fn request(&self, input: &ExtractInput) -> Result<CompletionRequest> {
        let messages = vec![
            extract_system_prompt()?,
            extract_user_prompt(&input.instruction, &input.dom_elements)?,
        ];
        Ok(stage_request(
            &self.model,
            messages,
            ResponseSchema::for_type::<T>(EXTRACTION_SCHEMA)?,
        ))
    }

    fn decode(&self, message: &Message) -> Result<T> {
        decode_structured(self.name(), message)
    }
}

/// Merges new content into what earlier chunks produced
///
/// The model decides per field whether values accumulate or get replaced.
pub struct RefineStage<T> {
    model: Option<String>,
    schema: PhantomData<fn() -> T>,
}

impl<T> RefineStage<T> {
    pub fn new(model: Option<String>) -> Self {
        Self {
            model,
            schema: PhantomData,
        }
    }
}

impl<T: ExtractSchema> Stage for RefineStage<T> {
    type Input = RefineInput<T>;
    type Output = T;

    fn name(&self) -> &'static str {
        "refine"
    }

    fn request(&self, input: &RefineInput<T>) -> Result<CompletionRequest> {
        let messages = vec![
            refine_system_prompt()?,
            refine_user_prompt(
                &input.instruction,
                &input.previously_extracted,
                &input.newly_extracted,
            )?,
        ];
        Ok(stage_request(
            &self.model,
            messages,
            ResponseSchema::for_type::<T>(EXTRACTION_SCHEMA)?,
        ))
    }

    fn decode(&self, message: &Message) -> Result<T> {
        decode_structured(self.name(), message)
    }
}

/// Judges progress of the whole scan rather than the content itself
pub struct MetadataStage<T> {
    model: Option<String>,
    schema: PhantomData<fn() -> T>,
}

impl<T> MetadataStage<T> {
    pub fn new(model: Option<String>) -> Self {
        Self {
            model,
            schema: PhantomData,
        }
    }
}

impl<T: ExtractSchema> Stage for MetadataStage<T> {
    type Input = MetadataInput<T>;
    type Output = Metadata;

    fn name(&self) -> &'static str {
        "metadata"
    }

    fn request(&self, input: &MetadataInput<T>) -> Result<CompletionRequest> {
        let messages = vec![
            metadata_system_prompt()?,
            metadata_user_prompt(
                &input.instruction,
                &input.extracted,
                input.chunks_seen,
                input.chunks_total,
            )?,
        ];
        Ok(stage_request(
            &self.model,
            messages,
            ResponseSchema::for_type::<Metadata>(METADATA_SCHEMA)?,
        ))
    }

    fn decode(&self, message: &Message) -> Result<Metadata> {
        decode_structured(self.name(), message)
    }
}

/// Extract content from one chunk of a page
///
/// Runs extract, refine and metadata in order, each stage consuming the previous one's
/// output. Any stage failing fails the whole extraction.
pub async fn extract<T: ExtractSchema>(
    provider: &dyn Provider,
    request: ExtractRequest<T>,
) -> Result<ExtractionResult<T>> {
    let ExtractRequest {
        instruction,
        progress,
        previously_extracted,
        dom_elements,
        chunks_seen,
        chunks_total,
        model,
    } = request;
    tracing::debug!(chunks_seen, chunks_total, progress = %progress, "starting extraction");

    let newly_extracted = run_stage(
        provider,
        &ExtractStage::<T>::new(model.clone()),
        &ExtractInput {
            instruction: instruction.clone(),
            dom_elements,
        },
    )
    .await?;

    let refined = run_stage(
        provider,
        &RefineStage::<T>::new(model.clone()),
        &RefineInput {
            instruction: instruction.clone(),
            previously_extracted,
            newly_extracted,
        },
    )
    .await?;

    let metadata_input = MetadataInput {
        instruction,
        extracted: refined,
        chunks_seen,
        chunks_total,
    };
    let metadata = run_stage(provider, &MetadataStage::<T>::new(model), &metadata_input).await?;

    Ok(ExtractionResult {
        data: metadata_input.extracted,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::InferenceError;
    use crate::providers::mock::MockProvider;
    use serde_json::json;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
    struct Items {
        items: Vec<String>,
    }

    fn request(previously_extracted: Items) -> ExtractRequest<Items> {
        ExtractRequest {
            instruction: "list every item".to_string(),
            progress: String::new(),
            previously_extracted,
            dom_elements: "1:<li>A</li>".to_string(),
            chunks_seen: 1,
            chunks_total: 2,
            model: None,
        }
    }

    fn structured(value: serde_json::Value) -> Message {
        Message::assistant().with_structured(value)
    }

    #[tokio::test]
    async fn test_three_stage_extraction() -> Result<()> {
        let provider = MockProvider::new(vec![
            structured(json!({"items": ["A"]})),
            structured(json!({"items": ["A"]})),
            structured(json!({"progress": "found 1 item", "completed": false})),
        ]);

        let result = extract(&provider, request(Items::default())).await?;

        assert_eq!(
            serde_json::to_value(&result)?,
            json!({
                "items": ["A"],
                "metadata": {"progress": "found 1 item", "completed": false}
            })
        );
        assert_eq!(provider.requests().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_stages_feed_each_other() -> Result<()> {
        let provider = MockProvider::new(vec![
            structured(json!({"items": ["B"]})),
            structured(json!({"items": ["A", "B"]})),
            structured(json!({"progress": "found 2 items", "completed": true})),
        ]);
        let previous = Items {
            items: vec!["A".to_string()],
        };

        let result = extract(&provider, request(previous)).await?;

        let requests = provider.requests();
        let extract_prompt = requests[0].messages[1].text();
        assert!(extract_prompt.contains("1:<li>A</li>"));

        let refine_prompt = requests[1].messages[1].text();
        assert!(refine_prompt.contains(r#"Previously extracted content: {"items":["A"]}"#));
        assert!(refine_prompt.contains(r#"Newly extracted content: {"items":["B"]}"#));

        let metadata_prompt = requests[2].messages[1].text();
        assert!(metadata_prompt.contains(r#"Extracted content: {"items":["A","B"]}"#));
        assert!(metadata_prompt.contains("chunksSeen: 1"));
        assert!(metadata_prompt.contains("chunksTotal: 2"));

        assert_eq!(result.data.items, vec!["A".to_string(), "B".to_string()]);
        assert!(result.metadata.completed);
        Ok(())
    }

    #[tokio::test]
    async fn test_stage_schemas() -> Result<()> {
        let provider = MockProvider::new(vec![
            structured(json!({"items": []})),
            structured(json!({"items": []})),
            structured(json!({"progress": "nothing yet", "completed": false})),
        ]);

        extract(&provider, request(Items::default())).await?;

        let requests = provider.requests();
        let names: Vec<_> = requests
            .iter()
            .map(|r| r.response_schema.as_ref().unwrap().name.clone())
            .collect();
        assert_eq!(names, vec!["Extraction", "Extraction", "Metadata"]);
        assert_eq!(
            requests[0].response_schema.as_ref().unwrap().schema["properties"]["items"]["type"],
            json!("array")
        );
        assert_eq!(
            requests[2].response_schema.as_ref().unwrap().schema["required"],
            json!(["completed", "progress"])
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_stage_aborts() {
        let provider = MockProvider::new(vec![
            structured(json!({"items": ["A"]})),
            structured(json!({"items": "A"})),
            structured(json!({"progress": "found 1 item", "completed": false})),
        ]);

        let err = extract(&provider, request(Items::default()))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<InferenceError>(),
            Some(InferenceError::InvalidResponse {
                operation: "refine",
                ..
            })
        ));
        assert_eq!(provider.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_response_aborts() {
        let provider = MockProvider::new(vec![]);

        let err = extract(&provider, request(Items::default()))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<InferenceError>(),
            Some(InferenceError::EmptyResponse {
                operation: "extract"
            })
        ));
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_default_extraction() -> Result<()> {
        let provider = MockProvider::new(vec![
            structured(json!({"extraction": "Price: $10"})),
            structured(json!({"extraction": "Price: $10"})),
            structured(json!({"progress": "found the price", "completed": true})),
        ]);
        let request = ExtractRequest {
            instruction: "find the price".to_string(),
            progress: String::new(),
            previously_extracted: DefaultExtraction::default(),
            dom_elements: "4:<span>Price: $10</span>".to_string(),
            chunks_seen: 1,
            chunks_total: 1,
            model: Some("gpt-4o-mini".to_string()),
        };

        let result = extract(&provider, request).await?;

        assert_eq!(result.data.extraction, "Price: $10");
        assert!(provider
            .requests()
            .iter()
            .all(|r| r.model.as_deref() == Some("gpt-4o-mini")));
        Ok(())
    }
}
