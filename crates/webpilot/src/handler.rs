use anyhow::Result;
use std::sync::Arc;

use crate::inference::act::{act, ActOutcome, ActRequest, DEFAULT_MAX_RETRIES};
use crate::inference::ask::ask;
use crate::inference::extract::{extract, ExtractRequest, ExtractSchema, ExtractionResult};
use crate::inference::observe::{observe, ObserveRequest, ObservedElement};
use crate::inference::verify::{verify_act_completion, VerifyRequest};
use crate::providers::base::Provider;

/// Settings shared by every operation a handler runs
#[derive(Debug, Clone)]
pub struct InferenceOptions {
    /// Model used when a request does not name one
    pub model: Option<String>,
    pub max_act_retries: usize,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            model: None,
            max_act_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Runs the inference operations against a shared provider
///
/// The handler holds no per-request state; clones share the provider.
#[derive(Clone)]
pub struct LlmHandler {
    provider: Arc<dyn Provider>,
    options: InferenceOptions,
}

impl LlmHandler {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            options: InferenceOptions::default(),
        }
    }

    pub fn with_options(mut self, options: InferenceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &InferenceOptions {
        &self.options
    }

    fn model(&self, requested: Option<String>) -> Option<String> {
        requested.or_else(|| self.options.model.clone())
    }

    pub async fn act(&self, request: ActRequest) -> Result<ActOutcome> {
        let request = ActRequest {
            model: self.model(request.model.clone()),
            ..request
        };
        act(self.provider.as_ref(), &request, self.options.max_act_retries).await
    }

    pub async fn verify_act_completion(&self, request: VerifyRequest) -> Result<bool> {
        let request = VerifyRequest {
            model: self.model(request.model.clone()),
            ..request
        };
        verify_act_completion(self.provider.as_ref(), &request).await
    }

    pub async fn extract<T: ExtractSchema>(
        &self,
        request: ExtractRequest<T>,
    ) -> Result<ExtractionResult<T>> {
        let request = ExtractRequest {
            model: self.model(request.model.clone()),
            ..request
        };
        extract(self.provider.as_ref(), request).await
    }

    pub async fn observe(&self, request: ObserveRequest) -> Result<Vec<ObservedElement>> {
        let request = ObserveRequest {
            model: self.model(request.model.clone()),
            ..request
        };
        observe(self.provider.as_ref(), &request).await
    }

    pub async fn ask(&self, question: &str) -> Result<String> {
        ask(self.provider.as_ref(), question, self.options.model.clone()).await
    }
}
