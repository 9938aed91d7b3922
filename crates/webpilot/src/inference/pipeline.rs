use anyhow::Result;

use crate::models::message::Message;
use crate::providers::base::{CompletionRequest, Provider};

/// One model call in a chain of dependent calls
///
/// A stage turns its typed input into a completion request and decodes the response into its
/// typed output. Chaining is done by feeding one stage's output into the next stage's input,
/// so a stage can only run once everything it depends on exists.
pub trait Stage {
    type Input;
    type Output;

    fn name(&self) -> &'static str;

    fn request(&self, input: &Self::Input) -> Result<CompletionRequest>;

    fn decode(&self, message: &Message) -> Result<Self::Output>;
}

/// Run a single stage against the provider
pub async fn run_stage<S>(provider: &dyn Provider, stage: &S, input: &S::Input) -> Result<S::Output>
where
    S: Stage + Sync,
    S::Input: Sync,
{
    let request = stage.request(input)?;
    tracing::debug!(stage = stage.name(), "running stage");
    let (message, usage) = provider.complete(&request).await?;
    tracing::debug!(stage = stage.name(), total_tokens = ?usage.total_tokens, "stage finished");
    stage.decode(&message)
}
