use anyhow::Result;

use crate::prompts::{ask_system_prompt, ask_user_prompt};
use crate::providers::base::{CompletionRequest, Provider};

/// Answer a free-form question with the model's raw text
pub async fn ask(provider: &dyn Provider, question: &str, model: Option<String>) -> Result<String> {
    let completion = CompletionRequest::new(vec![ask_system_prompt()?, ask_user_prompt(question)?])
        .with_model(model);

    let (message, _usage) = provider.complete(&completion).await?;
    Ok(message.text())
}
