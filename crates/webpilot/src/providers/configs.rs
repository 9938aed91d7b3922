use super::base::SamplingParams;

// Unified enum to wrap different provider configurations
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    OpenAi(OpenAiProviderConfig),
    Ollama(OllamaProviderConfig),
}

// Define specific config structs for each provider
#[derive(Debug, Clone)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct OllamaProviderConfig {
    pub host: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

/// Configured sampling values a request may override
pub trait SamplingDefaults {
    fn sampling_defaults(&self) -> SamplingParams;
}

impl SamplingDefaults for OpenAiProviderConfig {
    fn sampling_defaults(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            ..Default::default()
        }
    }
}

impl SamplingDefaults for OllamaProviderConfig {
    fn sampling_defaults(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            ..Default::default()
        }
    }
}
