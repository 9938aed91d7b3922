use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use webpilot::handler::InferenceOptions;
use webpilot::inference::act::DEFAULT_MAX_RETRIES;
use webpilot::providers::{
    configs::{OllamaProviderConfig, OpenAiProviderConfig, ProviderConfig},
    ollama,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    OpenAi {
        #[serde(default = "default_openai_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    Ollama {
        #[serde(default = "default_ollama_host")]
        host: String,
        #[serde(default = "default_ollama_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
}

impl ProviderSettings {
    pub fn into_config(self) -> ProviderConfig {
        match self {
            ProviderSettings::OpenAi {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::OpenAi(OpenAiProviderConfig {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            }),
            ProviderSettings::Ollama {
                host,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::Ollama(OllamaProviderConfig {
                host,
                model,
                temperature,
                max_tokens,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InferenceSettings {
    #[serde(default = "default_max_act_retries")]
    pub max_act_retries: usize,
    /// Overrides the provider model for every operation
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            max_act_retries: default_max_act_retries(),
            model: None,
        }
    }
}

impl InferenceSettings {
    pub fn into_options(self) -> InferenceOptions {
        InferenceOptions {
            model: self.model,
            max_act_retries: self.max_act_retries,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub provider: ProviderSettings,
    #[serde(default)]
    pub inference: InferenceSettings,
}

impl Settings {
    /// Load settings from an optional TOML file, then layer the environment on top
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(
                Environment::with_prefix("WEBPILOT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match config.try_deserialize::<Self>() {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                if let Some(field) = missing_field_path(&err.to_string()) {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(&field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

// "missing field `api_key`", optionally followed by " for key `provider`"
fn missing_field_path(message: &str) -> Option<String> {
    let (field, rest) = message.strip_prefix("missing field `")?.split_once('`')?;
    let key = rest
        .split_once("for key `")
        .and_then(|(_, key)| key.split_once('`'))
        .map(|(key, _)| key);

    let path = match (key, field) {
        (Some(key), field) => format!("{}.{}", key, field),
        // Every required field lives in the provider section
        (None, "provider") => "provider.type".to_string(),
        (None, "type" | "api_key") => format!("provider.{}", field),
        (None, field) => field.to_string(),
    };
    Some(path)
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_openai_host() -> String {
    "https://api.openai.com".to_string()
}

fn default_ollama_host() -> String {
    ollama::OLLAMA_HOST.to_string()
}

fn default_ollama_model() -> String {
    ollama::OLLAMA_MODEL.to_string()
}

fn default_max_act_retries() -> usize {
    DEFAULT_MAX_RETRIES
}
