use thiserror::Error;

const ENV_PREFIX: &str = "WEBPILOT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration, set {env_var}")]
    MissingEnvVar { env_var: String },
    #[error(transparent)]
    Other(#[from] config::ConfigError),
}

/// Map a dotted settings path such as `provider.api_key` to the variable that sets it
pub fn to_env_var(field_path: &str) -> String {
    let path = field_path
        .split('.')
        .filter(|part| !part.is_empty())
        .map(|part| part.to_uppercase())
        .collect::<Vec<_>>()
        .join("__");
    format!("{}_{}", ENV_PREFIX, path)
}
