use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },
    #[error("Invalid value for {env_var}: {reason}")]
    InvalidValue { env_var: String, reason: String },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

// Fields that serde reports without their section
fn qualify(field: &str) -> String {
    match field {
        "type" | "api_key" => format!("provider.{}", field),
        _ => field.to_string(),
    }
}

/// The environment variable that sets a configuration field, e.g.
/// `provider.api_key` -> `RELAY_PROVIDER__API_KEY`
pub fn to_env_var(field: &str) -> String {
    format!("RELAY_{}", qualify(field).to_uppercase().replace('.', "__"))
}
