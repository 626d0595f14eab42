use thiserror::Error;

/// Errors surfaced while loading or validating startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),

    #[error("environment variable {name} has an invalid value '{value}': {reason}")]
    InvalidEnv {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid rotation settings: {0}")]
    InvalidSettings(String),
}
