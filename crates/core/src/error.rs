#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Configuration problems detected at startup.
///
/// These are fatal: a process that cannot assemble a valid
/// [`PixrayConfig`](crate::config::PixrayConfig) should log the error
/// and exit rather than run half-configured.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {var}: {message}")]
    InvalidVar { var: &'static str, message: String },
}
