use thiserror::Error;

/// Common error type for mbmd components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging setup failed: {0}")]
    Tracing(String),
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
