use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("unknown OS policy: {0}")]
    UnknownPolicy(String),

    #[error("unknown normalization mode: {0}")]
    UnknownMode(String),

    #[error("config error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, StreamError>;
