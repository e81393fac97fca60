use thiserror::Error;

#[derive(Debug, Error)]
pub enum WarpError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown token: {0}")]
    UnknownToken(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, WarpError>;
