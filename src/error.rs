use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Cache error: {0}")]
    Cache(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Install failed: {0}")]
    Install(String),
    #[error("Invalid lifecycle transition: {from} -> {to}")]
    InvalidState {
        from: String,
        to: String,
    },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProxyError {
    pub fn is_network(&self) -> bool {
        matches!(self, ProxyError::Network(_))
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
