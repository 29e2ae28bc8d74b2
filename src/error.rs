use thiserror::Error;

pub type Result<T> = std::result::Result<T, PermweaveError>;

#[derive(Error, Debug)]
pub enum PermweaveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid node: {0}")]
    InvalidNode(String),

    #[error("Invalid context: {0}")]
    InvalidContext(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Messaging error: {0}")]
    Messaging(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Messenger is closed")]
    MessengerClosed,

    #[error("Operation timeout")]
    Timeout,
}

impl From<toml::de::Error> for PermweaveError {
    fn from(e: toml::de::Error) -> Self {
        PermweaveError::Config(e.to_string())
    }
}
