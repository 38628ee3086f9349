use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChaiRelayError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

pub use crate::Result;
