use async_trait::async_trait;

use crate::error::Result;

/// How a session ends its response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Finished,
    Failed(String),
}

/// The open response a session writes fragments to.
#[async_trait]
pub trait Transport: Send {
    /// True once the client has gone away.
    fn is_aborted(&self) -> bool;

    /// Resolves once the fragment has been handed to the response. An error
    /// means the client is gone and the fragment was not delivered.
    async fn write(&mut self, fragment: &str) -> Result<()>;

    async fn close(&mut self, reason: CloseReason);
}
