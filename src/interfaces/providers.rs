use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domains::chat::{Chat, Message, Persona};
use crate::error::Result;

/// Lazy, finite sequence of generated text. A clean end means the model
/// signalled completion; any backend failure arrives as an `Err` item.
pub type FragmentStream = BoxStream<'static, Result<String>>;

pub trait GenerationEngine: Send + Sync {
    fn model(&self) -> &str;

    /// Starts a fresh generation session over `messages` (chronological).
    fn chat_stream(&self, messages: Vec<Message>) -> FragmentStream;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_chat_with_personas(&self, chat_id: &str) -> Result<Option<Chat>>;

    /// Most recent first, at most `limit` rows.
    async fn get_messages(&self, chat_id: &str, limit: usize) -> Result<Vec<Message>>;

    /// Replaces the content of a message and clears its generating flag.
    async fn edit_message(&self, chat_id: &str, message_id: &str, content: &str) -> Result<()>;
}

pub trait PersonaProvider: Send + Sync {
    fn preamble(&self, persona: &Persona) -> String;
}
