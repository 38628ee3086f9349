#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chai_relay::domains::chat::{Chat, Message, Persona, Role};
use chai_relay::error::{ChaiRelayError, Result};
use chai_relay::interfaces::providers::{ConversationStore, FragmentStream, GenerationEngine};
use chai_relay::interfaces::transport::{CloseReason, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditCall {
    pub chat_id: String,
    pub message_id: String,
    pub content: String,
}

/// In-memory store that records every write.
#[derive(Default)]
pub struct RecordingStore {
    chats: Mutex<HashMap<String, Chat>>,
    messages: Mutex<Vec<Message>>,
    edits: Mutex<Vec<EditCall>>,
    fail_edits: bool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_edits() -> Self {
        Self {
            fail_edits: true,
            ..Self::default()
        }
    }

    pub fn add_chat(&self, chat_id: &str, personas: Vec<Persona>) {
        self.chats.lock().unwrap().insert(
            chat_id.to_string(),
            Chat {
                id: chat_id.to_string(),
                personas,
            },
        );
    }

    pub fn add_message(&self, id: &str, chat_id: &str, role: Role, content: &str, created_at: i64) {
        self.messages
            .lock()
            .unwrap()
            .push(Message::new(id, chat_id, role, content, created_at));
    }

    pub fn edits(&self) -> Vec<EditCall> {
        self.edits.lock().unwrap().clone()
    }

    pub fn content_of(&self, message_id: &str) -> Option<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == message_id)
            .map(|m| m.content.clone())
    }
}

#[async_trait]
impl ConversationStore for RecordingStore {
    async fn get_chat_with_personas(&self, chat_id: &str) -> Result<Option<Chat>> {
        Ok(self.chats.lock().unwrap().get(chat_id).cloned())
    }

    async fn get_messages(&self, chat_id: &str, limit: usize) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        messages.truncate(limit);
        Ok(messages)
    }

    async fn edit_message(&self, chat_id: &str, message_id: &str, content: &str) -> Result<()> {
        self.edits.lock().unwrap().push(EditCall {
            chat_id: chat_id.to_string(),
            message_id: message_id.to_string(),
            content: content.to_string(),
        });
        if self.fail_edits {
            return Err(ChaiRelayError::Storage("disk full".to_string()));
        }
        if let Some(message) = self
            .messages
            .lock()
            .unwrap()
            .iter_mut()
            .find(|m| m.id == message_id && m.chat_id == chat_id)
        {
            message.content = content.to_string();
            message.is_generating = false;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Step {
    Fragment(&'static str),
    Fail(&'static str),
    Hang,
}

/// Engine that replays a fixed script and remembers the window it was given.
pub struct ScriptedEngine {
    steps: Vec<Step>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn fragments(fragments: &[&'static str]) -> Self {
        Self::new(fragments.iter().map(|f| Step::Fragment(*f)).collect())
    }

    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.seen.lock().unwrap().clone()
    }
}

impl GenerationEngine for ScriptedEngine {
    fn model(&self) -> &str {
        "scripted"
    }

    fn chat_stream(&self, messages: Vec<Message>) -> FragmentStream {
        self.seen.lock().unwrap().push(messages);
        let steps = self.steps.clone();
        Box::pin(async_stream::stream! {
            for step in steps {
                match step {
                    Step::Fragment(text) => yield Ok(text.to_string()),
                    Step::Fail(reason) => {
                        yield Err(ChaiRelayError::Generation(reason.to_string()));
                        break;
                    }
                    Step::Hang => {
                        futures::future::pending::<()>().await;
                    }
                }
            }
        })
    }
}

#[derive(Default)]
struct ProbeState {
    written: Vec<String>,
    closes: Vec<CloseReason>,
    aborted: bool,
}

/// Shared view of what a `ScriptedTransport` saw.
#[derive(Clone, Default)]
pub struct TransportProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl TransportProbe {
    pub fn written(&self) -> Vec<String> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn closes(&self) -> Vec<CloseReason> {
        self.state.lock().unwrap().closes.clone()
    }
}

/// Transport whose client goes away on cue.
pub struct ScriptedTransport {
    probe: TransportProbe,
    abort_after_writes: Option<usize>,
    fail_write_number: Option<usize>,
}

impl ScriptedTransport {
    pub fn new() -> (Self, TransportProbe) {
        let probe = TransportProbe::default();
        (
            Self {
                probe: probe.clone(),
                abort_after_writes: None,
                fail_write_number: None,
            },
            probe,
        )
    }

    /// Client disconnects right after receiving `writes` fragments.
    pub fn aborting_after(writes: usize) -> (Self, TransportProbe) {
        let (mut transport, probe) = Self::new();
        transport.abort_after_writes = Some(writes);
        (transport, probe)
    }

    /// The `n`th write (1-based) finds the client gone.
    pub fn failing_write(n: usize) -> (Self, TransportProbe) {
        let (mut transport, probe) = Self::new();
        transport.fail_write_number = Some(n);
        (transport, probe)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn is_aborted(&self) -> bool {
        self.probe.state.lock().unwrap().aborted
    }

    async fn write(&mut self, fragment: &str) -> Result<()> {
        let mut state = self.probe.state.lock().unwrap();
        if state.aborted || !state.closes.is_empty() {
            return Err(ChaiRelayError::Http("client disconnected".to_string()));
        }
        if self.fail_write_number == Some(state.written.len() + 1) {
            state.aborted = true;
            return Err(ChaiRelayError::Http("client disconnected".to_string()));
        }
        state.written.push(fragment.to_string());
        if self.abort_after_writes == Some(state.written.len()) {
            state.aborted = true;
        }
        Ok(())
    }

    async fn close(&mut self, reason: CloseReason) {
        self.probe.state.lock().unwrap().closes.push(reason);
    }
}

pub fn persona(name: &str) -> Persona {
    Persona {
        id: format!("persona-{}", name.to_lowercase()),
        name: name.to_string(),
        description: None,
    }
}

/// Chat `c1` with Max seated, `m1(user,"hi")` and the empty target `m2`.
pub fn max_chat() -> RecordingStore {
    let store = RecordingStore::new();
    store.add_chat("c1", vec![persona("Max")]);
    store.add_message("m1", "c1", Role::User, "hi", 1_000);
    store.add_message("m2", "c1", Role::Assistant, "", 2_000);
    store
}
