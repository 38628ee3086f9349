use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::config::{Config, MAX_HISTORY_LIMIT};
use crate::domains::chat::Message;
use crate::error::{ChaiRelayError, Result};
use crate::generation_fsm::{GenerationEvent, GenerationMachine, GenerationState};
use crate::interfaces::providers::{ConversationStore, GenerationEngine, PersonaProvider};
use crate::interfaces::transport::{CloseReason, Transport};
use crate::services::in_flight::{InFlightClaim, InFlightRegistry};
use crate::services::window::build_window;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    pub history_limit: usize,
    pub fragment_timeout: Option<Duration>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            history_limit: MAX_HISTORY_LIMIT,
            fragment_timeout: None,
        }
    }
}

impl RelaySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            history_limit: config.generation.history_limit(),
            fragment_timeout: config.generation.fragment_timeout(),
        }
    }
}

/// Ordered fragments received for one session.
#[derive(Debug, Default)]
pub struct FragmentBuffer {
    fragments: Vec<String>,
    bytes: usize,
}

impl FragmentBuffer {
    pub fn push(&mut self, fragment: String) {
        self.bytes += fragment.len();
        self.fragments.push(fragment);
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn concat(&self) -> String {
        self.fragments.concat()
    }
}

/// What a finished session did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub chat_id: String,
    pub message_id: String,
    pub outcome: GenerationState,
    pub states: Vec<GenerationState>,
    pub content: String,
    pub fragments: usize,
    pub persisted: bool,
}

/// State owned by one generation request: the window handed to the engine,
/// the accumulated fragments, and the guard that keeps the terminal write
/// to exactly one.
pub struct GenerationSession {
    chat_id: String,
    message_id: String,
    window: Vec<Message>,
    buffer: FragmentBuffer,
    machine: GenerationMachine,
    persisted: bool,
    _claim: InFlightClaim,
}

impl GenerationSession {
    fn new(chat_id: &str, message_id: &str, window: Vec<Message>, claim: InFlightClaim) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            message_id: message_id.to_string(),
            window,
            buffer: FragmentBuffer::default(),
            machine: GenerationMachine::new(),
            persisted: false,
            _claim: claim,
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn window(&self) -> &[Message] {
        &self.window
    }

    pub fn state(&self) -> GenerationState {
        self.machine.state()
    }

    pub fn content(&self) -> String {
        self.buffer.concat()
    }

    pub fn begin(&mut self) {
        if self.machine.apply(GenerationEvent::Begin).is_none() {
            warn!(
                chat_id = %self.chat_id,
                message_id = %self.message_id,
                state = self.machine.state().as_str(),
                "Generation session already started"
            );
        }
    }

    /// Records a fragment that has been delivered to the client. Ignored once
    /// the session is terminal.
    pub fn record(&mut self, fragment: String) {
        if self.machine.state() == GenerationState::Streaming {
            self.buffer.push(fragment);
        }
    }

    /// Moves the session to its terminal state and persists the buffer.
    /// Only the first call writes; later calls return the settled state.
    pub async fn finish(
        &mut self,
        event: GenerationEvent,
        store: &dyn ConversationStore,
    ) -> GenerationState {
        if self.machine.state().is_terminal() {
            debug!(
                chat_id = %self.chat_id,
                message_id = %self.message_id,
                state = self.machine.state().as_str(),
                "Generation session already settled"
            );
            return self.machine.state();
        }

        let Some(state) = self.machine.apply(event) else {
            warn!(
                chat_id = %self.chat_id,
                message_id = %self.message_id,
                state = self.machine.state().as_str(),
                ?event,
                "Rejected generation transition"
            );
            return self.machine.state();
        };

        let content = self.buffer.concat();
        match store
            .edit_message(&self.chat_id, &self.message_id, &content)
            .await
        {
            Ok(()) => self.persisted = true,
            Err(err) => error!(
                chat_id = %self.chat_id,
                message_id = %self.message_id,
                state = state.as_str(),
                "Failed to persist generated content: {}",
                err
            ),
        }
        state
    }

    fn report(&self) -> SessionReport {
        SessionReport {
            chat_id: self.chat_id.clone(),
            message_id: self.message_id.clone(),
            outcome: self.machine.state(),
            states: self.machine.history().to_vec(),
            content: self.buffer.concat(),
            fragments: self.buffer.len(),
            persisted: self.persisted,
        }
    }
}

enum StreamEnd {
    Finished,
    Cancelled,
    Failed(String),
}

/// Pulls fragments from the engine into the client response and the
/// conversation store.
#[derive(Clone)]
pub struct StreamRelay {
    store: Arc<dyn ConversationStore>,
    personas: Arc<dyn PersonaProvider>,
    engine: Arc<dyn GenerationEngine>,
    settings: RelaySettings,
    in_flight: InFlightRegistry,
}

impl StreamRelay {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        personas: Arc<dyn PersonaProvider>,
        engine: Arc<dyn GenerationEngine>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            store,
            personas,
            engine,
            settings,
            in_flight: InFlightRegistry::new(),
        }
    }

    pub fn in_flight(&self) -> &InFlightRegistry {
        &self.in_flight
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Resolves the chat, its speaking persona and the conversation window.
    /// Nothing is written to the store here.
    pub async fn prepare(&self, chat_id: &str, message_id: &str) -> Result<GenerationSession> {
        let claim = self.in_flight.claim(message_id)?;

        let chat = self
            .store
            .get_chat_with_personas(chat_id)
            .await?
            .ok_or_else(|| ChaiRelayError::NotFound(format!("chat {chat_id}")))?;
        let persona = chat
            .speaking_persona()
            .ok_or_else(|| ChaiRelayError::NotFound(format!("persona for chat {chat_id}")))?;
        let preamble = self.personas.preamble(persona);

        let history = self
            .store
            .get_messages(chat_id, self.settings.history_limit)
            .await?;
        let window = build_window(history, message_id, preamble).ok_or_else(|| {
            ChaiRelayError::NotFound(format!("message {message_id} in chat {chat_id}"))
        })?;

        debug!(
            chat_id,
            message_id,
            persona = %persona.name,
            window = window.len(),
            "Prepared generation window"
        );
        Ok(GenerationSession::new(chat_id, message_id, window, claim))
    }

    /// Streams one session to completion, cancellation or failure. Persists
    /// exactly once, then closes `transport` exactly once.
    pub async fn run<T: Transport>(
        &self,
        mut session: GenerationSession,
        mut transport: T,
    ) -> SessionReport {
        session.begin();
        info!(
            chat_id = %session.chat_id,
            message_id = %session.message_id,
            model = self.engine.model(),
            "Generation started"
        );

        let mut fragments = self.engine.chat_stream(session.window.clone());
        let end = loop {
            let next = match self.settings.fragment_timeout {
                Some(limit) => match tokio::time::timeout(limit, fragments.next()).await {
                    Ok(next) => next,
                    Err(_) => Some(Err(ChaiRelayError::Generation(format!(
                        "no fragment within {}s",
                        limit.as_secs_f32()
                    )))),
                },
                None => fragments.next().await,
            };

            match next {
                None => break StreamEnd::Finished,
                Some(Err(err)) => break StreamEnd::Failed(err.to_string()),
                Some(Ok(fragment)) => {
                    if transport.is_aborted() {
                        break StreamEnd::Cancelled;
                    }
                    if fragment.is_empty() {
                        continue;
                    }
                    if transport.write(&fragment).await.is_err() {
                        break StreamEnd::Cancelled;
                    }
                    session.record(fragment);
                }
            }
        };
        drop(fragments);

        let (event, reason) = match end {
            StreamEnd::Finished => (GenerationEvent::Finish, CloseReason::Finished),
            StreamEnd::Cancelled => (GenerationEvent::Cancel, CloseReason::Finished),
            StreamEnd::Failed(message) => {
                warn!(
                    chat_id = %session.chat_id,
                    message_id = %session.message_id,
                    "Generation failed: {}",
                    message
                );
                (GenerationEvent::Fail, CloseReason::Failed(message))
            }
        };

        let state = session.finish(event, self.store.as_ref()).await;
        transport.close(reason).await;

        let report = session.report();
        info!(
            chat_id = %report.chat_id,
            message_id = %report.message_id,
            outcome = state.as_str(),
            fragments = report.fragments,
            bytes = session.buffer.bytes(),
            persisted = report.persisted,
            "Generation ended"
        );
        report
    }
}
