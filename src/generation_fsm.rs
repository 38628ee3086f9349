use rust_fsm::*;

state_machine! {
    generation_flow(Init)

    Init(Begin) => Streaming,
    Streaming(Finish) => Completed,
    Streaming(Cancel) => Aborted,
    Streaming(Fail) => Failed
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationState {
    Init,
    Streaming,
    Completed,
    Aborted,
    Failed,
}

impl GenerationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GenerationState::Completed | GenerationState::Aborted | GenerationState::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GenerationState::Init => "init",
            GenerationState::Streaming => "streaming",
            GenerationState::Completed => "completed",
            GenerationState::Aborted => "aborted",
            GenerationState::Failed => "failed",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationEvent {
    Begin,
    Finish,
    Cancel,
    Fail,
}

fn expected_next_state(current: GenerationState, event: GenerationEvent) -> Option<GenerationState> {
    match (current, event) {
        (GenerationState::Init, GenerationEvent::Begin) => Some(GenerationState::Streaming),
        (GenerationState::Streaming, GenerationEvent::Finish) => Some(GenerationState::Completed),
        (GenerationState::Streaming, GenerationEvent::Cancel) => Some(GenerationState::Aborted),
        (GenerationState::Streaming, GenerationEvent::Fail) => Some(GenerationState::Failed),
        _ => None,
    }
}

fn input_for(event: GenerationEvent) -> generation_flow::Input {
    match event {
        GenerationEvent::Begin => generation_flow::Input::Begin,
        GenerationEvent::Finish => generation_flow::Input::Finish,
        GenerationEvent::Cancel => generation_flow::Input::Cancel,
        GenerationEvent::Fail => generation_flow::Input::Fail,
    }
}

/// Per-session machine. Keeps the visited states so callers can report the
/// path a session took.
pub struct GenerationMachine {
    machine: generation_flow::StateMachine,
    state: GenerationState,
    history: Vec<GenerationState>,
}

impl GenerationMachine {
    pub fn new() -> Self {
        Self {
            machine: generation_flow::StateMachine::new(),
            state: GenerationState::Init,
            history: vec![GenerationState::Init],
        }
    }

    pub fn state(&self) -> GenerationState {
        self.state
    }

    pub fn history(&self) -> &[GenerationState] {
        &self.history
    }

    /// Applies `event`; returns the new state, or `None` when the transition
    /// is not allowed (the machine is left untouched).
    pub fn apply(&mut self, event: GenerationEvent) -> Option<GenerationState> {
        let next = expected_next_state(self.state, event)?;
        self.machine.consume(&input_for(event)).ok()?;
        self.state = next;
        self.history.push(next);
        Some(next)
    }
}

impl Default for GenerationMachine {
    fn default() -> Self {
        Self::new()
    }
}
