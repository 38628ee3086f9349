use crate::domains::chat::Persona;
use crate::interfaces::providers::PersonaProvider;

/// Builds the preamble from the persona's own fields.
#[derive(Debug, Clone, Default)]
pub struct PreamblePersonaProvider;

impl PersonaProvider for PreamblePersonaProvider {
    fn preamble(&self, persona: &Persona) -> String {
        let mut preamble = format!("You are {}.", persona.name.trim());
        if let Some(description) = persona
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
        {
            preamble.push('\n');
            preamble.push_str(description);
        }
        preamble
    }
}
