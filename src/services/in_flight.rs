use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{ChaiRelayError, Result};

/// Message ids that currently have a generation session attached.
#[derive(Clone, Default)]
pub struct InFlightRegistry {
    ids: Arc<Mutex<HashSet<String>>>,
}

fn lock(ids: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    match ids.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `message_id` for one session. A second claim while the first
    /// is alive is rejected with `Conflict`.
    pub fn claim(&self, message_id: &str) -> Result<InFlightClaim> {
        if !lock(&self.ids).insert(message_id.to_string()) {
            return Err(ChaiRelayError::Conflict(format!(
                "message {message_id} is already generating"
            )));
        }
        Ok(InFlightClaim {
            ids: Arc::clone(&self.ids),
            message_id: message_id.to_string(),
        })
    }

    pub fn is_in_flight(&self, message_id: &str) -> bool {
        lock(&self.ids).contains(message_id)
    }
}

/// Released when dropped.
pub struct InFlightClaim {
    ids: Arc<Mutex<HashSet<String>>>,
    message_id: String,
}

impl InFlightClaim {
    pub fn message_id(&self) -> &str {
        &self.message_id
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        lock(&self.ids).remove(&self.message_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_conflicts_until_first_is_dropped() {
        let registry = InFlightRegistry::new();
        let claim = registry.claim("m2").unwrap();
        assert_eq!(claim.message_id(), "m2");
        assert!(registry.is_in_flight("m2"));
        assert!(matches!(
            registry.claim("m2"),
            Err(ChaiRelayError::Conflict(_))
        ));

        let other = registry.claim("m3").unwrap();
        drop(claim);
        assert!(!registry.is_in_flight("m2"));
        assert!(registry.claim("m2").is_ok());
        drop(other);
    }
}
