//! Identifiers and opaque tokens
//!
//! Participants are keyed by a random UUID that is never reused while the
//! participant is live. Human identities, script identifiers, and session
//! handles belong to external collaborators and are carried through opaquely.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Synthetic participant identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    /// Create a new random ParticipantId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a human participant, as issued by the live registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HumanId(pub u64);

impl fmt::Display for HumanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "human#{}", self.0)
    }
}

/// Holder of a name in the shared namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identity {
    /// A human participant
    Human(HumanId),
    /// A synthetic participant
    Participant(ParticipantId),
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Human(id) => write!(f, "{}", id),
            Identity::Participant(id) => write!(f, "npc#{}", id),
        }
    }
}

/// Script identifier forwarded unchanged to the connector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScriptId(pub String);

impl ScriptId {
    /// Create a new script identifier
    pub fn new(script: impl Into<String>) -> Self {
        Self(script.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session handle issued by the connector when a handshake succeeds
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle(pub u64);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_ids_are_distinct() {
        let a = ParticipantId::new();
        let b = ParticipantId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(Identity::Human(HumanId(7)).to_string(), "human#7");
        let id = ParticipantId::from_uuid(Uuid::nil());
        assert_eq!(
            Identity::Participant(id).to_string(),
            format!("npc#{}", Uuid::nil())
        );
    }
}
