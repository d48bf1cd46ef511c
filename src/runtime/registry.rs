//! Name registry and live human directory
//!
//! The registry owns the synthetic side of the shared namespace and consults
//! a [`LiveNames`] source for the human side. Every mutation runs to
//! completion without suspending; callers hold it behind the manager lock.

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::error::{NpcError, Result};
use super::ids::{HumanId, Identity, ParticipantId};

/// Query side of the external human-participant registry
pub trait LiveNames: Send + Sync {
    /// Whether a human currently holds `name` (case-insensitive)
    fn is_name_in_use(&self, name: &str) -> bool;
}

/// A directory with no humans in it
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHumans;

impl LiveNames for NoHumans {
    fn is_name_in_use(&self, _name: &str) -> bool {
        false
    }
}

/// Produces a candidate name when the desired one is taken
pub trait SuffixStrategy: Send {
    /// Build a candidate from `desired` that is at most `max_len` characters
    fn candidate(&mut self, desired: &str, max_len: usize) -> String;
}

/// `<prefix>_<zero padded decimal>` with a uniformly random suffix
pub struct RandomSuffix {
    rng: StdRng,
    digits: u32,
}

impl RandomSuffix {
    /// Suffix generator seeded from OS entropy
    pub fn new(digits: u32) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            digits,
        }
    }

    /// Deterministic suffix generator
    pub fn seeded(seed: u64, digits: u32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            digits,
        }
    }

    /// Number of distinct suffixes this generator can draw
    pub fn space(&self) -> u64 {
        10u64.saturating_pow(self.digits)
    }
}

impl SuffixStrategy for RandomSuffix {
    fn candidate(&mut self, desired: &str, max_len: usize) -> String {
        let suffix = self.rng.gen_range(0..self.space());
        let tail = format!("_{:0width$}", suffix, width = self.digits as usize);
        let room = max_len.saturating_sub(tail.len());
        let mut name: String = desired.chars().take(room).collect();
        name.push_str(&tail);
        name
    }
}

fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Tracks synthetic reservations and allocates collision-free names
pub struct NameRegistry {
    humans: Arc<dyn LiveNames>,
    strategy: Box<dyn SuffixStrategy>,
    /// Folded name -> holder
    by_name: HashMap<String, ParticipantId>,
    /// Holder -> current name (exact spelling)
    by_holder: HashMap<ParticipantId, String>,
    max_len: usize,
    max_attempts: u32,
}

impl NameRegistry {
    /// Create a registry over the given human directory
    pub fn new(
        humans: Arc<dyn LiveNames>,
        strategy: Box<dyn SuffixStrategy>,
        max_len: usize,
        max_attempts: u32,
    ) -> Self {
        Self {
            humans,
            strategy,
            by_name: HashMap::new(),
            by_holder: HashMap::new(),
            max_len,
            max_attempts,
        }
    }

    /// Whether `name` is free in the combined namespace
    pub fn is_available(&self, name: &str) -> bool {
        !self.by_name.contains_key(&fold(name)) && !self.humans.is_name_in_use(name)
    }

    /// Reserve a unique name for `holder`, derived from `desired`
    ///
    /// Returns `desired` unchanged when it is free; otherwise draws suffixed
    /// candidates until one is free or the attempt bound is reached.
    pub fn allocate(&mut self, holder: ParticipantId, desired: &str) -> Result<String> {
        let name = if self.is_available(desired) {
            desired.to_string()
        } else {
            self.draw(desired)?
        };

        self.by_name.insert(fold(&name), holder);
        self.by_holder.insert(holder, name.clone());
        Ok(name)
    }

    fn draw(&mut self, desired: &str) -> Result<String> {
        for attempt in 1..=self.max_attempts {
            let candidate = self.strategy.candidate(desired, self.max_len);
            if self.is_available(&candidate) {
                return Ok(candidate);
            }
            tracing::trace!(desired, candidate = %candidate, attempt, "Suffix collision");
        }

        Err(NpcError::NameExhausted {
            desired: desired.to_string(),
            attempts: self.max_attempts,
        })
    }

    /// Drop `holder`'s reservation, returning the name it held
    pub fn release(&mut self, holder: ParticipantId) -> Option<String> {
        let name = self.by_holder.remove(&holder)?;
        let key = fold(&name);
        if self.by_name.get(&key) == Some(&holder) {
            self.by_name.remove(&key);
        }
        Some(name)
    }

    /// Apply a display-name change reported by the live registry
    ///
    /// A renamed participant's reservation moves to the new name. Human
    /// names are always read live, so a human rename needs no bookkeeping.
    pub fn on_external_rename(&mut self, identity: Identity, new_name: &str) {
        let holder = match identity {
            Identity::Participant(holder) => holder,
            Identity::Human(_) => {
                tracing::trace!(%identity, new_name, "Human rename observed");
                return;
            }
        };

        let Some(old) = self.by_holder.get(&holder).cloned() else {
            tracing::debug!(%identity, new_name, "Rename for untracked participant ignored");
            return;
        };

        let old_key = fold(&old);
        if self.by_name.get(&old_key) == Some(&holder) {
            self.by_name.remove(&old_key);
        }

        let new_key = fold(new_name);
        match self.by_name.get(&new_key) {
            Some(other) if *other != holder => {
                tracing::warn!(
                    %identity,
                    new_name,
                    other = %other,
                    "Renamed onto a name reserved by another participant"
                );
            }
            _ => {
                self.by_name.insert(new_key, holder);
            }
        }
        self.by_holder.insert(holder, new_name.to_string());
    }

    /// Current holder of `name`, if a participant reserves it
    pub fn holder_of(&self, name: &str) -> Option<ParticipantId> {
        self.by_name.get(&fold(name)).copied()
    }

    /// Current name reserved by `holder`
    pub fn name_of(&self, holder: &ParticipantId) -> Option<&str> {
        self.by_holder.get(holder).map(String::as_str)
    }

    /// Number of synthetic reservations
    pub fn reserved_count(&self) -> usize {
        self.by_holder.len()
    }

    /// Forget every synthetic reservation
    pub fn clear(&mut self) {
        self.by_name.clear();
        self.by_holder.clear();
    }
}

/// A display-name change published by the live registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameEvent {
    /// Who changed name
    pub identity: Identity,
    /// The name they now hold
    pub new_name: String,
}

/// In-memory live registry of human participants
pub struct HumanRoster {
    names: RwLock<HashMap<HumanId, String>>,
    events: broadcast::Sender<RenameEvent>,
}

impl HumanRoster {
    /// Create an empty roster
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            names: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// A human connects under `name`
    pub fn join(&self, id: HumanId, name: impl Into<String>) {
        self.names.write().insert(id, name.into());
    }

    /// A human disconnects
    pub fn leave(&self, id: HumanId) -> Option<String> {
        self.names.write().remove(&id)
    }

    /// A human changes display name; publishes a [`RenameEvent`]
    pub fn rename(&self, id: HumanId, new_name: impl Into<String>) -> Option<String> {
        let new_name = new_name.into();
        let old = self.names.write().insert(id, new_name.clone());
        // No subscribers is fine
        let _ = self.events.send(RenameEvent {
            identity: Identity::Human(id),
            new_name,
        });
        old
    }

    /// Publish a rename for an identity this roster does not own
    pub fn announce(&self, event: RenameEvent) {
        let _ = self.events.send(event);
    }

    /// Subscribe to rename events
    pub fn subscribe(&self) -> broadcast::Receiver<RenameEvent> {
        self.events.subscribe()
    }

    /// Current name of a human
    pub fn name_of(&self, id: HumanId) -> Option<String> {
        self.names.read().get(&id).cloned()
    }
}

impl Default for HumanRoster {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveNames for HumanRoster {
    fn is_name_in_use(&self, name: &str) -> bool {
        self.names
            .read()
            .values()
            .any(|held| held.eq_ignore_ascii_case(name))
    }
}
