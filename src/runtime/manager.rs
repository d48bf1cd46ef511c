//! Participant manager
//!
//! Owns the name registry and the collection of non-closed participants.
//! `create` never suspends; each participant's driver removes it from the
//! collection, under the same lock, at the moment it reaches `Closed`.

use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::ManagerConfig;
use super::attempt::{ConnectionAttempt, Connector};
use super::control::ManagerStatus;
use super::error::{NpcError, Result};
use super::ids::{Identity, ParticipantId, ScriptId};
use super::lifecycle::{self, Finalizer, Participant};
use super::registry::{LiveNames, NameRegistry, RandomSuffix, RenameEvent, SuffixStrategy};

struct ManagerState {
    participants: HashMap<ParticipantId, Participant>,
    registry: NameRegistry,
    disposed: bool,
    watchers: Vec<JoinHandle<()>>,
}

struct Shared {
    config: ManagerConfig,
    connector: Arc<dyn Connector>,
    state: Mutex<ManagerState>,
}

/// Creates synthetic participants and tracks them until they close
pub struct NpcManager {
    shared: Arc<Shared>,
}

impl NpcManager {
    /// Create a manager with the configured random suffix strategy
    pub fn new(
        config: ManagerConfig,
        connector: Arc<dyn Connector>,
        humans: Arc<dyn LiveNames>,
    ) -> Result<Self> {
        let strategy: Box<dyn SuffixStrategy> = match config.name_seed {
            Some(seed) => Box::new(RandomSuffix::seeded(seed, config.suffix_digits)),
            None => Box::new(RandomSuffix::new(config.suffix_digits)),
        };
        Self::with_strategy(config, connector, humans, strategy)
    }

    /// Create a manager with a custom suffix strategy
    pub fn with_strategy(
        config: ManagerConfig,
        connector: Arc<dyn Connector>,
        humans: Arc<dyn LiveNames>,
        strategy: Box<dyn SuffixStrategy>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = NameRegistry::new(
            humans,
            strategy,
            config.max_name_len,
            config.max_allocation_attempts,
        );

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                connector,
                state: Mutex::new(ManagerState {
                    participants: HashMap::new(),
                    registry,
                    disposed: false,
                    watchers: Vec::new(),
                }),
            }),
        })
    }

    /// Get the current configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    /// Create a participant and start its handshake
    ///
    /// Returns immediately with the participant in `Pending`. Only name
    /// allocation exhaustion (or a disposed manager) is reported as an
    /// error; handshake problems show up as the participant closing.
    /// Must be called from within a tokio runtime.
    pub fn create(&self, desired_name: &str, script: ScriptId) -> Result<Participant> {
        let mut state = self.shared.state.lock();
        if state.disposed {
            return Err(NpcError::Disposed);
        }

        let id = ParticipantId::new();
        let name = state.registry.allocate(id, desired_name)?;
        let participant = Participant::new(id, desired_name, name, script);
        state.participants.insert(id, participant.clone());
        drop(state);

        // The connector is foreign code; never call it under the manager lock
        let attempt = ConnectionAttempt::start(
            self.shared.connector.clone(),
            participant.script(),
            participant.cancel_token(),
            self.shared.config.attempt_timing(),
        );

        tracing::debug!(
            participant = %id,
            name = %participant.name(),
            desired = desired_name,
            script = %participant.script(),
            "Participant created"
        );

        lifecycle::spawn_driver(
            participant.clone(),
            attempt,
            self.shared.connector.clone(),
            self.finalizer(),
        );
        Ok(participant)
    }

    fn finalizer(&self) -> Finalizer {
        let shared = Arc::downgrade(&self.shared);
        Box::new(move |participant: &Participant| {
            let Some(shared) = shared.upgrade() else {
                participant.mark_closed();
                return;
            };

            let mut state = shared.state.lock();
            participant.mark_closed();
            state.participants.remove(&participant.id());
            state.registry.release(participant.id());
        })
    }

    /// Number of participants that have not reached `Closed`
    pub fn count(&self) -> usize {
        self.shared.state.lock().participants.len()
    }

    /// Look up a tracked participant
    pub fn get(&self, id: &ParticipantId) -> Option<Participant> {
        self.shared.state.lock().participants.get(id).cloned()
    }

    /// Look up a tracked participant by the name it currently reserves
    pub fn find_by_name(&self, name: &str) -> Option<Participant> {
        let state = self.shared.state.lock();
        let id = state.registry.holder_of(name)?;
        state.participants.get(&id).cloned()
    }

    /// All tracked participants
    pub fn participants(&self) -> Vec<Participant> {
        self.shared
            .state
            .lock()
            .participants
            .values()
            .cloned()
            .collect()
    }

    /// Relay a display-name change from the live registry
    pub fn on_human_rename(&self, identity: Identity, new_name: &str) {
        apply_rename(&self.shared, identity, new_name);
    }

    /// Forward every event from a rename stream until it closes or the
    /// manager is disposed
    pub fn watch_renames(&self, mut events: broadcast::Receiver<RenameEvent>) {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(shared) = shared.upgrade() else {
                            break;
                        };
                        apply_rename(&shared, event.identity, &event.new_name);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Rename stream lagged; some renames were dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let mut state = self.shared.state.lock();
        if state.disposed {
            task.abort();
        } else {
            state.watchers.push(task);
        }
    }

    /// Snapshot of the manager and its participants
    pub fn status(&self) -> ManagerStatus {
        let state = self.shared.state.lock();
        ManagerStatus {
            count: state.participants.len(),
            disposed: state.disposed,
            reserved_names: state.registry.reserved_count(),
            participants: state.participants.values().map(Participant::summary).collect(),
        }
    }

    /// Whether `dispose()` has started
    pub fn is_disposed(&self) -> bool {
        self.shared.state.lock().disposed
    }

    /// Disconnect every participant and wait until all of them are closed
    ///
    /// No participant can be created once this has started. Safe to call
    /// with no participants and safe to call more than once.
    pub async fn dispose(&self) {
        let participants: Vec<Participant> = {
            let mut state = self.shared.state.lock();
            state.disposed = true;
            state.participants.values().cloned().collect()
        };

        tracing::debug!(count = participants.len(), "Disposing participant manager");
        for participant in &participants {
            participant.request_disconnect();
        }
        join_all(participants.iter().map(|p| p.disconnected())).await;

        let mut state = self.shared.state.lock();
        debug_assert!(state.participants.is_empty());
        if !state.participants.is_empty() {
            tracing::error!(
                remaining = state.participants.len(),
                "Participants still tracked after dispose"
            );
        }
        state.registry.clear();
        for watcher in state.watchers.drain(..) {
            watcher.abort();
        }
    }
}

fn apply_rename(shared: &Shared, identity: Identity, new_name: &str) {
    tracing::debug!(%identity, new_name, "Rename relayed to name registry");
    shared
        .state
        .lock()
        .registry
        .on_external_rename(identity, new_name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Phase;
    use crate::runtime::loopback::{Behavior, ScriptedConnector};
    use crate::runtime::error::{ConnectError, ConnectResult, ReleaseResult};
    use crate::runtime::ids::SessionHandle;
    use crate::runtime::registry::NoHumans;
    use crate::runtime::signal::CancelToken;
    use futures::future::BoxFuture;

    fn manager(connector: &ScriptedConnector) -> NpcManager {
        NpcManager::new(
            ManagerConfig::default(),
            Arc::new(connector.clone()),
            Arc::new(NoHumans),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_is_pending_and_counted() {
        let connector = ScriptedConnector::new(Behavior::succeed_after(100));
        let npcs = manager(&connector);

        let p = npcs.create("Guard", ScriptId::new("patrol")).unwrap();
        assert_eq!(p.phase(), Phase::Pending);
        assert_eq!(npcs.count(), 1);
        assert_eq!(npcs.get(&p.id()).map(|q| q.id()), Some(p.id()));
        assert_eq!(npcs.find_by_name("guard").map(|q| q.id()), Some(p.id()));

        p.ready().await;
        p.disconnect();
        p.disconnected().await;
        assert_eq!(npcs.count(), 0);
        assert_eq!(npcs.status().reserved_names, 0);
    }

    /// Records whether the manager lock was free when a handshake began
    struct LockCheckingConnector {
        inner: ScriptedConnector,
        shared: Mutex<Weak<Shared>>,
        lock_free: Mutex<Vec<bool>>,
    }

    impl Connector for LockCheckingConnector {
        fn attempt_connect(
            &self,
            script: &ScriptId,
            cancel: CancelToken,
        ) -> BoxFuture<'static, ConnectResult<SessionHandle>> {
            if let Some(shared) = self.shared.lock().upgrade() {
                self.lock_free.lock().push(shared.state.try_lock().is_some());
            }
            self.inner.attempt_connect(script, cancel)
        }

        fn release(&self, handle: SessionHandle) -> BoxFuture<'static, ReleaseResult<()>> {
            self.inner.release(handle)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connector_is_called_without_manager_lock() {
        let connector = Arc::new(LockCheckingConnector {
            inner: ScriptedConnector::new(Behavior::succeed_after(10)),
            shared: Mutex::new(Weak::new()),
            lock_free: Mutex::new(Vec::new()),
        });
        let npcs = NpcManager::new(ManagerConfig::default(), connector.clone(), Arc::new(NoHumans))
            .unwrap();
        *connector.shared.lock() = Arc::downgrade(&npcs.shared);

        let p = npcs.create("Guard", ScriptId::new("patrol")).unwrap();
        p.ready().await;
        assert_eq!(*connector.lock_free.lock(), vec![true]);

        npcs.dispose().await;
        assert_eq!(connector.inner.live_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connector_reported_cancel_closes_participant() {
        let connector = ScriptedConnector::new(Behavior::Fail {
            after_ms: 10,
            error: ConnectError::Cancelled,
        });
        let npcs = manager(&connector);

        let p = npcs.create("Guard", ScriptId::new("patrol")).unwrap();
        p.disconnected().await;
        assert_eq!(p.phase(), Phase::Closed);
        assert_eq!(npcs.count(), 0);
        assert_eq!(npcs.status().reserved_names, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_after_dispose_fails() {
        let connector = ScriptedConnector::new(Behavior::succeed_after(100));
        let npcs = manager(&connector);
        npcs.dispose().await;

        let err = npcs.create("Guard", ScriptId::new("patrol")).unwrap_err();
        assert!(matches!(err, NpcError::Disposed));
        assert!(npcs.is_disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_phases() {
        let connector = ScriptedConnector::new(Behavior::Hang);
        connector.script(ScriptId::new("fast"), Behavior::succeed_after(10));
        let npcs = manager(&connector);

        let fast = npcs.create("Fast", ScriptId::new("fast")).unwrap();
        npcs.create("Slow", ScriptId::new("slow")).unwrap();
        fast.ready().await;

        let status = npcs.status();
        assert_eq!(status.count, 2);
        assert_eq!(status.in_phase(Phase::Live), 1);
        assert_eq!(status.in_phase(Phase::Pending), 1);

        npcs.dispose().await;
        assert_eq!(npcs.count(), 0);
    }
}
