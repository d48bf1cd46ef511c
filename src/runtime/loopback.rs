//! In-process connector with scripted handshake behaviour
//!
//! Used by the `npc-sim` binary and by tests. Each script identifier can be
//! given its own behaviour; anything unscripted falls back to the default.
//! Issued and released handles are counted so leaks are observable.

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use super::attempt::Connector;
use super::error::{ConnectError, ConnectResult, ReleaseError, ReleaseResult};
use super::ids::{ScriptId, SessionHandle};
use super::signal::CancelToken;

/// How a scripted handshake behaves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behavior {
    /// Succeed after a delay unless cancelled first
    Succeed {
        /// Handshake latency
        after_ms: u64,
    },
    /// Fail after a delay unless cancelled first
    Fail {
        /// Time until the error is reported
        after_ms: u64,
        /// Error to report
        error: ConnectError,
    },
    /// Never complete on its own; resolve only when cancelled
    Hang,
    /// Succeed after a delay even if cancelled in the meantime
    IgnoreCancel {
        /// Handshake latency
        after_ms: u64,
    },
}

impl Behavior {
    /// Succeed after `ms` milliseconds
    pub fn succeed_after(ms: u64) -> Self {
        Behavior::Succeed { after_ms: ms }
    }

    /// Refuse with `reason` after `ms` milliseconds
    pub fn fail_after(ms: u64, reason: impl Into<String>) -> Self {
        Behavior::Fail {
            after_ms: ms,
            error: ConnectError::Refused(reason.into()),
        }
    }
}

struct LoopbackState {
    default: Behavior,
    scripts: RwLock<HashMap<ScriptId, Behavior>>,
    live: Mutex<HashSet<SessionHandle>>,
    next_handle: AtomicU64,
    issued: AtomicU64,
    released: AtomicU64,
    attempts: AtomicU64,
    fail_release: AtomicBool,
    release_delay_ms: AtomicU64,
}

impl LoopbackState {
    fn issue(&self) -> SessionHandle {
        let handle = SessionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        self.live.lock().insert(handle.clone());
        self.issued.fetch_add(1, Ordering::SeqCst);
        handle
    }
}

/// Connector whose handshakes follow a script
#[derive(Clone)]
pub struct ScriptedConnector {
    state: Arc<LoopbackState>,
}

impl ScriptedConnector {
    /// Create a connector with a default behaviour for unscripted identifiers
    pub fn new(default: Behavior) -> Self {
        Self {
            state: Arc::new(LoopbackState {
                default,
                scripts: RwLock::new(HashMap::new()),
                live: Mutex::new(HashSet::new()),
                next_handle: AtomicU64::new(0),
                issued: AtomicU64::new(0),
                released: AtomicU64::new(0),
                attempts: AtomicU64::new(0),
                fail_release: AtomicBool::new(false),
                release_delay_ms: AtomicU64::new(0),
            }),
        }
    }

    /// Give `script` its own behaviour
    pub fn script(&self, script: ScriptId, behavior: Behavior) {
        self.state.scripts.write().insert(script, behavior);
    }

    /// Make every subsequent release fail (the handle stays live)
    pub fn fail_releases(&self, fail: bool) {
        self.state.fail_release.store(fail, Ordering::SeqCst);
    }

    /// Delay every subsequent release
    pub fn release_delay(&self, delay: Duration) {
        self.state
            .release_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Handles issued and not yet released
    pub fn live_handles(&self) -> usize {
        self.state.live.lock().len()
    }

    /// Total handles issued
    pub fn issued(&self) -> u64 {
        self.state.issued.load(Ordering::SeqCst)
    }

    /// Total handles released
    pub fn released(&self) -> u64 {
        self.state.released.load(Ordering::SeqCst)
    }

    /// Total handshakes started
    pub fn attempts(&self) -> u64 {
        self.state.attempts.load(Ordering::SeqCst)
    }

    fn behavior_for(&self, script: &ScriptId) -> Behavior {
        self.state
            .scripts
            .read()
            .get(script)
            .cloned()
            .unwrap_or_else(|| self.state.default.clone())
    }
}

impl Connector for ScriptedConnector {
    fn attempt_connect(
        &self,
        script: &ScriptId,
        cancel: CancelToken,
    ) -> BoxFuture<'static, ConnectResult<SessionHandle>> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior_for(script);
        let state = self.state.clone();

        async move {
            match behavior {
                Behavior::Succeed { after_ms } => {
                    tokio::select! {
                        _ = cancel.cancelled() => Err(ConnectError::Cancelled),
                        _ = tokio::time::sleep(Duration::from_millis(after_ms)) => Ok(state.issue()),
                    }
                }
                Behavior::Fail { after_ms, error } => {
                    tokio::select! {
                        _ = cancel.cancelled() => Err(ConnectError::Cancelled),
                        _ = tokio::time::sleep(Duration::from_millis(after_ms)) => Err(error),
                    }
                }
                Behavior::Hang => {
                    cancel.cancelled().await;
                    Err(ConnectError::Cancelled)
                }
                Behavior::IgnoreCancel { after_ms } => {
                    tokio::time::sleep(Duration::from_millis(after_ms)).await;
                    Ok(state.issue())
                }
            }
        }
        .boxed()
    }

    fn release(&self, handle: SessionHandle) -> BoxFuture<'static, ReleaseResult<()>> {
        let state = self.state.clone();

        async move {
            let delay = state.release_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            if state.fail_release.load(Ordering::SeqCst) {
                return Err(ReleaseError::Transport("release refused".to_string()));
            }

            if !state.live.lock().remove(&handle) {
                return Err(ReleaseError::UnknownHandle(handle.to_string()));
            }
            state.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }
}
