//! Per-participant lifecycle state machine
//!
//! A participant holds one canonical [`Phase`]; the `is_connecting`,
//! `is_connected` and `is_disconnecting` queries are pure projections of it.
//! Transitions:
//!
//! ```text
//! Pending ──success──▶ Live ──disconnect──▶ ClosingFromLive ──released──▶ Closed
//!    │                                                                   ▲
//!    └──disconnect / timeout / error──▶ ClosingFromPending ──settled─────┘
//! ```
//!
//! Synchronous transitions (`request_disconnect`) happen under the state
//! lock; everything that suspends runs on the driver task spawned by
//! [`spawn_driver`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::attempt::{AttemptOutcome, ConnectionAttempt, Connector};
use super::control::ParticipantSummary;
use super::ids::{ParticipantId, ScriptId, SessionHandle};
use super::signal::{CancelToken, Latch};

/// Canonical lifecycle phase of a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Handshake in flight
    Pending,
    /// Handshake succeeded; a session handle is bound
    Live,
    /// Closing before the handshake produced a usable session
    ClosingFromPending,
    /// Closing a live session; the handle is being released
    ClosingFromLive,
    /// Terminal
    Closed,
}

impl Phase {
    /// Handshake state is (still) in flight
    pub fn is_connecting(self) -> bool {
        matches!(self, Phase::Pending | Phase::ClosingFromPending)
    }

    /// A session is (still) bound
    pub fn is_connected(self) -> bool {
        matches!(self, Phase::Live | Phase::ClosingFromLive)
    }

    /// Teardown has been requested but not finished
    pub fn is_disconnecting(self) -> bool {
        matches!(self, Phase::ClosingFromPending | Phase::ClosingFromLive)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Pending => "pending",
            Phase::Live => "live",
            Phase::ClosingFromPending => "closing-from-pending",
            Phase::ClosingFromLive => "closing-from-live",
            Phase::Closed => "closed",
        };
        f.write_str(label)
    }
}

struct LifecycleState {
    phase: Phase,
    handle: Option<SessionHandle>,
}

struct ParticipantInner {
    id: ParticipantId,
    desired_name: String,
    name: String,
    script: ScriptId,
    created_at: DateTime<Utc>,
    state: Mutex<LifecycleState>,
    /// Shared with the connection attempt
    cancel: CancelToken,
    /// Fired on `Live -> ClosingFromLive`
    teardown: Latch,
    ready: Latch,
    closed: Latch,
}

/// Shared handle to one synthetic participant
#[derive(Clone)]
pub struct Participant {
    inner: Arc<ParticipantInner>,
}

impl Participant {
    /// Create a participant in `Pending`
    pub(crate) fn new(
        id: ParticipantId,
        desired_name: impl Into<String>,
        name: impl Into<String>,
        script: ScriptId,
    ) -> Self {
        Self {
            inner: Arc::new(ParticipantInner {
                id,
                desired_name: desired_name.into(),
                name: name.into(),
                script,
                created_at: Utc::now(),
                state: Mutex::new(LifecycleState {
                    phase: Phase::Pending,
                    handle: None,
                }),
                cancel: CancelToken::new(),
                teardown: Latch::new(),
                ready: Latch::new(),
                closed: Latch::new(),
            }),
        }
    }

    /// Stable identifier
    pub fn id(&self) -> ParticipantId {
        self.inner.id
    }

    /// Assigned (unique) name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Name originally requested by the caller
    pub fn desired_name(&self) -> &str {
        &self.inner.desired_name
    }

    /// Script identifier forwarded to the connector
    pub fn script(&self) -> &ScriptId {
        &self.inner.script
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    /// See [`Phase::is_connecting`]
    pub fn is_connecting(&self) -> bool {
        self.phase().is_connecting()
    }

    /// See [`Phase::is_connected`]
    pub fn is_connected(&self) -> bool {
        self.phase().is_connected()
    }

    /// See [`Phase::is_disconnecting`]
    pub fn is_disconnecting(&self) -> bool {
        self.phase().is_disconnecting()
    }

    /// Bound session handle; present only while connected
    pub fn bound_handle(&self) -> Option<SessionHandle> {
        self.inner.state.lock().handle.clone()
    }

    /// Resolves when the participant first becomes live; never otherwise
    pub async fn ready(&self) {
        self.inner.ready.wait().await
    }

    /// Resolves when the participant reaches `Closed`
    pub async fn disconnected(&self) {
        self.inner.closed.wait().await
    }

    /// Request teardown; see [`Participant::request_disconnect`]
    pub fn disconnect(&self) {
        self.request_disconnect()
    }

    /// Move towards `Closed` without suspending
    ///
    /// From `Pending` the handshake is cancelled and the participant will
    /// never become live. From `Live` the driver starts releasing the
    /// session. Any other phase is left untouched.
    pub fn request_disconnect(&self) {
        let mut state = self.inner.state.lock();
        match state.phase {
            Phase::Pending => {
                state.phase = Phase::ClosingFromPending;
                drop(state);
                tracing::debug!(participant = %self.id(), name = %self.name(), "Disconnect requested while pending");
                self.inner.cancel.cancel();
            }
            Phase::Live => {
                state.phase = Phase::ClosingFromLive;
                drop(state);
                tracing::debug!(participant = %self.id(), name = %self.name(), "Disconnect requested while live");
                self.inner.teardown.fire();
            }
            _ => {}
        }
    }

    /// Point-in-time summary for status reports
    pub fn summary(&self) -> ParticipantSummary {
        ParticipantSummary {
            id: self.id(),
            name: self.name().to_string(),
            desired_name: self.desired_name().to_string(),
            script: self.script().clone(),
            phase: self.phase(),
            created_at: self.created_at(),
        }
    }

    pub(crate) fn cancel_token(&self) -> CancelToken {
        self.inner.cancel.clone()
    }

    /// `Pending -> Live`; returns false if a disconnect got there first
    fn promote(&self, handle: SessionHandle) -> bool {
        let mut state = self.inner.state.lock();
        if state.phase != Phase::Pending {
            return false;
        }
        state.phase = Phase::Live;
        state.handle = Some(handle);
        self.inner.ready.fire();
        true
    }

    /// `Pending -> ClosingFromPending` on timeout or handshake error
    fn abandon(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.phase != Phase::Pending {
            return false;
        }
        state.phase = Phase::ClosingFromPending;
        true
    }

    /// `Closing* -> Closed`; fires the closed signal
    ///
    /// Called by the owner's finalizer while it holds its own bookkeeping lock.
    pub(crate) fn mark_closed(&self) {
        let mut state = self.inner.state.lock();
        if state.phase == Phase::Closed {
            return;
        }
        state.phase = Phase::Closed;
        state.handle = None;
        self.inner.closed.fire();
    }
}

impl fmt::Debug for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Participant")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("phase", &self.phase())
            .finish()
    }
}

/// Final step of a lifecycle, run exactly once after teardown settles
///
/// It must call [`Participant::mark_closed`].
pub(crate) type Finalizer = Box<dyn FnOnce(&Participant) + Send>;

/// Spawn the task that drives `participant` from `Pending` to `Closed`
pub(crate) fn spawn_driver(
    participant: Participant,
    attempt: ConnectionAttempt,
    connector: Arc<dyn Connector>,
    finalize: Finalizer,
) -> JoinHandle<()> {
    tokio::spawn(drive(participant, attempt, connector, finalize))
}

async fn drive(
    participant: Participant,
    mut attempt: ConnectionAttempt,
    connector: Arc<dyn Connector>,
    finalize: Finalizer,
) {
    let id = participant.id();

    match attempt.outcome().await {
        Some(AttemptOutcome::Succeeded(handle)) => {
            if participant.promote(handle.clone()) {
                tracing::debug!(participant = %id, name = %participant.name(), handle = %handle, "Participant live");
                participant.inner.teardown.wait().await;
            } else {
                tracing::debug!(participant = %id, handle = %handle, "Handshake finished after disconnect; discarding session");
            }
            release(connector.as_ref(), &participant, handle).await;
        }
        Some(AttemptOutcome::TimedOut) => {
            if participant.abandon() {
                tracing::info!(participant = %id, name = %participant.name(), "Handshake timed out");
            }
        }
        Some(AttemptOutcome::Failed(err)) => {
            if participant.abandon() {
                tracing::info!(participant = %id, name = %participant.name(), error = %err, "Handshake failed");
            }
        }
        Some(AttemptOutcome::Cancelled) | None => {
            if participant.abandon() {
                tracing::info!(participant = %id, name = %participant.name(), "Handshake cancelled");
            }
        }
    }

    attempt.settled().await;
    finalize(&participant);
    tracing::debug!(participant = %id, "Participant closed");
}

async fn release(connector: &dyn Connector, participant: &Participant, handle: SessionHandle) {
    if let Err(err) = connector.release(handle.clone()).await {
        tracing::warn!(
            participant = %participant.id(),
            handle = %handle,
            error = %err,
            "Failed to release session handle; closing anyway"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::attempt::AttemptTiming;
    use crate::runtime::loopback::{Behavior, ScriptedConnector};
    use std::time::Duration;

    fn launch(connector: &ScriptedConnector, behavior: Behavior) -> Participant {
        let script = ScriptId::new("lifecycle");
        connector.script(script.clone(), behavior);
        let participant = Participant::new(ParticipantId::new(), "Bot", "Bot", script);
        let attempt = ConnectionAttempt::start(
            Arc::new(connector.clone()),
            participant.script(),
            participant.cancel_token(),
            AttemptTiming {
                timeout: Duration::from_millis(8000),
                settle_grace: Duration::from_millis(2000),
            },
        );
        spawn_driver(
            participant.clone(),
            attempt,
            Arc::new(connector.clone()),
            Box::new(|p: &Participant| p.mark_closed()),
        );
        participant
    }

    fn flags(p: &Participant) -> (bool, bool, bool) {
        (p.is_connecting(), p.is_connected(), p.is_disconnecting())
    }

    #[test]
    fn test_projection_table() {
        assert!(Phase::Pending.is_connecting());
        assert!(Phase::Live.is_connected());
        assert!(Phase::ClosingFromPending.is_connecting());
        assert!(Phase::ClosingFromPending.is_disconnecting());
        assert!(!Phase::ClosingFromPending.is_connected());
        assert!(Phase::ClosingFromLive.is_connected());
        assert!(Phase::ClosingFromLive.is_disconnecting());
        assert!(!Phase::ClosingFromLive.is_connecting());
        let closed = Phase::Closed;
        assert!(!closed.is_connecting() && !closed.is_connected() && !closed.is_disconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_to_live_to_closed() {
        let connector = ScriptedConnector::new(Behavior::Hang);
        let p = launch(&connector, Behavior::succeed_after(50));
        assert_eq!(flags(&p), (true, false, false));
        assert!(p.bound_handle().is_none());

        p.ready().await;
        assert_eq!(flags(&p), (false, true, false));
        assert!(p.bound_handle().is_some());

        p.disconnect();
        assert_eq!(flags(&p), (false, true, true));
        assert!(p.bound_handle().is_some());

        p.disconnected().await;
        assert_eq!(p.phase(), Phase::Closed);
        assert!(p.bound_handle().is_none());
        assert_eq!(connector.live_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_pending_never_goes_live() {
        let connector = ScriptedConnector::new(Behavior::Hang);
        let p = launch(&connector, Behavior::succeed_after(500));

        p.disconnect();
        assert_eq!(flags(&p), (true, false, true));
        p.disconnect();
        assert_eq!(p.phase(), Phase::ClosingFromPending);

        p.disconnected().await;
        assert_eq!(flags(&p), (false, false, false));
        assert!(!p.inner.ready.is_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_error_closes() {
        let connector = ScriptedConnector::new(Behavior::Hang);
        let p = launch(&connector, Behavior::fail_after(10, "full"));

        p.disconnected().await;
        assert!(!p.inner.ready.is_fired());
        assert_eq!(p.phase(), Phase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_failure_still_closes() {
        let connector = ScriptedConnector::new(Behavior::Hang);
        connector.fail_releases(true);
        let p = launch(&connector, Behavior::succeed_after(10));

        p.ready().await;
        p.disconnect();
        p.disconnected().await;
        assert_eq!(p.phase(), Phase::Closed);
        assert_eq!(connector.live_handles(), 1);
    }
}
