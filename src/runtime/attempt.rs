//! Connection attempts: one handshake raced against cancellation and a timer
//!
//! An attempt is spawned the moment it is constructed. Its first resolution
//! is delivered exactly once through [`ConnectionAttempt::outcome`]; if
//! cancellation or the timer wins, the abandoned handshake keeps being
//! driven so that a late handle is released instead of leaked.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::error::{ConnectError, ConnectResult, ReleaseResult};
use super::ids::{ScriptId, SessionHandle};
use super::signal::CancelToken;

/// The external primitive that attaches a synthetic participant to the session
pub trait Connector: Send + Sync + 'static {
    /// Perform one handshake for `script`
    ///
    /// Implementations should observe `cancel` and give up early, but are
    /// not required to: a handle produced after cancellation is released.
    fn attempt_connect(
        &self,
        script: &ScriptId,
        cancel: CancelToken,
    ) -> BoxFuture<'static, ConnectResult<SessionHandle>>;

    /// Detach a previously established session
    fn release(&self, handle: SessionHandle) -> BoxFuture<'static, ReleaseResult<()>>;
}

/// First resolution of a connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The handshake completed and produced a session handle
    Succeeded(SessionHandle),
    /// Cancellation was requested before the handshake completed
    Cancelled,
    /// The timer fired before the handshake completed
    TimedOut,
    /// The primitive reported an error
    Failed(ConnectError),
}

/// Timing knobs for a single attempt
#[derive(Debug, Clone, Copy)]
pub struct AttemptTiming {
    /// Deadline for the handshake
    pub timeout: Duration,
    /// How long an abandoned handshake may take to settle before it is detached
    pub settle_grace: Duration,
}

/// A running handshake
///
/// Dropping an attempt before its outcome has been taken cancels it; any
/// handle the primitive still produces is released.
pub struct ConnectionAttempt {
    cancel: CancelToken,
    decided: Option<oneshot::Receiver<AttemptOutcome>>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionAttempt {
    /// Start a handshake for `script` right away
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        connector: Arc<dyn Connector>,
        script: &ScriptId,
        cancel: CancelToken,
        timing: AttemptTiming,
    ) -> Self {
        let (tx, rx) = oneshot::channel();
        let handshake = connector.attempt_connect(script, cancel.clone());
        let task = tokio::spawn(race(connector, handshake, cancel.clone(), timing, tx));

        Self {
            cancel,
            decided: Some(rx),
            task: Some(task),
        }
    }

    /// Request cancellation; a no-op once the attempt has resolved
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token observed by this attempt
    pub fn token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Wait for the first resolution
    ///
    /// The outcome is handed out once; later calls return `None`.
    pub async fn outcome(&mut self) -> Option<AttemptOutcome> {
        let rx = self.decided.take()?;

        Some(match rx.await {
            Ok(outcome) => outcome,
            Err(_) => AttemptOutcome::Failed(ConnectError::Transport(
                "connection attempt task ended without resolving".to_string(),
            )),
        })
    }

    /// Wait until the handshake has fully settled and any late handle is released
    pub async fn settled(mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(err) = task.await {
            tracing::warn!(error = %err, "Connection attempt task failed");
        }
    }
}

impl Drop for ConnectionAttempt {
    fn drop(&mut self) {
        // Nobody can receive the outcome any more
        if self.decided.is_some() {
            self.cancel.cancel();
        }
    }
}

async fn race(
    connector: Arc<dyn Connector>,
    mut handshake: BoxFuture<'static, ConnectResult<SessionHandle>>,
    cancel: CancelToken,
    timing: AttemptTiming,
    decided: oneshot::Sender<AttemptOutcome>,
) {
    // `abandoned` is true only when the handshake future is still unresolved
    let (outcome, abandoned) = tokio::select! {
        biased;
        _ = cancel.cancelled() => (AttemptOutcome::Cancelled, true),
        result = &mut handshake => match result {
            Ok(handle) => (AttemptOutcome::Succeeded(handle), false),
            Err(err) => (AttemptOutcome::Failed(err), false),
        },
        _ = tokio::time::sleep(timing.timeout) => (AttemptOutcome::TimedOut, true),
    };

    if let Err(AttemptOutcome::Succeeded(handle)) = decided.send(outcome) {
        tracing::debug!(handle = %handle, "Attempt dropped before its outcome was taken");
        discard(connector.as_ref(), handle).await;
    }

    if !abandoned {
        return;
    }

    // The handshake future is still live; ask it to stop and drain it.
    cancel.cancel();
    let settled = tokio::time::timeout(timing.settle_grace, &mut handshake).await;
    match settled {
        Ok(Ok(handle)) => discard(connector.as_ref(), handle).await,
        Ok(Err(_)) => {}
        Err(_) => {
            tracing::warn!(
                grace_ms = timing.settle_grace.as_millis() as u64,
                "Abandoned handshake did not settle; detaching reaper"
            );
            tokio::spawn(async move {
                if let Ok(handle) = handshake.await {
                    discard(connector.as_ref(), handle).await;
                }
            });
        }
    }
}

/// Release a handle nobody will ever bind
async fn discard(connector: &dyn Connector, handle: SessionHandle) {
    tracing::debug!(handle = %handle, "Releasing handle from abandoned handshake");
    if let Err(err) = connector.release(handle.clone()).await {
        tracing::warn!(handle = %handle, error = %err, "Failed to release abandoned handle");
    }
}
