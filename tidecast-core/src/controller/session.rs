//! Playback session state machine.
//!
//! `Idle → Opening → Polling → Completed`, with `Opening → Failed` on an RPC
//! error and any non-terminal state `→ Terminated` on interrupt. A poll error
//! also ends the session as `Failed`. Terminal states never change again, so
//! the completion signal fires at most once.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::client::ControllerRpc;
use crate::CastError;

/// Lifecycle of a playback session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Opening,
    Polling,
    Completed,
    Failed(String),
    Terminated,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed(_) | SessionState::Terminated
        )
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Controller reported no active player
    Completed,
    /// An RPC call failed
    Failed(String),
    /// Interrupted before playback ended
    Terminated,
}

impl SessionOutcome {
    fn from_state(state: &SessionState) -> Option<Self> {
        match state {
            SessionState::Completed => Some(SessionOutcome::Completed),
            SessionState::Failed(reason) => Some(SessionOutcome::Failed(reason.clone())),
            SessionState::Terminated => Some(SessionOutcome::Terminated),
            _ => None,
        }
    }
}

/// What an interrupt does to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterruptPolicy {
    /// Send `Player.Stop` to every active player
    StopPlayer,
    /// Leave the controller alone
    #[default]
    Detach,
}

/// Handle to a session's single completion signal.
///
/// Cloneable; every clone and every repeated [`Completion::wait`] observes the
/// same outcome.
#[derive(Debug, Clone)]
pub struct Completion {
    receiver: watch::Receiver<SessionState>,
}

impl Completion {
    /// Waits for the session to reach a terminal state.
    pub async fn wait(&mut self) -> SessionOutcome {
        let finished = self
            .receiver
            .wait_for(SessionState::is_terminal)
            .await
            .is_ok();
        if !finished {
            tracing::debug!("Playback session dropped before finishing");
        }
        self.outcome().unwrap_or(SessionOutcome::Terminated)
    }

    /// Outcome if the session already finished.
    pub fn outcome(&self) -> Option<SessionOutcome> {
        SessionOutcome::from_state(&self.receiver.borrow())
    }
}

/// One announcement of an origin to the controller, tracked to its end.
pub struct PlaybackSession {
    rpc: Arc<dyn ControllerRpc>,
    file: String,
    poll_interval: Duration,
    policy: InterruptPolicy,
    created_at: DateTime<Utc>,
    state: Arc<watch::Sender<SessionState>>,
    cancel: CancellationToken,
    poller: Option<JoinHandle<()>>,
}

impl PlaybackSession {
    /// Creates an idle session that will ask the controller to play `file`.
    ///
    /// `file` is an origin address or an already-built plugin URI.
    pub fn new(
        rpc: Arc<dyn ControllerRpc>,
        file: impl Into<String>,
        poll_interval: Duration,
        policy: InterruptPolicy,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            rpc,
            file: file.into(),
            poll_interval,
            policy,
            created_at: Utc::now(),
            state: Arc::new(state),
            cancel: CancellationToken::new(),
            poller: None,
        }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn policy(&self) -> InterruptPolicy {
        self.policy
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn completion(&self) -> Completion {
        Completion {
            receiver: self.state.subscribe(),
        }
    }

    /// Sends `Player.Open` and starts polling for the end of playback.
    ///
    /// Only valid from `Idle`; later calls are ignored.
    ///
    /// # Errors
    ///
    /// - `CastError::ControllerUnreachable` - Open call failed; session is `Failed`
    pub async fn open(&mut self) -> Result<(), CastError> {
        if !transition_from(&self.state, &SessionState::Idle, SessionState::Opening) {
            tracing::debug!(state = ?self.state(), "Session already opened");
            return Ok(());
        }

        tracing::info!(file = %self.file, "Asking controller to open item");
        match self.rpc.open(&self.file).await {
            Ok(response) => {
                tracing::debug!(%response, "Controller accepted open request");
            }
            Err(e) => {
                tracing::error!("Controller rejected open request: {e}");
                finish(&self.state, SessionState::Failed(e.to_string()));
                return Err(e.into());
            }
        }

        if !transition_from(&self.state, &SessionState::Opening, SessionState::Polling) {
            return Ok(());
        }
        self.poller = Some(tokio::spawn(poll_until_idle(
            self.rpc.clone(),
            self.poll_interval,
            self.state.clone(),
            self.cancel.clone(),
        )));
        Ok(())
    }

    /// Interrupts the session.
    ///
    /// Stops polling and moves a non-terminal session to `Terminated`. With
    /// [`InterruptPolicy::StopPlayer`] and a session that reached the
    /// controller, every active player is stopped.
    ///
    /// # Errors
    ///
    /// - `CastError::ControllerUnreachable` - Stop request failed
    pub async fn terminate(&mut self) -> Result<SessionOutcome, CastError> {
        let was_playing = matches!(self.state(), SessionState::Polling);

        self.cancel.cancel();
        if let Some(poller) = self.poller.take() {
            let _ = poller.await;
        }

        let interrupted = finish(&self.state, SessionState::Terminated);
        if interrupted {
            tracing::info!("Playback session terminated");
            if was_playing && self.policy == InterruptPolicy::StopPlayer {
                let stopped = self.rpc.stop_all().await?;
                tracing::info!(stopped, "Stopped controller playback");
            }
        }

        Ok(SessionOutcome::from_state(&self.state()).unwrap_or(SessionOutcome::Terminated))
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("file", &self.file)
            .field("state", &self.state())
            .field("policy", &self.policy)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Moves into a terminal state unless already terminal.
fn finish(state: &watch::Sender<SessionState>, next: SessionState) -> bool {
    state.send_if_modified(|current| {
        if current.is_terminal() {
            return false;
        }
        *current = next;
        true
    })
}

fn transition_from(
    state: &watch::Sender<SessionState>,
    expected: &SessionState,
    next: SessionState,
) -> bool {
    state.send_if_modified(|current| {
        if current != expected {
            return false;
        }
        *current = next;
        true
    })
}

async fn poll_until_idle(
    rpc: Arc<dyn ControllerRpc>,
    interval: Duration,
    state: Arc<watch::Sender<SessionState>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut polls = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        polls += 1;

        let status = tokio::select! {
            _ = cancel.cancelled() => return,
            status = rpc.active_players() => status,
        };

        match status {
            Ok(status) if status.is_idle() => {
                tracing::info!(polls, "Controller reports no active player, playback finished");
                finish(&state, SessionState::Completed);
                return;
            }
            Ok(status) => {
                tracing::debug!(polls, players = status.active_players.len(), "Playback active");
            }
            Err(e) => {
                tracing::error!(polls, "Status query failed: {e}");
                finish(&state, SessionState::Failed(e.to_string()));
                return;
            }
        }
    }
}
