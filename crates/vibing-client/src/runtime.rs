//! Drives a [`MessageSession`] from a single tokio task.
//!
//! UI commands, realtime notifications, the subscribe watchdog, the poll
//! timer and the rejoin backoff are multiplexed with `select!`.  Each branch
//! runs to completion before the next is polled, so a fetch started for one
//! conversation can never land after the user has moved to another.
//!
//! A lost or never-opened channel is re-requested with a doubling delay
//! while polling covers the gap.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use vibing_shared::backend::{ChannelStatus, RealtimeEvent};
use vibing_shared::constants::{
    POLL_INTERVAL, REALTIME_REJOIN_DELAY, REALTIME_REJOIN_MAX, SUBSCRIBE_TIMEOUT,
};
use vibing_shared::UserId;

use crate::delivery::{DeliveryAction, DeliveryInput};
use crate::error::SessionError;
use crate::events::{EventSink, MessageEvent};
use crate::session::{MessageSession, SessionDeps};

const COMMAND_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryTimings {
    /// Period of the fallback poll.
    pub poll_interval: Duration,
    /// How long to wait for SUBSCRIBED before polling.
    pub subscribe_timeout: Duration,
    /// First delay before reopening a lost channel.
    pub rejoin_delay: Duration,
}

impl Default for DeliveryTimings {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            subscribe_timeout: SUBSCRIBE_TIMEOUT,
            rejoin_delay: REALTIME_REJOIN_DELAY,
        }
    }
}

/// Commands accepted by a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Open the conversation with a user from the list.
    Open(UserId),
    /// Open (or start) a conversation from outside the list.
    OpenWith { user: UserId, nickname: String },
    /// Back to the conversation list.
    Back,
    Send(String),
    Hide(UserId),
    /// Reload the list and the unread counter.
    Reload,
    Shutdown,
}

/// Cloneable control handle.  The session shuts down once every handle is
/// dropped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }

    pub async fn open(&self, user: UserId) -> Result<(), SessionError> {
        self.send(SessionCommand::Open(user)).await
    }

    pub async fn open_with(&self, user: UserId, nickname: &str) -> Result<(), SessionError> {
        self.send(SessionCommand::OpenWith {
            user,
            nickname: nickname.to_string(),
        })
        .await
    }

    pub async fn back(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Back).await
    }

    pub async fn send_message(&self, draft: &str) -> Result<(), SessionError> {
        self.send(SessionCommand::Send(draft.to_string())).await
    }

    pub async fn hide(&self, user: UserId) -> Result<(), SessionError> {
        self.send(SessionCommand::Hide(user)).await
    }

    pub async fn reload(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Reload).await
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Shutdown).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the session task has finished and disposed its state.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Spawn a session with its own event stream.
pub fn spawn_session(
    deps: SessionDeps,
    timings: DeliveryTimings,
) -> (SessionHandle, mpsc::Receiver<MessageEvent>) {
    let (events, rx) = EventSink::channel(EVENT_CAPACITY);
    (spawn_session_with(deps, timings, events), rx)
}

/// Spawn a session that emits into an existing sink.
pub fn spawn_session_with(
    deps: SessionDeps,
    timings: DeliveryTimings,
    events: EventSink,
) -> SessionHandle {
    let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
    let session = MessageSession::new(deps, events);
    tokio::spawn(run(session, rx, timings));
    SessionHandle { tx }
}

async fn run(
    mut session: MessageSession,
    mut commands: mpsc::Receiver<SessionCommand>,
    timings: DeliveryTimings,
) {
    let mut realtime = match session.init().await {
        Ok(realtime) => realtime,
        Err(e) => {
            debug!(error = %e, "Message session not started");
            return;
        }
    };

    let watchdog = sleep(timings.subscribe_timeout);
    tokio::pin!(watchdog);
    let mut watchdog_armed = realtime.is_some();
    let rejoin = sleep(timings.rejoin_delay);
    tokio::pin!(rejoin);
    let mut rejoin_armed = realtime.is_none();
    let mut rejoin_attempt: u32 = 0;
    let mut poll: Option<Interval> = None;
    sync_poll(&session, &mut poll, timings.poll_interval);

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(SessionCommand::Shutdown) => {
                    info!("Message session shutdown requested");
                    break;
                }
                Some(cmd) => handle_command(&mut session, cmd).await,
                None => {
                    info!("All session handles dropped, shutting down");
                    break;
                }
            },

            event = next_realtime(&mut realtime), if realtime.is_some() => match event {
                Some(event) => {
                    session.handle_realtime_event(event).await;
                    if session.state().is_some_and(|s| s.delivery.is_realtime_active()) {
                        rejoin_attempt = 0;
                    }
                }
                None => {
                    warn!("Realtime channel ended");
                    realtime = None;
                    session.apply(DeliveryInput::Status(ChannelStatus::Closed));
                    let delay = rejoin_backoff(timings.rejoin_delay, rejoin_attempt);
                    rejoin.as_mut().reset(Instant::now() + delay);
                    rejoin_armed = true;
                }
            },

            _ = &mut rejoin, if rejoin_armed => {
                rejoin_armed = false;
                rejoin_attempt = rejoin_attempt.saturating_add(1);
                info!(attempt = rejoin_attempt, "Rejoining realtime channel");
                realtime = session.rejoin_realtime().await;
                if realtime.is_none() {
                    let delay = rejoin_backoff(timings.rejoin_delay, rejoin_attempt);
                    debug!(?delay, "Rejoin failed, retrying later");
                    rejoin.as_mut().reset(Instant::now() + delay);
                    rejoin_armed = true;
                }
            },

            _ = &mut watchdog, if watchdog_armed => {
                watchdog_armed = false;
                if !session.state().is_some_and(|s| s.delivery.is_realtime_active()) {
                    warn!(timeout = ?timings.subscribe_timeout, "Realtime not subscribed in time");
                }
                session.apply(DeliveryInput::WatchdogElapsed);
            },

            _ = next_tick(&mut poll), if poll.is_some() => {
                if session.apply(DeliveryInput::PollTick) == DeliveryAction::Poll {
                    session.check_new_messages().await;
                }
            },
        }

        sync_poll(&session, &mut poll, timings.poll_interval);
    }

    session.dispose().await;
}

async fn handle_command(session: &mut MessageSession, cmd: SessionCommand) {
    let result = match cmd {
        SessionCommand::Open(user) => session.select_conversation(user).await,
        SessionCommand::OpenWith { user, nickname } => {
            session.open_conversation_with(user, &nickname).await
        }
        SessionCommand::Back => {
            session.close_conversation().await;
            Ok(())
        }
        SessionCommand::Send(draft) => session.send_message(&draft).await,
        SessionCommand::Hide(user) => session.hide_conversation(user).await.map(|_| ()),
        SessionCommand::Reload => {
            session.refresh_overview().await;
            Ok(())
        }
        SessionCommand::Shutdown => Ok(()),
    };
    // Foreground failures were already surfaced as events.
    if let Err(e) = result {
        debug!(error = %e, "Command failed");
    }
}

async fn next_realtime(
    realtime: &mut Option<mpsc::Receiver<RealtimeEvent>>,
) -> Option<RealtimeEvent> {
    match realtime {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Delay before the next rejoin: `base` doubled per failed attempt, capped.
fn rejoin_backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1 << attempt.min(16))
        .min(REALTIME_REJOIN_MAX.max(base))
}

/// Arm or drop the poll timer to match the delivery machine.  The first
/// tick fires one full period after arming.
fn sync_poll(session: &MessageSession, poll: &mut Option<Interval>, period: Duration) {
    match (session.is_polling(), poll.is_some()) {
        (true, false) => {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            *poll = Some(interval);
        }
        (false, true) => *poll = None,
        _ => {}
    }
}
