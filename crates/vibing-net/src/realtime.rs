//! Realtime channel client over a Phoenix-channel websocket.
//!
//! Each subscription owns one socket, driven by a dedicated tokio task.
//! The caller talks to the task through a command channel (via the
//! returned [`ChannelHandle`]) and receives [`RealtimeEvent`]s on the
//! subscription's notification channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use vibing_shared::backend::{
    BackendResult, ChangeListener, ChannelHandle, ChannelSpec, ChannelStatus, RealtimeConnector,
    RealtimeEvent, Subscription,
};
use vibing_shared::constants::{REALTIME_HEARTBEAT, REALTIME_JOIN_TIMEOUT};
use vibing_shared::protocol::{topic_for, Frame, Inbound};
use vibing_shared::Message;

use crate::auth::AuthSession;
use crate::endpoint::Endpoint;
use crate::error::NetError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_CAPACITY: usize = 256;

/// Commands sent *into* a channel task.
#[derive(Debug)]
enum ChannelCommand {
    Leave,
}

/// Opens realtime channels against the hosted service.
#[derive(Clone)]
pub struct RealtimeClient {
    endpoint: Endpoint,
    access_token: String,
    join_timeout: Duration,
    heartbeat: Duration,
}

impl RealtimeClient {
    pub fn new(endpoint: Endpoint, session: Option<&AuthSession>) -> Self {
        let access_token = session
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| endpoint.anon_key().to_string());
        Self {
            endpoint,
            access_token,
            join_timeout: REALTIME_JOIN_TIMEOUT,
            heartbeat: REALTIME_HEARTBEAT,
        }
    }

    pub fn with_timings(mut self, join_timeout: Duration, heartbeat: Duration) -> Self {
        self.join_timeout = join_timeout;
        self.heartbeat = heartbeat;
        self
    }
}

#[async_trait]
impl RealtimeConnector for RealtimeClient {
    async fn subscribe(&self, spec: ChannelSpec) -> BackendResult<Subscription> {
        let url = self.endpoint.realtime();
        let (socket, _) = connect_async(url.as_str()).await.map_err(NetError::from)?;
        debug!(channel = %spec.name, "Realtime socket connected");

        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);

        let task = ChannelTask {
            topic: topic_for(&spec.name),
            listeners: spec.listeners,
            access_token: self.access_token.clone(),
            join_timeout: self.join_timeout,
            heartbeat: self.heartbeat,
            next_ref: 0,
            event_tx,
        };
        tokio::spawn(task.run(socket, cmd_rx));

        Ok(Subscription {
            events: event_rx,
            handle: Box::new(RealtimeHandle {
                cmd_tx,
                left: AtomicBool::new(false),
            }),
        })
    }
}

struct RealtimeHandle {
    cmd_tx: mpsc::Sender<ChannelCommand>,
    left: AtomicBool,
}

#[async_trait]
impl ChannelHandle for RealtimeHandle {
    async fn unsubscribe(&self) {
        if self.left.swap(true, Ordering::SeqCst) {
            return;
        }
        // The task may already have ended after a channel error.
        let _ = self.cmd_tx.send(ChannelCommand::Leave).await;
    }
}

struct ChannelTask {
    topic: String,
    listeners: Vec<ChangeListener>,
    access_token: String,
    join_timeout: Duration,
    heartbeat: Duration,
    next_ref: u64,
    event_tx: mpsc::Sender<RealtimeEvent>,
}

/// What the task loop should do after handling an inbound frame.
enum Flow {
    Continue,
    Stop,
}

impl ChannelTask {
    fn next_ref(&mut self) -> String {
        self.next_ref += 1;
        self.next_ref.to_string()
    }

    async fn emit(&self, event: RealtimeEvent) -> Flow {
        if self.event_tx.send(event).await.is_err() {
            debug!(topic = %self.topic, "Subscriber dropped, closing channel");
            return Flow::Stop;
        }
        Flow::Continue
    }

    async fn run(mut self, socket: Socket, mut cmd_rx: mpsc::Receiver<ChannelCommand>) {
        let (mut ws_tx, mut ws_rx) = socket.split();

        let join_ref = self.next_ref();
        let join = Frame::join(&self.topic, &self.listeners, &self.access_token, &join_ref);
        if let Err(e) = send_frame(&mut ws_tx, &join).await {
            warn!(topic = %self.topic, error = %e, "Failed to send join");
            self.emit(RealtimeEvent::Status(ChannelStatus::ChannelError))
                .await;
            return;
        }

        let mut binding_ids: Vec<i64> = Vec::new();
        let mut joined = false;
        let join_deadline = tokio::time::sleep(self.join_timeout);
        tokio::pin!(join_deadline);
        let mut heartbeat = interval_at(Instant::now() + self.heartbeat, self.heartbeat);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(ChannelCommand::Leave) | None => {
                            let reference = self.next_ref();
                            let _ = send_frame(&mut ws_tx, &Frame::leave(&self.topic, &reference)).await;
                            info!(topic = %self.topic, "Left realtime channel");
                            break;
                        }
                    }
                }

                _ = &mut join_deadline, if !joined => {
                    warn!(topic = %self.topic, "Join reply timed out");
                    self.emit(RealtimeEvent::Status(ChannelStatus::TimedOut)).await;
                    break;
                }

                _ = heartbeat.tick() => {
                    let reference = self.next_ref();
                    if let Err(e) = send_frame(&mut ws_tx, &Frame::heartbeat(&reference)).await {
                        warn!(topic = %self.topic, error = %e, "Heartbeat failed");
                        self.emit(RealtimeEvent::Status(ChannelStatus::Closed)).await;
                        break;
                    }
                }

                msg = ws_rx.next() => {
                    let flow = match msg {
                        Some(Ok(WsMessage::Text(text))) => match Frame::from_text(&text) {
                            Ok(frame) => {
                                self.handle_frame(frame, &join_ref, &mut joined, &mut binding_ids)
                                    .await
                            }
                            Err(e) => {
                                warn!(topic = %self.topic, error = %e, "Unparseable realtime frame");
                                Flow::Continue
                            }
                        },
                        Some(Ok(WsMessage::Close(_))) | None => {
                            info!(topic = %self.topic, "Realtime socket closed");
                            self.emit(RealtimeEvent::Status(ChannelStatus::Closed)).await;
                            Flow::Stop
                        }
                        Some(Err(e)) => {
                            warn!(topic = %self.topic, error = %e, "Realtime socket error");
                            self.emit(RealtimeEvent::Status(ChannelStatus::ChannelError)).await;
                            Flow::Stop
                        }
                        // tungstenite answers pings itself
                        Some(Ok(_)) => Flow::Continue,
                    };
                    if let Flow::Stop = flow {
                        break;
                    }
                }
            }
        }

        let _ = ws_tx.close().await;
    }

    async fn handle_frame(
        &self,
        frame: Frame,
        join_ref: &str,
        joined: &mut bool,
        binding_ids: &mut Vec<i64>,
    ) -> Flow {
        if frame.topic != self.topic {
            trace!(topic = %frame.topic, event = %frame.event, "Ignoring frame for other topic");
            return Flow::Continue;
        }

        match frame.classify() {
            Inbound::Reply {
                reference,
                ok,
                binding_ids: ids,
                reason,
            } if reference.as_deref() == Some(join_ref) => {
                if ok {
                    *joined = true;
                    *binding_ids = ids;
                    info!(topic = %self.topic, bindings = binding_ids.len(), "Realtime channel subscribed");
                    self.emit(RealtimeEvent::Status(ChannelStatus::Subscribed))
                        .await
                } else {
                    warn!(topic = %self.topic, reason = ?reason, "Join rejected");
                    self.emit(RealtimeEvent::Status(ChannelStatus::ChannelError))
                        .await;
                    Flow::Stop
                }
            }
            Inbound::Reply { .. } => Flow::Continue,
            Inbound::Change { ids, change, record } => {
                if change != "INSERT" {
                    return Flow::Continue;
                }
                let message: Message = match serde_json::from_value(record) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(topic = %self.topic, error = %e, "Undecodable change record");
                        return Flow::Continue;
                    }
                };
                for listener in self.route(&ids, binding_ids, &message) {
                    trace!(topic = %self.topic, listener, msg_id = %message.id, "Realtime insert");
                    let event = RealtimeEvent::Insert {
                        listener,
                        record: message.clone(),
                    };
                    if let Flow::Stop = self.emit(event).await {
                        return Flow::Stop;
                    }
                }
                Flow::Continue
            }
            Inbound::Error => {
                warn!(topic = %self.topic, "Channel error");
                self.emit(RealtimeEvent::Status(ChannelStatus::ChannelError))
                    .await;
                Flow::Stop
            }
            Inbound::Close => {
                info!(topic = %self.topic, "Channel closed by server");
                self.emit(RealtimeEvent::Status(ChannelStatus::Closed)).await;
                Flow::Stop
            }
            Inbound::System { ok: false, message } => {
                warn!(topic = %self.topic, message = %message, "Realtime system error");
                self.emit(RealtimeEvent::Status(ChannelStatus::ChannelError))
                    .await;
                Flow::Stop
            }
            Inbound::System { .. } => Flow::Continue,
            Inbound::Other(event) => {
                trace!(topic = %self.topic, event = %event, "Unhandled realtime event");
                Flow::Continue
            }
        }
    }

    /// Listener indexes a change belongs to: by server binding id, or by
    /// re-applying the filters when the server did not assign ids.
    fn route(&self, ids: &[i64], binding_ids: &[i64], message: &Message) -> Vec<usize> {
        let by_id: Vec<usize> = ids
            .iter()
            .filter_map(|id| binding_ids.iter().position(|b| b == id))
            .filter(|idx| *idx < self.listeners.len())
            .collect();
        if !by_id.is_empty() {
            return by_id;
        }
        self.listeners
            .iter()
            .enumerate()
            .filter(|(_, l)| l.matches_insert(message))
            .map(|(idx, _)| idx)
            .collect()
    }
}

async fn send_frame<S>(sink: &mut S, frame: &Frame) -> Result<(), NetError>
where
    S: Sink<WsMessage> + Unpin,
    NetError: From<<S as Sink<WsMessage>>::Error>,
{
    let text = frame.to_text()?;
    sink.send(WsMessage::Text(text.into())).await?;
    Ok(())
}
