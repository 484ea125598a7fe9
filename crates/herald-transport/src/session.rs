//! Transport session: one STOMP subscription kept alive across reconnects.
//!
//! [`TransportSession::connect`] spawns a loop that:
//!
//! 1. Opens the socket through the [`Connector`]
//! 2. Performs the STOMP handshake and negotiates heart-beats
//! 3. Subscribes to the user's topic and forwards every decoded
//!    [`Notification`] to the delivery channel
//! 4. On any failure, waits the fixed reconnect delay and starts over
//!
//! The loop only ends on [`TransportSession::teardown`].

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use herald_core::{Notification, TransportError, UserId};
use herald_settings::HeraldSettings;
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::connector::{Connector, FrameChannel, FrameSink};
use crate::frame::{self, Command, Frame, HEARTBEAT, HeartBeat};
use crate::heartbeat::{Liveness, WatchdogResult, run_watchdog};
use crate::state::{ConnectionState, StatePublisher};

/// Subscription id used for the single topic subscription.
pub const SUBSCRIPTION_ID: &str = "sub-0";

/// Upper bound on the best-effort `DISCONNECT` exchange during teardown.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Placeholder period for disabled heart-beat timers.
const IDLE_PERIOD: Duration = Duration::from_secs(3600);

/// Broker destination for a user's notifications.
pub fn topic_for(user: &UserId) -> String {
    format!("/topic/notifications/{user}")
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Connection parameters for a [`TransportSession`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    /// WebSocket URL of the broker.
    pub endpoint: String,
    /// Fixed delay before every reconnect attempt.
    pub reconnect_delay: Duration,
    /// Heart-beat offer sent in `CONNECT`.
    pub heart_beat: HeartBeat,
    /// Upper bound on socket open plus handshake.
    pub connect_timeout: Duration,
}

impl TransportConfig {
    /// Config for `endpoint` with the default timings (5 s reconnect,
    /// 4 s heart-beats each way, 10 s connect timeout).
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            reconnect_delay: Duration::from_millis(5000),
            heart_beat: HeartBeat::new(4000, 4000),
            connect_timeout: Duration::from_millis(10_000),
        }
    }

    /// Config for the active environment's broker.
    pub fn from_settings(settings: &HeraldSettings) -> herald_settings::Result<Self> {
        let profile = settings.profile()?;
        let transport = &settings.transport;
        Ok(Self {
            endpoint: profile.broker_url.clone(),
            reconnect_delay: transport.reconnect_delay(),
            heart_beat: HeartBeat::new(transport.heartbeat_outgoing_ms, transport.heartbeat_incoming_ms),
            connect_timeout: transport.connect_timeout(),
        })
    }
}

/// Host part of a WebSocket URL, used as the STOMP `host` header.
fn host_of(endpoint: &str) -> &str {
    let rest = endpoint
        .split_once("://")
        .map_or(endpoint, |(_, rest)| rest);
    let authority = rest.split(['/', '?']).next().unwrap_or(rest);
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    if authority.starts_with('[') {
        return authority
            .split_once(']')
            .map_or(authority, |(host, _)| host.trim_start_matches('['));
    }
    authority.split(':').next().unwrap_or(authority)
}

// ─────────────────────────────────────────────────────────────────────────────
// Session handle
// ─────────────────────────────────────────────────────────────────────────────

struct ActiveSession {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owner of the broker connection and its [`ConnectionState`].
pub struct TransportSession {
    config: Arc<TransportConfig>,
    connector: Arc<dyn Connector>,
    state: Arc<StatePublisher>,
    active: Mutex<Option<ActiveSession>>,
}

impl TransportSession {
    /// Create an idle session.
    pub fn new(config: TransportConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config: Arc::new(config),
            connector,
            state: Arc::new(StatePublisher::new()),
            active: Mutex::new(None),
        }
    }

    /// Start the connect/subscribe/reconnect loop for `user`'s topic.
    ///
    /// Never fails: connection problems are retried in the background and
    /// visible only through [`state`](Self::state). A second call while a
    /// loop is running is ignored.
    pub fn connect(&self, user: &UserId, deliveries: mpsc::UnboundedSender<Notification>) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| !a.task.is_finished()) {
            warn!(user = %user, "transport session already active, ignoring connect");
            return;
        }

        let cancel = CancellationToken::new();
        let runner = SessionLoop {
            config: self.config.clone(),
            connector: self.connector.clone(),
            state: self.state.clone(),
            user: user.clone(),
            topic: topic_for(user),
            deliveries,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(runner.run());
        *active = Some(ActiveSession { cancel, task });
    }

    /// Stop the loop, sending `DISCONNECT` if a connection is open.
    /// Idempotent.
    pub async fn teardown(&self) {
        let active = self.active.lock().take();
        let Some(active) = active else {
            debug!("teardown without an active session");
            return;
        };
        active.cancel.cancel();
        if let Err(e) = active.task.await {
            if e.is_panic() {
                warn!(error = %e, "transport session task panicked");
            }
        }
        self.state.set(ConnectionState::Disconnected);
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Whether the broker connection is established.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch connection state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Whether a connect loop is running.
    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|a| !a.task.is_finished())
    }

    /// Connection parameters.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("endpoint", &self.config.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connect loop
// ─────────────────────────────────────────────────────────────────────────────

/// Why a single connection ended without error.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    PeerClosed,
}

struct SessionLoop {
    config: Arc<TransportConfig>,
    connector: Arc<dyn Connector>,
    state: Arc<StatePublisher>,
    user: UserId,
    topic: String,
    deliveries: mpsc::UnboundedSender<Notification>,
    cancel: CancellationToken,
}

impl SessionLoop {
    #[instrument(skip_all, fields(user = %self.user, endpoint = %self.config.endpoint))]
    async fn run(self) {
        info!(topic = %self.topic, "transport session started");
        let mut attempt: u64 = 0;

        while !self.cancel.is_cancelled() {
            attempt += 1;
            counter!("herald_transport_connect_attempts_total").increment(1);
            if attempt > 1 {
                counter!("herald_transport_reconnects_total").increment(1);
            }
            self.state.set(ConnectionState::Connecting);

            match self.connect_and_serve().await {
                Ok(SessionEnd::Cancelled) => break,
                Ok(SessionEnd::PeerClosed) => {
                    info!(attempt, "broker closed the connection");
                    self.state.set(ConnectionState::Disconnected);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "broker connection failed");
                    self.state.set(ConnectionState::Error);
                }
            }

            let delay = self.config.reconnect_delay;
            debug!(delay_ms = delay.as_millis() as u64, "reconnecting after delay");
            tokio::select! {
                () = time::sleep(delay) => {}
                () = self.cancel.cancelled() => break,
            }
        }

        self.state.set(ConnectionState::Disconnected);
        info!("transport session stopped");
    }

    async fn connect_and_serve(&self) -> Result<SessionEnd, TransportError> {
        let timeout = self.config.connect_timeout;
        let opening = async {
            let mut channel = self.connector.connect(&self.config.endpoint).await?;
            let heart_beat = self.handshake(&mut channel).await?;
            Ok::<_, TransportError>((channel, heart_beat))
        };

        let (channel, heart_beat) = tokio::select! {
            result = time::timeout(timeout, opening) => match result {
                Ok(opened) => opened?,
                Err(_) => {
                    return Err(TransportError::Handshake(format!(
                        "no CONNECTED within {} ms",
                        timeout.as_millis()
                    )));
                }
            },
            () = self.cancel.cancelled() => return Ok(SessionEnd::Cancelled),
        };

        self.state.set(ConnectionState::Connected);
        info!(
            topic = %self.topic,
            heart_beat_out_ms = heart_beat.outgoing,
            heart_beat_in_ms = heart_beat.incoming,
            "subscribed"
        );
        self.serve(channel, heart_beat).await
    }

    /// `CONNECT` → `CONNECTED` → `SUBSCRIBE`. Returns the negotiated heart-beat.
    async fn handshake(&self, channel: &mut FrameChannel) -> Result<HeartBeat, TransportError> {
        let offer = self.config.heart_beat;
        let connect = Frame::connect(host_of(&self.config.endpoint), offer);
        channel.sink.send(connect.encode()).await?;

        loop {
            let text = channel.stream.next().await.ok_or_else(|| {
                TransportError::Handshake("connection closed before CONNECTED".into())
            })??;
            for frame in frame::decode(&text)? {
                match frame.command {
                    Command::Connected => {
                        let server = frame
                            .get("heart-beat")
                            .map(HeartBeat::parse)
                            .transpose()?
                            .unwrap_or_default();
                        let negotiated = HeartBeat::negotiate(offer, server);
                        debug!(
                            version = frame.get("version").unwrap_or("1.0"),
                            server_heart_beat = %server,
                            "stomp session established"
                        );
                        let subscribe = Frame::subscribe(SUBSCRIPTION_ID, &self.topic);
                        channel.sink.send(subscribe.encode()).await?;
                        return Ok(negotiated);
                    }
                    Command::Error => return Err(broker_error(&frame)),
                    other => debug!(command = %other, "ignoring frame before CONNECTED"),
                }
            }
        }
    }

    /// Receive loop for an established connection.
    async fn serve(
        &self,
        channel: FrameChannel,
        heart_beat: HeartBeat,
    ) -> Result<SessionEnd, TransportError> {
        let FrameChannel {
            mut sink,
            mut stream,
        } = channel;

        let liveness = Liveness::new();
        let watchdog_cancel = self.cancel.child_token();
        let incoming = heart_beat.incoming_interval();
        let watchdog = run_watchdog(
            &liveness,
            incoming.unwrap_or(IDLE_PERIOD),
            watchdog_cancel.clone(),
        );
        tokio::pin!(watchdog);

        let outgoing = heart_beat.outgoing_interval();
        let period = outgoing.unwrap_or(IDLE_PERIOD);
        let mut beat = time::interval_at(Instant::now() + period, period);

        let result = loop {
            tokio::select! {
                () = self.cancel.cancelled() => break Ok(SessionEnd::Cancelled),
                _ = beat.tick(), if outgoing.is_some() => {
                    if let Err(e) = sink.send(HEARTBEAT.to_string()).await {
                        break Err(e);
                    }
                }
                verdict = &mut watchdog, if incoming.is_some() => match verdict {
                    WatchdogResult::TimedOut { elapsed } => {
                        break Err(TransportError::HeartbeatTimeout {
                            elapsed_ms: elapsed.as_millis() as u64,
                        });
                    }
                    WatchdogResult::Cancelled => break Ok(SessionEnd::Cancelled),
                },
                item = stream.next() => match item {
                    None | Some(Err(TransportError::Closed)) => break Ok(SessionEnd::PeerClosed),
                    Some(Err(e)) => break Err(e),
                    Some(Ok(text)) => {
                        liveness.mark_alive();
                        if let Err(e) = self.dispatch(&text) {
                            break Err(e);
                        }
                    }
                },
            }
        };

        watchdog_cancel.cancel();
        if matches!(result, Ok(SessionEnd::Cancelled)) {
            disconnect(&mut sink).await;
        }
        result
    }

    fn dispatch(&self, text: &str) -> Result<(), TransportError> {
        for frame in frame::decode(text)? {
            match frame.command {
                Command::Message => self.deliver(&frame),
                Command::Error => {
                    let err = broker_error(&frame);
                    if let TransportError::Broker { message, details } = &err {
                        warn!(
                            broker_message = %message,
                            details = details.as_deref().unwrap_or(""),
                            "broker sent ERROR frame"
                        );
                    }
                    return Err(err);
                }
                Command::Receipt => debug!(receipt = frame.get("receipt-id"), "receipt"),
                other => debug!(command = %other, "ignoring unexpected frame"),
            }
        }
        Ok(())
    }

    fn deliver(&self, frame: &Frame) {
        if let Some(sub) = frame.get("subscription") {
            if sub != SUBSCRIPTION_ID {
                debug!(subscription = sub, "message for unknown subscription");
                return;
            }
        }
        counter!("herald_transport_messages_total").increment(1);

        match Notification::from_json(&frame.body) {
            Ok(notification) => {
                debug!(id = %notification.id, "push received");
                if self.deliveries.send(notification).is_err() {
                    debug!("delivery receiver dropped, discarding push");
                }
            }
            Err(e) => {
                counter!("herald_transport_payloads_dropped_total").increment(1);
                warn!(error = %e, payload = %e.payload_preview, "skipping malformed notification payload");
            }
        }
    }
}

fn broker_error(frame: &Frame) -> TransportError {
    TransportError::Broker {
        message: frame.get("message").unwrap_or("unspecified").to_string(),
        details: (!frame.body.is_empty()).then(|| frame.body.clone()),
    }
}

/// Best-effort `DISCONNECT` then close.
async fn disconnect(sink: &mut FrameSink) {
    let goodbye = async {
        sink.send(Frame::disconnect().encode()).await?;
        sink.close().await
    };
    match time::timeout(DISCONNECT_GRACE, goodbye).await {
        Ok(Ok(())) => debug!("sent DISCONNECT"),
        Ok(Err(e)) => debug!(error = %e, "DISCONNECT failed"),
        Err(_) => debug!("DISCONNECT timed out"),
    }
}
