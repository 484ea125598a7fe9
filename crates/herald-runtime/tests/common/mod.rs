//! Shared fixtures: an in-memory broker and a scripted origin server.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use herald_api::NotificationApi;
use herald_core::{
    NetworkError, Notification, NotificationId, RequestOperation, TransportError, UserId,
};
use herald_runtime::{NotificationHandle, NotificationView};
use herald_transport::frame::{self, Command, Frame};
use herald_transport::{Connector, FrameChannel, SUBSCRIPTION_ID};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout};

pub const WAIT: Duration = Duration::from_secs(60);

pub fn note(id: u64, read: bool) -> Notification {
    let at = Utc.timestamp_opt(1_714_556_400 + id as i64, 0).unwrap();
    Notification::new(id, format!("message {id}"), at).with_read(read)
}

pub fn push_json(id: u64) -> String {
    format!(r#"{{"id":{id},"message":"message {id}","createdAt":"2024-05-01T10:00:00","read":false}}"#)
}

pub fn ids(view: &NotificationView) -> Vec<String> {
    view.snapshot
        .notifications
        .iter()
        .map(|n| n.id.to_string())
        .collect()
}

pub async fn wait_until(
    handle: &mut NotificationHandle,
    what: &str,
    predicate: impl FnMut(&NotificationView) -> bool,
) -> NotificationView {
    timeout(WAIT, handle.wait_for(predicate))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .unwrap_or_else(|| panic!("subsystem stopped while waiting for {what}"))
}

// ── Broker ──────────────────────────────────────────────────────────

pub struct MemoryBroker {
    from_client: fmpsc::UnboundedReceiver<String>,
    to_client: fmpsc::UnboundedSender<Result<String, TransportError>>,
}

pub fn memory_pair() -> (FrameChannel, MemoryBroker) {
    let (client_tx, client_rx) = fmpsc::unbounded::<String>();
    let (server_tx, server_rx) = fmpsc::unbounded::<Result<String, TransportError>>();
    let sink = client_tx.sink_map_err(|e| TransportError::Socket(e.to_string()));
    (
        FrameChannel::new(sink, server_rx),
        MemoryBroker {
            from_client: client_rx,
            to_client: server_tx,
        },
    )
}

impl MemoryBroker {
    pub async fn expect(&mut self, command: Command) -> Frame {
        loop {
            let text = self.from_client.next().await.expect("client hung up");
            if let Some(frame) = frame::decode(&text).unwrap().into_iter().next() {
                assert_eq!(frame.command, command);
                return frame;
            }
        }
    }

    /// Answer CONNECT with heart-beats disabled; returns the SUBSCRIBE frame.
    pub async fn accept(&mut self) -> Frame {
        let _ = self.expect(Command::Connect).await;
        self.send("CONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0".to_string());
        self.expect(Command::Subscribe).await
    }

    pub fn send(&self, text: String) {
        self.to_client.unbounded_send(Ok(text)).unwrap();
    }

    pub fn message(&self, body: &str) {
        self.send(
            Frame::new(Command::Message)
                .header("subscription", SUBSCRIPTION_ID)
                .header("message-id", "m-1")
                .body(body)
                .encode(),
        );
    }
}

/// Hands out queued channels, then refuses.
#[derive(Default)]
pub struct QueuedConnector {
    channels: Mutex<VecDeque<FrameChannel>>,
    attempts: Mutex<Vec<Instant>>,
}

impl QueuedConnector {
    pub fn new(channels: Vec<FrameChannel>) -> Arc<Self> {
        Arc::new(Self {
            channels: Mutex::new(channels.into()),
            attempts: Mutex::default(),
        })
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl Connector for QueuedConnector {
    async fn connect(&self, endpoint: &str) -> Result<FrameChannel, TransportError> {
        self.attempts.lock().push(Instant::now());
        self.channels
            .lock()
            .pop_front()
            .ok_or_else(|| TransportError::Connect {
                endpoint: endpoint.to_string(),
                message: "connection refused".into(),
            })
    }
}

// ── Origin server ───────────────────────────────────────────────────

/// Scripted [`NotificationApi`]. Fetches pop from a queue and return an
/// empty list once it runs dry.
#[derive(Default)]
pub struct MockApi {
    fetches: Mutex<VecDeque<Result<Vec<Notification>, NetworkError>>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    fetch_calls: Mutex<u32>,
    acks: Mutex<Vec<NotificationId>>,
    fail_acks: Mutex<bool>,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn queue_fetch(&self, result: Result<Vec<Notification>, NetworkError>) {
        self.fetches.lock().push_back(result);
    }

    /// Hold the next fetch until the returned sender fires.
    pub fn hold_fetch(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock() = Some(rx);
        tx
    }

    pub fn fail_acks(&self) {
        *self.fail_acks.lock() = true;
    }

    pub fn fetch_calls(&self) -> u32 {
        *self.fetch_calls.lock()
    }

    pub fn acks(&self) -> Vec<String> {
        self.acks.lock().iter().map(ToString::to_string).collect()
    }
}

pub fn unavailable() -> NetworkError {
    NetworkError::status(RequestOperation::Fetch, 503, "service unavailable")
}

#[async_trait]
impl NotificationApi for MockApi {
    async fn fetch_notifications(&self, _user: &UserId) -> herald_api::Result<Vec<Notification>> {
        *self.fetch_calls.lock() += 1;
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.fetches.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn mark_read(&self, id: &NotificationId) -> herald_api::Result<()> {
        self.acks.lock().push(id.clone());
        if *self.fail_acks.lock() {
            return Err(NetworkError::status(RequestOperation::Acknowledge, 500, "boom"));
        }
        Ok(())
    }

    async fn create_notification(&self, _user: &UserId, message: &str) -> herald_api::Result<Notification> {
        Ok(Notification::new(1000, message, Utc::now()))
    }

    async fn unread_count(&self, _user: &UserId) -> herald_api::Result<u64> {
        Ok(0)
    }
}
