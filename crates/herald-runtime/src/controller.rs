//! Reconciliation controller: the single task that owns the store.
//!
//! Three asynchronous sources feed it:
//!
//! - the bulk fetch (spawned, reports back with [`ControlMessage::FetchCompleted`])
//! - the push stream from the transport session
//! - user acknowledgements ([`ControlMessage::MarkRead`])
//!
//! Every mutation is followed by publishing a fresh [`NotificationView`], so
//! readers never observe a partial update.

use std::sync::Arc;
use std::time::Duration;

use herald_api::NotificationApi;
use herald_core::{NetworkError, Notification, NotificationId, RetryConfig, UserId};
use herald_settings::{FetchMergePolicy, HeraldSettings};
use herald_transport::{ConnectionState, TransportSession};
use metrics::{counter, gauge};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::merge::apply_fetch;
use crate::store::{MarkReadOutcome, NotificationStore, PrependOutcome, StoreSnapshot};

// ─────────────────────────────────────────────────────────────────────────────
// Public types
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle of the subsystem. `Ready` is never left once entered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SubsystemPhase {
    /// Not started.
    #[default]
    Uninitialized,
    /// Bulk fetch in progress, transport connecting.
    Loading,
    /// Bulk fetch finished (successfully or not).
    Ready,
}

/// Everything the presentation layer reads, published atomically.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NotificationView {
    /// Ordered records and unread count.
    pub snapshot: StoreSnapshot,
    /// Whether the broker connection is up.
    pub connected: bool,
    /// Subsystem lifecycle phase.
    pub phase: SubsystemPhase,
}

/// Messages consumed by the control task.
#[derive(Debug)]
pub enum ControlMessage {
    /// A bulk fetch (initial, refresh or resync) finished.
    FetchCompleted(Result<Vec<Notification>, NetworkError>),
    /// The user opened a notification.
    MarkRead(NotificationId),
    /// The acknowledgement request for `id` finished.
    AckCompleted {
        /// Acknowledged record.
        id: NotificationId,
        /// Request outcome.
        result: Result<(), NetworkError>,
    },
    /// Re-run the bulk fetch through the merge policy.
    Refresh,
}

/// Per-user subsystem parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct SubsystemConfig {
    /// Topic key and fetch scope.
    pub user: UserId,
    /// How fetch results meet existing pushes.
    pub merge_policy: FetchMergePolicy,
    /// Backoff for failed fetches.
    pub fetch_retry: RetryConfig,
    /// Periodic re-fetch, if any.
    pub resync_interval: Option<Duration>,
}

impl SubsystemConfig {
    /// Defaults: merge policy, 3 fetch retries, no resync.
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            merge_policy: FetchMergePolicy::default(),
            fetch_retry: RetryConfig::default(),
            resync_interval: None,
        }
    }

    /// Parameters from loaded settings.
    pub fn from_settings(settings: &HeraldSettings, user: UserId) -> Self {
        Self {
            user,
            merge_policy: settings.reconcile.fetch_merge_policy,
            fetch_retry: settings.api.fetch_retry.clone(),
            resync_interval: settings.reconcile.resync_interval(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Controller
// ─────────────────────────────────────────────────────────────────────────────

/// Receivers drained by [`Controller::run`].
pub(crate) struct Inbox {
    pub(crate) control: mpsc::UnboundedReceiver<ControlMessage>,
    pub(crate) pushes: mpsc::UnboundedReceiver<Notification>,
    pub(crate) connection: watch::Receiver<ConnectionState>,
}

pub(crate) struct Controller {
    config: SubsystemConfig,
    api: Arc<dyn NotificationApi>,
    transport: TransportSession,
    store: NotificationStore,
    phase: SubsystemPhase,
    connected: bool,
    fetch_in_flight: bool,
    control_tx: mpsc::UnboundedSender<ControlMessage>,
    push_tx: Option<mpsc::UnboundedSender<Notification>>,
    view_tx: watch::Sender<NotificationView>,
    cancel: CancellationToken,
}

impl Controller {
    pub(crate) fn new(
        config: SubsystemConfig,
        api: Arc<dyn NotificationApi>,
        transport: TransportSession,
        control_tx: mpsc::UnboundedSender<ControlMessage>,
        push_tx: mpsc::UnboundedSender<Notification>,
        view_tx: watch::Sender<NotificationView>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            api,
            transport,
            store: NotificationStore::new(),
            phase: SubsystemPhase::Uninitialized,
            connected: false,
            fetch_in_flight: false,
            control_tx,
            push_tx: Some(push_tx),
            view_tx,
            cancel,
        }
    }

    #[instrument(skip_all, fields(user = %self.config.user))]
    pub(crate) async fn run(mut self, mut inbox: Inbox) {
        info!(policy = ?self.config.merge_policy, "notification subsystem starting");
        self.phase = SubsystemPhase::Loading;
        self.publish();

        self.start_fetch();
        if let Some(push_tx) = self.push_tx.take() {
            self.transport.connect(&self.config.user, push_tx);
        }

        let mut resync = self
            .config
            .resync_interval
            .map(|period| time::interval_at(Instant::now() + period, period));
        let resync_enabled = resync.is_some();
        let mut pushes_open = true;
        let mut connection_open = true;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                Some(message) = inbox.control.recv() => self.handle_control(message),
                push = inbox.pushes.recv(), if pushes_open => match push {
                    Some(record) => self.on_push(record),
                    None => pushes_open = false,
                },
                changed = inbox.connection.changed(), if connection_open => match changed {
                    Ok(()) => {
                        let state = *inbox.connection.borrow_and_update();
                        self.on_connection(state);
                    }
                    Err(_) => connection_open = false,
                },
                () = next_tick(&mut resync), if resync_enabled => {
                    debug!("periodic resync");
                    self.start_fetch();
                }
            }
        }

        self.transport.teardown().await;
        self.connected = false;
        self.publish();
        info!("notification subsystem stopped");
    }

    fn handle_control(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::FetchCompleted(result) => self.on_fetch_completed(result),
            ControlMessage::MarkRead(id) => self.on_mark_read(id),
            ControlMessage::AckCompleted { id, result } => on_ack_completed(&id, result),
            ControlMessage::Refresh => self.start_fetch(),
        }
    }

    fn start_fetch(&mut self) {
        if self.fetch_in_flight {
            debug!("bulk fetch already in flight");
            return;
        }
        self.fetch_in_flight = true;

        let api = self.api.clone();
        let user = self.config.user.clone();
        let retry = self.config.fetch_retry.clone();
        let control = self.control_tx.clone();
        let cancel = self.cancel.child_token();
        let _ = tokio::spawn(async move {
            let result = fetch_with_retry(api.as_ref(), &user, &retry, &cancel).await;
            let _ = control.send(ControlMessage::FetchCompleted(result));
        });
    }

    fn on_fetch_completed(&mut self, result: Result<Vec<Notification>, NetworkError>) {
        self.fetch_in_flight = false;
        match result {
            Ok(records) => {
                counter!("herald_fetch_total", "outcome" => "ok").increment(1);
                info!(count = records.len(), "bulk fetch applied");
                apply_fetch(&mut self.store, records, self.config.merge_policy);
            }
            Err(e) => {
                counter!("herald_fetch_total", "outcome" => "failed").increment(1);
                warn!(error = %e, "bulk fetch failed, keeping local state");
            }
        }
        if self.phase != SubsystemPhase::Ready {
            self.phase = SubsystemPhase::Ready;
            info!(unread = self.store.unread_count(), "subsystem ready");
        }
        self.publish();
    }

    fn on_push(&mut self, record: Notification) {
        let id = record.id.clone();
        match self.store.prepend(record) {
            PrependOutcome::Inserted => {
                counter!("herald_pushes_total", "outcome" => "inserted").increment(1);
                debug!(id = %id, "push prepended");
                self.publish();
            }
            PrependOutcome::Duplicate => {
                counter!("herald_pushes_total", "outcome" => "duplicate").increment(1);
                debug!(id = %id, "duplicate push ignored");
            }
        }
    }

    fn on_mark_read(&mut self, id: NotificationId) {
        let outcome = self.store.mark_read(&id);
        debug!(id = %id, ?outcome, "mark read");
        if outcome == MarkReadOutcome::Marked {
            self.publish();
        }

        let api = self.api.clone();
        let control = self.control_tx.clone();
        let _ = tokio::spawn(async move {
            let result = api.mark_read(&id).await;
            let _ = control.send(ControlMessage::AckCompleted { id, result });
        });
    }

    fn on_connection(&mut self, state: ConnectionState) {
        let connected = state.is_connected();
        if connected != self.connected {
            self.connected = connected;
            debug!(%state, "connectivity changed");
            self.publish();
        }
    }

    fn publish(&self) {
        let view = NotificationView {
            snapshot: self.store.snapshot(),
            connected: self.connected,
            phase: self.phase,
        };
        gauge!("herald_unread_count").set(view.snapshot.unread_count as f64);
        let _ = self.view_tx.send_replace(view);
    }
}

fn on_ack_completed(id: &NotificationId, result: Result<(), NetworkError>) {
    match result {
        Ok(()) => {
            counter!("herald_acks_total", "outcome" => "ok").increment(1);
            debug!(id = %id, "acknowledged");
        }
        Err(e) => {
            counter!("herald_acks_total", "outcome" => "failed").increment(1);
            warn!(id = %id, error = %e, "acknowledgement failed, local read state kept");
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Fetch `user`'s notifications, retrying retryable failures with backoff.
pub(crate) async fn fetch_with_retry(
    api: &dyn NotificationApi,
    user: &UserId,
    retry: &RetryConfig,
    cancel: &CancellationToken,
) -> Result<Vec<Notification>, NetworkError> {
    let mut attempt: u32 = 0;
    loop {
        match api.fetch_notifications(user).await {
            Ok(records) => return Ok(records),
            Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                let delay = retry.delay_for(attempt, rand::random::<f64>());
                warn!(
                    error = %e,
                    attempt = attempt + 1,
                    max_retries = retry.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "bulk fetch failed, retrying"
                );
                tokio::select! {
                    () = time::sleep(delay) => {}
                    () = cancel.cancelled() => return Err(e),
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use async_trait::async_trait;
    use herald_core::RequestOperation;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FlakyApi {
        fetches: Mutex<VecDeque<Result<Vec<Notification>, NetworkError>>>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl NotificationApi for FlakyApi {
        async fn fetch_notifications(&self, _user: &UserId) -> herald_api::Result<Vec<Notification>> {
            *self.calls.lock() += 1;
            self.fetches.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
        async fn mark_read(&self, _id: &NotificationId) -> herald_api::Result<()> {
            Ok(())
        }
        async fn create_notification(&self, _user: &UserId, _message: &str) -> herald_api::Result<Notification> {
            unimplemented!()
        }
        async fn unread_count(&self, _user: &UserId) -> herald_api::Result<u64> {
            Ok(0)
        }
    }

    fn unavailable() -> NetworkError {
        NetworkError::status(RequestOperation::Fetch, 503, "unavailable")
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_retries_retryable_failures() {
        let api = FlakyApi::default();
        api.fetches.lock().extend([Err(unavailable()), Err(unavailable()), Ok(Vec::new())]);
        let start = Instant::now();

        let result = fetch_with_retry(&api, &UserId::from(1), &RetryConfig::default(), &CancellationToken::new()).await;

        assert!(result.is_ok());
        assert_eq!(*api.calls.lock(), 3);
        // 1 s and 2 s, each ±20 %
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(2400) && waited <= Duration::from_millis(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_gives_up_after_max_retries() {
        let api = FlakyApi::default();
        api.fetches.lock().extend((0..10).map(|_| Err(unavailable())));

        let result = fetch_with_retry(&api, &UserId::from(1), &RetryConfig::default(), &CancellationToken::new()).await;

        assert_eq!(result.unwrap_err().status, Some(503));
        assert_eq!(*api.calls.lock(), 4);
    }

    #[tokio::test]
    async fn fetch_does_not_retry_client_errors() {
        let api = FlakyApi::default();
        api.fetches
            .lock()
            .push_back(Err(NetworkError::status(RequestOperation::Fetch, 404, "no such user")));

        let result = fetch_with_retry(&api, &UserId::from(1), &RetryConfig::default(), &CancellationToken::new()).await;

        assert!(result.is_err());
        assert_eq!(*api.calls.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_retry_stops_on_cancel() {
        let api = FlakyApi::default();
        api.fetches.lock().extend((0..10).map(|_| Err(unavailable())));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = fetch_with_retry(&api, &UserId::from(1), &RetryConfig::default(), &cancel).await;

        assert!(result.is_err());
        assert_eq!(*api.calls.lock(), 1);
    }

    #[test]
    fn config_from_settings() {
        let mut settings = HeraldSettings::default();
        settings.reconcile.fetch_merge_policy = FetchMergePolicy::Replace;
        settings.reconcile.resync_interval_ms = 60_000;
        let config = SubsystemConfig::from_settings(&settings, UserId::from(3));
        assert_eq!(config.merge_policy, FetchMergePolicy::Replace);
        assert_eq!(config.resync_interval, Some(Duration::from_secs(60)));
        assert_eq!(config.fetch_retry.max_retries, 3);
    }

    #[test]
    fn default_view_is_uninitialized_and_offline() {
        let view = NotificationView::default();
        assert_eq!(view.phase, SubsystemPhase::Uninitialized);
        assert!(!view.connected);
        assert!(view.snapshot.is_empty());
    }
}
