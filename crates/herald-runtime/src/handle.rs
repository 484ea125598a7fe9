//! Public surface of the notification subsystem.

use std::sync::Arc;

use herald_api::{ApiConfig, NotificationApi, ReqwestNotificationApi};
use herald_core::{NotificationId, UserId};
use herald_settings::HeraldSettings;
use herald_transport::{TransportConfig, TransportSession, WsConnector};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::controller::{
    ControlMessage, Controller, Inbox, NotificationView, SubsystemConfig, SubsystemPhase,
};
use crate::store::StoreSnapshot;

/// A running notification subsystem for one user.
///
/// Owns the control task. Dropping it without [`Subsystem::shutdown`] cancels
/// the task but does not wait for the broker disconnect.
pub struct Subsystem {
    handle: NotificationHandle,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subsystem {
    /// Start the bulk fetch and the transport session for `config.user`.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(
        config: SubsystemConfig,
        api: Arc<dyn NotificationApi>,
        transport: TransportSession,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(NotificationView::default());
        let cancel = CancellationToken::new();

        let inbox = Inbox {
            control: control_rx,
            pushes: push_rx,
            connection: transport.subscribe_state(),
        };
        let controller = Controller::new(
            config,
            api,
            transport,
            control_tx.clone(),
            push_tx,
            view_tx,
            cancel.clone(),
        );
        let task = tokio::spawn(controller.run(inbox));

        Self {
            handle: NotificationHandle {
                view: view_rx,
                control: control_tx,
            },
            cancel,
            task: Some(task),
        }
    }

    /// Start against the servers of the active environment profile.
    pub fn from_settings(settings: &HeraldSettings, user: UserId) -> herald_settings::Result<Self> {
        let api = ReqwestNotificationApi::new(&ApiConfig::from_settings(settings)?);
        let transport = TransportSession::new(
            TransportConfig::from_settings(settings)?,
            Arc::new(WsConnector),
        );
        let config = SubsystemConfig::from_settings(settings, user);
        Ok(Self::start(config, Arc::new(api), transport))
    }

    /// A handle for reading state and sending acknowledgements.
    pub fn handle(&self) -> NotificationHandle {
        self.handle.clone()
    }

    /// Stop the control task and tear down the transport session.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "control task ended abnormally");
            }
        }
    }
}

impl Drop for Subsystem {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Subsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subsystem")
            .field("running", &self.task.as_ref().is_some_and(|t| !t.is_finished()))
            .finish_non_exhaustive()
    }
}

/// Cheap, cloneable view onto a [`Subsystem`].
#[derive(Clone, Debug)]
pub struct NotificationHandle {
    view: watch::Receiver<NotificationView>,
    control: mpsc::UnboundedSender<ControlMessage>,
}

impl NotificationHandle {
    /// Current view.
    pub fn view(&self) -> NotificationView {
        self.view.borrow().clone()
    }

    /// Ordered records and unread count.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.view.borrow().snapshot.clone()
    }

    /// Unread count.
    pub fn unread_count(&self) -> usize {
        self.view.borrow().snapshot.unread_count
    }

    /// Whether the broker connection is up.
    pub fn is_connected(&self) -> bool {
        self.view.borrow().connected
    }

    /// Lifecycle phase.
    pub fn phase(&self) -> SubsystemPhase {
        self.view.borrow().phase
    }

    /// Mark `id` read locally and acknowledge it to the server.
    ///
    /// Returns `false` if the subsystem has stopped.
    pub fn mark_read(&self, id: impl Into<NotificationId>) -> bool {
        self.control.send(ControlMessage::MarkRead(id.into())).is_ok()
    }

    /// Re-run the bulk fetch. Returns `false` if the subsystem has stopped.
    pub fn refresh(&self) -> bool {
        self.control.send(ControlMessage::Refresh).is_ok()
    }

    /// Wait until a new view is published. Returns `false` once the
    /// subsystem has stopped.
    pub async fn changed(&mut self) -> bool {
        self.view.changed().await.is_ok()
    }

    /// Wait until the view satisfies `predicate`, returning that view.
    ///
    /// Returns `None` if the subsystem stops first.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&NotificationView) -> bool,
    ) -> Option<NotificationView> {
        self.view.wait_for(predicate).await.ok().map(|view| view.clone())
    }
}
