//! Single delivery context: applies inbound notifications to the engines in
//! arrival order and publishes the resulting session events.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use voxlink_core::{ConnectionStatus, EntityId, Notification};

use crate::proxy::Proxy;
use crate::session::Session;
use crate::tree::TreeAnomaly;

/// What observers see after a notification has been applied.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    ConnectionStatus {
        status: ConnectionStatus,
        reason: Option<String>,
    },
    ChannelAdded(Arc<Proxy>),
    ChannelMoved {
        channel: Arc<Proxy>,
        parent: Arc<Proxy>,
    },
    ChannelRemoved(Arc<Proxy>),
    ChannelUpdated(Arc<Proxy>),
    ClientEntered(Arc<Proxy>),
    ClientUpdated(Arc<Proxy>),
    ClientLeft(Arc<Proxy>),
    TransferFinished(Arc<Proxy>),
    SoundFinished(Arc<Proxy>),
    GeneralError {
        code: u32,
        message: String,
    },
}

impl Session {
    /// Apply one notification. Must only be called from the session's single
    /// delivery context; ordering across calls is the arrival order.
    ///
    /// Building a proxy for a new channel or client may wait for its
    /// attributes, bounded by `identity.attributeWaitMs`.
    pub fn apply(&self, notification: Notification) {
        trace!(session = %self.handle, kind = notification.name(), "applying notification");
        match notification {
            Notification::ConnectionStatus { status, reason } => {
                self.on_connection_status(status, reason)
            }
            Notification::ChannelAdded { id, parent } => {
                if !self.tree.contains(parent) {
                    self.absorb(Err(TreeAnomaly::UntrackedParent { id, parent }));
                    return;
                }
                let channel = self.fresh_channel(id);
                let applied = self.absorb(self.tree.added(id, parent, channel.order_key()));
                if applied {
                    self.publish(SessionEvent::ChannelAdded(channel));
                }
            }
            Notification::ChannelMoved { id, parent } => {
                if !self.tree.contains(id) {
                    self.absorb(Err(TreeAnomaly::UntrackedEntity(id)));
                    return;
                }
                let channel = self.fresh_channel(id);
                let applied = self.absorb(self.tree.moved(id, parent, channel.order_key()));
                if applied {
                    let parent = self.channels.get_or_create(parent);
                    self.publish(SessionEvent::ChannelMoved { channel, parent });
                }
            }
            Notification::ChannelOrderChanged { id } => {
                if !self.tree.contains(id) {
                    self.absorb(Err(TreeAnomaly::UntrackedEntity(id)));
                    return;
                }
                let channel = self.fresh_channel(id);
                let applied = self.absorb(self.tree.order_changed(id, channel.order_key()));
                if applied {
                    self.publish(SessionEvent::ChannelUpdated(channel));
                }
            }
            Notification::ChannelUpdated { id } => {
                let channel = self.fresh_channel(id);
                self.publish(SessionEvent::ChannelUpdated(channel));
            }
            Notification::ChannelRemoved { id } => {
                self.absorb(self.tree.removed(id));
                let channel = self.channels.remove(id);
                self.publish(SessionEvent::ChannelRemoved(channel));
            }
            Notification::ClientEntered { id } => {
                let client = self.clients.get_or_create(id);
                self.publish(SessionEvent::ClientEntered(client));
            }
            Notification::ClientUpdated { id } => {
                let client = self.clients.get_or_create(id);
                client.refresh(self.source.as_ref());
                self.publish(SessionEvent::ClientUpdated(client));
            }
            Notification::ClientLeft { id } => {
                let client = self.clients.remove(id);
                self.publish(SessionEvent::ClientLeft(client));
            }
            Notification::TransferFinished { id } => {
                let transfer = self.transfers.remove(id);
                self.publish(SessionEvent::TransferFinished(transfer));
            }
            Notification::SoundFinished { id } => {
                let sound = self.sounds.remove(id);
                self.publish(SessionEvent::SoundFinished(sound));
            }
            Notification::ListItem { token, item } => {
                if !self.listings.push(token, item) {
                    debug!(session = %self.handle, %token, "list item for a token with no open listing");
                }
            }
            Notification::RequestFinished { token, status } => {
                self.finish_request(token, status.into_result());
            }
            Notification::GeneralError { code, message } => {
                warn!(session = %self.handle, code, %message, "remote reported a session error");
                self.metrics.counter_inc("dispatch.general_error", &[], 1);
                self.publish(SessionEvent::GeneralError { code, message });
            }
        }
    }

    fn on_connection_status(&self, status: ConnectionStatus, reason: Option<String>) {
        let previous = std::mem::replace(&mut *self.status.write(), status);
        info!(session = %self.handle, ?previous, ?status, reason = reason.as_deref(), "connection status changed");
        match status {
            ConnectionStatus::Connected => {
                // A fresh link starts with nothing materialised.
                self.tree.reset();
                for cache in [&self.channels, &self.clients, &self.transfers, &self.sounds] {
                    cache.clear();
                }
            }
            ConnectionStatus::Disconnected => {
                let _ = self.fail_pending(reason.as_deref().unwrap_or("disconnected"));
            }
            ConnectionStatus::Connecting => {}
        }
        self.publish(SessionEvent::ConnectionStatus { status, reason });
    }

    /// The cached channel proxy with attributes re-read from the source.
    fn fresh_channel(&self, id: EntityId) -> Arc<Proxy> {
        let channel = self.channels.get_or_create(id);
        channel.refresh(self.source.as_ref());
        channel
    }

    /// Log and count a tree anomaly. Returns whether the update took effect.
    fn absorb(&self, result: Result<(), TreeAnomaly>) -> bool {
        match result {
            Ok(()) => true,
            Err(anomaly) => {
                warn!(session = %self.handle, kind = anomaly.kind(), %anomaly, "hierarchy anomaly");
                self.metrics
                    .counter_inc("tree.anomaly", &[("kind", anomaly.kind())], 1);
                anomaly.is_applied()
            }
        }
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Wire a bounded notification queue to this session.
    pub fn dispatcher(self: &Arc<Self>) -> (Notifier, EventDispatcher) {
        let (tx, rx) = mpsc::channel(self.settings.dispatch.queue_capacity.max(1));
        (
            Notifier { tx },
            EventDispatcher {
                session: Arc::clone(self),
                rx,
            },
        )
    }
}

/// Producer half handed to the transport's inbound stream.
#[derive(Clone, Debug)]
pub struct Notifier {
    tx: mpsc::Sender<Notification>,
}

impl Notifier {
    /// Queue a notification, waiting for room. Returns false once the
    /// dispatcher has stopped.
    pub async fn send(&self, notification: Notification) -> bool {
        self.tx.send(notification).await.is_ok()
    }

    /// Queue without waiting; hands the notification back when full or closed.
    pub fn try_send(&self, notification: Notification) -> Result<(), Notification> {
        self.tx.try_send(notification).map_err(|e| match e {
            mpsc::error::TrySendError::Full(n) | mpsc::error::TrySendError::Closed(n) => n,
        })
    }
}

/// Consumer half: drains the queue on one task, applying each notification on
/// the blocking pool.
pub struct EventDispatcher {
    session: Arc<Session>,
    rx: mpsc::Receiver<Notification>,
}

impl EventDispatcher {
    /// Apply notifications until every [`Notifier`] is dropped or `cancel`
    /// fires. Returns the number applied.
    pub async fn run(mut self, cancel: CancellationToken) -> u64 {
        let mut applied = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(session = %self.session.handle, "dispatcher cancelled");
                    break;
                }
                next = self.rx.recv() => match next {
                    Some(notification) => {
                        // Applying may wait on attribute population; keep it off the
                        // async workers. Awaiting each one preserves arrival order.
                        let session = Arc::clone(&self.session);
                        let outcome =
                            tokio::task::spawn_blocking(move || session.apply(notification)).await;
                        match outcome {
                            Ok(()) => applied += 1,
                            Err(e) => error!(
                                session = %self.session.handle,
                                error = %e,
                                "notification handler failed"
                            ),
                        }
                    }
                    None => break,
                },
            }
        }
        info!(session = %self.session.handle, applied, "dispatcher stopped");
        applied
    }
}
