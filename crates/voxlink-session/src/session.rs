//! Session facade: owns the engines for one connection and exposes the
//! caller-facing request API.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use voxlink_core::{
    ConnectionStatus, CorrelationToken, EntityKind, Reply, Request, RequestError, SessionHandle,
    Settings,
};
use voxlink_telemetry::MetricsRecorder;

use crate::correlator::{Pending, RequestCorrelator};
use crate::dispatch::SessionEvent;
use crate::identity::IdentityCache;
use crate::listing::ListAccumulator;
use crate::proxy::AttributeSource;
use crate::transport::Transport;
use crate::tree::HierarchyTracker;

/// One client session with the remote voice service.
///
/// Callers on any thread issue requests and read the cached object graph.
/// Notifications are applied by a single delivery context, normally the
/// [`EventDispatcher`](crate::EventDispatcher) returned from
/// [`dispatcher`](Self::dispatcher).
pub struct Session {
    pub(crate) handle: SessionHandle,
    pub(crate) settings: Settings,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) source: Arc<dyn AttributeSource>,
    pub(crate) correlator: RequestCorrelator<Reply>,
    pub(crate) listings: ListAccumulator,
    pub(crate) channels: IdentityCache,
    pub(crate) clients: IdentityCache,
    pub(crate) transfers: IdentityCache,
    pub(crate) sounds: IdentityCache,
    pub(crate) tree: HierarchyTracker,
    pub(crate) status: RwLock<ConnectionStatus>,
    pub(crate) events: broadcast::Sender<SessionEvent>,
    pub(crate) metrics: Arc<MetricsRecorder>,
}

impl Session {
    pub fn new(
        settings: Settings,
        transport: Arc<dyn Transport>,
        source: Arc<dyn AttributeSource>,
    ) -> Self {
        Self::with_metrics(settings, transport, source, Arc::new(MetricsRecorder::new()))
    }

    pub fn with_metrics(
        settings: Settings,
        transport: Arc<dyn Transport>,
        source: Arc<dyn AttributeSource>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let handle = SessionHandle::new();
        let cache = |kind| {
            IdentityCache::new(
                handle.clone(),
                kind,
                Arc::clone(&source),
                settings.identity.clone(),
                Arc::clone(&metrics),
            )
        };
        let channels = cache(EntityKind::Channel);
        let clients = cache(EntityKind::Client);
        let transfers = cache(EntityKind::Transfer);
        let sounds = cache(EntityKind::Sound);
        let (events, _) = broadcast::channel(settings.dispatch.event_capacity.max(1));

        info!(session = %handle, "session created");
        Self {
            correlator: RequestCorrelator::new(handle.clone()),
            handle,
            settings,
            transport,
            source,
            listings: ListAccumulator::new(),
            channels,
            clients,
            transfers,
            sounds,
            tree: HierarchyTracker::new(),
            status: RwLock::new(ConnectionStatus::Connecting),
            events,
            metrics,
        }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    pub fn tree(&self) -> &HierarchyTracker {
        &self.tree
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    /// Identity cache for one entity kind.
    pub fn cache(&self, kind: EntityKind) -> &IdentityCache {
        match kind {
            EntityKind::Channel => &self.channels,
            EntityKind::Client => &self.clients,
            EntityKind::Transfer => &self.transfers,
            EntityKind::Sound => &self.sounds,
        }
    }

    pub fn channels(&self) -> &IdentityCache {
        &self.channels
    }

    pub fn clients(&self) -> &IdentityCache {
        &self.clients
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Issue a single-outcome request.
    pub fn request(&self, request: Request) -> Pending<Reply> {
        self.issue(request, false)
    }

    /// Issue a multi-part request; the reply is [`Reply::Listing`].
    pub fn list(&self, request: Request) -> Pending<Reply> {
        self.issue(request, true)
    }

    /// Ask the remote side to abort `token`. The outcome still arrives through
    /// the normal completion path.
    pub fn cancel(&self, token: CorrelationToken) {
        if !self.correlator.is_pending(token) {
            debug!(session = %self.handle, token = %token, "cancel for a token that is not pending");
            return;
        }
        match self.transport.abort(token) {
            Ok(()) => debug!(session = %self.handle, token = %token, "abort requested"),
            Err(e) => warn!(session = %self.handle, token = %token, error = %e, "abort request failed"),
        }
    }

    /// Resolve every pending request as connection-lost and drop open listings.
    pub fn shutdown(&self, reason: &str) -> usize {
        self.fail_pending(reason)
    }

    pub fn pending_count(&self) -> usize {
        self.correlator.pending_count()
    }

    fn issue(&self, request: Request, listing: bool) -> Pending<Reply> {
        let (token, pending) = self.correlator.new_token();
        if listing {
            self.listings.open(token);
        }
        self.metrics.counter_inc("requests.issued", &[], 1);

        if let Err(e) = self.transport.issue(&request, token) {
            warn!(
                session = %self.handle,
                token = %token,
                method = %request.method,
                error = %e,
                "request rejected before dispatch"
            );
            self.listings.discard(token);
            self.correlator.complete(token, Err(e.into()));
            self.metrics.counter_inc("requests.rejected", &[], 1);
        } else {
            debug!(session = %self.handle, token = %token, method = %request.method, "request issued");
        }
        self.update_pending_gauge();
        pending
    }

    pub(crate) fn finish_request(&self, token: CorrelationToken, outcome: Result<(), RequestError>) {
        let outcome = match outcome {
            Ok(()) => Ok(self
                .listings
                .finish(token)
                .map_or(Reply::Done, Reply::Listing)),
            Err(e) => {
                self.listings.discard(token);
                Err(e)
            }
        };
        if self.correlator.complete(token, outcome) {
            self.metrics.counter_inc("requests.completed", &[], 1);
        } else {
            self.metrics.counter_inc("requests.stale_completion", &[], 1);
        }
        self.update_pending_gauge();
    }

    pub(crate) fn fail_pending(&self, reason: &str) -> usize {
        let failed = self.correlator.fail_all(reason);
        // Only the drained tokens: a listing opened concurrently keeps its accumulator.
        let dropped = failed.iter().filter(|t| self.listings.discard(**t)).count();
        if dropped > 0 {
            debug!(session = %self.handle, dropped, "open listings dropped");
        }
        self.metrics
            .counter_inc("requests.failed_on_disconnect", &[], failed.len() as u64);
        self.update_pending_gauge();
        failed.len()
    }

    fn update_pending_gauge(&self) {
        self.metrics
            .gauge_set("requests.pending", &[], self.correlator.pending_count() as f64);
    }
}
