//! Pairs outgoing requests with outcomes delivered later, out of band.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info};
use voxlink_core::{CorrelationToken, RequestError, SessionHandle};

type Resolver<T> = oneshot::Sender<Result<T, RequestError>>;

/// Token → pending-outcome map for one session.
///
/// Every slot is resolved exactly once: by [`complete`](Self::complete) or by
/// [`fail_all`](Self::fail_all), whichever reaches it first. The loser of that
/// race is a silent no-op.
pub struct RequestCorrelator<T> {
    session: SessionHandle,
    next: AtomicU64,
    pending: Mutex<HashMap<CorrelationToken, Resolver<T>>>,
}

impl<T: Send> RequestCorrelator<T> {
    pub fn new(session: SessionHandle) -> Self {
        Self {
            session,
            next: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a token not used by any pending slot and register a slot for it.
    pub fn new_token(&self) -> (CorrelationToken, Pending<T>) {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock();
        let token = loop {
            let raw = self.next.fetch_add(1, Ordering::Relaxed);
            // 0 is never handed out; it only shows up after wrap-around.
            if raw == 0 {
                continue;
            }
            let token = CorrelationToken(raw);
            if !pending.contains_key(&token) {
                break token;
            }
        };
        let _ = pending.insert(token, tx);
        drop(pending);

        (token, Pending { token, rx })
    }

    /// Resolve the slot for `token`. Returns `false` (and does nothing) when the
    /// token is unknown: already resolved, drained by `fail_all`, or stale.
    pub fn complete(&self, token: CorrelationToken, outcome: Result<T, RequestError>) -> bool {
        let resolver = self.pending.lock().remove(&token);
        match resolver {
            Some(tx) => {
                // The caller may have dropped its future; the slot is gone either way.
                let _ = tx.send(outcome);
                true
            }
            None => {
                debug!(session = %self.session, %token, "completion for unknown token ignored");
                false
            }
        }
    }

    /// Drain every pending slot and resolve each as connection lost.
    /// Returns the drained tokens; slots registered afterwards are untouched.
    pub fn fail_all(&self, reason: impl Into<String>) -> Vec<CorrelationToken> {
        let drained = std::mem::take(&mut *self.pending.lock());
        let reason = reason.into();
        let mut tokens = Vec::with_capacity(drained.len());
        for (token, tx) in drained {
            let _ = tx.send(Err(RequestError::ConnectionLost(reason.clone())));
            tokens.push(token);
        }
        if !tokens.is_empty() {
            info!(session = %self.session, count = tokens.len(), %reason, "failed all pending requests");
        }
        tokens
    }

    pub fn is_pending(&self, token: CorrelationToken) -> bool {
        self.pending.lock().contains_key(&token)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    #[cfg(test)]
    fn seed_counter(&self, next: u64) {
        self.next.store(next, Ordering::Relaxed);
    }
}

/// Future for the single outcome of one request.
///
/// Resolves to [`RequestError::Abandoned`] if the correlator is dropped
/// before delivering an outcome.
#[derive(Debug)]
pub struct Pending<T> {
    token: CorrelationToken,
    rx: oneshot::Receiver<Result<T, RequestError>>,
}

impl<T> Pending<T> {
    pub fn token(&self) -> CorrelationToken {
        self.token
    }

    /// Non-blocking check; `None` while still pending.
    pub fn try_take(&mut self) -> Option<Result<T, RequestError>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(RequestError::Abandoned)),
        }
    }

    /// Block the current thread until resolved. Panics if called from within
    /// an async runtime; await the future there instead.
    pub fn wait_blocking(self) -> Result<T, RequestError> {
        self.rx.blocking_recv().unwrap_or(Err(RequestError::Abandoned))
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T, RequestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(RequestError::Abandoned)))
    }
}
