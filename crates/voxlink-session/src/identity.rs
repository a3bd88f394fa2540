//! Per-session flyweight store: at most one live [`Proxy`] per id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace, warn};
use voxlink_core::settings::IdentitySettings;
use voxlink_core::{Attributes, EntityId, EntityKind, Retention, SessionHandle};
use voxlink_telemetry::MetricsRecorder;

use crate::proxy::{AttributeSource, Proxy};

enum Slot {
    Strong(Arc<Proxy>),
    Weak(Weak<Proxy>),
}

impl Slot {
    fn holding(proxy: &Arc<Proxy>, retention: Retention) -> Self {
        match retention {
            Retention::Strong => Self::Strong(Arc::clone(proxy)),
            Retention::Weak => Self::Weak(Arc::downgrade(proxy)),
        }
    }

    fn live(&self) -> Option<Arc<Proxy>> {
        match self {
            Self::Strong(proxy) => Some(Arc::clone(proxy)),
            Self::Weak(weak) => weak.upgrade(),
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Self::Strong(_) => true,
            Self::Weak(weak) => weak.strong_count() > 0,
        }
    }
}

/// Identity cache for one entity kind.
///
/// Long-lived kinds are held strongly until evicted. Short-lived kinds are
/// held weakly; their owner lives outside the cache, and a sweep every
/// `sweep_every` lookups drops entries whose proxy has been reclaimed.
pub struct IdentityCache {
    session: SessionHandle,
    kind: EntityKind,
    retention: Retention,
    none: Arc<Proxy>,
    entries: DashMap<EntityId, Slot>,
    source: Arc<dyn AttributeSource>,
    settings: IdentitySettings,
    lookups: AtomicU64,
    metrics: Arc<MetricsRecorder>,
}

impl IdentityCache {
    pub fn new(
        session: SessionHandle,
        kind: EntityKind,
        source: Arc<dyn AttributeSource>,
        settings: IdentitySettings,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            none: Arc::new(Proxy::none(session.clone(), kind)),
            session,
            kind,
            retention: kind.retention(),
            entries: DashMap::new(),
            source,
            settings,
            lookups: AtomicU64::new(0),
            metrics,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Return the proxy for `id`, constructing it on first lookup.
    ///
    /// Id 0 maps to the fixed "none" proxy. Two calls for the same id with no
    /// intervening [`remove`](Self::remove) return the same instance; when
    /// concurrent callers both construct, the first insert wins and the other
    /// construction is discarded.
    pub fn get_or_create(&self, id: EntityId) -> Arc<Proxy> {
        if id.is_none() {
            return Arc::clone(&self.none);
        }
        self.note_lookup();

        if let Some(existing) = self.peek(id) {
            return existing;
        }

        // Built outside the shard lock: population may wait for attributes.
        let candidate = Arc::new(self.construct(id));

        match self.entries.entry(id) {
            Entry::Occupied(mut occupied) => {
                if let Some(winner) = occupied.get().live() {
                    trace!(kind = %self.kind, entity = %id, "lost construction race");
                    return winner;
                }
                let _ = occupied.insert(Slot::holding(&candidate, self.retention));
            }
            Entry::Vacant(vacant) => {
                let _ = vacant.insert(Slot::holding(&candidate, self.retention));
            }
        }
        trace!(session = %self.session, kind = %self.kind, entity = %id, "proxy created");
        candidate
    }

    /// Evict and return the proxy for `id`.
    ///
    /// On a miss a detached placeholder is returned instead: a valid proxy
    /// that is never stored.
    pub fn remove(&self, id: EntityId) -> Arc<Proxy> {
        if id.is_none() {
            return Arc::clone(&self.none);
        }
        if let Some(proxy) = self.entries.remove(&id).and_then(|(_, slot)| slot.live()) {
            return proxy;
        }
        debug!(kind = %self.kind, entity = %id, "remove missed the cache, using detached placeholder");
        let attributes = self.source.fetch(self.kind, id).unwrap_or_default();
        Arc::new(Proxy::new(self.session.clone(), self.kind, id, attributes, true))
    }

    /// The cached proxy for `id`, without constructing one.
    pub fn peek(&self, id: EntityId) -> Option<Arc<Proxy>> {
        if id.is_none() {
            return Some(Arc::clone(&self.none));
        }
        self.entries.get(&id).and_then(|slot| slot.live())
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entries.get(&id).is_some_and(|slot| slot.is_live())
    }

    /// Number of map entries, including weak entries not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry whose proxy has already been reclaimed.
    pub fn sweep(&self) -> usize {
        let mut swept = 0usize;
        self.entries.retain(|_, slot| {
            let keep = slot.is_live();
            if !keep {
                swept += 1;
            }
            keep
        });
        if swept > 0 {
            debug!(kind = %self.kind, swept, "swept reclaimed proxies");
            self.metrics
                .counter_inc("identity.swept", &[("kind", self.kind.as_str())], swept as u64);
        }
        swept
    }

    /// Forget every entry. Proxies already handed out stay valid as snapshots.
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn note_lookup(&self) {
        let every = self.settings.sweep_every.max(1);
        let n = self.lookups.fetch_add(1, Ordering::Relaxed) + 1;
        if self.retention == Retention::Weak && n % every == 0 {
            let _ = self.sweep();
        }
    }

    fn construct(&self, id: EntityId) -> Proxy {
        let attributes = self.populate(id).unwrap_or_default();
        Proxy::new(self.session.clone(), self.kind, id, attributes, false)
    }

    /// Fetch attributes, retrying within the configured budget for kinds whose
    /// attributes may lag behind the notification that introduced them.
    fn populate(&self, id: EntityId) -> Option<Attributes> {
        if let Some(attributes) = self.source.fetch(self.kind, id) {
            return Some(attributes);
        }
        if !self.kind.awaits_attributes() {
            return None;
        }

        let budget = self.settings.attribute_wait();
        let pause = self.settings.attribute_retry();
        let deadline = Instant::now() + budget;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if pause.is_zero() {
                std::thread::yield_now();
            } else {
                std::thread::sleep(pause.min(deadline - now));
            }
            if let Some(attributes) = self.source.fetch(self.kind, id) {
                return Some(attributes);
            }
        }

        warn!(
            session = %self.session,
            kind = %self.kind,
            entity = %id,
            budget_ms = budget.as_millis() as u64,
            "attributes did not propagate in time, using defaults"
        );
        self.metrics
            .counter_inc("identity.attribute_timeout", &[("kind", self.kind.as_str())], 1);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::proxy::MemoryAttributeSource;

    fn settings(wait_ms: u64, sweep_every: u64) -> IdentitySettings {
        IdentitySettings {
            attribute_wait_ms: wait_ms,
            attribute_retry_ms: 1,
            sweep_every,
        }
    }

    fn cache_with(
        kind: EntityKind,
        source: Arc<dyn AttributeSource>,
        settings: IdentitySettings,
    ) -> IdentityCache {
        IdentityCache::new(
            SessionHandle::from_raw("sess_test"),
            kind,
            source,
            settings,
            Arc::new(MetricsRecorder::new()),
        )
    }

    fn seeded(kind: EntityKind) -> (Arc<MemoryAttributeSource>, IdentityCache) {
        let source = Arc::new(MemoryAttributeSource::new());
        let cache = cache_with(kind, source.clone(), settings(20, 4));
        (source, cache)
    }

    /// Source that only answers after a number of attempts.
    struct LateSource {
        calls: AtomicUsize,
        ready_after: usize,
    }

    impl AttributeSource for LateSource {
        fn fetch(&self, _kind: EntityKind, _id: EntityId) -> Option<Attributes> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            (n > self.ready_after).then(|| Attributes::named("late"))
        }
    }

    #[test]
    fn same_id_returns_same_instance() {
        let (source, cache) = seeded(EntityKind::Channel);
        source.set(EntityKind::Channel, EntityId(5), Attributes::named("Lobby"));

        let a = cache.get_or_create(EntityId(5));
        let b = cache.get_or_create(EntityId(5));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.display_name(), "Lobby");
        assert!(!a.is_detached());
    }

    #[test]
    fn concurrent_lookups_share_one_instance() {
        let (source, cache) = seeded(EntityKind::Client);
        for id in 1..=16 {
            source.set(EntityKind::Client, EntityId(id), Attributes::named(format!("c{id}")));
        }
        let cache = Arc::new(cache);

        let results: Vec<Vec<Arc<Proxy>>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let cache = Arc::clone(&cache);
                    s.spawn(move || {
                        (1..=16)
                            .map(|id| cache.get_or_create(EntityId(id)))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for per_thread in &results[1..] {
            for (a, b) in results[0].iter().zip(per_thread) {
                assert!(Arc::ptr_eq(a, b));
            }
        }
        assert_eq!(cache.len(), 16);
    }

    #[test]
    fn zero_maps_to_fixed_none_proxy() {
        let (_, cache) = seeded(EntityKind::Channel);
        let a = cache.get_or_create(EntityId::NONE);
        let b = cache.remove(EntityId::NONE);
        let c = cache.get_or_create(EntityId::NONE);
        assert!(a.is_none());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_evicts_and_returns_cached_instance() {
        let (source, cache) = seeded(EntityKind::Channel);
        source.set(EntityKind::Channel, EntityId(5), Attributes::named("Lobby"));
        let original = cache.get_or_create(EntityId(5));

        let removed = cache.remove(EntityId(5));
        assert!(Arc::ptr_eq(&original, &removed));
        assert!(!cache.contains(EntityId(5)));

        let fresh = cache.get_or_create(EntityId(5));
        assert!(!Arc::ptr_eq(&original, &fresh));
        // The evicted proxy keeps its last-known snapshot.
        assert_eq!(original.display_name(), "Lobby");
    }

    #[test]
    fn remove_of_unknown_id_returns_detached_placeholder() {
        let (_, cache) = seeded(EntityKind::Client);
        let placeholder = cache.remove(EntityId(999));
        assert_eq!(placeholder.id(), EntityId(999));
        assert!(placeholder.is_detached());
        assert!(!cache.contains(EntityId(999)));
        assert!(cache.is_empty());

        let again = cache.remove(EntityId(999));
        assert!(!Arc::ptr_eq(&placeholder, &again));
    }

    #[test]
    fn bounded_wait_gives_up_with_defaults() {
        let (_, cache) = seeded(EntityKind::Channel);
        let started = Instant::now();
        let proxy = cache.get_or_create(EntityId(77));
        let elapsed = started.elapsed();

        assert_eq!(proxy.display_name(), "");
        assert!(elapsed >= Duration::from_millis(20));
        assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
        assert_eq!(
            cache.metrics.counter_get("identity.attribute_timeout", &[("kind", "channel")]),
            1
        );
    }

    #[test]
    fn attributes_arriving_within_budget_are_used() {
        let source = Arc::new(LateSource { calls: AtomicUsize::new(0), ready_after: 3 });
        let cache = cache_with(EntityKind::Client, source.clone(), settings(500, 4));
        let proxy = cache.get_or_create(EntityId(3));
        assert_eq!(proxy.display_name(), "late");
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn short_lived_kinds_do_not_wait() {
        let source = Arc::new(LateSource { calls: AtomicUsize::new(0), ready_after: 1 });
        let cache = cache_with(EntityKind::Transfer, source.clone(), settings(500, 4));
        let proxy = cache.get_or_create(EntityId(3));
        assert_eq!(proxy.display_name(), "");
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn weak_entries_follow_external_owner() {
        let (_, cache) = seeded(EntityKind::Transfer);
        let owned = cache.get_or_create(EntityId(1));
        let again = cache.get_or_create(EntityId(1));
        assert!(Arc::ptr_eq(&owned, &again));
        drop(again);

        drop(owned);
        assert!(!cache.contains(EntityId(1)));
        assert!(cache.peek(EntityId(1)).is_none());
        // A lookup after reclamation builds a new proxy in place of the dead entry.
        let rebuilt = cache.get_or_create(EntityId(1));
        assert!(cache.contains(EntityId(1)));
        assert_eq!(rebuilt.id(), EntityId(1));
    }

    #[test]
    fn periodic_sweep_drops_reclaimed_weak_entries() {
        let (_, cache) = seeded(EntityKind::Sound);
        let keep = cache.get_or_create(EntityId(1)); // lookup 1
        drop(cache.get_or_create(EntityId(2))); // lookup 2
        drop(cache.get_or_create(EntityId(3))); // lookup 3
        assert_eq!(cache.len(), 3);

        let _ = cache.get_or_create(EntityId(1)); // lookup 4 triggers the sweep
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(EntityId(1)));
        assert_eq!(cache.metrics.counter_get("identity.swept", &[("kind", "sound")]), 2);
        drop(keep);
    }

    #[test]
    fn strong_entries_survive_without_external_holders() {
        let (source, cache) = seeded(EntityKind::Channel);
        source.set(EntityKind::Channel, EntityId(1), Attributes::named("a"));
        drop(cache.get_or_create(EntityId(1)));
        assert_eq!(cache.sweep(), 0);
        assert!(cache.contains(EntityId(1)));
    }

    #[test]
    fn clear_forgets_entries() {
        let (source, cache) = seeded(EntityKind::Client);
        source.set(EntityKind::Client, EntityId(1), Attributes::named("a"));
        let before = cache.get_or_create(EntityId(1));
        cache.clear();
        let after = cache.get_or_create(EntityId(1));
        assert!(!Arc::ptr_eq(&before, &after));
    }
}
