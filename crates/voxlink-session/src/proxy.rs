//! Identity-stable handles for remote objects and the attribute collaborator
//! that populates them.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use voxlink_core::{Attributes, EntityId, EntityKind, SessionHandle};

/// Source of the current scalar attributes of remote objects.
///
/// Returns `None` while the remote side has not propagated the object yet.
pub trait AttributeSource: Send + Sync {
    fn fetch(&self, kind: EntityKind, id: EntityId) -> Option<Attributes>;
}

/// Stand-in for a remote object. Attribute reads serve the cached snapshot.
#[derive(Debug)]
pub struct Proxy {
    session: SessionHandle,
    kind: EntityKind,
    id: EntityId,
    detached: bool,
    attributes: RwLock<Attributes>,
}

impl Proxy {
    pub(crate) fn new(
        session: SessionHandle,
        kind: EntityKind,
        id: EntityId,
        attributes: Attributes,
        detached: bool,
    ) -> Self {
        Self {
            session,
            kind,
            id,
            detached,
            attributes: RwLock::new(attributes),
        }
    }

    /// The fixed "no entity" proxy for a kind.
    pub(crate) fn none(session: SessionHandle, kind: EntityKind) -> Self {
        Self::new(session, kind, EntityId::NONE, Attributes::default(), false)
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn is_none(&self) -> bool {
        self.id.is_none()
    }

    /// True for placeholders handed out on a cache miss; they are never stored.
    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn display_name(&self) -> String {
        self.attributes.read().display_name.clone()
    }

    pub fn order_key(&self) -> EntityId {
        self.attributes.read().order_key
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        self.attributes.read().fields.get(name).cloned()
    }

    pub fn attributes(&self) -> Attributes {
        self.attributes.read().clone()
    }

    /// Re-read attributes from `source`. Keeps the last-known snapshot when the
    /// source has nothing for this object.
    pub fn refresh(&self, source: &dyn AttributeSource) -> bool {
        if self.is_none() {
            return false;
        }
        match source.fetch(self.kind, self.id) {
            Some(attributes) => {
                *self.attributes.write() = attributes;
                true
            }
            None => false,
        }
    }
}

/// In-memory [`AttributeSource`], keyed by kind and id.
#[derive(Default)]
pub struct MemoryAttributeSource {
    entries: DashMap<(EntityKind, EntityId), Attributes>,
}

impl MemoryAttributeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, kind: EntityKind, id: EntityId, attributes: Attributes) {
        let _ = self.entries.insert((kind, id), attributes);
    }

    pub fn remove(&self, kind: EntityKind, id: EntityId) -> Option<Attributes> {
        self.entries.remove(&(kind, id)).map(|(_, a)| a)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl AttributeSource for MemoryAttributeSource {
    fn fetch(&self, kind: EntityKind, id: EntityId) -> Option<Attributes> {
        self.entries.get(&(kind, id)).map(|a| a.value().clone())
    }
}
