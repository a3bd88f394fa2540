use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::EntityId;

/// Kinds of remote objects mirrored by a session.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Channel,
    Client,
    Transfer,
    Sound,
}

/// How the identity cache holds on to a proxy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Retention {
    /// The cache keeps the proxy alive until it is evicted.
    Strong,
    /// The lifetime owner lives outside the cache; entries are reclaimed once it lets go.
    Weak,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [Self::Channel, Self::Client, Self::Transfer, Self::Sound];

    pub fn retention(self) -> Retention {
        match self {
            Self::Channel | Self::Client => Retention::Strong,
            Self::Transfer | Self::Sound => Retention::Weak,
        }
    }

    /// Whether construction should wait (briefly) for the defining attributes to propagate.
    pub fn awaits_attributes(self) -> bool {
        matches!(self, Self::Channel | Self::Client)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Client => "client",
            Self::Transfer => "transfer",
            Self::Sound => "sound",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cached scalar attributes of a remote object, correct as of the last refresh.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attributes {
    #[serde(default)]
    pub display_name: String,
    /// Id of the preceding sibling; `0` means "first child". Only meaningful for channels.
    #[serde(default)]
    pub order_key: EntityId,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
}

impl Attributes {
    pub fn named(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Self::default()
        }
    }

    pub fn with_order_key(mut self, order_key: EntityId) -> Self {
        self.order_key = order_key;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        let _ = self.fields.insert(name.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn retention_by_kind() {
        assert_eq!(EntityKind::Channel.retention(), Retention::Strong);
        assert_eq!(EntityKind::Client.retention(), Retention::Strong);
        assert_eq!(EntityKind::Transfer.retention(), Retention::Weak);
        assert_eq!(EntityKind::Sound.retention(), Retention::Weak);
    }

    #[test]
    fn only_long_lived_kinds_await_attributes() {
        let waiting: Vec<_> = EntityKind::ALL
            .into_iter()
            .filter(|k| k.awaits_attributes())
            .collect();
        assert_eq!(waiting, vec![EntityKind::Channel, EntityKind::Client]);
    }

    #[test]
    fn attributes_builder() {
        let attrs = Attributes::named("Lobby")
            .with_order_key(EntityId(3))
            .with_field("topic", json!("welcome"));
        assert_eq!(attrs.display_name, "Lobby");
        assert_eq!(attrs.order_key, EntityId(3));
        assert_eq!(attrs.fields["topic"], "welcome");
    }

    #[test]
    fn attributes_deserialize_with_defaults() {
        let attrs: Attributes = serde_json::from_str(r#"{"displayName":"AFK"}"#).unwrap();
        assert_eq!(attrs.display_name, "AFK");
        assert!(attrs.order_key.is_none());
        assert!(attrs.fields.is_empty());
    }

    #[test]
    fn kind_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&EntityKind::Transfer).unwrap(), "\"transfer\"");
        assert_eq!(EntityKind::Sound.to_string(), "sound");
    }
}
