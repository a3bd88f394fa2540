//! # voxlink-core
//!
//! Shared vocabulary for the voice-chat client session: ids, entity kinds and
//! cached attributes, inbound notifications, request/reply types, the request
//! error taxonomy, and layered settings.

#![deny(unsafe_code)]

pub mod entity;
pub mod errors;
pub mod events;
pub mod ids;
pub mod settings;

pub use entity::{Attributes, EntityKind, Retention};
pub use errors::{IssueError, RequestError};
pub use events::{ConnectionStatus, Notification, RemoteStatus, Reply, Request};
pub use ids::{CorrelationToken, EntityId, SessionHandle};
pub use settings::{Settings, SettingsError};
