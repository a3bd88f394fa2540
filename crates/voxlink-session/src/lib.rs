//! # voxlink-session
//!
//! Client-side session core: correlates requests with their out-of-band
//! outcomes, keeps one identity-stable proxy per remote object, and mirrors
//! the remote channel tree from the notification stream.

#![deny(unsafe_code)]

pub mod correlator;
pub mod dispatch;
pub mod identity;
pub mod listing;
pub mod proxy;
pub mod session;
pub mod transport;
pub mod tree;

pub use correlator::{Pending, RequestCorrelator};
pub use dispatch::{EventDispatcher, Notifier, SessionEvent};
pub use identity::IdentityCache;
pub use listing::ListAccumulator;
pub use proxy::{AttributeSource, MemoryAttributeSource, Proxy};
pub use session::Session;
pub use transport::{DisconnectedTransport, Transport};
pub use tree::{HierarchyTracker, TreeAnomaly};
