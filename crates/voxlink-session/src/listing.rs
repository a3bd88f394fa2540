//! Per-token accumulation of multi-part results.

use dashmap::DashMap;
use serde_json::Value;
use voxlink_core::CorrelationToken;

/// Collects `list_item` notifications until the terminal signal for the token.
#[derive(Default)]
pub struct ListAccumulator {
    open: DashMap<CorrelationToken, Vec<Value>>,
}

impl ListAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, token: CorrelationToken) {
        self.open.insert(token, Vec::new());
    }

    /// Append an item. Returns false if no listing is open for the token.
    pub fn push(&self, token: CorrelationToken, item: Value) -> bool {
        match self.open.get_mut(&token) {
            Some(mut items) => {
                items.push(item);
                true
            }
            None => false,
        }
    }

    /// Close the listing and hand back what it collected, possibly nothing.
    pub fn finish(&self, token: CorrelationToken) -> Option<Vec<Value>> {
        self.open.remove(&token).map(|(_, items)| items)
    }

    pub fn discard(&self, token: CorrelationToken) -> bool {
        self.open.remove(&token).is_some()
    }

    pub fn is_open(&self, token: CorrelationToken) -> bool {
        self.open.contains_key(&token)
    }
}
