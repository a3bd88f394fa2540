use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub identity: IdentitySettings,
    pub dispatch: DispatchSettings,
    pub logging: LoggingSettings,
}

/// Identity cache tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentitySettings {
    /// Upper bound on waiting for a new proxy's attributes to propagate.
    pub attribute_wait_ms: u64,
    /// Pause between attribute population attempts.
    pub attribute_retry_ms: u64,
    /// Number of lookups between sweeps of reclaimed weak entries.
    pub sweep_every: u64,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            attribute_wait_ms: 40,
            attribute_retry_ms: 2,
            sweep_every: 64,
        }
    }
}

impl IdentitySettings {
    pub fn attribute_wait(&self) -> Duration {
        Duration::from_millis(self.attribute_wait_ms)
    }

    pub fn attribute_retry(&self) -> Duration {
        Duration::from_millis(self.attribute_retry_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchSettings {
    /// Capacity of the inbound notification queue.
    pub queue_capacity: usize,
    /// Capacity of the session event broadcast channel.
    pub event_capacity: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            event_capacity: 256,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
