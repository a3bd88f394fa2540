mod metrics;
pub mod test_utils;

pub use metrics::{MetricType, MetricsRecorder, MetricsSnapshot};

use tracing::Level;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "voxlink_session::tree" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of compact human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build from a level name such as `"debug"`; unknown names fall back to INFO.
    pub fn from_level_name(level: &str, json: bool) -> Self {
        Self {
            log_level: level.parse().unwrap_or(Level::INFO),
            module_levels: Vec::new(),
            json,
        }
    }

    /// The `EnvFilter` directive string this config describes.
    pub fn filter_directive(&self) -> String {
        let mut filter_str = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter_str
    }
}

/// Install the global tracing subscriber. Writes to stderr.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.json {
        builder.json().finish().try_init().is_ok()
    } else {
        builder.compact().finish().try_init().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_directive_includes_module_levels() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![("voxlink_session::tree".into(), Level::DEBUG)],
            json: false,
        };
        assert_eq!(config.filter_directive(), "warn,voxlink_session::tree=debug");
    }

    #[test]
    fn from_level_name_falls_back_to_info() {
        assert_eq!(TelemetryConfig::from_level_name("debug", false).log_level, Level::DEBUG);
        assert_eq!(TelemetryConfig::from_level_name("loud", true).log_level, Level::INFO);
    }

    #[test]
    fn init_twice_is_harmless() {
        let config = TelemetryConfig::default();
        let _ = init_telemetry(&config);
        assert!(!init_telemetry(&config));
    }
}
