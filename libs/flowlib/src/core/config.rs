// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Engine configuration.
//!
//! Plain serde types with per-field defaults; loadable from TOML. The engine
//! never reads configuration from ambient global state - an [`EngineConfig`]
//! is handed to [`EngineContext::new`](crate::core::engine::EngineContext::new)
//! explicitly.

use serde::{Deserialize, Serialize};

use super::error::{FlowError, Result};

/// Default depth bounds applied to freshly allocated value containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueBoundsConfig {
    /// Minimum number of packets a container tries to keep available.
    pub min_packets: usize,
    /// Maximum queue depth; appends beyond this are backpressure.
    pub max_packets: usize,
}

impl Default for QueueBoundsConfig {
    fn default() -> Self {
        Self {
            min_packets: 1,
            max_packets: 2,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default queue bounds for new containers.
    pub queue: QueueBoundsConfig,
    /// Target sync period in seconds for realtime source pacing.
    pub sync_dt: f64,
    /// Capacity of the deferred one-shot forward queue.
    pub once_queue_capacity: usize,
    /// Initial credits granted to each router-registered source port.
    pub initial_credits: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let queue = QueueBoundsConfig::default();
        Self {
            queue,
            sync_dt: 3.0,
            once_queue_capacity: 64,
            initial_credits: queue.max_packets as u32,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from TOML text. Missing fields take defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| FlowError::Configuration(e.to_string()))
    }

    /// Load a configuration from a TOML file on disk.
    pub fn from_toml_file(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert!(cfg.queue.min_packets <= cfg.queue.max_packets);
        assert_eq!(cfg.sync_dt, 3.0);
        assert!(cfg.once_queue_capacity > 0);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg = EngineConfig::from_toml_str("sync_dt = 0.5\n").unwrap();
        assert_eq!(cfg.sync_dt, 0.5);
        assert_eq!(cfg.queue, QueueBoundsConfig::default());
    }

    #[test]
    fn nested_queue_bounds_parse() {
        let cfg = EngineConfig::from_toml_str(
            "[queue]\nmin_packets = 2\nmax_packets = 8\n",
        )
        .unwrap();
        assert_eq!(cfg.queue.min_packets, 2);
        assert_eq!(cfg.queue.max_packets, 8);
    }

    #[test]
    fn invalid_toml_is_a_configuration_error() {
        let err = EngineConfig::from_toml_str("queue = 3").unwrap_err();
        assert!(matches!(err, FlowError::Configuration(_)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "once_queue_capacity = 4\n").unwrap();
        let cfg = EngineConfig::from_toml_file(&path).unwrap();
        assert_eq!(cfg.once_queue_capacity, 4);
    }

    #[test]
    fn serde_round_trip() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
