//! Configuration types for running groups
//!
//! Level 4 - Utilities and configuration

use pledge_core::VariantRegistry;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Per-run scheduling constants
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timing {
    /// How long members have to submit a move
    pub round_deadline_ms: u64,
    /// Pause between a round's result and the next round's clock
    pub result_display_ms: u64,
    /// How long a disconnected member may stay away before the group is abandoned
    pub reconnect_grace_ms: u64,
    /// How long a participant may wait in a queue before being evicted
    pub queue_staleness_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            round_deadline_ms: 30_000,
            result_display_ms: 5_000,
            reconnect_grace_ms: 30_000,
            queue_staleness_ms: 300_000,
        }
    }
}

impl Timing {
    /// Short timings for simulations and tests
    pub fn fast() -> Self {
        Self {
            round_deadline_ms: 2_000,
            result_display_ms: 200,
            reconnect_grace_ms: 5_000,
            queue_staleness_ms: 60_000,
        }
    }

    pub fn round_deadline(&self) -> Duration {
        Duration::from_millis(self.round_deadline_ms)
    }

    pub fn result_display(&self) -> Duration {
        Duration::from_millis(self.result_display_ms)
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_millis(self.reconnect_grace_ms)
    }

    pub fn queue_staleness(&self) -> Duration {
        Duration::from_millis(self.queue_staleness_ms)
    }
}

/// Engine configuration, loaded once at startup
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub timing: Timing,
    /// JSON file with variant specs (built-in variants when absent)
    pub variants: Option<PathBuf>,
    /// Matchmaking shuffle seed (entropy when absent)
    pub seed: Option<u64>,
}

impl EngineConfig {
    /// Load from a JSON file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Set timing
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Set matchmaking seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Build the variant registry this config points at
    pub fn registry(&self) -> anyhow::Result<VariantRegistry> {
        match &self.variants {
            Some(path) => VariantRegistry::load(path),
            None => Ok(VariantRegistry::builtin()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_defaults() {
        let timing = Timing::default();
        assert_eq!(timing.round_deadline(), Duration::from_secs(30));
        assert_eq!(timing.result_display(), Duration::from_secs(5));
        assert_eq!(timing.queue_staleness(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "timing": { "roundDeadlineMs": 1000 }, "seed": 7 }"#)
                .unwrap();
        assert_eq!(config.timing.round_deadline_ms, 1000);
        assert_eq!(config.timing.result_display_ms, 5_000);
        assert_eq!(config.seed, Some(7));
        assert!(config.variants.is_none());
    }

    #[test]
    fn test_builtin_registry_when_no_file() {
        let config = EngineConfig::default().with_seed(1);
        assert_eq!(config.registry().unwrap().len(), 4);
    }
}
