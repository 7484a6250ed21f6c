//! Daemon configuration, loaded once at startup from
//! `<clai_home>/config.yaml` and merged with hard defaults. Unknown keys are
//! ignored so older daemons tolerate newer config files.

use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ClaiErr;
use crate::error::Result;
use crate::paths;

/// Floor for the decay half-life; anything shorter turns the slot store into
/// noise.
pub const MIN_TAU_MS: i64 = 60_000;
pub const MIN_TOP_K: usize = 1;
pub const MAX_TOP_K: usize = 100;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub suggest: SuggestConfig,
    pub slot: SlotConfig,
    pub workflow: WorkflowConfig,
    pub discovery: DiscoveryConfig,
    pub rank: RankConfig,
    pub ai: AiConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SuggestConfig {
    pub l1: L1Config,
    /// Default number of suggestions returned when the request leaves
    /// `max_results` unset.
    pub max_results: usize,
    /// Score floor applied by the confidence gate.
    pub score_floor: f64,
}

impl Default for SuggestConfig {
    fn default() -> Self {
        Self {
            l1: L1Config::default(),
            max_results: 5,
            score_floor: 0.15,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct L1Config {
    pub capacity: usize,
    pub ttl_ms: i64,
    pub max_bytes: usize,
}

impl Default for L1Config {
    fn default() -> Self {
        Self {
            capacity: 512,
            ttl_ms: 30_000,
            max_bytes: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SlotConfig {
    /// Exponential-decay half-life for slot value counts, in milliseconds.
    pub tau_ms: i64,
    /// Maximum stored values per (scope, template, slot index).
    pub top_k: usize,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            // 14 days.
            tau_ms: 1_209_600_000,
            top_k: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WorkflowConfig {
    pub mine_interval_ms: u64,
    pub min_steps: usize,
    pub max_steps: usize,
    pub min_occurrences: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            mine_interval_ms: 180_000,
            min_steps: 2,
            max_steps: 5,
            min_occurrences: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub cooldown_ms: i64,
    pub limit: usize,
    /// Optional restriction of detected project types; empty means all.
    pub project_types: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 45_000,
            limit: 5,
            project_types: Vec::new(),
        }
    }
}

/// Additive signal weights. Kept configurable; the defaults favor
/// same-session transitions over raw frequency.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RankConfig {
    pub w_transition: f64,
    pub w_frequency: f64,
    pub w_slot: f64,
    pub w_workflow: f64,
    pub w_playbook: f64,
    /// Multiplier applied to suggestions classified destructive.
    pub destructive_penalty: f64,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            w_transition: 3.0,
            w_frequency: 1.0,
            w_slot: 2.0,
            w_workflow: 2.5,
            w_playbook: 1.5,
            destructive_penalty: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AiConfig {
    /// Opaque remote translation endpoint; empty disables the feature.
    pub endpoint: String,
    pub api_key: String,
    pub timeout_ms: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            timeout_ms: 8_000,
        }
    }
}

impl Config {
    /// Load `<clai_home>/config.yaml`. A missing file yields defaults;
    /// malformed YAML is an error so the daemon fails loudly at startup.
    pub fn load(clai_home: &Path) -> Result<Self> {
        Self::load_from(&paths::config_path(clai_home))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let cfg = match std::fs::read_to_string(path) {
            Ok(text) => serde_yaml::from_str::<Config>(&text)
                .map_err(|e| ClaiErr::Config(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(cfg.clamped())
    }

    /// Apply parameter clamps so a hostile or typo'd config cannot break the
    /// store invariants.
    pub fn clamped(mut self) -> Self {
        self.slot.tau_ms = self.slot.tau_ms.max(MIN_TAU_MS);
        self.slot.top_k = self.slot.top_k.clamp(MIN_TOP_K, MAX_TOP_K);
        self.workflow.min_steps = self.workflow.min_steps.max(2);
        self.workflow.max_steps = self.workflow.max_steps.max(self.workflow.min_steps);
        self.workflow.min_occurrences = self.workflow.min_occurrences.max(1);
        self.suggest.max_results = self.suggest.max_results.max(1);
        self.suggest.l1.capacity = self.suggest.l1.capacity.max(1);
        self.discovery.limit = self.discovery.limit.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = Config::load(dir.path()).expect("load");
        assert_eq!(cfg, Config::default().clamped());
        assert_eq!(cfg.slot.top_k, 20);
        assert_eq!(cfg.suggest.l1.ttl_ms, 30_000);
    }

    #[test]
    fn partial_yaml_overrides_only_named_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("config.yaml"),
            "slot:\n  top_k: 7\nsuggest:\n  l1:\n    ttl_ms: 1000\n",
        )
        .expect("write");
        let cfg = Config::load(dir.path()).expect("load");
        assert_eq!(cfg.slot.top_k, 7);
        assert_eq!(cfg.suggest.l1.ttl_ms, 1000);
        // Untouched keys keep their defaults.
        assert_eq!(cfg.slot.tau_ms, 1_209_600_000);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let cfg = Config {
            slot: SlotConfig {
                tau_ms: 5,
                top_k: 10_000,
            },
            ..Default::default()
        }
        .clamped();
        assert_eq!(cfg.slot.tau_ms, MIN_TAU_MS);
        assert_eq!(cfg.slot.top_k, MAX_TOP_K);
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("config.yaml"), "slot: [not a map").expect("write");
        assert!(Config::load(dir.path()).is_err());
    }
}
