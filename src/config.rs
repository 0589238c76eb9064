//! Static configuration for the layer hierarchy.
//!
//! A [`HierarchyConfig`] describes the four orchestration layers (intent,
//! planning, execution, tool), the escalation policy that connects them,
//! and the backward-compatibility "flat mode" that bypasses everything
//! except the execution layer.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};

/// Number of layers in the hierarchy (levels 0 through 3).
pub const LAYER_COUNT: usize = 4;

/// How much the orchestrator reports about its own operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ObservabilityLevel {
    /// No reporting beyond returned results.
    Silent,
    /// Layer-level lifecycle events.
    #[default]
    Basic,
    /// Per-attempt traces including retries and backoff waits.
    Detailed,
}

/// Escalation decision mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EscalationMode {
    /// Always allow retrying at the current layer.
    #[default]
    Auto,
    /// Never retry automatically; every failure waits for a decision.
    Manual,
    /// Retry at the current layer until the retry threshold is reached.
    ThresholdBased,
}

/// Numeric thresholds consulted by the escalation manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationThresholds {
    /// Retries allowed at one layer before escalation triggers.
    pub max_retries_per_layer: u32,
    /// Minimum intent confidence below which planning is suspect.
    pub confidence_threshold: f64,
    /// Minimum fraction of tasks that must succeed in a batch.
    pub success_rate_threshold: f64,
}

impl Default for EscalationThresholds {
    fn default() -> Self {
        Self {
            max_retries_per_layer: 3,
            confidence_threshold: 0.5,
            success_rate_threshold: 0.8,
        }
    }
}

/// Policy governing when failures move up the hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Decision mode for retry-at-current-layer questions.
    pub mode: EscalationMode,
    /// Numeric thresholds for threshold-based decisions.
    pub thresholds: EscalationThresholds,
    /// Error-text keywords that immediately trigger escalation.
    pub auto_escalate_on: Vec<String>,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            mode: EscalationMode::Auto,
            thresholds: EscalationThresholds::default(),
            auto_escalate_on: vec!["timeout".to_string(), "failure".to_string()],
        }
    }
}

/// Per-layer execution limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Layer level: 0 = intent, 1 = planning, 2 = execution, 3 = tool.
    pub level: u8,
    /// Maximum operations in flight at once within this layer.
    pub max_concurrency: usize,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Retries allowed before the layer gives up on an operation.
    pub max_retries: u32,
}

impl LayerConfig {
    /// Create a layer config with the given level and limits.
    pub fn new(level: u8, max_concurrency: usize, timeout_ms: u64, max_retries: u32) -> Self {
        Self {
            level,
            max_concurrency,
            timeout_ms,
            max_retries,
        }
    }
}

/// Top-level configuration for the four-layer hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyConfig {
    /// Whether the full hierarchy is active. `false` signals flat mode.
    pub enabled: bool,
    /// One config per layer level; all four levels in hierarchical mode,
    /// only level 2 in flat mode.
    pub layers: Vec<LayerConfig>,
    /// Policy for moving failures up the hierarchy.
    pub escalation_policy: EscalationPolicy,
    /// Fallback retry budget for layers without an explicit limit.
    pub default_max_retries: u32,
    /// Upper bound for one full request, in milliseconds.
    pub global_timeout_ms: u64,
    /// Whether callers may feed hand-built tasks straight into layer 2.
    pub backward_compatibility_mode: bool,
    /// Reporting verbosity.
    pub observability_level: ObservabilityLevel,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            layers: vec![
                LayerConfig::new(0, 1, 10_000, 1),
                LayerConfig::new(1, 1, 30_000, 2),
                LayerConfig::new(2, 3, 60_000, 3),
                LayerConfig::new(3, 5, 30_000, 3),
            ],
            escalation_policy: EscalationPolicy::default(),
            default_max_retries: 3,
            global_timeout_ms: 300_000,
            backward_compatibility_mode: false,
            observability_level: ObservabilityLevel::Basic,
        }
    }
}

impl HierarchyConfig {
    /// Build a flat-mode config: hierarchy disabled, only the execution
    /// layer configured. Callers seeing this bypass L0 and L1 entirely.
    pub fn flat() -> Self {
        Self {
            enabled: false,
            layers: vec![LayerConfig::new(2, 3, 60_000, 3)],
            backward_compatibility_mode: true,
            ..Self::default()
        }
    }

    /// Whether this config describes the backward-compatible flat path.
    pub fn is_flat_mode(&self) -> bool {
        !self.enabled && self.layers.len() == 1 && self.layers[0].level == 2
    }

    /// Get the config for a layer level, if present.
    pub fn layer(&self, level: u8) -> Option<&LayerConfig> {
        self.layers.iter().find(|l| l.level == level)
    }

    /// Load a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading hierarchy config");
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    ///
    /// Hierarchical mode requires levels 0 through 3, each exactly once.
    /// Flat mode requires exactly the level-2 config with `enabled = false`.
    /// Thresholds must be sane in either mode.
    pub fn validate(&self) -> Result<()> {
        if self.is_flat_mode() {
            self.validate_thresholds()?;
            return Ok(());
        }

        if !self.enabled {
            return Err(Error::Config(
                "disabled config must be flat mode (single level-2 layer)".to_string(),
            ));
        }

        let mut seen = [false; LAYER_COUNT];
        for layer in &self.layers {
            let level = layer.level as usize;
            if level >= LAYER_COUNT {
                return Err(Error::Config(format!("unknown layer level {}", layer.level)));
            }
            if seen[level] {
                return Err(Error::Config(format!("duplicate layer level {}", layer.level)));
            }
            seen[level] = true;
        }
        for (level, present) in seen.iter().enumerate() {
            if !present {
                return Err(Error::Config(format!("missing layer level {}", level)));
            }
        }

        self.validate_thresholds()
    }

    fn validate_thresholds(&self) -> Result<()> {
        let t = &self.escalation_policy.thresholds;
        if !(0.0..=1.0).contains(&t.confidence_threshold) {
            return Err(Error::Config(format!(
                "confidence_threshold {} outside [0, 1]",
                t.confidence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&t.success_rate_threshold) {
            return Err(Error::Config(format!(
                "success_rate_threshold {} outside [0, 1]",
                t.success_rate_threshold
            )));
        }
        if t.max_retries_per_layer == 0 {
            return Err(Error::Config(
                "max_retries_per_layer must be at least 1".to_string(),
            ));
        }
        for layer in &self.layers {
            if layer.timeout_ms == 0 {
                return Err(Error::Config(format!(
                    "layer {} timeout_ms must be positive",
                    layer.level
                )));
            }
        }
        Ok(())
    }
}
