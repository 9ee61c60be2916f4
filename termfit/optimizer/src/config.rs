use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::counter::BoundaryMode;

/// Rejected configuration values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A range whose lower bound exceeds its upper bound.
    #[error("invalid {name} range: min {min} > max {max}")]
    InvalidRange {
        /// Which range was rejected.
        name: &'static str,
        /// Lower bound supplied.
        min: usize,
        /// Upper bound supplied.
        max: usize,
    },
    /// Retry policy that would never call the provider.
    #[error("retry.max_attempts must be at least 1")]
    InvalidRetry,
}

/// Inclusive integer range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TermRange {
    /// Inclusive lower bound.
    pub min: usize,
    /// Inclusive upper bound.
    pub max: usize,
}

impl TermRange {
    /// Creates a range, rejecting `min > max`.
    pub fn new(min: usize, max: usize) -> Result<Self, ConfigError> {
        let range = Self { min, max };
        range.validate("term")?;
        Ok(range)
    }

    /// Whether `value` lies within the bounds.
    #[must_use]
    pub const fn contains(&self, value: usize) -> bool {
        self.min <= value && value <= self.max
    }

    /// Twice the distance between `value` and the midpoint. Doubling keeps odd
    /// `min + max` sums exact.
    #[must_use]
    pub const fn midpoint_distance(&self, value: usize) -> usize {
        (2 * value).abs_diff(self.min + self.max)
    }

    fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        if self.min > self.max {
            return Err(ConfigError::InvalidRange {
                name,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

/// The three count constraints a candidate text is scored against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRanges {
    /// Occurrences allowed per base term.
    #[serde(default = "default_base_range")]
    pub base: TermRange,
    /// Occurrences allowed per compound term.
    #[serde(default = "default_compound_range")]
    pub compound: TermRange,
    /// Non-whitespace character count allowed for the body.
    #[serde(default = "default_char_range")]
    pub chars: TermRange,
}

impl TargetRanges {
    /// Validates every range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base.validate("base")?;
        self.compound.validate("compound")?;
        self.chars.validate("chars")
    }
}

impl Default for TargetRanges {
    fn default() -> Self {
        Self {
            base: default_base_range(),
            compound: default_compound_range(),
            chars: default_char_range(),
        }
    }
}

/// Provider retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed pause before retrying after a transient fault.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl RetryPolicy {
    /// Backoff as a [`Duration`].
    #[must_use]
    pub const fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

/// Refinement knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementSettings {
    /// Suggestions retained per over-used term.
    #[serde(default = "default_max_substitutions")]
    pub max_substitutions: usize,
    /// Neighbour check applied to script-bounded compound matches.
    #[serde(default)]
    pub compound_boundary: BoundaryMode,
}

impl Default for RefinementSettings {
    fn default() -> Self {
        Self {
            max_substitutions: default_max_substitutions(),
            compound_boundary: BoundaryMode::default(),
        }
    }
}

/// Read-only configuration for the whole engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Count constraints.
    #[serde(default)]
    pub ranges: TargetRanges,
    /// Provider retry budget.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Refinement knobs.
    #[serde(default)]
    pub refinement: RefinementSettings,
}

impl OptimizerConfig {
    /// Builds a configuration from explicit ranges with default retry and refinement settings.
    pub fn new(ranges: TargetRanges) -> Result<Self, ConfigError> {
        let config = Self {
            ranges,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Replaces the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Result<Self, ConfigError> {
        self.retry = retry;
        self.validate()?;
        Ok(self)
    }

    /// Replaces the refinement settings.
    #[must_use]
    pub const fn with_refinement(mut self, refinement: RefinementSettings) -> Self {
        self.refinement = refinement;
        self
    }

    /// Checks every invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ranges.validate()?;
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidRetry);
        }
        Ok(())
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("parsing optimizer config")?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading optimizer config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("loading {}", path.display()))
    }
}

const fn default_base_range() -> TermRange {
    TermRange { min: 17, max: 20 }
}

const fn default_compound_range() -> TermRange {
    TermRange { min: 0, max: 15 }
}

const fn default_char_range() -> TermRange {
    TermRange {
        min: 1500,
        max: 2500,
    }
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_backoff_ms() -> u64 {
    5_000
}

const fn default_max_substitutions() -> usize {
    3
}
