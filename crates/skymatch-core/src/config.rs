//! # Configuration
//!
//! Process-wide matching configuration, fixed for the lifetime of a
//! pipeline run and passed explicitly to the [`Pipeline`](crate::Pipeline).
//!
//! ```toml
//! metric = "positional+flux"
//! isolation_threshold = 0.01
//! refusal = "defer"
//! parallel = false
//! ```

use crate::metric::MetricKind;
use crate::SkymatchError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What the store does with a component the resolver refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefusalPolicy {
    /// Leave edges ambiguous and tags set; the group is retried on a later run.
    #[default]
    Defer,
    /// Reject the edges and seed one new catalog entry per detection.
    NewSources,
}

impl RefusalPolicy {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            RefusalPolicy::Defer => "defer",
            RefusalPolicy::NewSources => "new-sources",
        }
    }
}

/// Matching configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchConfig {
    /// Distance metric variant.
    pub metric: MetricKind,
    /// Explicit isolation threshold; `None` means the metric's default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isolation_threshold: Option<f64>,
    /// Disposition of refused components.
    pub refusal: RefusalPolicy,
    /// Resolve components of one image in parallel (needs the `parallel` feature).
    pub parallel: bool,
}

impl MatchConfig {
    /// Configuration for the given metric with all other fields defaulted.
    #[must_use]
    pub fn with_metric(metric: MetricKind) -> Self {
        Self {
            metric,
            ..Self::default()
        }
    }

    /// The threshold the resolver will actually use.
    #[must_use]
    pub fn effective_isolation_threshold(&self) -> f64 {
        self.isolation_threshold
            .unwrap_or_else(|| self.metric.default_isolation_threshold())
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<(), SkymatchError> {
        let threshold = self.effective_isolation_threshold();
        if !(threshold.is_finite() && threshold > 0.0 && threshold <= 1.0) {
            return Err(SkymatchError::InvalidConfig(format!(
                "isolation_threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, SkymatchError> {
        let config: Self =
            toml::from_str(text).map_err(|e| SkymatchError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SkymatchError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SkymatchError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }
}

// =============================================================================
// TESTS
// =============================================================================
