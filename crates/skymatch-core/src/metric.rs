//! # Distance Metrics
//!
//! Error-normalised squared distances between a detection and a catalog
//! entry (de Ruiter-style statistic). Each coordinate contributes
//! `(a - b)² / (err_a² + err_b²)`; a small floor keeps identical
//! coordinates from producing an exact zero.
//!
//! Two interchangeable variants share the [`DistanceMetric`] seam:
//! - [`PositionalMetric`]: ra and decl only
//! - [`PositionalFluxMetric`]: ra, decl and the flux in the detection's band
//!
//! [`MetricKind`] is the configuration-level tag that selects one of them
//! once per pipeline run.

use crate::primitives::{
    DEFAULT_FLUX_ISOLATION_THRESHOLD, DEFAULT_ISOLATION_THRESHOLD, DISTANCE_FLOOR,
};
use crate::{CatalogEntry, Detection, Measurement, SkymatchError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The single capability a resolution strategy needs.
///
/// Implementations must be pure: the same pair always yields the same distance.
pub trait DistanceMetric: Send + Sync {
    /// Distance in measurement space; smaller is closer.
    fn distance(&self, detection: &Detection, entry: &CatalogEntry) -> f64;
}

/// One error-normalised squared term.
#[inline]
fn normalized_sq(a: &Measurement, b: &Measurement) -> f64 {
    let diff = a.value - b.value;
    diff * diff / (a.error * a.error + b.error * b.error)
}

#[inline]
fn positional_sq(detection: &Detection, entry: &CatalogEntry) -> f64 {
    normalized_sq(&detection.ra, &entry.ra) + normalized_sq(&detection.decl, &entry.decl)
}

/// Position-only metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionalMetric;

impl DistanceMetric for PositionalMetric {
    fn distance(&self, detection: &Detection, entry: &CatalogEntry) -> f64 {
        positional_sq(detection, entry) + DISTANCE_FLOOR
    }
}

/// Position-plus-flux metric.
///
/// The flux term compares the detection's flux with the entry's weighted-mean
/// flux in the same band. An entry never observed in that band contributes no
/// flux term.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionalFluxMetric;

impl DistanceMetric for PositionalFluxMetric {
    fn distance(&self, detection: &Detection, entry: &CatalogEntry) -> f64 {
        let flux = entry
            .flux_in(detection.band)
            .map_or(0.0, |f| normalized_sq(&detection.flux, f));
        positional_sq(detection, entry) + flux + DISTANCE_FLOOR
    }
}

/// Which metric a deployment runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MetricKind {
    #[default]
    #[serde(rename = "positional")]
    Positional,
    #[serde(rename = "positional+flux")]
    PositionalFlux,
}

impl MetricKind {
    /// Configuration name of the variant.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            MetricKind::Positional => "positional",
            MetricKind::PositionalFlux => "positional+flux",
        }
    }

    /// Isolation threshold used when the configuration does not set one.
    #[must_use]
    pub const fn default_isolation_threshold(self) -> f64 {
        match self {
            MetricKind::Positional => DEFAULT_ISOLATION_THRESHOLD,
            MetricKind::PositionalFlux => DEFAULT_FLUX_ISOLATION_THRESHOLD,
        }
    }
}

impl DistanceMetric for MetricKind {
    fn distance(&self, detection: &Detection, entry: &CatalogEntry) -> f64 {
        match self {
            MetricKind::Positional => PositionalMetric.distance(detection, entry),
            MetricKind::PositionalFlux => PositionalFluxMetric.distance(detection, entry),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MetricKind {
    type Err = SkymatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positional" => Ok(MetricKind::Positional),
            "positional+flux" | "flux" => Ok(MetricKind::PositionalFlux),
            other => Err(SkymatchError::InvalidConfig(format!(
                "Unknown metric: {}. Use: positional, positional+flux",
                other
            ))),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
