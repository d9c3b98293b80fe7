//! # Group Resolver
//!
//! Decides a confident one-to-one pairing for one connected component, or
//! refuses the whole component.
//!
//! For a balanced component (as many detections as entries):
//! 1. Compute the full detection × entry distance matrix with the active metric.
//! 2. For each detection, find its nearest (`d1`) and second-nearest (`d2`)
//!    entry; `isolation = d1 / d2`.
//! 3. For each entry, find its nearest detection.
//! 4. Accept detection `i` → entry `j` only if `isolation_i < threshold` and
//!    entry `j`'s nearest detection is `i`.
//! 5. All or nothing: one failing detection refuses the component.
//!
//! A refusal is a normal outcome ([`Resolution::Unresolved`]), never an error.

use crate::metric::DistanceMetric;
use crate::{CatalogEntry, Detection, Pairing, Refusal, Resolution, SkymatchError};
use std::collections::BTreeSet;

/// Best and runner-up candidate for one row of the distance matrix.
#[derive(Debug, Clone, Copy)]
struct Nearest {
    index: usize,
    isolation: f64,
}

/// Index of the smallest value; ties go to the lowest index.
fn argmin(values: impl Iterator<Item = f64>) -> Option<(usize, f64)> {
    values
        .enumerate()
        .fold(None, |best, (idx, value)| match best {
            Some((_, current)) if current <= value => best,
            _ => Some((idx, value)),
        })
}

fn nearest_with_isolation(row: &[f64]) -> Option<Nearest> {
    let (index, d1) = argmin(row.iter().copied())?;
    let d2 = row
        .iter()
        .enumerate()
        .filter(|(j, _)| *j != index)
        .map(|(_, d)| *d)
        .fold(f64::INFINITY, f64::min);
    // With a single candidate the runner-up is infinitely far away.
    Some(Nearest {
        index,
        isolation: d1 / d2,
    })
}

/// Resolves components with one distance metric and isolation threshold.
#[derive(Debug, Clone)]
pub struct GroupResolver<M: DistanceMetric> {
    metric: M,
    isolation_threshold: f64,
}

impl<M: DistanceMetric> GroupResolver<M> {
    /// Create a resolver.
    ///
    /// # Errors
    /// Returns `SkymatchError::InvalidConfig` unless `0 < isolation_threshold <= 1`.
    pub fn new(metric: M, isolation_threshold: f64) -> Result<Self, SkymatchError> {
        if !(isolation_threshold.is_finite()
            && isolation_threshold > 0.0
            && isolation_threshold <= 1.0)
        {
            return Err(SkymatchError::InvalidConfig(format!(
                "isolation threshold must be in (0, 1], got {}",
                isolation_threshold
            )));
        }
        Ok(Self {
            metric,
            isolation_threshold,
        })
    }

    #[must_use]
    pub fn isolation_threshold(&self) -> f64 {
        self.isolation_threshold
    }

    /// Pairwise distances, one row per detection.
    ///
    /// # Errors
    /// Returns `SkymatchError::MalformedComponent` if any distance is not finite.
    pub fn distance_matrix(
        &self,
        detections: &[Detection],
        entries: &[CatalogEntry],
    ) -> Result<Vec<Vec<f64>>, SkymatchError> {
        detections
            .iter()
            .map(|det| {
                entries
                    .iter()
                    .map(|entry| {
                        let d = self.metric.distance(det, entry);
                        if d.is_finite() && d >= 0.0 {
                            Ok(d)
                        } else {
                            Err(SkymatchError::MalformedComponent(format!(
                                "non-finite distance between {} and {}",
                                det.id, entry.id
                            )))
                        }
                    })
                    .collect()
            })
            .collect()
    }

    /// Resolve one component.
    ///
    /// Returns [`Resolution::Resolved`] with exactly one pair per detection,
    /// or [`Resolution::Unresolved`] with the first reason found.
    ///
    /// # Errors
    /// Returns `SkymatchError::MalformedComponent` if the component is empty,
    /// repeats an id, or produces a non-finite distance.
    pub fn resolve(
        &self,
        detections: &[Detection],
        entries: &[CatalogEntry],
    ) -> Result<Resolution, SkymatchError> {
        if detections.len() != entries.len() {
            return Ok(Resolution::Unresolved(Refusal::Unbalanced {
                detections: detections.len(),
                entries: entries.len(),
            }));
        }
        if detections.is_empty() {
            return Err(SkymatchError::MalformedComponent(
                "component has no detections".to_string(),
            ));
        }
        check_unique(detections.iter().map(|d| d.id), "detection")?;
        check_unique(entries.iter().map(|e| e.id), "entry")?;

        let matrix = self.distance_matrix(detections, entries)?;

        let mut det_nearest = Vec::with_capacity(detections.len());
        for row in &matrix {
            let nearest = nearest_with_isolation(row).ok_or_else(|| {
                SkymatchError::MalformedComponent("empty distance row".to_string())
            })?;
            det_nearest.push(nearest);
        }

        let mut entry_nearest = Vec::with_capacity(entries.len());
        for j in 0..entries.len() {
            let (i, _) = argmin(matrix.iter().map(|row| row[j])).ok_or_else(|| {
                SkymatchError::MalformedComponent("empty distance column".to_string())
            })?;
            entry_nearest.push(i);
        }

        let mut pairing = Pairing::new();
        for (i, nearest) in det_nearest.iter().enumerate() {
            let detection = detections[i].id;
            if nearest.isolation >= self.isolation_threshold {
                return Ok(Resolution::Unresolved(Refusal::NotIsolated {
                    detection,
                    isolation: nearest.isolation,
                }));
            }
            let entry = entries[nearest.index].id;
            if entry_nearest[nearest.index] != i {
                return Ok(Resolution::Unresolved(Refusal::NotMutual { detection, entry }));
            }
            pairing.0.push((detection, entry));
        }

        Ok(Resolution::Resolved(pairing))
    }
}

fn check_unique<T: Ord + std::fmt::Display>(
    ids: impl Iterator<Item = T>,
    what: &str,
) -> Result<(), SkymatchError> {
    let mut seen = BTreeSet::new();
    for id in ids {
        if seen.contains(&id) {
            return Err(SkymatchError::MalformedComponent(format!(
                "duplicate {} {}",
                what, id
            )));
        }
        seen.insert(id);
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
