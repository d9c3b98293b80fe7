//! # Pipeline
//!
//! Per-image orchestration of group discovery, resolution and commit.
//!
//! For one image:
//! 1. Load the image's ambiguous edges from the store.
//! 2. Check that no detection or entry sits under two cluster tags.
//! 3. Partition each tag's edges into connected components.
//! 4. Accept single-edge components directly; resolve the rest.
//! 5. Commit every decision for the image at once.
//!
//! A precondition violation inside one cluster skips that cluster and leaves
//! it untouched. A cross-tag overlap skips the whole image.
//!
//! Images are processed strictly in ascending order, because each commit
//! changes the catalog the next image is matched against.

use crate::catalog::{CatalogStore, CommitSummary, Decision};
use crate::config::{MatchConfig, RefusalPolicy};
use crate::finder::GroupFinder;
use crate::metric::{DistanceMetric, MetricKind};
use crate::resolver::GroupResolver;
use crate::{
    AssociationEdge, CatalogEntry, ClusterTag, Component, Detection, DetectionId, EntryId,
    ImageId, Pairing, Refusal, Resolution, SkymatchError,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// What happened to one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageReport {
    pub image: ImageId,
    /// Distinct cluster tags among the image's ambiguous edges.
    pub clusters: usize,
    /// Components found in clusters that were not skipped.
    pub components: usize,
    /// Single-edge components accepted without resolution.
    pub trivial: usize,
    /// Accepted components, trivial ones included.
    pub resolved: usize,
    pub refused: usize,
    pub skipped_clusters: usize,
    /// Every accepted pair, in commit order.
    pub pairs: Vec<(DetectionId, EntryId)>,
    pub refusals: Vec<Refusal>,
    pub commit: CommitSummary,
}

impl ImageReport {
    fn empty(image: ImageId) -> Self {
        Self {
            image,
            clusters: 0,
            components: 0,
            trivial: 0,
            resolved: 0,
            refused: 0,
            skipped_clusters: 0,
            pairs: Vec::new(),
            refusals: Vec::new(),
            commit: CommitSummary {
                image: Some(image),
                ..CommitSummary::default()
            },
        }
    }
}

/// One component waiting for a decision.
struct Job {
    cluster: usize,
    component: Component,
    /// `None` for trivial components, which need no records.
    records: Option<(Vec<Detection>, Vec<CatalogEntry>)>,
}

/// Runs group discovery and resolution against a catalog store.
#[derive(Debug, Clone)]
pub struct Pipeline<M: DistanceMetric> {
    resolver: GroupResolver<M>,
    refusal: RefusalPolicy,
    parallel: bool,
}

impl Pipeline<MetricKind> {
    /// Build the pipeline a configuration describes.
    pub fn from_config(config: &MatchConfig) -> Result<Self, SkymatchError> {
        config.validate()?;
        let resolver = GroupResolver::new(config.metric, config.effective_isolation_threshold())?;

        if config.parallel && !cfg!(feature = "parallel") {
            tracing::warn!(
                "parallel resolution requested but the `parallel` feature is off; running sequentially"
            );
        }

        Ok(Self::new(resolver, config.refusal).with_parallel(config.parallel))
    }
}

impl<M: DistanceMetric> Pipeline<M> {
    #[must_use]
    pub fn new(resolver: GroupResolver<M>, refusal: RefusalPolicy) -> Self {
        Self {
            resolver,
            refusal,
            parallel: false,
        }
    }

    /// Resolve the components of one image on the rayon pool.
    ///
    /// Has no effect unless the `parallel` feature is enabled.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Resolve and commit one image.
    ///
    /// # Errors
    /// - `SkymatchError::CrossClusterOverlap` if the image's tags overlap;
    ///   nothing is committed
    /// - Any store error from loading or committing
    pub fn process_image<S: CatalogStore + ?Sized>(
        &self,
        store: &mut S,
        image: ImageId,
    ) -> Result<ImageReport, SkymatchError> {
        let mut report = ImageReport::empty(image);

        let edges = store.ambiguous_edges(image)?;
        if edges.is_empty() {
            tracing::debug!("{}: no ambiguous edges", image);
            return Ok(report);
        }
        if let Err(e) = GroupFinder::check_disjoint_tags(&edges) {
            tracing::warn!("{}: skipped, {}", image, e);
            return Err(e);
        }

        let clusters = group_by_tag(edges);
        report.clusters = clusters.len();

        let mut jobs = Vec::new();
        let mut skipped = vec![false; clusters.len()];
        for (idx, (tag, tag_edges)) in clusters.iter().enumerate() {
            match Self::plan_cluster(&*store, idx, tag_edges) {
                Ok(cluster_jobs) => jobs.extend(cluster_jobs),
                Err(e) if is_cluster_precondition(&e) => {
                    tracing::warn!("{} {:?}: cluster skipped, {}", image, tag, e);
                    skipped[idx] = true;
                }
                Err(e) => return Err(e),
            }
        }

        let resolutions = self.resolve_all(&jobs);

        // A cluster is committed only if every one of its components resolved cleanly.
        for (job, result) in jobs.iter().zip(&resolutions) {
            if let Err(e) = result {
                if !skipped[job.cluster] {
                    tracing::warn!(
                        "{} {:?}: cluster skipped, {}",
                        image,
                        job.component.cluster,
                        e
                    );
                    skipped[job.cluster] = true;
                }
            }
        }
        report.skipped_clusters = skipped.iter().filter(|s| **s).count();

        let mut decisions = Vec::new();
        for (job, result) in jobs.into_iter().zip(resolutions) {
            if skipped[job.cluster] {
                continue;
            }
            report.components += 1;
            if job.records.is_none() {
                report.trivial += 1;
            }
            match result {
                Ok(Resolution::Resolved(pairing)) => {
                    tracing::debug!(
                        "{}: accepted {} pair(s) in {:?}",
                        image,
                        pairing.len(),
                        job.component.cluster
                    );
                    report.resolved += 1;
                    report.pairs.extend_from_slice(pairing.pairs());
                    decisions.push(Decision::Accept {
                        component: job.component,
                        pairing,
                    });
                }
                Ok(Resolution::Unresolved(refusal)) => {
                    tracing::debug!("{}: refused {:?}, {}", image, job.component.cluster, refusal);
                    report.refused += 1;
                    report.refusals.push(refusal);
                    decisions.push(Decision::Refuse {
                        component: job.component,
                    });
                }
                // Already marked skipped above.
                Err(_) => {}
            }
        }

        if !decisions.is_empty() {
            report.commit = store.commit(image, &decisions, self.refusal)?;
        }

        tracing::info!(
            "{}: {} cluster(s), {} component(s), {} resolved, {} refused, {} skipped",
            image,
            report.clusters,
            report.components,
            report.resolved,
            report.refused,
            report.skipped_clusters
        );
        Ok(report)
    }

    /// Process images in ascending order, skipping (and logging) failures.
    ///
    /// Returns one outcome per distinct image, ascending.
    pub fn process_images<S: CatalogStore + ?Sized>(
        &self,
        store: &mut S,
        images: &[ImageId],
    ) -> Vec<(ImageId, Result<ImageReport, SkymatchError>)> {
        let mut ordered = images.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        ordered
            .into_iter()
            .map(|image| {
                let outcome = self.process_image(store, image);
                if let Err(e) = &outcome {
                    tracing::warn!("{}: not processed, {}", image, e);
                }
                (image, outcome)
            })
            .collect()
    }

    /// Partition one cluster and load the records of its non-trivial components.
    fn plan_cluster<S: CatalogStore + ?Sized>(
        store: &S,
        cluster: usize,
        edges: &[AssociationEdge],
    ) -> Result<Vec<Job>, SkymatchError> {
        GroupFinder::partition(edges)?
            .into_iter()
            .map(|component| {
                let records = if component.is_trivial() {
                    None
                } else {
                    Some(load_records(store, &component)?)
                };
                Ok(Job {
                    cluster,
                    component,
                    records,
                })
            })
            .collect()
    }

    fn resolve_job(&self, job: &Job) -> Result<Resolution, SkymatchError> {
        match &job.records {
            Some((detections, entries)) => match self.resolver.resolve(detections, entries)? {
                Resolution::Resolved(pairing) => match unlinked_pair(&job.component, &pairing) {
                    Some((detection, entry)) => {
                        Ok(Resolution::Unresolved(Refusal::NotLinked { detection, entry }))
                    }
                    None => Ok(Resolution::Resolved(pairing)),
                },
                unresolved => Ok(unresolved),
            },
            None => Ok(Resolution::Resolved(Pairing(
                job.component.edges.iter().map(AssociationEdge::key).collect(),
            ))),
        }
    }

    #[cfg(feature = "parallel")]
    fn resolve_all(&self, jobs: &[Job]) -> Vec<Result<Resolution, SkymatchError>> {
        use rayon::prelude::*;

        if self.parallel {
            jobs.par_iter().map(|job| self.resolve_job(job)).collect()
        } else {
            jobs.iter().map(|job| self.resolve_job(job)).collect()
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn resolve_all(&self, jobs: &[Job]) -> Vec<Result<Resolution, SkymatchError>> {
        jobs.iter().map(|job| self.resolve_job(job)).collect()
    }
}

/// Split edges by cluster tag, keeping input order within each tag.
fn group_by_tag(edges: Vec<AssociationEdge>) -> BTreeMap<Option<ClusterTag>, Vec<AssociationEdge>> {
    let mut clusters: BTreeMap<Option<ClusterTag>, Vec<AssociationEdge>> = BTreeMap::new();
    for edge in edges {
        clusters.entry(edge.cluster).or_default().push(edge);
    }
    clusters
}

/// The first pair of `pairing` that is not an edge of `component`.
///
/// Resolution compares every detection with every entry of a component, so
/// it can pick a pair the component has no edge for.
fn unlinked_pair(component: &Component, pairing: &Pairing) -> Option<(DetectionId, EntryId)> {
    let keys: BTreeSet<_> = component.edges.iter().map(AssociationEdge::key).collect();
    pairing.pairs().iter().copied().find(|pair| !keys.contains(pair))
}

/// Detection and entry records of a component, in ascending id order.
fn load_records<S: CatalogStore + ?Sized>(
    store: &S,
    component: &Component,
) -> Result<(Vec<Detection>, Vec<CatalogEntry>), SkymatchError> {
    let detections = component
        .detections()
        .into_iter()
        .map(|id| store.detection(id)?.ok_or(SkymatchError::DetectionNotFound(id)))
        .collect::<Result<Vec<_>, _>>()?;
    let entries = component
        .entries()
        .into_iter()
        .map(|id| store.entry(id)?.ok_or(SkymatchError::EntryNotFound(id)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((detections, entries))
}

/// Errors confined to one cluster; anything else aborts the image.
fn is_cluster_precondition(error: &SkymatchError) -> bool {
    matches!(
        error,
        SkymatchError::EmptyCluster
            | SkymatchError::MalformedComponent(_)
            | SkymatchError::MixedClusterTags { .. }
            | SkymatchError::DetectionNotFound(_)
            | SkymatchError::EntryNotFound(_)
            | SkymatchError::InvalidRecord(_)
    )
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogRecords, MemoryStore};
    use crate::{Band, EdgeKind, Measurement};

    fn det(id: u64, image: u64, ra: f64, decl: f64) -> Detection {
        Detection {
            id: DetectionId(id),
            image: ImageId(image),
            band: Band::default(),
            ra: Measurement::new(ra, 0.1),
            decl: Measurement::new(decl, 0.1),
            flux: Measurement::new(1.0, 0.1),
        }
    }

    fn entry(id: u64, ra: f64, decl: f64) -> CatalogEntry {
        CatalogEntry::from_detection(EntryId(id), &det(0, 0, ra, decl))
    }

    fn edge(det: u64, entry: u64, image: u64, tag: u64) -> AssociationEdge {
        AssociationEdge::ambiguous(
            DetectionId(det),
            EntryId(entry),
            ImageId(image),
            ClusterTag(tag),
        )
    }

    fn pipeline() -> Pipeline<MetricKind> {
        Pipeline::from_config(&MatchConfig::default()).expect("pipeline")
    }

    /// Image 1: tag 1 holds a clean 2x2 group, tag 2 a single edge.
    fn store() -> MemoryStore {
        MemoryStore::try_from(CatalogRecords {
            detections: vec![
                det(1, 1, 0.0, 0.0),
                det(2, 1, 5.0, 5.0),
                det(3, 1, 20.0, 20.0),
            ],
            entries: vec![
                entry(10, 0.001, 0.0),
                entry(20, 5.001, 5.0),
                entry(30, 20.0, 20.001),
            ],
            edges: vec![
                edge(1, 10, 1, 1),
                edge(1, 20, 1, 1),
                edge(2, 10, 1, 1),
                edge(2, 20, 1, 1),
                edge(3, 30, 1, 2),
            ],
        })
        .expect("store")
    }

    #[test]
    fn resolves_clean_image() {
        let mut store = store();
        let report = pipeline()
            .process_image(&mut store, ImageId(1))
            .expect("process");

        assert_eq!(report.clusters, 2);
        assert_eq!(report.components, 2);
        assert_eq!(report.trivial, 1);
        assert_eq!(report.resolved, 2);
        assert_eq!(
            report.pairs,
            vec![
                (DetectionId(1), EntryId(10)),
                (DetectionId(2), EntryId(20)),
                (DetectionId(3), EntryId(30)),
            ]
        );
        assert!(store.ambiguous_edges(ImageId(1)).expect("edges").is_empty());
        assert_eq!(
            store.stats().expect("stats").edges_of(EdgeKind::Resolved),
            3
        );
    }

    #[test]
    fn second_run_is_a_no_op() {
        let mut store = store();
        let pipeline = pipeline();
        pipeline
            .process_image(&mut store, ImageId(1))
            .expect("first run");
        let report = pipeline
            .process_image(&mut store, ImageId(1))
            .expect("second run");
        assert_eq!(report.clusters, 0);
        assert!(report.pairs.is_empty());
    }

    #[test]
    fn overlapping_tags_skip_the_image() {
        let mut store = store();
        let mut records = CatalogRecords::from(&store);
        // Entry 30 now also appears under tag 1.
        records.edges.push(edge(2, 30, 1, 1));
        let mut store_with_overlap = MemoryStore::try_from(records).expect("store");
        let before = CatalogRecords::from(&store_with_overlap);

        let result = pipeline().process_image(&mut store_with_overlap, ImageId(1));

        assert!(matches!(
            result,
            Err(SkymatchError::CrossClusterOverlap { .. })
        ));
        assert_eq!(CatalogRecords::from(&store_with_overlap), before);
        // The untouched original still resolves.
        assert!(pipeline().process_image(&mut store, ImageId(1)).is_ok());
    }

    #[test]
    fn malformed_cluster_is_skipped_alone() {
        let mut records = CatalogRecords::from(&store());
        // Tag 3 is a 2x2 group; entry 41 is moved far enough to overflow the distance.
        records.detections.push(det(4, 1, 50.0, 50.0));
        records.entries.push(entry(40, 50.0, 50.0));
        records.entries.push(entry(41, 51.0, 51.0));
        records.detections.push(det(5, 1, 51.0, 51.0));
        records.edges.extend([
            edge(4, 40, 1, 3),
            edge(4, 41, 1, 3),
            edge(5, 40, 1, 3),
        ]);
        let mut store = MemoryStore::try_from(records).expect("store");
        let mut entry_41 = store.entry(EntryId(41)).expect("get").expect("entry");
        entry_41.ra.value = f64::MAX;
        entry_41.decl.value = -f64::MAX;
        store.insert_entry(entry_41).expect("insert");

        let report = pipeline()
            .process_image(&mut store, ImageId(1))
            .expect("process");

        assert_eq!(report.clusters, 3);
        assert_eq!(report.skipped_clusters, 1);
        assert_eq!(report.resolved, 2);
        assert_eq!(store.ambiguous_edges(ImageId(1)).expect("edges").len(), 3);
    }

    #[test]
    fn refused_group_is_deferred() {
        let mut store = MemoryStore::try_from(CatalogRecords {
            detections: vec![det(1, 1, 0.0, 0.0), det(2, 1, 0.1, 0.0)],
            entries: vec![entry(10, 0.05, 0.0), entry(20, 0.06, 0.0)],
            edges: vec![
                edge(1, 10, 1, 1),
                edge(1, 20, 1, 1),
                edge(2, 10, 1, 1),
                edge(2, 20, 1, 1),
            ],
        })
        .expect("store");

        let report = pipeline()
            .process_image(&mut store, ImageId(1))
            .expect("process");

        assert_eq!(report.refused, 1);
        assert_eq!(report.refusals.len(), 1);
        assert_eq!(report.commit.deferred_components, 1);
        assert_eq!(store.ambiguous_edges(ImageId(1)).expect("edges").len(), 4);
    }

    #[test]
    fn pairing_outside_the_edges_is_refused() {
        // Tag 1 is the chain d1-e1, d1-e2, d2-e2 with d2 sitting on e1; tag 2 a single edge.
        let mut store = MemoryStore::try_from(CatalogRecords {
            detections: vec![
                det(1, 1, 0.0, 0.0),
                det(2, 1, 5.0, 5.0),
                det(3, 1, 20.0, 20.0),
            ],
            entries: vec![
                entry(1, 5.001, 5.0),
                entry(2, 0.001, 0.0),
                entry(3, 20.0, 20.001),
            ],
            edges: vec![
                edge(1, 1, 1, 1),
                edge(1, 2, 1, 1),
                edge(2, 2, 1, 1),
                edge(3, 3, 1, 2),
            ],
        })
        .expect("store");

        let report = pipeline()
            .process_image(&mut store, ImageId(1))
            .expect("process");

        assert_eq!(report.skipped_clusters, 0);
        assert_eq!(report.resolved, 1);
        assert_eq!(report.trivial, 1);
        assert_eq!(
            report.refusals,
            vec![Refusal::NotLinked {
                detection: DetectionId(2),
                entry: EntryId(1),
            }]
        );
        assert_eq!(report.pairs, vec![(DetectionId(3), EntryId(3))]);
        assert_eq!(store.ambiguous_edges(ImageId(1)).expect("edges").len(), 3);
        assert_eq!(
            store.stats().expect("stats").edges_of(EdgeKind::Resolved),
            1
        );
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn parallel_run_matches_sequential() {
        let mut records = CatalogRecords::from(&store());
        // Tag 3: a crowded group that is refused.
        records.detections.push(det(4, 1, 40.0, 0.0));
        records.detections.push(det(5, 1, 40.1, 0.0));
        records.entries.push(entry(40, 40.05, 0.0));
        records.entries.push(entry(41, 40.06, 0.0));
        for (d, e) in [(4, 40), (4, 41), (5, 40), (5, 41)] {
            records.edges.push(edge(d, e, 1, 3));
        }
        let seed = MemoryStore::try_from(records).expect("store");

        let sequential = pipeline().with_parallel(false);
        let parallel = pipeline().with_parallel(true);
        let mut seq_store = seed.clone();
        let mut par_store = seed;

        let seq_report = sequential
            .process_image(&mut seq_store, ImageId(1))
            .expect("sequential");
        let par_report = parallel
            .process_image(&mut par_store, ImageId(1))
            .expect("parallel");

        assert_eq!(seq_report.clusters, 3);
        assert_eq!(seq_report.refused, 1);
        assert_eq!(seq_report, par_report);
        assert_eq!(
            CatalogRecords::from(&seq_store),
            CatalogRecords::from(&par_store)
        );
    }

    #[test]
    fn images_run_in_ascending_order() {
        let mut records = CatalogRecords::from(&store());
        records.detections.push(det(7, 0, 30.0, 30.0));
        records.entries.push(entry(70, 30.0, 30.0));
        records.edges.push(edge(7, 70, 0, 9));
        let mut store = MemoryStore::try_from(records).expect("store");

        let outcomes = pipeline().process_images(&mut store, &[ImageId(1), ImageId(0), ImageId(1)]);

        let order: Vec<_> = outcomes.iter().map(|(image, _)| *image).collect();
        assert_eq!(order, vec![ImageId(0), ImageId(1)]);
        assert!(outcomes.iter().all(|(_, outcome)| outcome.is_ok()));
    }
}
