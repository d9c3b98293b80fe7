//! # Matching Benchmarks
//!
//! Performance benchmarks for group discovery and resolution.
//!
//! Run with: `cargo bench -p skymatch-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use skymatch_core::{
    AssociationEdge, Band, CatalogEntry, CatalogRecords, CatalogStore, ClusterTag, Detection,
    DetectionId, EntryId, GroupFinder, GroupResolver, ImageId, MatchConfig, Measurement,
    MemoryStore, MetricKind, Pipeline,
};
use std::hint::black_box;

fn detection(id: u64, ra: f64) -> Detection {
    Detection {
        id: DetectionId(id),
        image: ImageId(1),
        band: Band::default(),
        ra: Measurement::new(ra, 0.1),
        decl: Measurement::new(0.0, 0.1),
        flux: Measurement::new(1.0, 0.1),
    }
}

/// `n` disjoint 2x2 groups under one tag: 4n edges.
fn blocky_cluster(n: u64) -> Vec<AssociationEdge> {
    let mut edges = Vec::new();
    for block in 0..n {
        for d in 0..2 {
            for e in 0..2 {
                edges.push(AssociationEdge::ambiguous(
                    DetectionId(block * 2 + d),
                    EntryId(block * 2 + e),
                    ImageId(1),
                    ClusterTag(1),
                ));
            }
        }
    }
    edges
}

/// A fully connected `n` x `n` group with every entry near its detection.
fn dense_group(n: u64) -> (Vec<Detection>, Vec<CatalogEntry>) {
    let detections: Vec<_> = (0..n).map(|i| detection(i, i as f64)).collect();
    let entries = (0..n)
        .map(|i| CatalogEntry::from_detection(EntryId(i), &detection(i, i as f64 + 0.001)))
        .collect();
    (detections, entries)
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_partition(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition");

    for size in [100u64, 1000, 10000].iter() {
        let edges = blocky_cluster(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &edges, |b, edges| {
            b.iter(|| black_box(GroupFinder::partition(edges)));
        });
    }

    group.finish();
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");

    for size in [2u64, 8, 32, 128].iter() {
        let (dets, ents) = dense_group(*size);
        for metric in [MetricKind::Positional, MetricKind::PositionalFlux] {
            let resolver =
                GroupResolver::new(metric, metric.default_isolation_threshold()).expect("resolver");
            group.bench_with_input(
                BenchmarkId::new(metric.name(), size),
                &(dets.clone(), ents.clone()),
                |b, (dets, ents)| {
                    b.iter(|| black_box(resolver.resolve(dets, ents)));
                },
            );
        }
    }

    group.finish();
}

fn bench_process_image(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_image");
    let pipeline = Pipeline::from_config(&MatchConfig::default()).expect("pipeline");

    for blocks in [10u64, 100, 1000].iter() {
        let mut records = CatalogRecords {
            edges: blocky_cluster(*blocks),
            ..CatalogRecords::default()
        };
        for id in 0..blocks * 2 {
            records.detections.push(detection(id, id as f64 * 10.0));
            records.entries.push(CatalogEntry::from_detection(
                EntryId(id),
                &detection(id, id as f64 * 10.0 + 0.001),
            ));
        }
        let mut seed = MemoryStore::new();
        seed.insert_records(&records).expect("insert");

        group.bench_with_input(BenchmarkId::from_parameter(blocks), &seed, |b, seed| {
            b.iter(|| {
                let mut store = seed.clone();
                black_box(pipeline.process_image(&mut store, ImageId(1)))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_partition, bench_resolve, bench_process_image);
criterion_main!(benches);
