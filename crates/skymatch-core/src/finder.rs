//! # Group Finder
//!
//! Recovers the exact connected components of the bipartite
//! detection ↔ catalog-entry graph hiding inside one coarse cluster tag.
//!
//! The coarse tag may over-merge: two groups of edges that never share a
//! detection or an entry can carry the same tag by coincidence. Components
//! are found by breadth-first search over explicit adjacency indices
//! (detection → incident edges, entry → incident edges), built once per
//! cluster, so a full partition costs O(E log E).
//!
//! The partition itself does not depend on edge order; only the order in
//! which components are emitted does (each component is seeded by the first
//! edge not yet assigned).

use crate::{AssociationEdge, ClusterTag, Component, DetectionId, EntryId, SkymatchError};
use std::collections::{BTreeMap, VecDeque};

/// A vertex of the bipartite association graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Vertex {
    Detection(DetectionId),
    Entry(EntryId),
}

/// Incident-edge indices for both sides of the bipartite graph.
///
/// Index values are positions in the edge slice the index was built from.
struct AdjacencyIndex {
    by_detection: BTreeMap<DetectionId, Vec<usize>>,
    by_entry: BTreeMap<EntryId, Vec<usize>>,
}

impl AdjacencyIndex {
    fn build(edges: &[AssociationEdge]) -> Self {
        let mut by_detection: BTreeMap<DetectionId, Vec<usize>> = BTreeMap::new();
        let mut by_entry: BTreeMap<EntryId, Vec<usize>> = BTreeMap::new();
        for (idx, edge) in edges.iter().enumerate() {
            by_detection.entry(edge.detection).or_default().push(idx);
            by_entry.entry(edge.entry).or_default().push(idx);
        }
        Self {
            by_detection,
            by_entry,
        }
    }

    fn incident(&self, vertex: Vertex) -> &[usize] {
        let found = match vertex {
            Vertex::Detection(id) => self.by_detection.get(&id),
            Vertex::Entry(id) => self.by_entry.get(&id),
        };
        found.map(Vec::as_slice).unwrap_or(&[])
    }

    /// Mark every edge reachable from `seed` in `assigned`, returning the
    /// newly marked indices in ascending order.
    fn collect_component(
        &self,
        edges: &[AssociationEdge],
        seed: usize,
        assigned: &mut [bool],
    ) -> Vec<usize> {
        let mut members = Vec::new();
        let mut queue = VecDeque::new();

        assigned[seed] = true;
        members.push(seed);
        queue.push_back(Vertex::Detection(edges[seed].detection));
        queue.push_back(Vertex::Entry(edges[seed].entry));

        while let Some(vertex) = queue.pop_front() {
            for &idx in self.incident(vertex) {
                if assigned[idx] {
                    continue;
                }
                assigned[idx] = true;
                members.push(idx);

                // Step to the opposite side of the edge.
                let edge = &edges[idx];
                let next = match vertex {
                    Vertex::Detection(_) => Vertex::Entry(edge.entry),
                    Vertex::Entry(_) => Vertex::Detection(edge.detection),
                };
                queue.push_back(next);
            }
        }

        members.sort_unstable();
        members
    }
}

/// Splits one cluster's edges into connected components.
///
/// Stateless: all methods are associated functions over edge slices.
pub struct GroupFinder;

impl GroupFinder {
    /// Extract the component containing the first edge.
    ///
    /// Returns `(component, remaining_edges)`; both keep the input order.
    /// Calling this repeatedly on the remainder until it is empty yields the
    /// full partition.
    ///
    /// # Errors
    /// Returns `SkymatchError::EmptyCluster` if `edges` is empty.
    pub fn extract_component(
        edges: &[AssociationEdge],
    ) -> Result<(Component, Vec<AssociationEdge>), SkymatchError> {
        let first = edges.first().ok_or(SkymatchError::EmptyCluster)?;
        let cluster = first.cluster;

        let index = AdjacencyIndex::build(edges);
        let mut assigned = vec![false; edges.len()];
        let members = index.collect_component(edges, 0, &mut assigned);

        let component_edges = members.iter().map(|&i| edges[i].clone()).collect();
        let remaining = edges
            .iter()
            .zip(&assigned)
            .filter(|(_, taken)| !**taken)
            .map(|(edge, _)| edge.clone())
            .collect();

        Ok((Component::new(cluster, component_edges), remaining))
    }

    /// Partition one cluster's edges into all of its components.
    ///
    /// Produces the same components, in the same order, as calling
    /// [`GroupFinder::extract_component`] until the input is exhausted, but
    /// builds the adjacency index only once.
    ///
    /// # Errors
    /// - `SkymatchError::EmptyCluster` if `edges` is empty
    /// - `SkymatchError::MixedClusterTags` if the edges do not share one tag
    pub fn partition(edges: &[AssociationEdge]) -> Result<Vec<Component>, SkymatchError> {
        let cluster = Self::check_single_tag(edges)?;

        let index = AdjacencyIndex::build(edges);
        let mut assigned = vec![false; edges.len()];
        let mut components = Vec::new();

        for seed in 0..edges.len() {
            if assigned[seed] {
                continue;
            }
            let members = index.collect_component(edges, seed, &mut assigned);
            let component_edges = members.iter().map(|&i| edges[i].clone()).collect();
            components.push(Component::new(cluster, component_edges));
        }

        Ok(components)
    }

    /// Verify that every edge carries the same cluster tag and return it.
    ///
    /// # Errors
    /// - `SkymatchError::EmptyCluster` if `edges` is empty
    /// - `SkymatchError::MixedClusterTags` on the first mismatching edge
    pub fn check_single_tag(
        edges: &[AssociationEdge],
    ) -> Result<Option<ClusterTag>, SkymatchError> {
        let expected = edges.first().ok_or(SkymatchError::EmptyCluster)?.cluster;
        match edges.iter().find(|e| e.cluster != expected) {
            Some(edge) => Err(SkymatchError::MixedClusterTags {
                expected,
                found: edge.cluster,
            }),
            None => Ok(expected),
        }
    }

    /// Verify that no detection or entry is linked under two different tags.
    ///
    /// Group discovery only decomposes within one tag, so a vertex shared by
    /// two tags would split one true component across two resolutions.
    ///
    /// # Errors
    /// Returns `SkymatchError::CrossClusterOverlap` naming the first shared vertex.
    pub fn check_disjoint_tags(edges: &[AssociationEdge]) -> Result<(), SkymatchError> {
        let mut detection_tags: BTreeMap<DetectionId, Option<ClusterTag>> = BTreeMap::new();
        let mut entry_tags: BTreeMap<EntryId, Option<ClusterTag>> = BTreeMap::new();

        for edge in edges {
            let seen = *detection_tags.entry(edge.detection).or_insert(edge.cluster);
            if seen != edge.cluster {
                return Err(SkymatchError::CrossClusterOverlap {
                    member: edge.detection.to_string(),
                    first: seen,
                    second: edge.cluster,
                });
            }
            let seen = *entry_tags.entry(edge.entry).or_insert(edge.cluster);
            if seen != edge.cluster {
                return Err(SkymatchError::CrossClusterOverlap {
                    member: edge.entry.to_string(),
                    first: seen,
                    second: edge.cluster,
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ImageId;

    fn edge(det: u64, entry: u64) -> AssociationEdge {
        AssociationEdge::ambiguous(DetectionId(det), EntryId(entry), ImageId(1), ClusterTag(1))
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(
            GroupFinder::extract_component(&[]),
            Err(SkymatchError::EmptyCluster)
        ));
        assert!(matches!(
            GroupFinder::partition(&[]),
            Err(SkymatchError::EmptyCluster)
        ));
    }

    #[test]
    fn single_edge_is_its_own_component() {
        let edges = vec![edge(1, 10)];
        let (component, rest) = GroupFinder::extract_component(&edges).expect("extract");
        assert_eq!(component.edges, edges);
        assert!(component.is_trivial());
        assert!(rest.is_empty());
    }

    #[test]
    fn chain_is_followed_transitively() {
        // d1-s1-d2-s2-d3 is one component even though d1 and d3 share nothing.
        let edges = vec![edge(1, 10), edge(3, 11), edge(2, 10), edge(2, 11), edge(4, 12)];
        let (component, rest) = GroupFinder::extract_component(&edges).expect("extract");

        assert_eq!(component.len(), 4);
        assert_eq!(
            component.detections(),
            vec![DetectionId(1), DetectionId(2), DetectionId(3)]
        );
        assert_eq!(rest, vec![edge(4, 12)]);
    }

    #[test]
    fn component_keeps_input_order() {
        let edges = vec![edge(2, 11), edge(9, 99), edge(1, 11), edge(1, 10)];
        let (component, _) = GroupFinder::extract_component(&edges).expect("extract");
        assert_eq!(component.edges, vec![edge(2, 11), edge(1, 11), edge(1, 10)]);
    }

    #[test]
    fn partition_matches_repeated_extraction() {
        let edges = vec![
            edge(5, 50),
            edge(1, 10),
            edge(2, 20),
            edge(1, 20),
            edge(3, 30),
            edge(5, 51),
        ];

        let mut repeated = Vec::new();
        let mut rest = edges.clone();
        while !rest.is_empty() {
            let (component, remaining) = GroupFinder::extract_component(&rest).expect("extract");
            repeated.push(component);
            rest = remaining;
        }

        let partitioned = GroupFinder::partition(&edges).expect("partition");
        assert_eq!(partitioned, repeated);
        assert_eq!(partitioned.len(), 3);
    }

    #[test]
    fn partition_rejects_mixed_tags() {
        let mut other = edge(2, 20);
        other.cluster = Some(ClusterTag(2));
        let result = GroupFinder::partition(&[edge(1, 10), other]);
        assert!(matches!(
            result,
            Err(SkymatchError::MixedClusterTags { .. })
        ));
    }

    #[test]
    fn disjoint_tags_accepts_separate_clusters() {
        let mut other = edge(2, 20);
        other.cluster = Some(ClusterTag(2));
        assert!(GroupFinder::check_disjoint_tags(&[edge(1, 10), other]).is_ok());
    }

    #[test]
    fn disjoint_tags_flags_shared_entry() {
        let mut other = edge(2, 10);
        other.cluster = Some(ClusterTag(2));
        let result = GroupFinder::check_disjoint_tags(&[edge(1, 10), other]);
        assert!(matches!(
            result,
            Err(SkymatchError::CrossClusterOverlap { .. })
        ));
    }
}
