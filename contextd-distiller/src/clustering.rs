//! Cosine-threshold connected-component clustering over memory embeddings
//! (spec §4.7.1).
//!
//! Grounded on the teacher's DBSCAN region-growing shape
//! (`memory-core/src/patterns/dbscan/algorithms.rs`'s `region_query`/
//! `expand_cluster`, a BFS/queue expansion from a seed point) but simplified
//! to plain threshold connectivity: no density/`min_samples` core-point
//! requirement, no noise label — every pair above `threshold` is an edge,
//! and a cluster is the edge-connected component of size ≥ 2.

use contextd_services::MemoryRecord;

/// Default cosine-similarity threshold for candidate edges (spec §4.7.1).
pub const DEFAULT_THRESHOLD: f32 = 0.80;

/// Minimum members for a connected component to become a cluster.
pub const MIN_CLUSTER_SIZE: usize = 2;

/// Raw cosine similarity between two unit-normalised vectors (dot product).
/// Distinct from `contextd_core::cosine_similarity`, which remaps to
/// `[0, 1]` for search scoring — clustering compares against the spec's
/// threshold directly in `[-1, 1]` cosine space.
fn raw_cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// One connected component of near-duplicate memories, members ordered by
/// the cluster's tie-break rule (higher `usage_count`, then newer
/// `created_at`) so that synthesis prompts list the most-trusted member
/// first.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub members: Vec<MemoryRecord>,
}

/// Cluster `memories` by cosine-threshold connectivity.
///
/// Iteration is over memories sorted by id (spec §4.7.1: "deterministic
/// iteration order ... required so that results are reproducible given a
/// frozen corpus"), so cluster discovery order, and therefore the
/// resulting `Vec<Cluster>` order, is stable across runs on the same input.
#[must_use]
pub fn cluster_by_similarity(
    memories: &[(MemoryRecord, Vec<f32>)],
    threshold: f32,
) -> Vec<Cluster> {
    let mut order: Vec<usize> = (0..memories.len()).collect();
    order.sort_by(|&a, &b| memories[a].0.id.cmp(&memories[b].0.id));

    let n = memories.len();
    let mut visited = vec![false; n];
    let mut clusters = Vec::new();

    for &seed in &order {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;

        let mut component = vec![seed];
        let mut queue = vec![seed];
        while let Some(p) = queue.pop() {
            for &q in &order {
                if visited[q] {
                    continue;
                }
                if raw_cosine(&memories[p].1, &memories[q].1) >= threshold {
                    visited[q] = true;
                    component.push(q);
                    queue.push(q);
                }
            }
        }

        if component.len() >= MIN_CLUSTER_SIZE {
            component.sort_by(|&a, &b| {
                memories[b]
                    .0
                    .usage_count
                    .cmp(&memories[a].0.usage_count)
                    .then_with(|| memories[b].0.created_at.cmp(&memories[a].0.created_at))
            });
            let members = component.into_iter().map(|i| memories[i].0.clone()).collect();
            clusters.push(Cluster { members });
        }
    }

    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use contextd_services::{MemoryState, Outcome};

    fn record(id: &str, usage_count: i64) -> MemoryRecord {
        MemoryRecord {
            id: id.to_string(),
            title: format!("title-{id}"),
            content: format!("content-{id}"),
            outcome: Outcome::Success,
            tags: vec![],
            confidence: 0.5,
            usage_count,
            state: MemoryState::Active,
            consolidation_id: None,
            source_ids: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn forms_one_cluster_from_three_near_duplicates() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.95, 0.05, 0.0];
        let c = vec![0.9, 0.1, 0.0];
        let memories = vec![
            (record("m1", 3), a),
            (record("m2", 1), b),
            (record("m3", 2), c),
        ];
        let clusters = cluster_by_similarity(&memories, 0.8);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members.len(), 3);
    }

    #[test]
    fn singletons_below_threshold_form_no_cluster() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        let memories = vec![(record("m1", 1), a), (record("m2", 1), b)];
        assert!(cluster_by_similarity(&memories, 0.8).is_empty());
    }

    #[test]
    fn tie_break_orders_by_usage_count_then_recency() {
        let v = vec![1.0, 0.0];
        let memories = vec![
            (record("m1", 1), v.clone()),
            (record("m2", 5), v.clone()),
            (record("m3", 2), v),
        ];
        let clusters = cluster_by_similarity(&memories, 0.8);
        assert_eq!(clusters.len(), 1);
        let ids: Vec<&str> = clusters[0].members.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3", "m1"]);
    }

    #[test]
    fn deterministic_across_repeated_runs() {
        let a = vec![1.0, 0.0];
        let b = vec![0.99, 0.01];
        let memories = vec![(record("zz", 1), a), (record("aa", 1), b)];
        let first = cluster_by_similarity(&memories, 0.8);
        let second = cluster_by_similarity(&memories, 0.8);
        let first_ids: Vec<&str> = first[0].members.iter().map(|m| m.id.as_str()).collect();
        let second_ids: Vec<&str> = second[0].members.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(first_ids, second_ids);
    }
}
