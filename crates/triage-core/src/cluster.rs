//! Duplicate detection by similarity-graph connectivity.
//!
//! # Algorithm
//!
//! 1. Bulk-fetch a repo's embeddings and drop zero vectors (failed
//!    embeddings). Their count is reported, never an error.
//! 2. Build a graph with an edge between two items iff their cosine
//!    similarity is `>= threshold`:
//!    - below `ann_cutoff` live items, every pair is compared
//!      (rayon-parallel over rows);
//!    - at or above it, each item asks the store for its `ann_neighbors`
//!      approximate nearest neighbours above the threshold and every
//!      candidate is re-checked with exact cosine similarity. A true
//!      duplicate pair that falls outside the top-K approximate
//!      neighbours of both members is missed; that is the price of
//!      avoiding O(n²) at this scale.
//! 3. Connected components via iterative BFS. Singletons are dropped.
//! 4. Per component: best pick by recency + description length, mean
//!    pairwise similarity over all pairs, theme = best pick's title.
//! 5. Sort by size descending and number clusters from 1.

use std::collections::{BTreeSet, HashMap, VecDeque};

use anyhow::Result;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::{Cluster, ClusterMember, Item, ItemKey};
use crate::similarity::{cosine_similarity, is_zero_vector};
use crate::store::VectorStore;

/// Clustering parameters, read from the `[dedupe]` config section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Live item count at which graph building switches to ANN search.
    #[serde(default = "default_ann_cutoff")]
    pub ann_cutoff: usize,
    #[serde(default = "default_ann_neighbors")]
    pub ann_neighbors: usize,
    #[serde(default = "default_half_life_days")]
    pub half_life_days: f64,
    /// Body length (chars) at which description credit saturates.
    #[serde(default = "default_description_cap")]
    pub description_cap: usize,
    /// Log skipped zero vectors at warn level (otherwise debug).
    #[serde(default = "default_report_zero_vectors")]
    pub report_zero_vectors: bool,
}

fn default_threshold() -> f32 {
    0.85
}
fn default_ann_cutoff() -> usize {
    5000
}
fn default_ann_neighbors() -> usize {
    50
}
fn default_half_life_days() -> f64 {
    30.0
}
fn default_description_cap() -> usize {
    500
}
fn default_report_zero_vectors() -> bool {
    true
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            ann_cutoff: default_ann_cutoff(),
            ann_neighbors: default_ann_neighbors(),
            half_life_days: default_half_life_days(),
            description_cap: default_description_cap(),
            report_zero_vectors: default_report_zero_vectors(),
        }
    }
}

/// How the similarity graph was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStrategy {
    Exhaustive,
    Approximate,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterReport {
    pub clusters: Vec<Cluster>,
    /// Items left out because their embedding is a zero vector.
    pub skipped_zero: usize,
    /// Items that took part in graph building.
    pub considered: usize,
    pub strategy: EdgeStrategy,
}

/// A node of the similarity graph.
pub struct Node<'a> {
    pub item: &'a Item,
    pub vector: &'a [f32],
}

/// Exponential decay with the given half-life, from `updated_at` to `now`.
/// Future timestamps count as age zero.
pub fn recency(updated_at: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    let age_days = (now - updated_at).num_seconds().max(0) as f64 / 86_400.0;
    0.5f64.powf(age_days / half_life_days)
}

/// Representative-selection score: half recency, half description length
/// (capped at `description_cap` chars).
pub fn pick_score(item: &Item, now: DateTime<Utc>, config: &ClusterConfig) -> f64 {
    let cap = config.description_cap.max(1);
    let length = item.body.chars().count().min(cap) as f64 / cap as f64;
    0.5 * recency(item.updated_at, now, config.half_life_days) + 0.5 * length
}

/// Find duplicate clusters among the stored items of `repo`.
///
/// Store read failures propagate; an empty repo yields an empty report.
pub async fn find_duplicates(
    store: &dyn VectorStore,
    repo: &str,
    config: &ClusterConfig,
    now: DateTime<Utc>,
) -> Result<ClusterReport> {
    let embeddings = store.get_all_embeddings(repo).await?;
    let items: HashMap<ItemKey, Item> = store
        .get_all_for_repo(repo)
        .await?
        .into_iter()
        .map(|i| (i.key.clone(), i))
        .collect();

    let mut skipped_zero = 0;
    let mut live: Vec<(&Item, &[f32])> = Vec::with_capacity(embeddings.len());
    for (key, vector) in &embeddings {
        if is_zero_vector(vector) {
            skipped_zero += 1;
            continue;
        }
        if let Some(item) = items.get(key) {
            live.push((item, vector.as_slice()));
        }
    }
    live.sort_by(|a, b| a.0.key.cmp(&b.0.key));

    if skipped_zero > 0 {
        if config.report_zero_vectors {
            log::warn!(
                "{}: skipped {} item(s) with zero-vector embeddings (failed embeddings)",
                repo,
                skipped_zero
            );
        } else {
            log::debug!("{}: skipped {} zero-vector item(s)", repo, skipped_zero);
        }
    }

    let nodes: Vec<Node<'_>> = live
        .iter()
        .map(|&(item, vector)| Node { item, vector })
        .collect();

    let (adjacency, strategy) = if nodes.len() < config.ann_cutoff {
        (exhaustive_edges(&nodes, config.threshold), EdgeStrategy::Exhaustive)
    } else {
        log::info!(
            "{}: {} items, using approximate neighbour search (k = {})",
            repo,
            nodes.len(),
            config.ann_neighbors
        );
        (
            approximate_edges(store, repo, &nodes, config).await?,
            EdgeStrategy::Approximate,
        )
    };

    let clusters = assemble_clusters(&nodes, &adjacency, config, now);
    Ok(ClusterReport {
        clusters,
        skipped_zero,
        considered: nodes.len(),
        strategy,
    })
}

/// All-pairs edge build. Rows are independent, so they run in parallel.
pub fn exhaustive_edges(nodes: &[Node<'_>], threshold: f32) -> Vec<BTreeSet<usize>> {
    let pairs: Vec<(usize, usize)> = (0..nodes.len())
        .into_par_iter()
        .flat_map_iter(|i| {
            ((i + 1)..nodes.len())
                .filter(move |&j| cosine_similarity(nodes[i].vector, nodes[j].vector) >= threshold)
                .map(move |j| (i, j))
        })
        .collect();

    let mut adjacency = vec![BTreeSet::new(); nodes.len()];
    for (i, j) in pairs {
        adjacency[i].insert(j);
        adjacency[j].insert(i);
    }
    adjacency
}

async fn approximate_edges(
    store: &dyn VectorStore,
    repo: &str,
    nodes: &[Node<'_>],
    config: &ClusterConfig,
) -> Result<Vec<BTreeSet<usize>>> {
    let position: HashMap<&ItemKey, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (&n.item.key, i))
        .collect();

    let mut adjacency = vec![BTreeSet::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        // +1 because the item itself is usually its own nearest neighbour.
        let candidates = store
            .search(repo, node.vector, config.ann_neighbors + 1, config.threshold)
            .await?;
        for (key, _approx) in candidates {
            let Some(&j) = position.get(&key) else {
                continue;
            };
            if j == i {
                continue;
            }
            if cosine_similarity(node.vector, nodes[j].vector) >= config.threshold {
                adjacency[i].insert(j);
                adjacency[j].insert(i);
            }
        }
    }
    Ok(adjacency)
}

/// Connected components by iterative BFS, in discovery order. Each
/// component lists its nodes in BFS order.
pub fn connected_components(adjacency: &[BTreeSet<usize>]) -> Vec<Vec<usize>> {
    let mut seen = vec![false; adjacency.len()];
    let mut components = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..adjacency.len() {
        if seen[start] {
            continue;
        }
        seen[start] = true;
        queue.push_back(start);
        let mut component = Vec::new();
        while let Some(node) = queue.pop_front() {
            component.push(node);
            for &next in &adjacency[node] {
                if !seen[next] {
                    seen[next] = true;
                    queue.push_back(next);
                }
            }
        }
        components.push(component);
    }
    components
}

/// Mean exact cosine similarity over all C(n, 2) member pairs.
pub fn average_pairwise_similarity(vectors: &[&[f32]]) -> f32 {
    let n = vectors.len();
    if n < 2 {
        return 0.0;
    }
    let mut total = 0.0f64;
    for i in 0..n {
        for j in (i + 1)..n {
            total += cosine_similarity(vectors[i], vectors[j]) as f64;
        }
    }
    let pairs = (n * (n - 1) / 2) as f64;
    (total / pairs) as f32
}

/// Turn a similarity graph into sorted, numbered clusters.
pub fn assemble_clusters(
    nodes: &[Node<'_>],
    adjacency: &[BTreeSet<usize>],
    config: &ClusterConfig,
    now: DateTime<Utc>,
) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = connected_components(adjacency)
        .into_iter()
        .filter(|c| c.len() >= 2)
        .map(|component| {
            let members: Vec<ClusterMember> = component
                .iter()
                .map(|&idx| {
                    let item = nodes[idx].item;
                    ClusterMember {
                        key: item.key.clone(),
                        title: item.title.clone(),
                        author: item.author.clone(),
                        pick_score: pick_score(item, now, config),
                    }
                })
                .collect();

            // Strict `>` keeps the earliest member on ties.
            let mut best = 0;
            for (i, m) in members.iter().enumerate().skip(1) {
                if m.pick_score > members[best].pick_score {
                    best = i;
                }
            }

            let vectors: Vec<&[f32]> = component.iter().map(|&idx| nodes[idx].vector).collect();
            Cluster {
                id: 0,
                best_pick: members[best].key.clone(),
                theme: members[best].title.clone(),
                avg_similarity: average_pairwise_similarity(&vectors),
                members,
            }
        })
        .collect();

    clusters.sort_by(|a, b| b.members.len().cmp(&a.members.len()));
    for (i, cluster) in clusters.iter_mut().enumerate() {
        cluster.id = i + 1;
    }
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use chrono::Duration;
    use std::collections::HashSet;

    const REPO: &str = "acme/widgets";

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn item(number: u64, title: &str, body: &str, age_days: i64) -> Item {
        Item::new(
            ItemKey::pr(REPO, number),
            title,
            body,
            "alice",
            now() - Duration::days(age_days),
        )
    }

    async fn store_with(entries: Vec<(Item, Vec<f32>)>) -> InMemoryStore {
        let store = InMemoryStore::new();
        for (item, v) in entries {
            store.upsert(&item, &v).await.unwrap();
        }
        store
    }

    fn assert_cluster_invariants(report: &ClusterReport) {
        let mut seen = HashSet::new();
        for (i, c) in report.clusters.iter().enumerate() {
            assert_eq!(c.id, i + 1);
            assert!(c.len() >= 2);
            for m in &c.members {
                assert!(seen.insert(m.key.clone()), "{} in two clusters", m.key);
            }
            let best = c.members.iter().find(|m| m.key == c.best_pick).unwrap();
            assert!(c.members.iter().all(|m| m.pick_score <= best.pick_score));
            assert_eq!(c.theme, best.title);
        }
        for pair in report.clusters.windows(2) {
            assert!(pair[0].len() >= pair[1].len());
        }
    }

    #[test]
    fn recency_halves_every_half_life() {
        let n = now();
        assert!((recency(n, n, 30.0) - 1.0).abs() < 1e-9);
        assert!((recency(n - Duration::days(30), n, 30.0) - 0.5).abs() < 1e-9);
        assert!((recency(n - Duration::days(60), n, 30.0) - 0.25).abs() < 1e-9);
        assert!((recency(n + Duration::days(5), n, 30.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn components_via_bfs() {
        let mut adjacency = vec![BTreeSet::new(); 5];
        for (a, b) in [(0, 2), (2, 4), (1, 3)] {
            adjacency[a].insert(b);
            adjacency[b].insert(a);
        }
        assert_eq!(
            connected_components(&adjacency),
            vec![vec![0, 2, 4], vec![1, 3]]
        );
    }

    #[test]
    fn long_chain_does_not_recurse() {
        let n = 50_000;
        let mut adjacency = vec![BTreeSet::new(); n];
        for i in 0..n - 1 {
            adjacency[i].insert(i + 1);
            adjacency[i + 1].insert(i);
        }
        let components = connected_components(&adjacency);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].len(), n);
    }

    #[tokio::test]
    async fn empty_repo_yields_no_clusters() {
        let store = InMemoryStore::new();
        let report = find_duplicates(&store, REPO, &ClusterConfig::default(), now())
            .await
            .unwrap();
        assert!(report.clusters.is_empty());
        assert_eq!(report.skipped_zero, 0);
    }

    #[tokio::test]
    async fn identical_vectors_pick_longest_body() {
        let v = vec![0.2, 0.4, 0.9];
        let store = store_with(vec![
            (item(1, "short", &"a".repeat(20), 0), v.clone()),
            (item(2, "medium", &"b".repeat(200), 0), v.clone()),
            (item(3, "long", &"c".repeat(450), 0), v.clone()),
        ])
        .await;

        let report = find_duplicates(&store, REPO, &ClusterConfig::default(), now())
            .await
            .unwrap();
        assert_cluster_invariants(&report);
        assert_eq!(report.clusters.len(), 1);
        let c = &report.clusters[0];
        assert_eq!(c.len(), 3);
        assert!((c.avg_similarity - 1.0).abs() < 1e-5);
        assert_eq!(c.best_pick, ItemKey::pr(REPO, 3));
        assert_eq!(c.theme, "long");
    }

    #[tokio::test]
    async fn orthogonal_groups_sorted_by_size() {
        let x = vec![1.0, 0.0, 0.0];
        let y = vec![0.0, 1.0, 0.0];
        let store = store_with(vec![
            (item(1, "y1", "body", 1), y.clone()),
            (item(2, "x1", "body", 1), x.clone()),
            (item(3, "y2", "body", 1), y.clone()),
            (item(4, "x2", "body", 1), x.clone()),
            (item(5, "x3", "body", 1), x.clone()),
        ])
        .await;

        let report = find_duplicates(&store, REPO, &ClusterConfig::default(), now())
            .await
            .unwrap();
        assert_cluster_invariants(&report);
        assert_eq!(report.clusters.len(), 2);
        assert_eq!(report.clusters[0].id, 1);
        assert_eq!(report.clusters[0].len(), 3);
        assert_eq!(report.clusters[1].id, 2);
        assert_eq!(report.clusters[1].len(), 2);
        let big: Vec<u64> = report.clusters[0].members.iter().map(|m| m.key.number).collect();
        assert_eq!(big, vec![2, 4, 5]);
    }

    #[tokio::test]
    async fn zero_vectors_are_never_clustered() {
        let v = vec![1.0, 1.0];
        let store = store_with(vec![
            (item(1, "a", "body", 0), v.clone()),
            (item(2, "b", "body", 0), v.clone()),
            (item(3, "failed", "body", 0), vec![0.0, 0.0]),
            (item(4, "failed too", "body", 0), vec![0.0, 0.0]),
        ])
        .await;

        let report = find_duplicates(&store, REPO, &ClusterConfig::default(), now())
            .await
            .unwrap();
        assert_eq!(report.skipped_zero, 2);
        assert_eq!(report.considered, 2);
        assert_eq!(report.clusters.len(), 1);
        assert!(report.clusters[0]
            .members
            .iter()
            .all(|m| m.key.number == 1 || m.key.number == 2));
    }

    #[tokio::test]
    async fn best_pick_ties_keep_first_member() {
        let v = vec![0.5, 0.5];
        let store = store_with(vec![
            (item(7, "first", "same body", 3), v.clone()),
            (item(8, "second", "same body", 3), v.clone()),
        ])
        .await;
        let report = find_duplicates(&store, REPO, &ClusterConfig::default(), now())
            .await
            .unwrap();
        assert_eq!(report.clusters[0].best_pick, ItemKey::pr(REPO, 7));
    }

    #[tokio::test]
    async fn recency_breaks_equal_descriptions() {
        let v = vec![0.5, 0.5];
        let store = store_with(vec![
            (item(1, "old", "same body", 120), v.clone()),
            (item(2, "fresh", "same body", 0), v.clone()),
        ])
        .await;
        let report = find_duplicates(&store, REPO, &ClusterConfig::default(), now())
            .await
            .unwrap();
        assert_eq!(report.clusters[0].best_pick, ItemKey::pr(REPO, 2));
    }

    #[tokio::test]
    async fn below_threshold_pairs_stay_apart() {
        let store = store_with(vec![
            (item(1, "a", "body", 0), vec![1.0, 0.0, 0.0]),
            (item(2, "b", "body", 0), vec![1.0, 1.0, 1.0]),
        ])
        .await;
        let report = find_duplicates(&store, REPO, &ClusterConfig::default(), now())
            .await
            .unwrap();
        assert!(report.clusters.is_empty());
    }

    #[tokio::test]
    async fn approximate_path_matches_exhaustive_on_small_data() {
        let groups = [
            vec![1.0, 0.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0, 0.0],
            vec![0.0, 0.0, 1.0, 0.0],
        ];
        let mut entries = Vec::new();
        let mut number = 1;
        for (g, base) in groups.iter().enumerate() {
            for k in 0..(g + 2) {
                let mut v = base.clone();
                v[3] = 0.01 * k as f32;
                entries.push((item(number, &format!("g{g}"), "body", 0), v));
                number += 1;
            }
        }
        let store = store_with(entries).await;

        let exhaustive = find_duplicates(&store, REPO, &ClusterConfig::default(), now())
            .await
            .unwrap();
        let approximate_config = ClusterConfig {
            ann_cutoff: 1,
            ..ClusterConfig::default()
        };
        let approximate = find_duplicates(&store, REPO, &approximate_config, now())
            .await
            .unwrap();

        assert_eq!(exhaustive.strategy, EdgeStrategy::Exhaustive);
        assert_eq!(approximate.strategy, EdgeStrategy::Approximate);
        assert_cluster_invariants(&approximate);
        let sizes = |r: &ClusterReport| r.clusters.iter().map(|c| c.len()).collect::<Vec<_>>();
        assert_eq!(sizes(&exhaustive), vec![4, 3, 2]);
        assert_eq!(sizes(&approximate), sizes(&exhaustive));
    }

    #[test]
    fn average_similarity_uses_all_pairs() {
        let a = [1.0f32, 0.0];
        let b = [1.0f32, 0.0];
        let c = [0.0f32, 1.0];
        let avg = average_pairwise_similarity(&[&a, &b, &c]);
        // pairs: (a,b)=1, (a,c)=0, (b,c)=0
        assert!((avg - 1.0 / 3.0).abs() < 1e-6);
    }
}
