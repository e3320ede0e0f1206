//! HNSW approximate nearest neighbour index over cosine similarity.
//!
//! Vectors are normalised to unit length on insert, so cosine similarity
//! is a plain dot product and the distance is `1 - dot`. Level assignment
//! uses a seeded RNG, so the same insertion order always builds the same
//! graph.
//!
//! Results are candidates only. The clustering engine recomputes exact
//! cosine similarity on every pair it admits.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::ItemKey;
use crate::similarity::{is_zero_vector, normalize};

const LEVEL_SEED: u64 = 0x7269_6167_6521;

/// HNSW tuning parameters.
#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Links per node on layers above 0.
    pub m: usize,
    /// Links per node on layer 0.
    pub m_max0: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub max_layers: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            m_max0: 32,
            ef_construction: 100,
            ef_search: 64,
            max_layers: 8,
        }
    }
}

/// Min-heap entry by distance (BinaryHeap is a max-heap, so we invert).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Nearest {
    distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for Nearest {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .cmp(&self.distance)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Nearest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Max-heap entry by distance, for pruning the worst result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Furthest {
    distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for Furthest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Furthest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// In-memory HNSW graph. Vectors live contiguously in one arena.
#[derive(Debug)]
pub struct HnswIndex {
    config: HnswConfig,
    dims: usize,
    vectors: Vec<f32>,
    /// `[node][layer] -> neighbour ids`
    neighbors: Vec<Vec<Vec<u32>>>,
    entry_point: Option<u32>,
    max_layer: usize,
    rng: StdRng,
}

impl HnswIndex {
    pub fn new(dims: usize, config: HnswConfig) -> Self {
        Self {
            config,
            dims,
            vectors: Vec::new(),
            neighbors: Vec::new(),
            entry_point: None,
            max_layer: 0,
            rng: StdRng::seed_from_u64(LEVEL_SEED),
        }
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    fn vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dims;
        &self.vectors[start..start + self.dims]
    }

    fn distance(&self, query: &[f32], id: u32) -> f32 {
        let dot: f32 = query.iter().zip(self.vector(id)).map(|(a, b)| a * b).sum();
        1.0 - dot
    }

    fn random_level(&mut self) -> usize {
        let ml = 1.0 / (self.config.m as f64).ln();
        let r: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let level = (-r.ln() * ml).floor() as usize;
        level.min(self.config.max_layers - 1)
    }

    /// Insert a vector and return its internal id. Zero vectors and
    /// vectors of the wrong width are rejected with `None`.
    pub fn insert(&mut self, vector: &[f32]) -> Option<u32> {
        if vector.len() != self.dims {
            return None;
        }
        let unit = normalize(vector)?;
        let id = self.neighbors.len() as u32;
        let level = self.random_level();

        let Some(entry_point) = self.entry_point else {
            self.vectors.extend_from_slice(&unit);
            self.neighbors.push(vec![Vec::new(); level + 1]);
            self.entry_point = Some(id);
            self.max_layer = level;
            return Some(id);
        };

        // Greedy descent through the layers above the new node's level.
        let mut current = entry_point;
        for layer in (level + 1..=self.max_layer).rev() {
            if let Some(nearest) = self.search_layer(&unit, &[current], 1, layer).first() {
                current = nearest.1;
            }
        }

        let top = level.min(self.max_layer);
        let mut chosen: Vec<Vec<u32>> = vec![Vec::new(); level + 1];
        let mut entry_points = vec![current];
        for layer in (0..=top).rev() {
            let candidates =
                self.search_layer(&unit, &entry_points, self.config.ef_construction, layer);
            let selected = self.select_neighbors(&candidates, self.layer_capacity(layer));
            chosen[layer] = selected.iter().map(|&(_, nid)| nid).collect();
            entry_points = candidates.iter().map(|&(_, nid)| nid).collect();
            if entry_points.is_empty() {
                entry_points.push(entry_point);
            }
        }

        self.vectors.extend_from_slice(&unit);
        self.neighbors.push(chosen);

        // Bidirectional links, pruning neighbours that overflow.
        for layer in 0..=top {
            let capacity = self.layer_capacity(layer);
            let mine = self.neighbors[id as usize][layer].clone();
            for nid in mine {
                let links = &mut self.neighbors[nid as usize];
                while links.len() <= layer {
                    links.push(Vec::new());
                }
                links[layer].push(id);
                if links[layer].len() > capacity {
                    let base = self.vector(nid).to_vec();
                    let candidates: Vec<(f32, u32)> = self.neighbors[nid as usize][layer]
                        .iter()
                        .map(|&cid| (self.distance(&base, cid), cid))
                        .collect();
                    let pruned = self.select_neighbors(&candidates, capacity);
                    self.neighbors[nid as usize][layer] =
                        pruned.iter().map(|&(_, cid)| cid).collect();
                }
            }
        }

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(id);
        }
        Some(id)
    }

    fn layer_capacity(&self, layer: usize) -> usize {
        if layer == 0 {
            self.config.m_max0
        } else {
            self.config.m
        }
    }

    /// Greedy best-first search of one layer. Returns up to `ef`
    /// `(distance, id)` pairs, closest first.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[u32],
        ef: usize,
        layer: usize,
    ) -> Vec<(f32, u32)> {
        let mut visited: HashSet<u32> = HashSet::with_capacity(ef * 4);
        let mut candidates: BinaryHeap<Nearest> = BinaryHeap::new();
        let mut results: BinaryHeap<Furthest> = BinaryHeap::new();

        for &ep in entry_points {
            if visited.insert(ep) {
                let d = OrderedFloat(self.distance(query, ep));
                candidates.push(Nearest { distance: d, id: ep });
                results.push(Furthest { distance: d, id: ep });
                if results.len() > ef {
                    results.pop();
                }
            }
        }

        while let Some(Nearest { distance, id }) = candidates.pop() {
            let worst = results.peek().map_or(f32::MAX, |r| r.distance.0);
            if results.len() >= ef && distance.0 > worst {
                break;
            }
            let Some(links) = self.neighbors[id as usize].get(layer) else {
                continue;
            };
            for &nid in links {
                if !visited.insert(nid) {
                    continue;
                }
                let d = self.distance(query, nid);
                let worst = results.peek().map_or(f32::MAX, |r| r.distance.0);
                if results.len() < ef || d < worst {
                    candidates.push(Nearest {
                        distance: OrderedFloat(d),
                        id: nid,
                    });
                    results.push(Furthest {
                        distance: OrderedFloat(d),
                        id: nid,
                    });
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        results
            .into_sorted_vec()
            .into_iter()
            .map(|r| (r.distance.0, r.id))
            .collect()
    }

    /// Heuristic neighbour selection (HNSW algorithm 4): keep a candidate
    /// only if it is closer to the base than to every already-kept one,
    /// then top up with the closest leftovers.
    fn select_neighbors(&self, candidates: &[(f32, u32)], m: usize) -> Vec<(f32, u32)> {
        let mut sorted = candidates.to_vec();
        sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m);
        for &(dist_to_base, cid) in &sorted {
            if selected.len() >= m {
                break;
            }
            let candidate = self.vector(cid);
            let diverse = selected
                .iter()
                .all(|&(_, sid)| dist_to_base <= self.distance(candidate, sid));
            if diverse {
                selected.push((dist_to_base, cid));
            }
        }

        if selected.len() < m {
            let taken: HashSet<u32> = selected.iter().map(|&(_, id)| id).collect();
            for &(dist, cid) in &sorted {
                if selected.len() >= m {
                    break;
                }
                if !taken.contains(&cid) {
                    selected.push((dist, cid));
                }
            }
        }
        selected
    }

    /// K nearest neighbours of `query` as `(cosine similarity, id)`,
    /// most similar first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(f32, u32)> {
        let (Some(entry_point), Some(unit)) = (self.entry_point, normalize(query)) else {
            return Vec::new();
        };
        if unit.len() != self.dims || k == 0 {
            return Vec::new();
        }

        let mut current = entry_point;
        for layer in (1..=self.max_layer).rev() {
            if let Some(nearest) = self.search_layer(&unit, &[current], 1, layer).first() {
                current = nearest.1;
            }
        }

        let ef = self.config.ef_search.max(k);
        let mut results = self.search_layer(&unit, &[current], ef, 0);
        results.truncate(k);
        results
            .into_iter()
            .map(|(d, id)| ((1.0 - d).clamp(-1.0, 1.0), id))
            .collect()
    }
}

/// An [`HnswIndex`] over one repository's embeddings, mapping internal ids
/// back to item keys.
#[derive(Debug)]
pub struct KeyedIndex {
    keys: Vec<ItemKey>,
    index: HnswIndex,
}

impl KeyedIndex {
    /// Build from a bulk embedding fetch. Zero vectors and vectors whose
    /// width differs from the first non-zero one are left out. Keys are
    /// inserted in sorted order so the graph is reproducible.
    pub fn build(embeddings: &HashMap<ItemKey, Vec<f32>>) -> Self {
        let mut entries: Vec<(&ItemKey, &Vec<f32>)> = embeddings
            .iter()
            .filter(|(_, v)| !is_zero_vector(v))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let dims = entries.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut index = HnswIndex::new(dims, HnswConfig::default());
        let mut keys = Vec::with_capacity(entries.len());
        for (key, vector) in entries {
            if index.insert(vector).is_some() {
                keys.push(key.clone());
            }
        }
        Self { keys, index }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Up to `limit` neighbours with similarity `>= floor`, best first.
    pub fn search(&self, query: &[f32], limit: usize, floor: f32) -> Vec<(ItemKey, f32)> {
        self.index
            .search(query, limit)
            .into_iter()
            .filter(|&(sim, _)| sim >= floor)
            .map(|(sim, id)| (self.keys[id as usize].clone(), sim))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::cosine_similarity;

    fn pseudo_random_vectors(n: usize, dims: usize) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(7);
        (0..n)
            .map(|_| (0..dims).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
            .collect()
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = HnswIndex::new(3, HnswConfig::default());
        assert!(index.search(&[1.0, 0.0, 0.0], 5).is_empty());
    }

    #[test]
    fn rejects_zero_and_wrong_width() {
        let mut index = HnswIndex::new(3, HnswConfig::default());
        assert_eq!(index.insert(&[0.0, 0.0, 0.0]), None);
        assert_eq!(index.insert(&[1.0, 0.0]), None);
        assert_eq!(index.insert(&[1.0, 0.0, 0.0]), Some(0));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn finds_exact_match_first() {
        let vectors = pseudo_random_vectors(300, 16);
        let mut index = HnswIndex::new(16, HnswConfig::default());
        for v in &vectors {
            index.insert(v).unwrap();
        }
        for probe in [0usize, 17, 150, 299] {
            let results = index.search(&vectors[probe], 5);
            assert_eq!(results[0].1 as usize, probe);
            assert!((results[0].0 - 1.0).abs() < 1e-4);
            for pair in results.windows(2) {
                assert!(pair[0].0 >= pair[1].0);
            }
        }
    }

    #[test]
    fn recall_against_brute_force() {
        let vectors = pseudo_random_vectors(500, 12);
        let mut index = HnswIndex::new(12, HnswConfig::default());
        for v in &vectors {
            index.insert(v).unwrap();
        }
        let k = 10;
        let mut hits = 0;
        let probes = 20;
        for q in vectors.iter().take(probes) {
            let mut exact: Vec<(f32, usize)> = vectors
                .iter()
                .enumerate()
                .map(|(i, v)| (cosine_similarity(q, v), i))
                .collect();
            exact.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
            let truth: HashSet<usize> = exact.iter().take(k).map(|&(_, i)| i).collect();
            hits += index
                .search(q, k)
                .iter()
                .filter(|&&(_, id)| truth.contains(&(id as usize)))
                .count();
        }
        let recall = hits as f64 / (k * probes) as f64;
        assert!(recall > 0.9, "recall too low: {recall}");
    }

    #[test]
    fn keyed_index_skips_zero_vectors_and_applies_floor() {
        let mut map = HashMap::new();
        map.insert(ItemKey::pr("o/r", 1), vec![1.0, 0.0, 0.0]);
        map.insert(ItemKey::pr("o/r", 2), vec![0.9, 0.1, 0.0]);
        map.insert(ItemKey::pr("o/r", 3), vec![0.0, 1.0, 0.0]);
        map.insert(ItemKey::issue("o/r", 4), vec![0.0, 0.0, 0.0]);
        let index = KeyedIndex::build(&map);
        assert_eq!(index.len(), 3);

        let hits = index.search(&[1.0, 0.0, 0.0], 10, 0.5);
        let keys: Vec<u64> = hits.iter().map(|(k, _)| k.number).collect();
        assert_eq!(keys, vec![1, 2]);
        assert!(hits[0].1 >= hits[1].1);
    }
}
