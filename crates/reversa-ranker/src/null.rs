//! Empirical null distribution of connectivity scores.
//!
//! Each draw picks one reference experiment uniformly at random and scores
//! a random disjoint up/down gene set of the requested sizes against it.
//! Draws are produced in fixed-size chunks, each chunk seeded from
//! (run seed, chunk index), so the ensemble does not depend on how many
//! worker threads generate it.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use reversa_common::{Result, ReversaError};
use tracing::{debug, info};

use crate::reference::ReferenceStore;
use crate::scorer::score_indices;

/// Draws per independently seeded chunk.
pub const DRAW_CHUNK: usize = 1024;

/// Null scores for one (n_up, n_down) pair.
#[derive(Debug, Clone)]
pub struct NullEnsemble {
    n_up: usize,
    n_down: usize,
    seed: u64,
    /// Scores in draw order
    scores: Vec<f64>,
    /// Same scores, ascending
    sorted: Vec<f64>,
}

impl NullEnsemble {
    pub fn from_scores(n_up: usize, n_down: usize, seed: u64, scores: Vec<f64>) -> Self {
        let mut sorted = scores.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        Self { n_up, n_down, seed, scores, sorted }
    }

    pub fn size_key(&self) -> (usize, usize) {
        (self.n_up, self.n_down)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Number of null scores ≤ `s`.
    pub fn count_at_or_below(&self, s: f64) -> usize {
        self.sorted.partition_point(|&x| x <= s)
    }

    /// Number of null scores ≥ `s`.
    pub fn count_at_or_above(&self, s: f64) -> usize {
        self.sorted.len() - self.sorted.partition_point(|&x| x < s)
    }
}

/// Generates null ensembles against one reference store.
pub struct NullGenerator<'a> {
    store: &'a ReferenceStore,
    permutations: usize,
    seed: u64,
}

impl<'a> NullGenerator<'a> {
    pub fn new(store: &'a ReferenceStore, permutations: usize, seed: u64) -> Self {
        Self { store, permutations, seed }
    }

    pub fn permutations(&self) -> usize {
        self.permutations
    }

    pub fn generate(&self, n_up: usize, n_down: usize) -> Result<NullEnsemble> {
        let n_genes = self.store.n_genes();
        if n_up == 0 || n_down == 0 {
            return Err(ReversaError::data(format!(
                "null ensemble needs non-empty up and down sets, got ({n_up}, {n_down})"
            )));
        }
        if n_up + n_down > n_genes {
            return Err(ReversaError::data(format!(
                "cannot draw {} disjoint genes from a {}-gene universe",
                n_up + n_down,
                n_genes
            )));
        }

        info!(
            "Generating null ensemble: {} permutations, sizes ({}, {}), seed {}",
            self.permutations, n_up, n_down, self.seed
        );

        let n_chunks = self.permutations.div_ceil(DRAW_CHUNK);
        let chunks: Vec<Vec<f64>> = (0..n_chunks)
            .into_par_iter()
            .map(|chunk| {
                let start = chunk * DRAW_CHUNK;
                let draws = DRAW_CHUNK.min(self.permutations - start);
                self.draw_chunk(chunk as u64, draws, n_up, n_down)
            })
            .collect();
        let scores = chunks.concat();

        debug!("Null ensemble ({}, {}) holds {} scores", n_up, n_down, scores.len());
        Ok(NullEnsemble::from_scores(n_up, n_down, self.seed, scores))
    }

    fn draw_chunk(&self, chunk: u64, draws: usize, n_up: usize, n_down: usize) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(chunk_seed(self.seed, chunk));
        let n_genes = self.store.n_genes();
        let n_experiments = self.store.n_experiments();
        let mut scratch = Vec::with_capacity(n_up.max(n_down));

        (0..draws)
            .map(|_| {
                let experiment = rng.gen_range(0..n_experiments);
                let picked = rand::seq::index::sample(&mut rng, n_genes, n_up + n_down).into_vec();
                let (up, down) = picked.split_at(n_up);
                score_indices(up, down, self.store.profile(experiment), &mut scratch).score
            })
            .collect()
    }
}

/// SplitMix64 finaliser over (seed, chunk).
fn chunk_seed(seed: u64, chunk: u64) -> u64 {
    let mut z = seed ^ chunk.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Ensembles of one run, keyed by (n_up, n_down).
#[derive(Debug, Default)]
pub struct NullCache {
    ensembles: HashMap<(usize, usize), Arc<NullEnsemble>>,
    hits: usize,
}

impl NullCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: (usize, usize)) -> Option<Arc<NullEnsemble>> {
        self.ensembles.get(&key).cloned()
    }

    pub fn get_or_generate(
        &mut self,
        generator: &NullGenerator<'_>,
        n_up: usize,
        n_down: usize,
    ) -> Result<Arc<NullEnsemble>> {
        if let Some(ensemble) = self.ensembles.get(&(n_up, n_down)) {
            self.hits += 1;
            debug!("Null cache hit for ({}, {})", n_up, n_down);
            return Ok(Arc::clone(ensemble));
        }
        let ensemble = Arc::new(generator.generate(n_up, n_down)?);
        self.ensembles.insert((n_up, n_down), Arc::clone(&ensemble));
        Ok(ensemble)
    }

    pub fn len(&self) -> usize {
        self.ensembles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ensembles.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;

    fn random_store(n_genes: usize, n_experiments: usize, seed: u64) -> ReferenceStore {
        let mut rng = StdRng::seed_from_u64(seed);
        let genes = (0..n_genes).map(|i| format!("G{i}")).collect();
        let experiments = (0..n_experiments).map(|i| format!("exp{i}")).collect();
        let columns = (0..n_experiments)
            .map(|_| {
                let mut ranks: Vec<u32> = (1..=n_genes as u32).collect();
                ranks.shuffle(&mut rng);
                ranks
            })
            .collect();
        ReferenceStore::from_ranks(genes, experiments, columns).unwrap()
    }

    #[test]
    fn test_same_seed_is_bit_identical() {
        let store = random_store(300, 8, 1);
        let generator = NullGenerator::new(&store, 3000, 123);
        assert_eq!(generator.permutations(), 3000);
        let a = generator.generate(10, 12).unwrap();
        let b = NullGenerator::new(&store, 3000, 123).generate(10, 12).unwrap();
        assert_eq!(a.len(), 3000);
        assert_eq!((a.seed(), a.size_key()), (123, (10, 12)));
        let bits_a: Vec<u64> = a.scores().iter().map(|s| s.to_bits()).collect();
        let bits_b: Vec<u64> = b.scores().iter().map(|s| s.to_bits()).collect();
        assert_eq!(bits_a, bits_b);
    }

    #[test]
    fn test_different_seed_differs() {
        let store = random_store(300, 8, 1);
        let a = NullGenerator::new(&store, 500, 1).generate(10, 10).unwrap();
        let b = NullGenerator::new(&store, 500, 2).generate(10, 10).unwrap();
        assert_ne!(a.scores(), b.scores());
    }

    #[test]
    fn test_thread_count_does_not_change_ensemble() {
        let store = random_store(200, 5, 3);
        let generator = NullGenerator::new(&store, 2 * DRAW_CHUNK + 17, 42);
        let single = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .unwrap()
            .install(|| generator.generate(5, 7).unwrap());
        let many = rayon::ThreadPoolBuilder::new()
            .num_threads(4)
            .build()
            .unwrap()
            .install(|| generator.generate(5, 7).unwrap());
        assert_eq!(single.scores(), many.scores());
    }

    #[test]
    fn test_null_scores_in_range() {
        let store = random_store(100, 4, 9);
        let ensemble = NullGenerator::new(&store, 1000, 5).generate(4, 6).unwrap();
        assert!(ensemble.scores().iter().all(|s| (-2.0..=2.0).contains(s)));
    }

    #[test]
    fn test_rejects_impossible_sizes() {
        let store = random_store(10, 2, 0);
        let generator = NullGenerator::new(&store, 10, 0);
        assert!(generator.generate(6, 5).unwrap_err().is_data_error());
        assert!(generator.generate(0, 5).is_err());
    }

    #[test]
    fn test_tail_counts() {
        let ensemble = NullEnsemble::from_scores(1, 1, 0, vec![0.5, -1.0, 0.0, -0.5, 1.0]);
        assert_eq!(ensemble.count_at_or_below(-0.5), 2);
        assert_eq!(ensemble.count_at_or_below(-1.5), 0);
        assert_eq!(ensemble.count_at_or_above(0.5), 2);
        assert_eq!(ensemble.count_at_or_above(1.0), 1);
        assert_eq!(ensemble.count_at_or_above(1.5), 0);
    }

    #[test]
    fn test_cache_reuses_pairs() {
        let store = random_store(100, 3, 4);
        let generator = NullGenerator::new(&store, 100, 7);
        let mut cache = NullCache::new();
        let first = cache.get_or_generate(&generator, 5, 5).unwrap();
        let again = cache.get_or_generate(&generator, 5, 5).unwrap();
        let other = cache.get_or_generate(&generator, 5, 6).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.hits(), 1);
    }
}
