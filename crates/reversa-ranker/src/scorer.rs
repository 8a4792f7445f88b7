//! Connectivity score computation.
//!
//! Signed Kolmogorov–Smirnov style enrichment of the up and down gene sets
//! in one reference rank profile, combined into a score in [-2, 2].
//! Negative = the profile reverses the disease signature.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::reference::{ReferenceProfile, ReferenceStore};
use crate::signature::GeneSet;

/// Per-side statistics and the combined score for one profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityScore {
    pub ks_up: f64,
    pub ks_down: f64,
    pub score: f64,
}

/// Enrichment statistic for ranks sorted ascending, out of `n_genes`.
///
/// a = max_j (j/t − r_j/N), b = max_j (r_j/N − (j−1)/t); returns a if a > b, else −b.
/// `sorted_ranks` must be non-empty.
pub fn ks_statistic(sorted_ranks: &[u32], n_genes: usize) -> f64 {
    debug_assert!(!sorted_ranks.is_empty());
    let t = sorted_ranks.len() as f64;
    let n = n_genes as f64;

    let mut a = f64::NEG_INFINITY;
    let mut b = f64::NEG_INFINITY;
    for (j, &r) in sorted_ranks.iter().enumerate() {
        let j = (j + 1) as f64;
        let r = r as f64 / n;
        a = a.max(j / t - r);
        b = b.max(r - (j - 1.0) / t);
    }

    if a > b { a } else { -b }
}

/// Opposite signs give ks_up − ks_down; same sign gives exactly 0.
pub fn combine_ks(ks_up: f64, ks_down: f64) -> f64 {
    let opposite = (ks_up >= 0.0 && ks_down <= 0.0) || (ks_up <= 0.0 && ks_down >= 0.0);
    if opposite { ks_up - ks_down } else { 0.0 }
}

fn side_statistic(genes: &[usize], profile: &ReferenceProfile, scratch: &mut Vec<u32>) -> f64 {
    scratch.clear();
    scratch.extend(genes.iter().map(|&g| profile.rank_of(g)));
    scratch.sort_unstable();
    ks_statistic(scratch, profile.n_genes())
}

/// Score raw up/down index slices against one profile, reusing `scratch`.
/// Both slices must be non-empty.
pub fn score_indices(
    up: &[usize],
    down: &[usize],
    profile: &ReferenceProfile,
    scratch: &mut Vec<u32>,
) -> ConnectivityScore {
    let ks_up = side_statistic(up, profile, scratch);
    let ks_down = side_statistic(down, profile, scratch);
    ConnectivityScore { ks_up, ks_down, score: combine_ks(ks_up, ks_down) }
}

pub fn score_profile(gene_set: &GeneSet, profile: &ReferenceProfile) -> ConnectivityScore {
    let mut scratch = Vec::with_capacity(gene_set.n_up().max(gene_set.n_down()));
    score_indices(gene_set.up(), gene_set.down(), profile, &mut scratch)
}

/// Score one gene set against every experiment, in store order.
pub fn score_all(gene_set: &GeneSet, store: &ReferenceStore) -> Vec<ConnectivityScore> {
    let capacity = gene_set.n_up().max(gene_set.n_down());
    store
        .profiles()
        .par_iter()
        .map_init(
            || Vec::with_capacity(capacity),
            |scratch, profile| score_indices(gene_set.up(), gene_set.down(), profile, scratch),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    const TOL: f64 = 1e-12;

    /// Store whose single profile ranks gene i at position i + 1.
    fn identity_store(n: usize) -> ReferenceStore {
        let genes = (0..n).map(|i| format!("G{i}")).collect();
        let ranks = (1..=n as u32).collect();
        ReferenceStore::from_ranks(genes, vec!["exp".into()], vec![ranks]).unwrap()
    }

    #[test]
    fn test_ks_top_and_bottom() {
        assert!((ks_statistic(&[1, 2], 10) - 0.8).abs() < TOL);
        assert!((ks_statistic(&[9, 10], 10) + 0.9).abs() < TOL);
        assert!((ks_statistic(&[3, 4], 10) - 0.6).abs() < TOL);
    }

    #[test]
    fn test_mimicking_profile_is_positive() {
        let store = identity_store(10);
        let set = GeneSet::new(vec![0, 1], vec![8, 9]).unwrap();
        let s = score_profile(&set, store.profile(0));
        assert!((s.score - 1.7).abs() < TOL);
    }

    #[test]
    fn test_reversing_profile_is_negative() {
        let store = identity_store(10);
        let set = GeneSet::new(vec![8, 9], vec![0, 1]).unwrap();
        let s = score_profile(&set, store.profile(0));
        assert!((s.score + 1.7).abs() < TOL);
    }

    #[test]
    fn test_same_sign_is_exactly_zero() {
        let store = identity_store(10);
        let set = GeneSet::new(vec![0, 1], vec![2, 3]).unwrap();
        let s = score_profile(&set, store.profile(0));
        assert!(s.ks_up > 0.0 && s.ks_down > 0.0);
        assert_eq!(s.score, 0.0);
    }

    #[test]
    fn test_combine_ks() {
        assert_eq!(combine_ks(0.5, 0.2), 0.0);
        assert_eq!(combine_ks(-0.5, -0.2), 0.0);
        assert!((combine_ks(0.5, -0.2) - 0.7).abs() < TOL);
        assert!((combine_ks(-0.5, 0.2) + 0.7).abs() < TOL);
    }

    #[test]
    fn test_score_always_in_range() {
        let mut rng = StdRng::seed_from_u64(99);
        let n = 200;
        let genes: Vec<String> = (0..n).map(|i| format!("G{i}")).collect();
        let mut columns = Vec::new();
        for _ in 0..20 {
            let mut ranks: Vec<u32> = (1..=n as u32).collect();
            ranks.shuffle(&mut rng);
            columns.push(ranks);
        }
        let experiments = (0..20).map(|i| format!("exp{i}")).collect();
        let store = ReferenceStore::from_ranks(genes, experiments, columns).unwrap();

        for size in [1usize, 3, 17, 60] {
            let mut pool: Vec<usize> = (0..n).collect();
            pool.shuffle(&mut rng);
            let set = GeneSet::new(pool[..size].to_vec(), pool[size..2 * size].to_vec()).unwrap();
            for s in score_all(&set, &store) {
                assert!((-2.0..=2.0).contains(&s.score), "score {} out of range", s.score);
                assert!((-1.0..=1.0).contains(&s.ks_up));
                assert!((-1.0..=1.0).contains(&s.ks_down));
            }
        }
    }

    #[test]
    fn test_score_all_matches_sequential() {
        let store = identity_store(50);
        let set = GeneSet::new(vec![3, 10, 40], vec![0, 25, 49]).unwrap();
        let parallel = score_all(&set, &store);
        assert_eq!(parallel.len(), 1);
        assert_eq!(parallel[0], score_profile(&set, store.profile(0)));
    }
}
