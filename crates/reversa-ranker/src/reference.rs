//! Reference signature store.
//!
//! Holds one rank profile per compound-exposure experiment over a shared
//! gene universe. Built once and shared as `Arc<ReferenceStore>`; every
//! scoring call only reads it.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use reversa_common::entities::{ExpressionMatrix, MatrixKind};
use reversa_common::{Result, ReversaError};
use tracing::info;

/// Rank order of the gene universe for one experiment.
#[derive(Debug, Clone)]
pub struct ReferenceProfile {
    experiment_id: String,
    /// `ranks[g]` is the 1-based rank of gene `g`; rank 1 = most up-regulated.
    ranks: Vec<u32>,
}

impl ReferenceProfile {
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    #[inline]
    pub fn rank_of(&self, gene: usize) -> u32 {
        self.ranks[gene]
    }

    pub fn ranks(&self) -> &[u32] {
        &self.ranks
    }

    pub fn n_genes(&self) -> usize {
        self.ranks.len()
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceStore {
    genes: Vec<String>,
    gene_index: HashMap<String, usize>,
    profiles: Vec<ReferenceProfile>,
}

impl ReferenceStore {
    /// Build from a loaded matrix, ranking expression columns when needed.
    pub fn from_matrix(matrix: ExpressionMatrix) -> Result<Self> {
        match matrix.kind {
            MatrixKind::Expression => {
                Self::from_expression(matrix.genes, matrix.experiments, matrix.columns)
            }
            MatrixKind::Ranks => {
                let mut columns = Vec::with_capacity(matrix.columns.len());
                for (exp, column) in matrix.experiments.iter().zip(&matrix.columns) {
                    let ranks = column
                        .iter()
                        .map(|&v| {
                            if v.is_finite() && v >= 1.0 && v.fract() == 0.0 && v <= u32::MAX as f64 {
                                Ok(v as u32)
                            } else {
                                Err(ReversaError::data(format!(
                                    "experiment '{exp}' holds a non-integer rank {v}"
                                )))
                            }
                        })
                        .collect::<Result<Vec<u32>>>()?;
                    columns.push(ranks);
                }
                Self::from_ranks(matrix.genes, matrix.experiments, columns)
            }
        }
    }

    /// Build from expression-change columns. Each column is ranked
    /// descending; ties keep gene order and non-finite values rank last.
    pub fn from_expression(
        genes: Vec<String>,
        experiments: Vec<String>,
        columns: Vec<Vec<f64>>,
    ) -> Result<Self> {
        Self::check_shape(&genes, &experiments, columns.iter().map(Vec::len))?;
        let ranked = columns.iter().map(|c| rank_descending(c)).collect();
        Self::assemble(genes, experiments, ranked)
    }

    /// Build from pre-ranked columns; each must be a permutation of 1..=N.
    pub fn from_ranks(
        genes: Vec<String>,
        experiments: Vec<String>,
        columns: Vec<Vec<u32>>,
    ) -> Result<Self> {
        Self::check_shape(&genes, &experiments, columns.iter().map(Vec::len))?;
        let n = genes.len();
        for (exp, column) in experiments.iter().zip(&columns) {
            let mut seen = vec![false; n];
            for &r in column {
                let slot = (r as usize).checked_sub(1).filter(|&i| i < n);
                match slot {
                    Some(i) if !seen[i] => seen[i] = true,
                    _ => {
                        return Err(ReversaError::data(format!(
                            "experiment '{exp}' is not a rank permutation of 1..={n} (offending rank {r})"
                        )))
                    }
                }
            }
        }
        Self::assemble(genes, experiments, columns)
    }

    fn check_shape(
        genes: &[String],
        experiments: &[String],
        column_lengths: impl ExactSizeIterator<Item = usize>,
    ) -> Result<()> {
        if genes.is_empty() {
            return Err(ReversaError::data("reference gene universe is empty"));
        }
        if experiments.is_empty() {
            return Err(ReversaError::data("reference database holds no experiments"));
        }
        if column_lengths.len() != experiments.len() {
            return Err(ReversaError::data(format!(
                "{} experiment ids but {} profile columns",
                experiments.len(),
                column_lengths.len()
            )));
        }
        for (exp, len) in experiments.iter().zip(column_lengths) {
            if len != genes.len() {
                return Err(ReversaError::data(format!(
                    "experiment '{exp}' has {len} values for a {}-gene universe",
                    genes.len()
                )));
            }
        }
        Ok(())
    }

    fn assemble(genes: Vec<String>, experiments: Vec<String>, columns: Vec<Vec<u32>>) -> Result<Self> {
        let mut gene_index = HashMap::with_capacity(genes.len());
        for (i, gene) in genes.iter().enumerate() {
            if gene_index.insert(gene.clone(), i).is_some() {
                return Err(ReversaError::data(format!("duplicate gene '{gene}' in reference universe")));
            }
        }

        let profiles: Vec<ReferenceProfile> = experiments
            .into_iter()
            .zip(columns)
            .map(|(experiment_id, ranks)| ReferenceProfile { experiment_id, ranks })
            .collect();

        info!(
            "Reference store ready: {} genes, {} experiments",
            genes.len(),
            profiles.len()
        );

        Ok(Self { genes, gene_index, profiles })
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn gene_index(&self, gene_id: &str) -> Option<usize> {
        self.gene_index.get(gene_id).copied()
    }

    pub fn genes(&self) -> &[String] {
        &self.genes
    }

    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }

    pub fn n_experiments(&self) -> usize {
        self.profiles.len()
    }

    pub fn profiles(&self) -> &[ReferenceProfile] {
        &self.profiles
    }

    pub fn profile(&self, index: usize) -> &ReferenceProfile {
        &self.profiles[index]
    }
}

/// Rank values descending (largest = 1). Ties keep input order,
/// non-finite values go last.
pub fn rank_descending(values: &[f64]) -> Vec<u32> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        let (x, y) = (values[a], values[b]);
        match (x.is_finite(), y.is_finite()) {
            (true, true) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => Ordering::Equal,
        }
    });

    let mut ranks = vec![0u32; values.len()];
    for (pos, &gene) in order.iter().enumerate() {
        ranks[gene] = pos as u32 + 1;
    }
    ranks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rank_descending_ties_and_nan() {
        let ranks = rank_descending(&[0.5, 2.0, f64::NAN, 0.5, -1.0]);
        assert_eq!(ranks, vec![2, 1, 5, 3, 4]);
    }

    #[test]
    fn test_from_expression_builds_index() {
        let store = ReferenceStore::from_expression(
            ids(&["A", "B", "C"]),
            ids(&["exp1", "exp2"]),
            vec![vec![1.0, 3.0, 2.0], vec![-1.0, 0.0, 1.0]],
        )
        .unwrap();
        assert_eq!(store.n_genes(), 3);
        assert_eq!(store.n_experiments(), 2);
        assert_eq!(store.gene_index("C"), Some(2));
        assert_eq!(store.profile(0).ranks(), &[3, 1, 2]);
        assert_eq!(store.profile(1).rank_of(2), 1);
        assert_eq!(store.profile(1).experiment_id(), "exp2");
    }

    #[test]
    fn test_from_ranks_rejects_non_permutation() {
        let err = ReferenceStore::from_ranks(
            ids(&["A", "B", "C"]),
            ids(&["exp1"]),
            vec![vec![1, 1, 3]],
        )
        .unwrap_err();
        assert!(err.to_string().contains("exp1"));

        assert!(ReferenceStore::from_ranks(ids(&["A", "B"]), ids(&["e"]), vec![vec![0, 1]]).is_err());
        assert!(ReferenceStore::from_ranks(ids(&["A", "B"]), ids(&["e"]), vec![vec![2, 1]]).is_ok());
    }

    #[test]
    fn test_shape_errors() {
        assert!(ReferenceStore::from_ranks(vec![], ids(&["e"]), vec![vec![]]).is_err());
        assert!(ReferenceStore::from_ranks(ids(&["A"]), vec![], vec![]).is_err());
        assert!(ReferenceStore::from_ranks(ids(&["A", "B"]), ids(&["e"]), vec![vec![1]]).is_err());
        assert!(ReferenceStore::from_ranks(ids(&["A", "A"]), ids(&["e"]), vec![vec![1, 2]]).is_err());
    }

    #[test]
    fn test_from_matrix_ranks_kind() {
        let matrix = ExpressionMatrix {
            genes: ids(&["A", "B"]),
            experiments: ids(&["e"]),
            columns: vec![vec![2.0, 1.0]],
            kind: MatrixKind::Ranks,
        };
        let store = ReferenceStore::from_matrix(matrix).unwrap();
        assert_eq!(store.profile(0).ranks(), &[2, 1]);

        let bad = ExpressionMatrix {
            genes: ids(&["A", "B"]),
            experiments: ids(&["e"]),
            columns: vec![vec![1.5, 1.0]],
            kind: MatrixKind::Ranks,
        };
        assert!(ReferenceStore::from_matrix(bad).is_err());
    }
}
