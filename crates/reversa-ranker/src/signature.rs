//! Signature preparation.
//!
//! Cleans a raw disease differential-expression table into a
//! [`DiseaseSignature`] over the reference gene universe, then thresholds
//! it into an up/down [`GeneSet`].

use std::collections::HashMap;

use reversa_common::config::{CombineRule, SignatureConfig};
use reversa_common::entities::RawSignatureTable;
use reversa_common::{Result, ReversaError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::reference::ReferenceStore;

/// Maps signature gene identifiers onto the reference identifier space.
/// Lookups are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct GeneIdMapper {
    lookup: HashMap<String, String>,
}

impl GeneIdMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, from: &str, to: &str) {
        self.lookup.insert(from.trim().to_uppercase(), to.trim().to_string());
    }

    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut mapper = Self::new();
        for (from, to) in pairs {
            mapper.insert(from, to);
        }
        mapper
    }

    pub fn map(&self, id: &str) -> Option<&str> {
        self.lookup.get(&id.trim().to_uppercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }
}

/// One cleaned signature gene.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignatureGene {
    /// Canonical reference identifier
    pub gene_id: String,
    /// Position in the reference universe
    pub gene_index: usize,
    pub fold_change: f64,
    pub p_value: Option<f64>,
}

/// Up/down gene sets as indices into the reference universe.
/// Both sides are sorted, disjoint and non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneSet {
    up: Vec<usize>,
    down: Vec<usize>,
}

impl GeneSet {
    pub fn new(mut up: Vec<usize>, mut down: Vec<usize>) -> Result<Self> {
        up.sort_unstable();
        up.dedup();
        down.sort_unstable();
        down.dedup();
        if up.is_empty() {
            return Err(ReversaError::data("gene set has no up-regulated genes"));
        }
        if down.is_empty() {
            return Err(ReversaError::data("gene set has no down-regulated genes"));
        }
        if let Some(g) = up.iter().find(|g| down.binary_search(g).is_ok()) {
            return Err(ReversaError::data(format!("gene index {g} is in both up and down sets")));
        }
        Ok(Self { up, down })
    }

    pub fn up(&self) -> &[usize] {
        &self.up
    }

    pub fn down(&self) -> &[usize] {
        &self.down
    }

    pub fn n_up(&self) -> usize {
        self.up.len()
    }

    pub fn n_down(&self) -> usize {
        self.down.len()
    }

    /// Total gene count (up + down).
    pub fn len(&self) -> usize {
        self.up.len() + self.down.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Null-ensemble key.
    pub fn size_key(&self) -> (usize, usize) {
        (self.up.len(), self.down.len())
    }
}

/// A cleaned disease signature. Gene ids are unique, fold-changes finite.
#[derive(Debug, Clone)]
pub struct DiseaseSignature {
    genes: Vec<SignatureGene>,
    /// Applied on every threshold, only set when a p-value column was read.
    pval_cutoff: Option<f64>,
}

impl DiseaseSignature {
    pub fn new(genes: Vec<SignatureGene>, pval_cutoff: Option<f64>) -> Self {
        Self { genes, pval_cutoff }
    }

    pub fn genes(&self) -> &[SignatureGene] {
        &self.genes
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    pub fn max_abs_fold_change(&self) -> f64 {
        self.genes.iter().map(|g| g.fold_change.abs()).fold(0.0, f64::max)
    }

    fn passes(&self, gene: &SignatureGene, cutoff: f64) -> bool {
        if gene.fold_change == 0.0 || gene.fold_change.abs() < cutoff {
            return false;
        }
        match self.pval_cutoff {
            Some(max_p) => gene.p_value.is_some_and(|p| p <= max_p),
            None => true,
        }
    }

    /// (n_up, n_down) surviving `cutoff`.
    pub fn count_at(&self, cutoff: f64) -> (usize, usize) {
        self.genes
            .iter()
            .filter(|g| self.passes(g, cutoff))
            .fold((0, 0), |(up, down), g| {
                if g.fold_change > 0.0 { (up + 1, down) } else { (up, down + 1) }
            })
    }

    /// Threshold into a gene set. Fails with a data error when either side is empty.
    pub fn gene_set(&self, cutoff: f64) -> Result<GeneSet> {
        let (up, down): (Vec<&SignatureGene>, Vec<&SignatureGene>) = self
            .genes
            .iter()
            .filter(|g| self.passes(g, cutoff))
            .partition(|g| g.fold_change > 0.0);

        if up.is_empty() {
            return Err(ReversaError::data(format!("no up-regulated genes survive cutoff {cutoff}")));
        }
        if down.is_empty() {
            return Err(ReversaError::data(format!("no down-regulated genes survive cutoff {cutoff}")));
        }

        debug!("Cutoff {}: {} up, {} down", cutoff, up.len(), down.len());
        GeneSet::new(
            up.iter().map(|g| g.gene_index).collect(),
            down.iter().map(|g| g.gene_index).collect(),
        )
    }
}

/// Cleans raw signature tables against one reference universe.
pub struct SignaturePreparer<'a> {
    config: &'a SignatureConfig,
    store: &'a ReferenceStore,
    mapper: Option<&'a GeneIdMapper>,
}

impl<'a> SignaturePreparer<'a> {
    pub fn new(config: &'a SignatureConfig, store: &'a ReferenceStore) -> Self {
        Self { config, store, mapper: None }
    }

    pub fn with_mapper(mut self, mapper: &'a GeneIdMapper) -> Self {
        self.mapper = Some(mapper);
        self
    }

    /// Map, combine and deduplicate the table's genes.
    pub fn prepare(&self, table: &RawSignatureTable) -> Result<DiseaseSignature> {
        let gene_col = table.column_index(&self.config.gene_key).ok_or_else(|| {
            ReversaError::config(format!(
                "gene identifier column '{}' not found in signature table",
                self.config.gene_key
            ))
        })?;

        let fc_cols = table.columns_with_prefix(&self.config.logfc_prefix);
        if fc_cols.is_empty() {
            return Err(ReversaError::config(format!(
                "no fold-change columns with prefix '{}' in signature table",
                self.config.logfc_prefix
            )));
        }

        let pval_col = match &self.config.pval_key {
            Some(key) => Some(table.column_index(key).ok_or_else(|| {
                ReversaError::config(format!("p-value column '{key}' not found in signature table"))
            })?),
            None => None,
        };
        let pval_cutoff = match (pval_col, self.config.pval_cutoff) {
            (Some(_), cutoff) => cutoff,
            (None, Some(_)) => {
                warn!("pval_cutoff is set without pval_key; ignoring it");
                None
            }
            (None, None) => None,
        };

        // canonical id -> (accumulated fold-changes, min p-value)
        let mut order: Vec<String> = Vec::new();
        let mut merged: HashMap<String, (Vec<f64>, Option<f64>)> = HashMap::new();
        let mut unmapped = 0usize;
        let mut missing_values = 0usize;

        for row in &table.rows {
            let raw_id = row[gene_col].trim();
            let Some(canonical) = self.canonical_id(raw_id) else {
                unmapped += 1;
                continue;
            };

            let values: Vec<Option<f64>> = fc_cols.iter().map(|&c| parse_cell(&row[c])).collect();
            let Some(fc) = combine(&values, self.config.combine_log2fc) else {
                missing_values += 1;
                continue;
            };
            let p = pval_col.and_then(|c| parse_cell(&row[c]));

            let entry = merged.entry(canonical.to_string()).or_insert_with(|| {
                order.push(canonical.to_string());
                (Vec::new(), None)
            });
            entry.0.push(fc);
            entry.1 = match (entry.1, p) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }

        let duplicates = merged.values().filter(|(fcs, _)| fcs.len() > 1).count();
        let genes: Vec<SignatureGene> = order
            .into_iter()
            .filter_map(|id| {
                let (fcs, p_value) = merged.remove(&id)?;
                let fold_change = fcs.iter().sum::<f64>() / fcs.len() as f64;
                let gene_index = self.store.gene_index(&id)?;
                Some(SignatureGene { gene_id: id, gene_index, fold_change, p_value })
            })
            .collect();

        info!(
            "Signature cleaned: {} of {} rows kept ({} unmapped, {} without fold-change, {} collapsed duplicates)",
            genes.len(),
            table.len(),
            unmapped,
            missing_values,
            duplicates
        );

        Ok(DiseaseSignature::new(genes, pval_cutoff))
    }

    fn canonical_id<'s>(&'s self, raw_id: &'s str) -> Option<&'s str> {
        if raw_id.is_empty() {
            return None;
        }
        let id = match self.mapper {
            Some(mapper) => mapper.map(raw_id)?,
            None => raw_id,
        };
        self.store.gene_index(id).map(|_| id)
    }
}

fn parse_cell(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("na") || cell.eq_ignore_ascii_case("nan") {
        return None;
    }
    cell.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Reduce one row's fold-change columns. `None` when no usable value remains.
fn combine(values: &[Option<f64>], rule: CombineRule) -> Option<f64> {
    match rule {
        CombineRule::First => values.first().copied().flatten(),
        CombineRule::Average => {
            let present: Vec<f64> = values.iter().flatten().copied().collect();
            if present.is_empty() {
                None
            } else {
                Some(present.iter().sum::<f64>() / present.len() as f64)
            }
        }
        CombineRule::Median => {
            let mut present: Vec<f64> = values.iter().flatten().copied().collect();
            median(&mut present)
        }
    }
}

pub(crate) fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(genes: &[&str]) -> ReferenceStore {
        let ids: Vec<String> = genes.iter().map(|s| s.to_string()).collect();
        let column: Vec<f64> = (0..ids.len()).map(|i| i as f64).collect();
        ReferenceStore::from_expression(ids, vec!["exp".into()], vec![column]).unwrap()
    }

    fn table(headers: &[&str], rows: &[&[&str]]) -> RawSignatureTable {
        let mut t = RawSignatureTable::new(headers.iter().map(|s| s.to_string()).collect());
        for row in rows {
            t.push_row(row.iter().copied());
        }
        t
    }

    #[test]
    fn test_combine_rules() {
        let values = [Some(1.0), None, Some(4.0), Some(2.0)];
        assert_eq!(combine(&values, CombineRule::First), Some(1.0));
        assert!((combine(&values, CombineRule::Average).unwrap() - 7.0 / 3.0).abs() < 1e-12);
        assert_eq!(combine(&values, CombineRule::Median), Some(2.0));
        assert_eq!(combine(&[None, Some(3.0)], CombineRule::First), None);
        assert_eq!(combine(&[Some(1.0), Some(3.0)], CombineRule::Median), Some(2.0));
    }

    #[test]
    fn test_parse_cell() {
        assert_eq!(parse_cell(" 1.5 "), Some(1.5));
        assert_eq!(parse_cell("NA"), None);
        assert_eq!(parse_cell("inf"), None);
        assert_eq!(parse_cell("abc"), None);
    }

    #[test]
    fn test_missing_columns_are_config_errors() {
        let reference = store(&["A", "B"]);
        let config = SignatureConfig::default();
        let preparer = SignaturePreparer::new(&config, &reference);

        let no_gene = table(&["symbol", "log2FC"], &[&["A", "1.0"]]);
        assert!(matches!(preparer.prepare(&no_gene), Err(ReversaError::Config(_))));

        let no_fc = table(&["gene", "logFC"], &[&["A", "1.0"]]);
        assert!(matches!(preparer.prepare(&no_fc), Err(ReversaError::Config(_))));

        let config = SignatureConfig { pval_key: Some("padj".into()), ..Default::default() };
        let preparer = SignaturePreparer::new(&config, &reference);
        let no_p = table(&["gene", "log2FC"], &[&["A", "1.0"]]);
        assert!(matches!(preparer.prepare(&no_p), Err(ReversaError::Config(_))));
    }

    #[test]
    fn test_prepare_maps_and_collapses_duplicates() {
        let reference = store(&["7157", "3845", "1956", "4609"]);
        let mapper = GeneIdMapper::from_pairs([
            ("TP53", "7157"),
            ("KRAS", "3845"),
            ("K-RAS", "3845"),
            ("EGFR", "1956"),
        ]);
        let config = SignatureConfig::default();
        let preparer = SignaturePreparer::new(&config, &reference).with_mapper(&mapper);

        let t = table(
            &["gene", "log2FC_1", "log2FC_2"],
            &[
                &["tp53", "2.0", "4.0"],
                &["KRAS", "-1.0", "-3.0"],
                &["K-RAS", "-3.0", "NA"],
                &["EGFR", "NA", "NA"],
                &["NOTAGENE", "5.0", "5.0"],
            ],
        );
        let sig = preparer.prepare(&t).unwrap();
        assert_eq!(sig.len(), 2);
        assert_eq!(sig.genes()[0].gene_id, "7157");
        assert_eq!(sig.genes()[0].fold_change, 3.0);
        assert_eq!(sig.genes()[1].gene_id, "3845");
        assert_eq!(sig.genes()[1].fold_change, -2.5);
        assert_eq!(sig.genes()[1].gene_index, 1);
    }

    #[test]
    fn test_gene_set_thresholds_and_pvalues() {
        let reference = store(&["A", "B", "C", "D", "E"]);
        let config = SignatureConfig {
            pval_key: Some("padj".into()),
            pval_cutoff: Some(0.05),
            ..Default::default()
        };
        let preparer = SignaturePreparer::new(&config, &reference);
        let t = table(
            &["gene", "log2FC", "padj"],
            &[
                &["A", "2.0", "0.01"],
                &["B", "0.5", "0.01"],
                &["C", "-1.5", "0.01"],
                &["D", "-3.0", "0.20"],
                &["E", "0.0", "0.01"],
            ],
        );
        let sig = preparer.prepare(&t).unwrap();
        assert_eq!(sig.count_at(0.0), (2, 1));
        assert_eq!(sig.count_at(1.0), (1, 1));

        let set = sig.gene_set(1.0).unwrap();
        assert_eq!(set.up(), &[0]);
        assert_eq!(set.down(), &[2]);
        assert_eq!(set.size_key(), (1, 1));
    }

    #[test]
    fn test_zero_down_genes_is_data_error() {
        let reference = store(&["A", "B", "C"]);
        let config = SignatureConfig::default();
        let preparer = SignaturePreparer::new(&config, &reference);
        let t = table(&["gene", "log2FC"], &[&["A", "2.0"], &["B", "1.5"], &["C", "-0.2"]]);
        let sig = preparer.prepare(&t).unwrap();

        let err = sig.gene_set(1.0).unwrap_err();
        assert!(err.is_data_error());
        assert_eq!(err.to_string(), "Data error: no down-regulated genes survive cutoff 1");
    }

    #[test]
    fn test_gene_set_rejects_overlap() {
        assert!(GeneSet::new(vec![1, 2], vec![2, 3]).is_err());
        assert!(GeneSet::new(vec![], vec![3]).is_err());
        let set = GeneSet::new(vec![5, 1, 5], vec![3]).unwrap();
        assert_eq!(set.up(), &[1, 5]);
        assert_eq!(set.len(), 3);
    }
}
