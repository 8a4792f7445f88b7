//! Deterministic synthetic fixtures for Reversa tests.
//!
//! Every generator takes an explicit seed so a failing test reproduces
//! exactly.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use reversa_common::entities::MatrixKind;
use reversa_common::{ExperimentMetadata, ExpressionMatrix, RawSignatureTable};

pub use pretty_assertions;

/// Experiment whose profile opposes the planted signature.
pub const REVERSER: &str = "exp_reverser";
/// Experiment whose profile copies the planted signature.
pub const MIMIC: &str = "exp_mimic";

/// Opt-in log output for a test run. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn gene_name(i: usize) -> String {
    format!("G{i:05}")
}

/// A reference matrix with one planted reverser and one planted mimic.
#[derive(Debug, Clone)]
pub struct SyntheticReference {
    pub matrix: ExpressionMatrix,
    /// Genes the planted signature calls up-regulated
    pub up_genes: Vec<String>,
    pub down_genes: Vec<String>,
}

/// `n_genes × n_experiments` reference. The first two experiments are
/// [`REVERSER`] and [`MIMIC`]; the remainder are uniform noise. The
/// signature genes are a random choice of `2 · n_signature` genes.
pub fn synthetic_reference(
    n_genes: usize,
    n_experiments: usize,
    n_signature: usize,
    seed: u64,
) -> SyntheticReference {
    assert!(n_experiments >= 2, "need room for the reverser and the mimic");
    assert!(2 * n_signature <= n_genes, "signature larger than the gene universe");

    let mut rng = StdRng::seed_from_u64(seed);
    let genes: Vec<String> = (0..n_genes).map(gene_name).collect();

    let mut pool: Vec<usize> = (0..n_genes).collect();
    pool.shuffle(&mut rng);
    let up: Vec<usize> = pool[..n_signature].to_vec();
    let down: Vec<usize> = pool[n_signature..2 * n_signature].to_vec();

    let mut experiments = vec![REVERSER.to_string(), MIMIC.to_string()];
    experiments.extend((2..n_experiments).map(|i| format!("exp_{i:04}")));

    let columns = (0..n_experiments)
        .map(|e| {
            let mut column: Vec<f64> = (0..n_genes).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let direction = match e {
                0 => -1.0,
                1 => 1.0,
                _ => 0.0,
            };
            if direction != 0.0 {
                for &g in &up {
                    column[g] = direction * (3.0 + rng.gen::<f64>());
                }
                for &g in &down {
                    column[g] = -direction * (3.0 + rng.gen::<f64>());
                }
            }
            column
        })
        .collect();

    SyntheticReference {
        matrix: ExpressionMatrix { genes: genes.clone(), experiments, columns, kind: MatrixKind::Expression },
        up_genes: up.iter().map(|&g| genes[g].clone()).collect(),
        down_genes: down.iter().map(|&g| genes[g].clone()).collect(),
    }
}

/// Disease signature table with columns `gene, log2FC_1, log2FC_2, padj`.
///
/// Signature genes get |fold-change| in [1.5, 3.0) with padj < 0.01; each
/// name in `background` gets |fold-change| < 0.5 and padj in [0.2, 1).
pub fn signature_table(up: &[String], down: &[String], background: &[String], seed: u64) -> RawSignatureTable {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut table = RawSignatureTable::new(
        ["gene", "log2FC_1", "log2FC_2", "padj"].iter().map(|s| s.to_string()).collect(),
    );

    for gene in up {
        let fc = rng.gen_range(1.5..3.0);
        let padj = rng.gen_range(1e-6..1e-2);
        push_row(&mut table, gene, fc, padj, &mut rng);
    }
    for gene in down {
        let fc = -rng.gen_range(1.5..3.0);
        let padj = rng.gen_range(1e-6..1e-2);
        push_row(&mut table, gene, fc, padj, &mut rng);
    }
    for gene in background {
        let fc = rng.gen_range(-0.4..0.4);
        let padj = rng.gen_range(0.2..1.0);
        push_row(&mut table, gene, fc, padj, &mut rng);
    }
    table
}

fn push_row(table: &mut RawSignatureTable, gene: &str, fc: f64, padj: f64, rng: &mut StdRng) {
    let jitter = rng.gen_range(-0.05..0.05);
    table.push_row(vec![
        gene.to_string(),
        format!("{:.4}", fc + jitter),
        format!("{:.4}", fc - jitter),
        format!("{padj:.3e}"),
    ]);
}

/// Signature for a [`SyntheticReference`], padded with `n_background`
/// non-signature genes.
pub fn planted_signature(reference: &SyntheticReference, n_background: usize, seed: u64) -> RawSignatureTable {
    let background: Vec<String> = reference
        .matrix
        .genes
        .iter()
        .filter(|g| !reference.up_genes.contains(g) && !reference.down_genes.contains(g))
        .take(n_background)
        .cloned()
        .collect();
    signature_table(&reference.up_genes, &reference.down_genes, &background, seed)
}

/// One metadata row per experiment. Compound names are shared by pairs of
/// noise experiments; every third noise experiment is invalid and every
/// other one lacks a DrugBank id. The planted experiments are valid and
/// carry DrugBank ids.
pub fn metadata_for(matrix: &ExpressionMatrix) -> Vec<ExperimentMetadata> {
    matrix
        .experiments
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let (name, valid, drugbank) = match id.as_str() {
                REVERSER => ("reversol".to_string(), 1, Some("DB90001".to_string())),
                MIMIC => ("mimetin".to_string(), 1, Some("DB90002".to_string())),
                _ => (
                    format!("compound_{}", i / 2),
                    u8::from(i % 3 != 0),
                    (i % 2 == 0).then(|| format!("DB{i:05}")),
                ),
            };
            ExperimentMetadata {
                experiment_id: id.clone(),
                name,
                cell_line: Some(if i % 2 == 0 { "MCF7" } else { "PC3" }.to_string()),
                concentration: Some("10 uM".to_string()),
                duration: Some("6 h".to_string()),
                valid,
                drugbank_id: drugbank,
            }
        })
        .collect()
}
