//! Reference database and result-table I/O for Reversa.
//!
//! Loads the tabular inputs of a reversal run from CSV/TSV and writes the
//! ranked, annotated and robust-hit tables back out. A reference data
//! directory holds two files:
//!
//! | File | Contents |
//! |------|----------|
//! | `reference_matrix.csv` | genes × experiments expression-change values (or `reference_ranks.csv` with 1-based ranks) |
//! | `experiments.csv` | one metadata row per experiment |
//!
//! # Example
//!
//! ```rust,no_run
//! use reversa_data::{load_signature_table, ReferenceDatabase};
//! use reversa_ranker::{MetadataAnnotator, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = reversa_data::load_config("analysis.yaml")?;
//!     let db = ReferenceDatabase::with_data_dir("data/reference".into()).await?;
//!     let table = load_signature_table("data/disease_signature.tsv").await?;
//!
//!     let (store, metadata) = db.into_store()?;
//!     let annotator = MetadataAnnotator::new(metadata, &config.annotation)?;
//!     let output = Orchestrator::new(&config, store, &annotator).run(table)?;
//!     println!("{:?}", output);
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use reversa_common::entities::MatrixKind;
use reversa_common::{ExperimentMetadata, ExpressionMatrix};
use reversa_ranker::ReferenceStore;
use tracing::{info, warn};

pub mod tables;
pub mod writers;

pub use tables::{
    load_config, load_experiment_metadata, load_gene_mapper, load_reference_matrix, load_signature_table,
};
pub use writers::{write_annotated, write_ranked_table, write_robust_hits, write_threshold_summary};

/// Expression-change matrix filename
pub const REFERENCE_MATRIX_FILE: &str = "reference_matrix.csv";

/// Pre-ranked matrix filename, preferred when present
pub const REFERENCE_RANKS_FILE: &str = "reference_ranks.csv";

/// Experiment metadata filename
pub const EXPERIMENTS_FILE: &str = "experiments.csv";

/// A reference compound database loaded from one directory.
#[derive(Debug, Clone)]
pub struct ReferenceDatabase {
    matrix: ExpressionMatrix,
    metadata: Vec<ExperimentMetadata>,
    data_dir: PathBuf,
}

impl ReferenceDatabase {
    /// Load the matrix and metadata files from `data_dir`.
    pub async fn with_data_dir(data_dir: PathBuf) -> Result<Self> {
        let (matrix_path, kind) = Self::matrix_file(&data_dir)?;
        let metadata_path = data_dir.join(EXPERIMENTS_FILE);
        if !metadata_path.exists() {
            bail!("Experiment metadata {:?} not found", metadata_path);
        }

        info!("Loading reference database from {:?}", data_dir);
        let matrix = load_reference_matrix(&matrix_path, kind).await?;
        let metadata = load_experiment_metadata(&metadata_path).await?;

        let missing = tables::unannotated_experiments(&matrix, &metadata);
        if !missing.is_empty() {
            warn!(
                "{} of {} reference experiments have no metadata row",
                missing.len(),
                matrix.n_experiments()
            );
        }

        info!(
            "Reference database ready: {} genes, {} experiments, {} metadata rows",
            matrix.n_genes(),
            matrix.n_experiments(),
            metadata.len()
        );
        Ok(Self { matrix, metadata, data_dir })
    }

    fn matrix_file(data_dir: &Path) -> Result<(PathBuf, MatrixKind)> {
        let ranks = data_dir.join(REFERENCE_RANKS_FILE);
        if ranks.exists() {
            return Ok((ranks, MatrixKind::Ranks));
        }
        let values = data_dir.join(REFERENCE_MATRIX_FILE);
        if values.exists() {
            return Ok((values, MatrixKind::Expression));
        }
        bail!(
            "No reference matrix in {:?} (expected {} or {})",
            data_dir,
            REFERENCE_RANKS_FILE,
            REFERENCE_MATRIX_FILE
        )
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn matrix(&self) -> &ExpressionMatrix {
        &self.matrix
    }

    pub fn metadata(&self) -> &[ExperimentMetadata] {
        &self.metadata
    }

    pub fn experiment_count(&self) -> usize {
        self.matrix.n_experiments()
    }

    pub fn gene_count(&self) -> usize {
        self.matrix.n_genes()
    }

    /// Rank the matrix into a shared store, handing back the metadata.
    pub fn into_store(self) -> Result<(Arc<ReferenceStore>, Vec<ExperimentMetadata>)> {
        let store = ReferenceStore::from_matrix(self.matrix)?.into_shared();
        Ok((store, self.metadata))
    }
}
