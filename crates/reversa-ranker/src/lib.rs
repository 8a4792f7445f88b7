//! reversa-ranker — Connectivity-map reversal scoring engine.
//!
//! Ranks reference drug-perturbation experiments by how strongly they
//! reverse a disease expression signature, attaches empirical p-values and
//! FDR q-values, and optionally sweeps the fold-change cutoff to find hits
//! that do not depend on where the signature was thresholded.
//!
//! # Example
//!
//! ```rust,no_run
//! use reversa_common::{AnalysisConfig, ExpressionMatrix, RawSignatureTable};
//! use reversa_ranker::{IdentityAnnotator, Orchestrator, ReferenceStore, RunOutput};
//!
//! fn run(matrix: ExpressionMatrix, table: RawSignatureTable) -> reversa_common::Result<()> {
//!     let config = AnalysisConfig::default();
//!     let store = ReferenceStore::from_matrix(matrix)?.into_shared();
//!     let annotator = IdentityAnnotator;
//!
//!     if let RunOutput::Single(output) = Orchestrator::new(&config, store, &annotator).run(table)? {
//!         for hit in &output.hits {
//!             println!("{}: {:.3} (q = {:.2e})", hit.compound, hit.record.connectivity_score, hit.record.q_value);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod annotation;
pub mod null;
pub mod pipeline;
pub mod reference;
pub mod scorer;
pub mod signature;
pub mod significance;
pub mod sweep;

pub use annotation::{AnnotatedRecord, AnnotatedTable, Annotator, IdentityAnnotator, MetadataAnnotator};
pub use null::{NullCache, NullEnsemble, NullGenerator};
pub use pipeline::{Orchestrator, Pipeline, RunOutput, SingleRunOutput, Stage};
pub use reference::{ReferenceProfile, ReferenceStore};
pub use scorer::ConnectivityScore;
pub use signature::{DiseaseSignature, GeneIdMapper, GeneSet, SignaturePreparer};
pub use significance::{RankedTable, ScoreRecord, SignificanceTester};
pub use sweep::{RobustHit, SweepEngine, SweepReport, ThresholdResult, ThresholdStatus, ThresholdSummary};
