//! Pipeline orchestration.
//!
//! A single run moves through
//! `created → signature_loaded → signature_cleaned → scored → annotated`.
//! Each stage owns the data produced so far and every transition is
//! checked; calling a stage out of order yields
//! [`ReversaError::InvalidTransition`]. [`Orchestrator`] drives the state
//! machine once in single mode or hands off to the sweep engine, which
//! drives one machine per cutoff from an already prepared signature.

use std::fmt;
use std::sync::Arc;

use reversa_common::config::RunMode;
use reversa_common::entities::RawSignatureTable;
use reversa_common::{AnalysisConfig, Result, ReversaError};
use tracing::{debug, info, warn};

use crate::annotation::{AnnotatedRecord, AnnotatedTable, Annotator};
use crate::null::{NullCache, NullEnsemble, NullGenerator};
use crate::reference::ReferenceStore;
use crate::scorer::score_all;
use crate::signature::{DiseaseSignature, GeneIdMapper, GeneSet, SignaturePreparer};
use crate::significance::{RankedTable, SignificanceTester};
use crate::sweep::{SweepEngine, SweepReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Created,
    SignatureLoaded,
    SignatureCleaned,
    Scored,
    Annotated,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Created => "created",
            Stage::SignatureLoaded => "signature_loaded",
            Stage::SignatureCleaned => "signature_cleaned",
            Stage::Scored => "scored",
            Stage::Annotated => "annotated",
        }
    }

    fn next(self) -> Option<Stage> {
        match self {
            Stage::Created => Some(Stage::SignatureLoaded),
            Stage::SignatureLoaded => Some(Stage::SignatureCleaned),
            Stage::SignatureCleaned => Some(Stage::Scored),
            Stage::Scored => Some(Stage::Annotated),
            Stage::Annotated => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Signature and gene set fixed by the cleaning stage.
#[derive(Debug, Clone)]
pub struct CleanedSignature {
    pub signature: Arc<DiseaseSignature>,
    pub gene_set: GeneSet,
    pub cutoff: f64,
}

#[derive(Debug)]
enum LoadedSignature {
    Raw(RawSignatureTable),
    /// Mapped and collapsed already; cleaning only thresholds it
    Prepared(Arc<DiseaseSignature>),
}

#[derive(Debug)]
enum PipelineState {
    Created,
    SignatureLoaded(LoadedSignature),
    SignatureCleaned(CleanedSignature),
    Scored(CleanedSignature, RankedTable),
    Annotated(CleanedSignature, RankedTable, AnnotatedTable),
}

impl PipelineState {
    fn stage(&self) -> Stage {
        match self {
            PipelineState::Created => Stage::Created,
            PipelineState::SignatureLoaded(_) => Stage::SignatureLoaded,
            PipelineState::SignatureCleaned(_) => Stage::SignatureCleaned,
            PipelineState::Scored(..) => Stage::Scored,
            PipelineState::Annotated(..) => Stage::Annotated,
        }
    }
}

/// Score every experiment against `gene_set` and test against `null`.
///
/// Statistical failures are reported with the cutoff that produced them.
fn score_and_test(
    store: &ReferenceStore,
    gene_set: &GeneSet,
    null: &NullEnsemble,
    tester: &SignificanceTester,
    cutoff: f64,
) -> Result<RankedTable> {
    let observed = store
        .profiles()
        .iter()
        .zip(score_all(gene_set, store))
        .map(|(profile, s)| (profile.experiment_id().to_string(), s.score))
        .collect();

    tester.test(observed, null).map_err(|e| match e {
        ReversaError::Statistical(msg) => ReversaError::Statistical(format!("{msg} at cutoff {cutoff}")),
        other => other,
    })
}

/// One single-cutoff run.
pub struct Pipeline<'a> {
    config: &'a AnalysisConfig,
    store: Arc<ReferenceStore>,
    mapper: Option<&'a GeneIdMapper>,
    state: PipelineState,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a AnalysisConfig, store: Arc<ReferenceStore>) -> Self {
        Self { config, store, mapper: None, state: PipelineState::Created }
    }

    /// A pipeline already in `signature_loaded`, holding a prepared signature.
    pub fn from_signature(
        config: &'a AnalysisConfig,
        store: Arc<ReferenceStore>,
        signature: Arc<DiseaseSignature>,
    ) -> Self {
        Self {
            config,
            store,
            mapper: None,
            state: PipelineState::SignatureLoaded(LoadedSignature::Prepared(signature)),
        }
    }

    pub fn with_mapper(mut self, mapper: &'a GeneIdMapper) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn stage(&self) -> Stage {
        self.state.stage()
    }

    fn check(&self, to: Stage) -> Result<()> {
        let from = self.stage();
        if from.next() == Some(to) {
            Ok(())
        } else {
            Err(ReversaError::InvalidTransition { from: from.name(), to: to.name() })
        }
    }

    /// `created → signature_loaded`
    pub fn load_signature(&mut self, table: RawSignatureTable) -> Result<()> {
        self.check(Stage::SignatureLoaded)?;
        info!("Loaded signature table: {} rows, {} columns", table.len(), table.headers.len());
        self.state = PipelineState::SignatureLoaded(LoadedSignature::Raw(table));
        Ok(())
    }

    /// `signature_loaded → signature_cleaned`, thresholding at `cutoff`.
    pub fn clean(&mut self, cutoff: f64) -> Result<()> {
        self.check(Stage::SignatureCleaned)?;
        let PipelineState::SignatureLoaded(loaded) = &self.state else {
            return Err(ReversaError::InvalidTransition {
                from: self.stage().name(),
                to: Stage::SignatureCleaned.name(),
            });
        };

        let signature = match loaded {
            LoadedSignature::Raw(table) => {
                let mut preparer = SignaturePreparer::new(&self.config.signature, &self.store);
                if let Some(mapper) = self.mapper {
                    preparer = preparer.with_mapper(mapper);
                }
                Arc::new(preparer.prepare(table)?)
            }
            LoadedSignature::Prepared(signature) => Arc::clone(signature),
        };
        let gene_set = signature.gene_set(cutoff)?;
        debug!(
            "Cleaned signature at cutoff {}: {} up, {} down",
            cutoff,
            gene_set.n_up(),
            gene_set.n_down()
        );

        self.state = PipelineState::SignatureCleaned(CleanedSignature { signature, gene_set, cutoff });
        Ok(())
    }

    /// `signature_cleaned → scored`: scoring, null generation and testing as one step.
    pub fn score(&mut self, cache: &mut NullCache) -> Result<()> {
        self.check(Stage::Scored)?;
        let null = match &self.state {
            PipelineState::SignatureCleaned(cleaned) => {
                let (n_up, n_down) = cleaned.gene_set.size_key();
                let generator = NullGenerator::new(
                    &self.store,
                    self.config.significance.permutations,
                    self.config.seed,
                );
                cache.get_or_generate(&generator, n_up, n_down)?
            }
            _ => {
                return Err(ReversaError::InvalidTransition {
                    from: self.stage().name(),
                    to: Stage::Scored.name(),
                })
            }
        };
        self.score_against(&null)
    }

    /// `signature_cleaned → scored` against a null generated elsewhere.
    /// The ensemble must match the cleaned gene set's (n_up, n_down).
    pub fn score_against(&mut self, null: &NullEnsemble) -> Result<()> {
        self.check(Stage::Scored)?;
        let ranked = {
            let PipelineState::SignatureCleaned(cleaned) = &self.state else {
                return Err(ReversaError::InvalidTransition {
                    from: self.stage().name(),
                    to: Stage::Scored.name(),
                });
            };
            if null.size_key() != cleaned.gene_set.size_key() {
                return Err(ReversaError::statistical(format!(
                    "null ensemble for {:?} does not match gene set {:?} at cutoff {}",
                    null.size_key(),
                    cleaned.gene_set.size_key(),
                    cleaned.cutoff
                )));
            }
            let tester = SignificanceTester::from_config(&self.config.significance);
            score_and_test(&self.store, &cleaned.gene_set, null, &tester, cleaned.cutoff)?
        };

        self.state = match std::mem::replace(&mut self.state, PipelineState::Created) {
            PipelineState::SignatureCleaned(cleaned) => PipelineState::Scored(cleaned, ranked),
            other => other,
        };
        Ok(())
    }

    /// `scored → annotated`. On failure the pipeline stays in `scored`
    /// with its ranked table intact.
    pub fn annotate(&mut self, annotator: &dyn Annotator) -> Result<()> {
        self.check(Stage::Annotated)?;
        let annotated = match &self.state {
            PipelineState::Scored(_, ranked) => annotator.annotate(ranked)?,
            _ => {
                return Err(ReversaError::InvalidTransition {
                    from: self.stage().name(),
                    to: Stage::Annotated.name(),
                })
            }
        };

        self.state = match std::mem::replace(&mut self.state, PipelineState::Created) {
            PipelineState::Scored(cleaned, ranked) => PipelineState::Annotated(cleaned, ranked, annotated),
            other => other,
        };
        Ok(())
    }

    pub fn cleaned(&self) -> Option<&CleanedSignature> {
        match &self.state {
            PipelineState::SignatureCleaned(c)
            | PipelineState::Scored(c, _)
            | PipelineState::Annotated(c, _, _) => Some(c),
            _ => None,
        }
    }

    pub fn ranked(&self) -> Option<&RankedTable> {
        match &self.state {
            PipelineState::Scored(_, r) | PipelineState::Annotated(_, r, _) => Some(r),
            _ => None,
        }
    }

    pub fn annotated(&self) -> Option<&AnnotatedTable> {
        match &self.state {
            PipelineState::Annotated(_, _, a) => Some(a),
            _ => None,
        }
    }

    /// Consume a finished pipeline into its output.
    pub fn finish(self) -> Result<SingleRunOutput> {
        let significance = &self.config.significance;
        match self.state {
            PipelineState::Annotated(cleaned, ranked, annotated) => {
                let hits = annotated
                    .hits(significance.q_thresh, significance.reversal_only)
                    .into_iter()
                    .cloned()
                    .collect();
                Ok(SingleRunOutput {
                    cutoff: cleaned.cutoff,
                    n_up: cleaned.gene_set.n_up(),
                    n_down: cleaned.gene_set.n_down(),
                    ranked,
                    annotated,
                    hits,
                })
            }
            other => Err(ReversaError::InvalidTransition {
                from: other.stage().name(),
                to: "finished",
            }),
        }
    }
}

/// Result of single mode.
#[derive(Debug, Clone)]
pub struct SingleRunOutput {
    pub cutoff: f64,
    pub n_up: usize,
    pub n_down: usize,
    /// Every experiment, unfiltered
    pub ranked: RankedTable,
    pub annotated: AnnotatedTable,
    /// Annotated rows passing `q_thresh` and `reversal_only`
    pub hits: Vec<AnnotatedRecord>,
}

#[derive(Debug)]
pub enum RunOutput {
    Single(SingleRunOutput),
    Sweep(SweepReport),
}

/// Runs a configured analysis in single or sweep mode.
pub struct Orchestrator<'a> {
    config: &'a AnalysisConfig,
    store: Arc<ReferenceStore>,
    annotator: &'a dyn Annotator,
    mapper: Option<&'a GeneIdMapper>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a AnalysisConfig, store: Arc<ReferenceStore>, annotator: &'a dyn Annotator) -> Self {
        Self { config, store, annotator, mapper: None }
    }

    pub fn with_mapper(mut self, mapper: &'a GeneIdMapper) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn run(&self, table: RawSignatureTable) -> Result<RunOutput> {
        self.config.validate()?;
        match self.config.mode {
            RunMode::Single => self.run_single(table).map(RunOutput::Single),
            RunMode::Sweep => self.run_sweep(&table).map(RunOutput::Sweep),
        }
    }

    pub fn run_single(&self, table: RawSignatureTable) -> Result<SingleRunOutput> {
        let mut pipeline = Pipeline::new(self.config, Arc::clone(&self.store));
        if let Some(mapper) = self.mapper {
            pipeline = pipeline.with_mapper(mapper);
        }
        let mut cache = NullCache::new();

        pipeline.load_signature(table)?;
        pipeline.clean(self.config.signature.logfc_cutoff)?;
        pipeline.score(&mut cache)?;
        if let Err(e) = pipeline.annotate(self.annotator) {
            warn!("Annotation failed after scoring: {}", e);
            return Err(e);
        }

        let output = pipeline.finish()?;
        info!(
            "Single run at cutoff {}: {} experiments ranked, {} hits",
            output.cutoff,
            output.ranked.len(),
            output.hits.len()
        );
        Ok(output)
    }

    pub fn run_sweep(&self, table: &RawSignatureTable) -> Result<SweepReport> {
        let mut preparer = SignaturePreparer::new(&self.config.signature, &self.store);
        if let Some(mapper) = self.mapper {
            preparer = preparer.with_mapper(mapper);
        }
        let signature = preparer.prepare(table)?;
        SweepEngine::new(self.config, Arc::clone(&self.store), self.annotator).run(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::IdentityAnnotator;

    /// 12 genes, two experiments: `rev` ranks the signature's up genes at the
    /// bottom, `mim` ranks them at the top.
    fn store() -> Arc<ReferenceStore> {
        let genes: Vec<String> = (0..12).map(|i| format!("G{i}")).collect();
        let mimic: Vec<u32> = (1..=12).collect();
        let reverse: Vec<u32> = (1..=12).rev().collect();
        ReferenceStore::from_ranks(genes, vec!["mim".into(), "rev".into()], vec![mimic, reverse])
            .unwrap()
            .into_shared()
    }

    fn table() -> RawSignatureTable {
        let mut t = RawSignatureTable::new(vec!["gene".into(), "log2FC_a".into()]);
        for (g, fc) in [("G0", "2.5"), ("G1", "2.0"), ("G2", "1.5"), ("G10", "-2.0"), ("G11", "-3.0")] {
            t.push_row([g, fc]);
        }
        t
    }

    fn config() -> AnalysisConfig {
        let mut config = AnalysisConfig::default();
        config.significance.permutations = 200;
        config
    }

    #[test]
    fn test_full_state_machine() {
        let config = config();
        let mut pipeline = Pipeline::new(&config, store());
        let mut cache = NullCache::new();
        assert_eq!(pipeline.stage(), Stage::Created);

        pipeline.load_signature(table()).unwrap();
        pipeline.clean(1.0).unwrap();
        assert_eq!(pipeline.cleaned().unwrap().gene_set.size_key(), (3, 2));
        pipeline.score(&mut cache).unwrap();
        assert_eq!(pipeline.ranked().unwrap().len(), 2);
        pipeline.annotate(&IdentityAnnotator).unwrap();
        assert_eq!(pipeline.stage(), Stage::Annotated);

        let output = pipeline.finish().unwrap();
        assert_eq!(output.ranked.records()[0].experiment_id, "rev");
        assert!(output.ranked.records()[0].connectivity_score < 0.0);
        assert!(output.ranked.records()[1].connectivity_score > 0.0);
    }

    #[test]
    fn test_out_of_order_is_rejected() {
        let config = config();
        let mut pipeline = Pipeline::new(&config, store());
        let err = pipeline.score(&mut NullCache::new()).unwrap_err();
        assert!(matches!(
            err,
            ReversaError::InvalidTransition { from: "created", to: "scored" }
        ));

        pipeline.load_signature(table()).unwrap();
        assert!(pipeline.load_signature(table()).is_err());
        assert!(pipeline.annotate(&IdentityAnnotator).is_err());
        assert_eq!(pipeline.stage(), Stage::SignatureLoaded);
    }

    struct FailingAnnotator;

    impl Annotator for FailingAnnotator {
        fn annotate(&self, _table: &RankedTable) -> Result<AnnotatedTable> {
            Err(ReversaError::Annotation("metadata unavailable".into()))
        }
    }

    #[test]
    fn test_failed_annotation_keeps_ranked_table() {
        let config = config();
        let mut pipeline = Pipeline::new(&config, store());
        pipeline.load_signature(table()).unwrap();
        pipeline.clean(1.0).unwrap();
        pipeline.score(&mut NullCache::new()).unwrap();
        let before = pipeline.ranked().unwrap().clone();

        assert!(pipeline.annotate(&FailingAnnotator).is_err());
        assert_eq!(pipeline.stage(), Stage::Scored);
        assert_eq!(pipeline.ranked().unwrap(), &before);

        pipeline.annotate(&IdentityAnnotator).unwrap();
        assert_eq!(pipeline.stage(), Stage::Annotated);
    }

    #[test]
    fn test_prepared_signature_starts_loaded() {
        let config = config();
        let store = store();
        let signature = SignaturePreparer::new(&config.signature, &store).prepare(&table()).unwrap();
        let mut pipeline = Pipeline::from_signature(&config, Arc::clone(&store), Arc::new(signature));
        assert_eq!(pipeline.stage(), Stage::SignatureLoaded);
        assert!(pipeline.load_signature(table()).is_err());

        pipeline.clean(2.0).unwrap();
        assert_eq!(pipeline.cleaned().unwrap().gene_set.size_key(), (2, 2));

        let generator = NullGenerator::new(&store, 200, config.seed);
        let wrong = generator.generate(3, 2).unwrap();
        let err = pipeline.score_against(&wrong).unwrap_err();
        assert!(matches!(err, ReversaError::Statistical(_)));
        assert_eq!(pipeline.stage(), Stage::SignatureCleaned);

        let null = generator.generate(2, 2).unwrap();
        pipeline.score_against(&null).unwrap();
        pipeline.annotate(&IdentityAnnotator).unwrap();
        let output = pipeline.finish().unwrap();
        assert_eq!(output.cutoff, 2.0);
        assert_eq!(output.ranked.records()[0].experiment_id, "rev");
    }

    #[test]
    fn test_empty_side_is_a_data_error() {
        let config = config();
        let mut pipeline = Pipeline::new(&config, store());
        pipeline.load_signature(table()).unwrap();
        let err = pipeline.clean(2.6).unwrap_err();
        assert_eq!(err.to_string(), "Data error: no up-regulated genes survive cutoff 2.6");
        assert_eq!(pipeline.stage(), Stage::SignatureLoaded);
    }

    #[test]
    fn test_orchestrator_single_mode_hits() {
        let config = config();
        let annotator = IdentityAnnotator;
        let output = match Orchestrator::new(&config, store(), &annotator).run(table()).unwrap() {
            RunOutput::Single(output) => output,
            RunOutput::Sweep(_) => panic!("expected single mode"),
        };
        assert_eq!(output.ranked.len(), 2);
        assert!(output.hits.iter().all(|h| h.record.connectivity_score < 0.0));
    }
}
