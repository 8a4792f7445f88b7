//! Threshold sweep and robust-hit aggregation.
//!
//! The sweep runs the single-cutoff pipeline over a grid of fold-change
//! cutoffs and keeps the compounds whose hit status survives the choice of
//! cutoff. Planning is sequential (it decides where the grid stops), null
//! ensembles are generated once per distinct (n_up, n_down), and the usable
//! cutoffs are then scored in parallel, one [`Pipeline`] each.
//!
//! Data and annotation failures stay local to their cutoff and are reported
//! as skips. Any other failure aborts the sweep once every sibling cutoff
//! has finished.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rayon::prelude::*;
use reversa_common::config::{Aggregate, RobustRule, SignificanceConfig, SweepConfig};
use reversa_common::{AnalysisConfig, Result, ReversaError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::annotation::{AnnotatedRecord, AnnotatedTable, Annotator};
use crate::null::{NullCache, NullEnsemble, NullGenerator};
use crate::pipeline::Pipeline;
use crate::reference::ReferenceStore;
use crate::signature::{median, DiseaseSignature, GeneSet};
use crate::significance::{is_hit, RankedTable};

/// Full result of one evaluated cutoff.
#[derive(Debug, Clone)]
pub struct ThresholdResult {
    pub cutoff: f64,
    pub n_up: usize,
    pub n_down: usize,
    pub gene_count: usize,
    pub ranked: RankedTable,
    pub annotated: AnnotatedTable,
    /// Annotated rows passing the hit criteria
    pub n_significant: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdStatus {
    Evaluated,
    Skipped,
    /// After a halting cutoff
    NotReached,
}

/// One row of the per-threshold summary table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSummary {
    pub cutoff: f64,
    pub n_up: usize,
    pub n_down: usize,
    pub gene_count: usize,
    pub n_significant: usize,
    pub status: ThresholdStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedThreshold {
    pub cutoff: f64,
    pub reason: String,
}

/// A compound meeting the robustness rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustHit {
    pub compound_id: String,
    /// Thresholds at which the compound was a hit
    pub n_support: usize,
    /// Thresholds at which the compound was present at all
    pub n_evaluated: usize,
    pub aggregated_score: f64,
    pub aggregated_q: f64,
}

#[derive(Debug, Clone)]
pub struct SweepReport {
    /// Size of the grid before any stop condition
    pub nominal_grid_size: usize,
    pub results: Vec<ThresholdResult>,
    pub summary: Vec<ThresholdSummary>,
    pub skipped: Vec<SkippedThreshold>,
    pub robust_hits: Vec<RobustHit>,
    /// Distinct null ensembles generated for the sweep
    pub null_ensembles: usize,
}

enum Slot {
    Planned(GeneSet),
    Skipped(String),
    NotReached,
}

struct Candidate {
    cutoff: f64,
    n_up: usize,
    n_down: usize,
    slot: Slot,
}

fn reason(err: ReversaError) -> String {
    match err {
        ReversaError::Data(msg) => msg,
        other => other.to_string(),
    }
}

fn round_cutoff(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

/// Cutoff grid: the explicit list sorted ascending, or `0, step, 2·step, …`
/// up to the largest |fold-change| in the signature.
pub fn cutoff_grid(config: &SweepConfig, signature: &DiseaseSignature) -> Vec<f64> {
    if !config.auto_grid {
        let mut grid = config.cutoffs.clone();
        grid.sort_by(|a, b| a.total_cmp(b));
        grid.dedup();
        return grid;
    }
    let max = signature.max_abs_fold_change();
    let steps = (max / config.step + 1e-9).floor() as usize;
    (0..=steps).map(|i| round_cutoff(i as f64 * config.step)).collect()
}

/// Drives the single-cutoff pipeline across a cutoff grid.
pub struct SweepEngine<'a> {
    config: &'a AnalysisConfig,
    store: Arc<ReferenceStore>,
    annotator: &'a dyn Annotator,
}

impl<'a> SweepEngine<'a> {
    pub fn new(config: &'a AnalysisConfig, store: Arc<ReferenceStore>, annotator: &'a dyn Annotator) -> Self {
        Self { config, store, annotator }
    }

    pub fn run(&self, signature: impl Into<Arc<DiseaseSignature>>) -> Result<SweepReport> {
        let signature: Arc<DiseaseSignature> = signature.into();
        let grid = cutoff_grid(&self.config.sweep, &signature);
        let nominal_grid_size = grid.len();
        let candidates = self.plan(&signature, grid)?;

        let generator = NullGenerator::new(
            &self.store,
            self.config.significance.permutations,
            self.config.seed,
        );
        let mut cache = NullCache::new();
        let mut null_failures: HashMap<(usize, usize), String> = HashMap::new();
        for candidate in &candidates {
            let Slot::Planned(gene_set) = &candidate.slot else { continue };
            let (n_up, n_down) = gene_set.size_key();
            if null_failures.contains_key(&(n_up, n_down)) {
                continue;
            }
            match cache.get_or_generate(&generator, n_up, n_down) {
                Ok(_) => {}
                Err(e) if e.is_data_error() => {
                    null_failures.insert((n_up, n_down), reason(e));
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            "Sweep: {} null ensembles for {} planned cutoffs ({} cache hits)",
            cache.len(),
            candidates.iter().filter(|c| matches!(c.slot, Slot::Planned(_))).count(),
            cache.hits()
        );

        let outcomes: Vec<Option<Result<ThresholdResult>>> = candidates
            .par_iter()
            .map(|candidate| {
                let Slot::Planned(gene_set) = &candidate.slot else { return None };
                let null = cache.get(gene_set.size_key())?;
                Some(self.evaluate(candidate.cutoff, &signature, &null))
            })
            .collect();

        let mut results = Vec::new();
        let mut summary = Vec::with_capacity(candidates.len());
        let mut skipped = Vec::new();
        let mut fatal: Option<ReversaError> = None;

        for (candidate, outcome) in candidates.into_iter().zip(outcomes) {
            let Candidate { cutoff, n_up, n_down, slot } = candidate;
            let (status, why, n_significant) = match (slot, outcome) {
                (Slot::Planned(_), Some(Ok(result))) => {
                    let n = result.n_significant;
                    results.push(result);
                    (ThresholdStatus::Evaluated, None, n)
                }
                (Slot::Planned(_), Some(Err(e))) if e.is_cutoff_local() => {
                    (ThresholdStatus::Skipped, Some(reason(e)), 0)
                }
                (Slot::Planned(_), Some(Err(e))) => {
                    let why = e.to_string();
                    fatal.get_or_insert(e);
                    (ThresholdStatus::Skipped, Some(why), 0)
                }
                (Slot::Planned(gene_set), None) => {
                    let why = null_failures
                        .get(&gene_set.size_key())
                        .cloned()
                        .unwrap_or_else(|| "no null ensemble available".to_string());
                    (ThresholdStatus::Skipped, Some(why), 0)
                }
                (Slot::Skipped(why), _) => (ThresholdStatus::Skipped, Some(why), 0),
                (Slot::NotReached, _) => (ThresholdStatus::NotReached, None, 0),
            };

            if let (ThresholdStatus::Skipped, Some(why)) = (status, &why) {
                skipped.push(SkippedThreshold { cutoff, reason: why.clone() });
            }
            summary.push(ThresholdSummary {
                cutoff,
                n_up,
                n_down,
                gene_count: n_up + n_down,
                n_significant,
                status,
                reason: why,
            });
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        let robust_hits = aggregate_robust_hits(&results, &self.config.sweep, &self.config.significance);
        if results.is_empty() {
            warn!("Sweep produced no usable thresholds ({} skipped)", skipped.len());
        }
        info!(
            "Sweep: {} of {} cutoffs evaluated, {} robust hits",
            results.len(),
            nominal_grid_size,
            robust_hits.len()
        );

        Ok(SweepReport {
            nominal_grid_size,
            results,
            summary,
            skipped,
            robust_hits,
            null_ensembles: cache.len(),
        })
    }

    /// Walk the grid in order, deriving gene sets and applying the
    /// small-signature stop policy.
    fn plan(&self, signature: &DiseaseSignature, grid: Vec<f64>) -> Result<Vec<Candidate>> {
        let sweep = &self.config.sweep;
        let (base_up, base_down) = signature.count_at(0.0);
        let baseline = base_up + base_down;
        let min_count = sweep.min_genes.max((sweep.min_frac * baseline as f64).ceil() as usize);
        debug!("Sweep baseline {} genes, minimum per cutoff {}", baseline, min_count);

        let mut halted = false;
        let mut candidates = Vec::with_capacity(grid.len());
        for cutoff in grid {
            let (n_up, n_down) = signature.count_at(cutoff);
            if halted {
                candidates.push(Candidate { cutoff, n_up, n_down, slot: Slot::NotReached });
                continue;
            }

            let slot = match signature.gene_set(cutoff) {
                Ok(gene_set) if gene_set.len() >= min_count => Slot::Planned(gene_set),
                Ok(gene_set) => Slot::Skipped(format!(
                    "{} genes survive cutoff {}, below the minimum of {}",
                    gene_set.len(),
                    cutoff,
                    min_count
                )),
                Err(e) if e.is_data_error() => Slot::Skipped(reason(e)),
                Err(e) => return Err(e),
            };

            if let Slot::Skipped(why) = &slot {
                if sweep.stop_on_small {
                    warn!("Stopping sweep at cutoff {}: {}", cutoff, why);
                    halted = true;
                } else {
                    warn!("Skipping cutoff {}: {}", cutoff, why);
                }
            }
            candidates.push(Candidate { cutoff, n_up, n_down, slot });
        }
        Ok(candidates)
    }

    /// One single-cutoff pipeline run against a precomputed null.
    fn evaluate(
        &self,
        cutoff: f64,
        signature: &Arc<DiseaseSignature>,
        null: &NullEnsemble,
    ) -> Result<ThresholdResult> {
        let mut pipeline = Pipeline::from_signature(self.config, Arc::clone(&self.store), Arc::clone(signature));
        pipeline.clean(cutoff)?;
        pipeline.score_against(null)?;
        if let Err(e) = pipeline.annotate(self.annotator) {
            let ranked = pipeline.ranked().map_or(0, RankedTable::len);
            warn!("Annotation failed at cutoff {} after ranking {} experiments: {}", cutoff, ranked, e);
            return Err(match e {
                ReversaError::Annotation(msg) => ReversaError::Annotation(format!("{msg} at cutoff {cutoff}")),
                other => other,
            });
        }

        let output = pipeline.finish()?;
        debug!("Cutoff {}: {} significant of {}", cutoff, output.hits.len(), output.annotated.len());
        Ok(ThresholdResult {
            cutoff,
            n_up: output.n_up,
            n_down: output.n_down,
            gene_count: output.n_up + output.n_down,
            n_significant: output.hits.len(),
            ranked: output.ranked,
            annotated: output.annotated,
        })
    }
}

/// Lowest q first, then lowest score, then experiment id.
fn representative_order(a: &AnnotatedRecord, b: &AnnotatedRecord) -> Ordering {
    a.record
        .q_value
        .total_cmp(&b.record.q_value)
        .then(a.record.connectivity_score.total_cmp(&b.record.connectivity_score))
        .then_with(|| a.record.experiment_id.cmp(&b.record.experiment_id))
}

fn aggregate_values(mut values: Vec<f64>, how: Aggregate) -> Option<f64> {
    match how {
        Aggregate::Mean if values.is_empty() => None,
        Aggregate::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
        Aggregate::Median => median(&mut values),
    }
}

/// Per-compound robustness across evaluated thresholds.
///
/// At each threshold a compound is represented by its best experiment.
/// `all` needs support at every threshold, `k_of_n` at `robust_k` of them.
pub fn aggregate_robust_hits(
    results: &[ThresholdResult],
    sweep: &SweepConfig,
    significance: &SignificanceConfig,
) -> Vec<RobustHit> {
    if results.is_empty() {
        return Vec::new();
    }

    let mut per_compound: BTreeMap<&str, Vec<&AnnotatedRecord>> = BTreeMap::new();
    for result in results {
        let mut best: HashMap<&str, &AnnotatedRecord> = HashMap::new();
        for row in result.annotated.rows() {
            best.entry(row.compound.as_str())
                .and_modify(|current| {
                    if representative_order(row, current) == Ordering::Less {
                        *current = row;
                    }
                })
                .or_insert(row);
        }
        for (compound, row) in best {
            per_compound.entry(compound).or_default().push(row);
        }
    }

    let required = match sweep.robust_rule {
        RobustRule::All => results.len(),
        RobustRule::KOfN => sweep.robust_k,
    };
    if required > results.len() {
        warn!(
            "Robustness rule needs {} supporting thresholds but only {} were evaluated",
            required,
            results.len()
        );
    }

    let mut hits: Vec<RobustHit> = per_compound
        .into_iter()
        .filter_map(|(compound, rows)| {
            let n_support = rows
                .iter()
                .filter(|r| is_hit(&r.record, significance.q_thresh, significance.reversal_only))
                .count();
            if n_support < required {
                return None;
            }
            let aggregated_score = aggregate_values(
                rows.iter().map(|r| r.record.connectivity_score).collect(),
                sweep.aggregate,
            )?;
            let aggregated_q =
                aggregate_values(rows.iter().map(|r| r.record.q_value).collect(), sweep.aggregate)?;
            if significance.reversal_only && aggregated_score >= 0.0 {
                return None;
            }
            Some(RobustHit {
                compound_id: compound.to_string(),
                n_support,
                n_evaluated: rows.len(),
                aggregated_score,
                aggregated_q,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        a.aggregated_score
            .total_cmp(&b.aggregated_score)
            .then_with(|| a.compound_id.cmp(&b.compound_id))
    });
    hits
}
