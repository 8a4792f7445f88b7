//! Post-hoc annotation of ranked tables with compound metadata.
//!
//! Annotation is a relational join on the experiment id followed by
//! validity filters; it never alters the underlying scores.

use std::collections::HashMap;

use reversa_common::config::AnnotationConfig;
use reversa_common::entities::ExperimentMetadata;
use reversa_common::{Result, ReversaError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::significance::{is_hit, RankedTable, ScoreRecord};

/// A score record joined with its compound metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedRecord {
    #[serde(flatten)]
    pub record: ScoreRecord,
    /// Compound identity used for cross-threshold aggregation
    pub compound: String,
    pub cell_line: Option<String>,
    pub concentration: Option<String>,
    pub duration: Option<String>,
    pub drugbank_id: Option<String>,
}

impl AnnotatedRecord {
    fn bare(record: ScoreRecord) -> Self {
        Self {
            compound: record.experiment_id.clone(),
            record,
            cell_line: None,
            concentration: None,
            duration: None,
            drugbank_id: None,
        }
    }
}

/// Annotated rows in ranked order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedTable {
    rows: Vec<AnnotatedRecord>,
    /// Ranked experiments with no metadata row
    pub unmatched: usize,
    /// Experiments dropped by validity filters
    pub filtered: usize,
}

impl AnnotatedTable {
    /// Rows must already be in ranked order.
    pub fn new(rows: Vec<AnnotatedRecord>, unmatched: usize, filtered: usize) -> Self {
        Self { rows, unmatched, filtered }
    }

    pub fn rows(&self) -> &[AnnotatedRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Final hit list: q below `q_thresh`, reversing only when asked.
    pub fn hits(&self, q_thresh: f64, reversal_only: bool) -> Vec<&AnnotatedRecord> {
        self.rows
            .iter()
            .filter(|r| is_hit(&r.record, q_thresh, reversal_only))
            .collect()
    }
}

/// External annotation/filtering collaborator.
pub trait Annotator: Send + Sync {
    fn annotate(&self, table: &RankedTable) -> Result<AnnotatedTable>;
}

/// Treats every experiment as its own compound, no filtering.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityAnnotator;

impl Annotator for IdentityAnnotator {
    fn annotate(&self, table: &RankedTable) -> Result<AnnotatedTable> {
        Ok(AnnotatedTable {
            rows: table.iter().cloned().map(AnnotatedRecord::bare).collect(),
            unmatched: 0,
            filtered: 0,
        })
    }
}

/// Inner join against experiment metadata, then `valid` / DrugBank filters.
#[derive(Debug, Clone)]
pub struct MetadataAnnotator {
    by_experiment: HashMap<String, ExperimentMetadata>,
    require_valid: bool,
    require_drugbank: bool,
}

impl MetadataAnnotator {
    pub fn new(metadata: Vec<ExperimentMetadata>, config: &AnnotationConfig) -> Result<Self> {
        let mut by_experiment = HashMap::with_capacity(metadata.len());
        for meta in metadata {
            let id = meta.experiment_id.clone();
            if by_experiment.insert(id.clone(), meta).is_some() {
                return Err(ReversaError::Annotation(format!(
                    "experiment '{id}' appears twice in metadata"
                )));
            }
        }
        Ok(Self {
            by_experiment,
            require_valid: config.require_valid,
            require_drugbank: config.require_drugbank,
        })
    }

    fn keeps(&self, meta: &ExperimentMetadata) -> bool {
        if self.require_valid && meta.valid != 1 {
            return false;
        }
        if self.require_drugbank && drugbank(meta).is_none() {
            return false;
        }
        true
    }
}

fn drugbank(meta: &ExperimentMetadata) -> Option<String> {
    meta.drugbank_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("na"))
        .map(str::to_string)
}

impl Annotator for MetadataAnnotator {
    fn annotate(&self, table: &RankedTable) -> Result<AnnotatedTable> {
        let mut rows = Vec::with_capacity(table.len());
        let mut unmatched = 0usize;
        let mut filtered = 0usize;

        for record in table.iter() {
            let Some(meta) = self.by_experiment.get(&record.experiment_id) else {
                unmatched += 1;
                continue;
            };
            if !self.keeps(meta) {
                filtered += 1;
                continue;
            }
            rows.push(AnnotatedRecord {
                record: record.clone(),
                compound: meta.name.clone(),
                cell_line: meta.cell_line.clone(),
                concentration: meta.concentration.clone(),
                duration: meta.duration.clone(),
                drugbank_id: drugbank(meta),
            });
        }

        if !table.is_empty() && unmatched == table.len() {
            return Err(ReversaError::Annotation(format!(
                "none of the {} ranked experiments has a metadata row",
                table.len()
            )));
        }
        if unmatched > 0 {
            warn!("{} ranked experiments have no metadata and were dropped", unmatched);
        }
        info!(
            "Annotation: {} rows kept, {} filtered, {} unmatched",
            rows.len(),
            filtered,
            unmatched
        );

        Ok(AnnotatedTable { rows, unmatched, filtered })
    }
}
