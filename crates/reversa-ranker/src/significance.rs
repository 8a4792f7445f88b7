//! Significance testing.
//!
//! Empirical p-values against a [`NullEnsemble`] with the +1 rule, then a
//! false-discovery-rate correction across all experiments of one run.

use reversa_common::config::{QValueMethod, SignificanceConfig};
use reversa_common::{Result, ReversaError};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::null::NullEnsemble;

/// Final per-experiment result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub experiment_id: String,
    pub connectivity_score: f64,
    pub p_value: f64,
    pub q_value: f64,
}

/// Score records ordered by connectivity score ascending (most reversing first).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankedTable {
    records: Vec<ScoreRecord>,
}

impl RankedTable {
    /// Sorts `records` into candidate order.
    pub fn new(mut records: Vec<ScoreRecord>) -> Self {
        records.sort_by(|a, b| {
            a.connectivity_score
                .total_cmp(&b.connectivity_score)
                .then(a.p_value.total_cmp(&b.p_value))
                .then_with(|| a.experiment_id.cmp(&b.experiment_id))
        });
        Self { records }
    }

    pub fn records(&self) -> &[ScoreRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoreRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, experiment_id: &str) -> Option<&ScoreRecord> {
        self.records.iter().find(|r| r.experiment_id == experiment_id)
    }

    /// Records with q below `q_thresh`, optionally only reversing ones.
    pub fn significant(&self, q_thresh: f64, reversal_only: bool) -> impl Iterator<Item = &ScoreRecord> {
        self.records.iter().filter(move |r| is_hit(r, q_thresh, reversal_only))
    }
}

pub(crate) fn is_hit(record: &ScoreRecord, q_thresh: f64, reversal_only: bool) -> bool {
    record.q_value < q_thresh && (!reversal_only || record.connectivity_score < 0.0)
}

/// p = (#null at least as extreme as `score` in its direction + 1) / (M + 1).
///
/// Negative scores count null ≤ score, positive count null ≥ score and a
/// zero score counts the whole ensemble.
pub fn empirical_p_value(score: f64, null: &NullEnsemble) -> f64 {
    let extreme = if score < 0.0 {
        null.count_at_or_below(score)
    } else if score > 0.0 {
        null.count_at_or_above(score)
    } else {
        null.len()
    };
    (extreme as f64 + 1.0) / (null.len() as f64 + 1.0)
}

/// Step-up adjustment `min_{j ≥ i}(scale · p_(j) · m / j)`, capped at 1.
fn step_up(p_values: &[f64], scale: f64) -> Vec<f64> {
    let n = p_values.len();
    if n == 0 {
        return Vec::new();
    }

    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let n_f = n as f64;
    let mut adjusted = vec![0.0; n];
    let mut prev = f64::INFINITY;
    for i in (0..n).rev() {
        let rank = (i + 1) as f64;
        let adj = (scale * p_values[indices[i]] * n_f / rank).min(1.0).min(prev);
        adjusted[indices[i]] = adj;
        prev = adj;
    }
    adjusted
}

/// Benjamini–Hochberg adjusted p-values, in input order.
pub fn benjamini_hochberg(p_values: &[f64]) -> Vec<f64> {
    step_up(p_values, 1.0)
}

/// Storey's π₀ at a fixed λ, floored at 1/m so q-values never collapse to 0.
pub fn storey_pi0(p_values: &[f64], lambda: f64) -> f64 {
    let m = p_values.len();
    if m == 0 {
        return 1.0;
    }
    let above = p_values.iter().filter(|&&p| p > lambda).count();
    let pi0 = above as f64 / (m as f64 * (1.0 - lambda));
    pi0.clamp(1.0 / m as f64, 1.0)
}

/// Storey q-values: BH scaled by the estimated null proportion.
pub fn storey_q_values(p_values: &[f64], lambda: f64) -> Vec<f64> {
    step_up(p_values, storey_pi0(p_values, lambda))
}

/// Turns observed scores plus a null ensemble into a [`RankedTable`].
#[derive(Debug, Clone)]
pub struct SignificanceTester {
    method: QValueMethod,
    storey_lambda: f64,
}

impl SignificanceTester {
    pub fn new(method: QValueMethod, storey_lambda: f64) -> Self {
        Self { method, storey_lambda }
    }

    pub fn from_config(config: &SignificanceConfig) -> Self {
        Self::new(config.q_method, config.storey_lambda)
    }

    pub fn q_values(&self, p_values: &[f64]) -> Vec<f64> {
        match self.method {
            QValueMethod::BenjaminiHochberg => benjamini_hochberg(p_values),
            QValueMethod::Storey => storey_q_values(p_values, self.storey_lambda),
        }
    }

    /// `observed` holds one (experiment id, connectivity score) per experiment.
    pub fn test(&self, observed: Vec<(String, f64)>, null: &NullEnsemble) -> Result<RankedTable> {
        if null.is_empty() {
            return Err(ReversaError::statistical(format!(
                "null ensemble for sizes {:?} is empty",
                null.size_key()
            )));
        }
        if let Some((id, score)) = observed.iter().find(|(_, s)| !s.is_finite()) {
            return Err(ReversaError::statistical(format!(
                "non-finite connectivity score {score} for experiment '{id}'"
            )));
        }

        let p_values: Vec<f64> = observed.iter().map(|(_, s)| empirical_p_value(*s, null)).collect();
        let q_values = self.q_values(&p_values);

        let records = observed
            .into_iter()
            .zip(p_values.into_iter().zip(q_values))
            .map(|((experiment_id, connectivity_score), (p_value, q_value))| ScoreRecord {
                experiment_id,
                connectivity_score,
                p_value,
                q_value,
            })
            .collect();
        let table = RankedTable::new(records);

        info!(
            "Significance: {} experiments against {} null scores, min q = {:.3e}",
            table.len(),
            null.len(),
            table.iter().map(|r| r.q_value).fold(f64::INFINITY, f64::min)
        );
        Ok(table)
    }
}

impl Default for SignificanceTester {
    fn default() -> Self {
        Self::new(QValueMethod::BenjaminiHochberg, 0.5)
    }
}
