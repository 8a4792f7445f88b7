//! CSV writers for result tables.

use std::path::Path;

use anyhow::{Context, Result};
use reversa_ranker::sweep::{RobustHit, ThresholdSummary};
use reversa_ranker::{AnnotatedRecord, RankedTable};
use serde::Serialize;
use tracing::info;

/// Flat CSV view of one annotated row.
#[derive(Debug, Serialize)]
struct AnnotatedRow<'a> {
    experiment_id: &'a str,
    compound: &'a str,
    connectivity_score: f64,
    p_value: f64,
    q_value: f64,
    cell_line: Option<&'a str>,
    concentration: Option<&'a str>,
    duration: Option<&'a str>,
    drugbank_id: Option<&'a str>,
}

impl<'a> From<&'a AnnotatedRecord> for AnnotatedRow<'a> {
    fn from(r: &'a AnnotatedRecord) -> Self {
        Self {
            experiment_id: &r.record.experiment_id,
            compound: &r.compound,
            connectivity_score: r.record.connectivity_score,
            p_value: r.record.p_value,
            q_value: r.record.q_value,
            cell_line: r.cell_line.as_deref(),
            concentration: r.concentration.as_deref(),
            duration: r.duration.as_deref(),
            drugbank_id: r.drugbank_id.as_deref(),
        }
    }
}

/// Serialize `rows` with a header row.
pub fn to_csv<T: Serialize>(rows: impl IntoIterator<Item = T>) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    writer.into_inner().context("Failed to flush CSV buffer")
}

async fn write_file(path: &Path, bytes: Vec<u8>, what: &str, rows: usize) -> Result<()> {
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {} to {:?}", what, path))?;
    info!("Wrote {} {} rows to {:?}", rows, what, path);
    Ok(())
}

pub async fn write_ranked_table(path: impl AsRef<Path>, table: &RankedTable) -> Result<()> {
    let bytes = to_csv(table.iter())?;
    write_file(path.as_ref(), bytes, "ranked", table.len()).await
}

pub async fn write_annotated(path: impl AsRef<Path>, rows: &[AnnotatedRecord]) -> Result<()> {
    let bytes = to_csv(rows.iter().map(AnnotatedRow::from))?;
    write_file(path.as_ref(), bytes, "annotated", rows.len()).await
}

pub async fn write_robust_hits(path: impl AsRef<Path>, hits: &[RobustHit]) -> Result<()> {
    let bytes = to_csv(hits)?;
    write_file(path.as_ref(), bytes, "robust hit", hits.len()).await
}

pub async fn write_threshold_summary(path: impl AsRef<Path>, summary: &[ThresholdSummary]) -> Result<()> {
    let bytes = to_csv(summary)?;
    write_file(path.as_ref(), bytes, "threshold summary", summary.len()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use reversa_ranker::sweep::ThresholdStatus;
    use reversa_ranker::ScoreRecord;

    #[test]
    fn test_summary_csv_layout() {
        let rows = vec![
            ThresholdSummary {
                cutoff: 0.5,
                n_up: 120,
                n_down: 98,
                gene_count: 218,
                n_significant: 4,
                status: ThresholdStatus::Evaluated,
                reason: None,
            },
            ThresholdSummary {
                cutoff: 1.0,
                n_up: 0,
                n_down: 40,
                gene_count: 40,
                n_significant: 0,
                status: ThresholdStatus::Skipped,
                reason: Some("no up-regulated genes survive cutoff 1".into()),
            },
        ];
        let text = String::from_utf8(to_csv(&rows).unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "cutoff,n_up,n_down,gene_count,n_significant,status,reason");
        assert_eq!(lines[1], "0.5,120,98,218,4,evaluated,");
        assert_eq!(lines[2], "1.0,0,40,40,0,skipped,no up-regulated genes survive cutoff 1");
    }

    #[test]
    fn test_ranked_csv_header() {
        let table = RankedTable::new(vec![ScoreRecord {
            experiment_id: "e1".into(),
            connectivity_score: -1.25,
            p_value: 0.001,
            q_value: 0.01,
        }]);
        let text = String::from_utf8(to_csv(table.iter()).unwrap()).unwrap();
        assert!(text.starts_with("experiment_id,connectivity_score,p_value,q_value\n"));
        assert!(text.contains("e1,-1.25,0.001,0.01"));
    }
}
