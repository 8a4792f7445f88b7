//! Readers for the delimited input tables.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use reversa_common::config::AnalysisConfig;
use reversa_common::entities::MatrixKind;
use reversa_common::{ExperimentMetadata, ExpressionMatrix, RawSignatureTable};
use reversa_ranker::GeneIdMapper;
use tracing::{debug, info, warn};

/// Tab for `.tsv` / `.txt`, comma otherwise.
pub fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("tsv") | Some("txt") => b'\t',
        _ => b',',
    }
}

async fn reader_for(path: &Path) -> Result<csv::Reader<std::io::Cursor<Vec<u8>>>> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(delimiter_for(path))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(std::io::Cursor::new(content)))
}

/// Load a raw disease signature table. Cells stay as text; column roles
/// are resolved later by the signature preparer.
pub async fn load_signature_table(path: impl AsRef<Path>) -> Result<RawSignatureTable> {
    let path = path.as_ref();
    debug!("Loading signature table from {:?}", path);
    let mut reader = reader_for(path).await?;

    let headers = reader
        .headers()
        .with_context(|| format!("Missing header row in {:?}", path))?
        .iter()
        .map(str::to_string)
        .collect();
    let mut table = RawSignatureTable::new(headers);

    for (line, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Bad record at row {} of {:?}", line + 2, path))?;
        table.push_row(record.iter());
    }

    info!("Loaded signature table: {} rows, {} columns", table.len(), table.headers.len());
    Ok(table)
}

fn parse_value(cell: &str) -> f64 {
    cell.parse::<f64>().unwrap_or(f64::NAN)
}

/// Load a genes × experiments matrix. The first column holds gene ids and
/// the remaining header cells name the experiments. Missing or non-numeric
/// cells become NaN and rank last.
pub async fn load_reference_matrix(path: impl AsRef<Path>, kind: MatrixKind) -> Result<ExpressionMatrix> {
    let path = path.as_ref();
    debug!("Loading reference matrix from {:?}", path);
    let mut reader = reader_for(path).await?;

    let headers = reader.headers().with_context(|| format!("Missing header row in {:?}", path))?;
    let experiments: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();
    if experiments.is_empty() {
        bail!("Reference matrix {:?} has no experiment columns", path);
    }

    let mut genes = Vec::new();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); experiments.len()];
    let mut missing = 0usize;

    for (line, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Bad record at row {} of {:?}", line + 2, path))?;
        if record.len() != experiments.len() + 1 {
            bail!(
                "Row {} of {:?} has {} cells, expected {}",
                line + 2,
                path,
                record.len(),
                experiments.len() + 1
            );
        }
        let Some(gene) = record.get(0).filter(|g| !g.is_empty()) else {
            bail!("Row {} of {:?} has no gene identifier", line + 2, path);
        };
        genes.push(gene.to_string());

        for (column, cell) in columns.iter_mut().zip(record.iter().skip(1)) {
            let value = parse_value(cell);
            if value.is_nan() {
                missing += 1;
            }
            column.push(value);
        }
    }

    if missing > 0 {
        warn!("Reference matrix {:?} has {} missing values", path, missing);
    }
    info!(
        "Loaded reference matrix: {} genes, {} experiments",
        genes.len(),
        experiments.len()
    );
    Ok(ExpressionMatrix { genes, experiments, columns, kind })
}

/// Load per-experiment compound metadata. Columns are matched to
/// [`ExperimentMetadata`] fields by header name.
pub async fn load_experiment_metadata(path: impl AsRef<Path>) -> Result<Vec<ExperimentMetadata>> {
    let path = path.as_ref();
    debug!("Loading experiment metadata from {:?}", path);
    let mut reader = reader_for(path).await?;

    let mut metadata = Vec::new();
    for (line, result) in reader.deserialize::<ExperimentMetadata>().enumerate() {
        let row = result.with_context(|| format!("Bad metadata row {} of {:?}", line + 2, path))?;
        metadata.push(row);
    }

    info!("Loaded metadata for {} experiments", metadata.len());
    Ok(metadata)
}

/// Load a two-column identifier map (`source id`, `reference id`).
/// Blank targets are skipped.
pub async fn load_gene_mapper(path: impl AsRef<Path>) -> Result<GeneIdMapper> {
    let path = path.as_ref();
    let mut reader = reader_for(path).await?;

    let mut mapper = GeneIdMapper::new();
    let mut skipped = 0usize;
    for (line, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Bad record at row {} of {:?}", line + 2, path))?;
        match (record.get(0), record.get(1)) {
            (Some(from), Some(to)) if !from.is_empty() && !to.is_empty() => mapper.insert(from, to),
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        debug!("Skipped {} incomplete rows in {:?}", skipped, path);
    }
    info!("Loaded {} gene identifier mappings", mapper.len());
    Ok(mapper)
}

/// Load an analysis configuration, picking the format from the extension.
pub fn load_config(path: impl AsRef<Path>) -> Result<AnalysisConfig> {
    let path = path.as_ref();
    let config = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => AnalysisConfig::from_yaml(path)?,
        Some("json") => AnalysisConfig::from_json(path)?,
        Some("toml") => AnalysisConfig::from_toml(path)?,
        other => bail!("Unsupported config format {:?} for {:?}", other, path),
    };
    Ok(config)
}

/// Experiments present in the matrix but absent from the metadata.
pub fn unannotated_experiments<'a>(
    matrix: &'a ExpressionMatrix,
    metadata: &[ExperimentMetadata],
) -> Vec<&'a str> {
    let known: HashSet<&str> = metadata.iter().map(|m| m.experiment_id.as_str()).collect();
    matrix
        .experiments
        .iter()
        .map(String::as_str)
        .filter(|e| !known.contains(e))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delimiter_by_extension() {
        assert_eq!(delimiter_for(Path::new("sig.tsv")), b'\t');
        assert_eq!(delimiter_for(Path::new("sig.TXT")), b'\t');
        assert_eq!(delimiter_for(Path::new("sig.csv")), b',');
        assert_eq!(delimiter_for(Path::new("sig")), b',');
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("1.5"), 1.5);
        assert!(parse_value("NA").is_nan());
        assert!(parse_value("").is_nan());
    }
}
