//! Tabular inputs exchanged between the loaders and the scoring engine.

use serde::{Deserialize, Deserializer, Serialize};

/// A raw disease differential-expression table, cells kept as text.
///
/// Column roles (gene identifier, fold-change columns, p-value) are
/// resolved by name at preparation time, not here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawSignatureTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawSignatureTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self { headers, rows: Vec::new() }
    }

    /// Append a row. Short rows are padded with empty cells.
    pub fn push_row<I, S>(&mut self, cells: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut row: Vec<String> = cells.into_iter().map(Into::into).collect();
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    /// Index of a column by exact header name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Indices of all columns whose header starts with `prefix`, in table order.
    pub fn columns_with_prefix(&self, prefix: &str) -> Vec<usize> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.starts_with(prefix))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// How the values of an [`ExpressionMatrix`] should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatrixKind {
    /// Expression-change values (e.g. log2 fold-change); ranked on load.
    #[default]
    Expression,
    /// Pre-computed 1-based ranks, most up-regulated = 1.
    Ranks,
}

/// Reference compound database as a genes × experiments matrix.
///
/// `columns[e][g]` is the value of gene `g` in experiment `e`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpressionMatrix {
    pub genes: Vec<String>,
    pub experiments: Vec<String>,
    pub columns: Vec<Vec<f64>>,
    #[serde(default)]
    pub kind: MatrixKind,
}

impl ExpressionMatrix {
    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }

    pub fn n_experiments(&self) -> usize {
        self.experiments.len()
    }
}

/// Per-experiment compound metadata used for post-hoc annotation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentMetadata {
    pub experiment_id: String,
    /// Compound name
    pub name: String,
    #[serde(default)]
    pub cell_line: Option<String>,
    #[serde(default)]
    pub concentration: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    /// 1 when the experiment passed replicate validation. A blank cell reads as 0.
    #[serde(default, deserialize_with = "blank_as_zero")]
    pub valid: u8,
    #[serde(default)]
    pub drugbank_id: Option<String>,
}

fn blank_as_zero<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u8>::deserialize(deserializer)?.unwrap_or(0))
}
