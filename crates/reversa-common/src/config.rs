//! Analysis configuration for a reversal run.
//!
//! Loaded from YAML, JSON or TOML. Every field has a default so a profile
//! only needs to name what it changes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ReversaError, Result};

/// Complete configuration for one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Execution mode
    #[serde(default)]
    pub mode: RunMode,

    /// Seed controlling every permutation draw of the run
    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default)]
    pub signature: SignatureConfig,

    #[serde(default)]
    pub significance: SignificanceConfig,

    #[serde(default)]
    pub sweep: SweepConfig,

    #[serde(default)]
    pub annotation: AnnotationConfig,
}

fn default_seed() -> u64 { 123 }

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            seed: default_seed(),
            signature: SignatureConfig::default(),
            significance: SignificanceConfig::default(),
            sweep: SweepConfig::default(),
            annotation: AnnotationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Single,
    Sweep,
}

// ── Signature ────────────────────────────────────────────────────────────────

/// How several fold-change columns are reduced to one value per gene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CombineRule {
    #[default]
    Average,
    Median,
    First,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureConfig {
    /// Gene identifier column
    #[serde(default = "default_gene_key")]
    pub gene_key: String,

    /// Prefix shared by all fold-change columns
    #[serde(default = "default_logfc_prefix")]
    pub logfc_prefix: String,

    /// Minimum |fold-change| kept in single mode
    #[serde(default = "default_logfc_cutoff")]
    pub logfc_cutoff: f64,

    /// Optional p-value column
    #[serde(default)]
    pub pval_key: Option<String>,

    /// Maximum p-value kept, only applied with `pval_key`
    #[serde(default)]
    pub pval_cutoff: Option<f64>,

    #[serde(default)]
    pub combine_log2fc: CombineRule,
}

fn default_gene_key() -> String { "gene".to_string() }
fn default_logfc_prefix() -> String { "log2FC".to_string() }
fn default_logfc_cutoff() -> f64 { 1.0 }

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            gene_key: default_gene_key(),
            logfc_prefix: default_logfc_prefix(),
            logfc_cutoff: default_logfc_cutoff(),
            pval_key: None,
            pval_cutoff: None,
            combine_log2fc: CombineRule::default(),
        }
    }
}

// ── Significance ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QValueMethod {
    #[default]
    BenjaminiHochberg,
    Storey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignificanceConfig {
    /// Null ensemble size
    #[serde(default = "default_permutations")]
    pub permutations: usize,

    /// q-value below which a compound counts as a hit
    #[serde(default = "default_q_thresh")]
    pub q_thresh: f64,

    /// Keep only negative (reversing) connectivity scores in hit lists
    #[serde(default = "default_true")]
    pub reversal_only: bool,

    #[serde(default)]
    pub q_method: QValueMethod,

    /// Tuning parameter λ for Storey's π₀ estimate
    #[serde(default = "default_storey_lambda")]
    pub storey_lambda: f64,
}

fn default_permutations() -> usize { 100_000 }
fn default_q_thresh() -> f64 { 0.05 }
fn default_true() -> bool { true }
fn default_storey_lambda() -> f64 { 0.5 }

impl Default for SignificanceConfig {
    fn default() -> Self {
        Self {
            permutations: default_permutations(),
            q_thresh: default_q_thresh(),
            reversal_only: true,
            q_method: QValueMethod::default(),
            storey_lambda: default_storey_lambda(),
        }
    }
}

// ── Sweep ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RobustRule {
    /// Significant at every evaluated threshold
    #[default]
    All,
    /// Significant at ≥ `robust_k` thresholds
    #[serde(rename = "k_of_n")]
    KOfN,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    #[default]
    Mean,
    Median,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Generate the grid from 0 in `step` increments instead of using `cutoffs`
    #[serde(default = "default_true")]
    pub auto_grid: bool,

    /// Explicit cutoff grid
    #[serde(default)]
    pub cutoffs: Vec<f64>,

    #[serde(default = "default_step")]
    pub step: f64,

    /// Minimum gene count as a fraction of the uncut signature
    #[serde(default = "default_min_frac")]
    pub min_frac: f64,

    /// Minimum gene count (up + down)
    #[serde(default = "default_min_genes")]
    pub min_genes: usize,

    /// Halt the grid at the first too-small cutoff instead of skipping it
    #[serde(default = "default_true")]
    pub stop_on_small: bool,

    #[serde(default)]
    pub robust_rule: RobustRule,

    #[serde(default = "default_robust_k")]
    pub robust_k: usize,

    #[serde(default)]
    pub aggregate: Aggregate,
}

fn default_step() -> f64 { 0.1 }
fn default_min_frac() -> f64 { 0.2 }
fn default_min_genes() -> usize { 200 }
fn default_robust_k() -> usize { 2 }

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            auto_grid: true,
            cutoffs: vec![],
            step: default_step(),
            min_frac: default_min_frac(),
            min_genes: default_min_genes(),
            stop_on_small: true,
            robust_rule: RobustRule::default(),
            robust_k: default_robust_k(),
            aggregate: Aggregate::default(),
        }
    }
}

// ── Annotation ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationConfig {
    /// Drop experiments whose metadata `valid` flag is not 1
    #[serde(default = "default_true")]
    pub require_valid: bool,

    /// Drop experiments without a DrugBank identifier
    #[serde(default)]
    pub require_drugbank: bool,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            require_valid: true,
            require_drugbank: false,
        }
    }
}

// ── Helper Methods ───────────────────────────────────────────────────────────

impl AnalysisConfig {
    /// Load from YAML file
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| ReversaError::config(format!("invalid YAML configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from JSON file
    pub fn from_json(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ReversaError::config(format!("invalid JSON configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML file
    pub fn from_toml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ReversaError::config(format!("invalid TOML configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save to YAML file
    pub fn to_yaml(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject option values no run could use.
    pub fn validate(&self) -> Result<()> {
        let sig = &self.signature;
        if sig.gene_key.trim().is_empty() {
            return Err(ReversaError::config("gene_key must not be empty"));
        }
        if sig.logfc_prefix.is_empty() {
            return Err(ReversaError::config("logfc_prefix must not be empty"));
        }
        if !sig.logfc_cutoff.is_finite() || sig.logfc_cutoff < 0.0 {
            return Err(ReversaError::config(format!(
                "logfc_cutoff must be a non-negative number, got {}",
                sig.logfc_cutoff
            )));
        }
        if let Some(p) = sig.pval_cutoff {
            if !(0.0..=1.0).contains(&p) {
                return Err(ReversaError::config(format!("pval_cutoff must lie in [0, 1], got {p}")));
            }
        }

        let stats = &self.significance;
        if stats.permutations == 0 {
            return Err(ReversaError::config("permutations must be at least 1"));
        }
        if !(stats.q_thresh > 0.0 && stats.q_thresh <= 1.0) {
            return Err(ReversaError::config(format!(
                "q_thresh must lie in (0, 1], got {}",
                stats.q_thresh
            )));
        }
        if stats.q_method == QValueMethod::Storey
            && !(stats.storey_lambda > 0.0 && stats.storey_lambda < 1.0)
        {
            return Err(ReversaError::config(format!(
                "storey_lambda must lie in (0, 1), got {}",
                stats.storey_lambda
            )));
        }

        if self.mode == RunMode::Sweep {
            let sweep = &self.sweep;
            if sweep.auto_grid {
                if !(sweep.step.is_finite() && sweep.step > 0.0) {
                    return Err(ReversaError::config(format!("step must be positive, got {}", sweep.step)));
                }
            } else if sweep.cutoffs.is_empty() {
                return Err(ReversaError::config("auto_grid is off but no cutoffs were given"));
            }
            if let Some(bad) = sweep.cutoffs.iter().find(|c| !c.is_finite() || **c < 0.0) {
                return Err(ReversaError::config(format!("cutoffs must be non-negative, got {bad}")));
            }
            if !(0.0..=1.0).contains(&sweep.min_frac) {
                return Err(ReversaError::config(format!(
                    "min_frac must lie in [0, 1], got {}",
                    sweep.min_frac
                )));
            }
            if sweep.robust_rule == RobustRule::KOfN && sweep.robust_k == 0 {
                return Err(ReversaError::config("robust_k must be at least 1 for k_of_n"));
            }
        }

        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AnalysisConfig::default();
        assert_eq!(config.mode, RunMode::Single);
        assert_eq!(config.seed, 123);
        assert_eq!(config.significance.permutations, 100_000);
        assert_eq!(config.signature.combine_log2fc, CombineRule::Average);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
mode: sweep
seed: 7
sweep:
  robust_rule: k_of_n
  robust_k: 3
  aggregate: median
"#;
        let config = AnalysisConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.mode, RunMode::Sweep);
        assert_eq!(config.seed, 7);
        assert_eq!(config.sweep.robust_rule, RobustRule::KOfN);
        assert_eq!(config.sweep.robust_k, 3);
        assert_eq!(config.sweep.aggregate, Aggregate::Median);
        assert_eq!(config.sweep.min_genes, 200);
        assert_eq!(config.signature.gene_key, "gene");
    }

    #[test]
    fn test_unknown_enum_value_is_config_error() {
        let yaml = "signature:\n  combine_log2fc: geometric\n";
        let err = AnalysisConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, ReversaError::Config(_)), "got {err:?}");
    }

    #[test]
    fn test_validate_rejects_bad_sweep() {
        let mut config = AnalysisConfig { mode: RunMode::Sweep, ..Default::default() };
        config.sweep.step = 0.0;
        assert!(matches!(config.validate(), Err(ReversaError::Config(_))));

        config.sweep.step = 0.1;
        config.sweep.robust_rule = RobustRule::KOfN;
        config.sweep.robust_k = 0;
        assert!(matches!(config.validate(), Err(ReversaError::Config(_))));

        config.sweep.robust_k = 1;
        config.sweep.auto_grid = false;
        assert!(matches!(config.validate(), Err(ReversaError::Config(_))));

        config.sweep.cutoffs = vec![0.5, 1.0];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_significance() {
        let mut config = AnalysisConfig::default();
        config.significance.q_thresh = 0.0;
        assert!(config.validate().is_err());

        config.significance.q_thresh = 0.1;
        config.significance.permutations = 0;
        assert!(config.validate().is_err());

        config.significance.permutations = 10;
        config.significance.q_method = QValueMethod::Storey;
        config.significance.storey_lambda = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_and_json_loaders() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("profile.toml");
        std::fs::write(
            &toml_path,
            "mode = \"single\"\n[signature]\nlogfc_cutoff = 1.5\npval_key = \"padj\"\npval_cutoff = 0.05\n",
        )
        .unwrap();
        let config = AnalysisConfig::from_toml(&toml_path).unwrap();
        assert_eq!(config.signature.logfc_cutoff, 1.5);
        assert_eq!(config.signature.pval_key.as_deref(), Some("padj"));

        let json_path = dir.path().join("profile.json");
        std::fs::write(&json_path, r#"{"significance": {"q_method": "storey"}}"#).unwrap();
        let config = AnalysisConfig::from_json(&json_path).unwrap();
        assert_eq!(config.significance.q_method, QValueMethod::Storey);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.yaml");
        let mut config = AnalysisConfig::default();
        config.sweep.cutoffs = vec![0.5, 1.0];
        config.to_yaml(&path).unwrap();
        let parsed = AnalysisConfig::from_yaml(&path).unwrap();
        assert_eq!(parsed.sweep.cutoffs, vec![0.5, 1.0]);
        assert_eq!(parsed.seed, config.seed);
    }
}
