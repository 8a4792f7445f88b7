//! reversa-common — Shared types, errors, and configuration used across all Reversa crates.

pub mod error;
pub mod entities;
pub mod config;

// Re-export commonly used types
pub use config::{AnalysisConfig, SignatureConfig, SignificanceConfig, SweepConfig, AnnotationConfig};
pub use entities::{RawSignatureTable, ExpressionMatrix, ExperimentMetadata};
pub use error::{ReversaError, Result};
