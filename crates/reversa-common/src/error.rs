use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReversaError {
    /// Missing column or key, invalid option value. Fails the whole run.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Empty or too-small gene set at a cutoff. Fatal in single mode,
    /// downgraded to a skip by the sweep engine.
    #[error("Data error: {0}")]
    Data(String),

    #[error("Statistical error: {0}")]
    Statistical(String),

    /// A pipeline stage was invoked out of order.
    #[error("Invalid pipeline transition: cannot go from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("Annotation error: {0}")]
    Annotation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReversaError {
    pub fn config(msg: impl Into<String>) -> Self {
        ReversaError::Config(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        ReversaError::Data(msg.into())
    }

    pub fn statistical(msg: impl Into<String>) -> Self {
        ReversaError::Statistical(msg.into())
    }

    pub fn is_data_error(&self) -> bool {
        matches!(self, ReversaError::Data(_))
    }

    /// True for errors the sweep engine records as a skipped cutoff
    /// instead of failing the sweep.
    pub fn is_cutoff_local(&self) -> bool {
        matches!(self, ReversaError::Data(_) | ReversaError::Annotation(_))
    }
}

pub type Result<T> = std::result::Result<T, ReversaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_data_errors_are_skippable() {
        assert!(ReversaError::data("no up-regulated genes survive cutoff 1.5").is_data_error());
        assert!(!ReversaError::statistical("empty null ensemble").is_data_error());
        assert!(!ReversaError::config("missing column 'gene'").is_data_error());
    }

    #[test]
    fn test_annotation_errors_stay_local_to_a_cutoff() {
        assert!(ReversaError::Annotation("metadata unavailable".into()).is_cutoff_local());
        assert!(ReversaError::data("no down-regulated genes survive cutoff 2").is_cutoff_local());
        assert!(!ReversaError::statistical("empty null ensemble").is_cutoff_local());
        assert!(!ReversaError::Annotation("metadata unavailable".into()).is_data_error());
    }

    #[test]
    fn test_message_names_precondition() {
        let err = ReversaError::data("no up-regulated genes survive cutoff 1.5");
        assert_eq!(err.to_string(), "Data error: no up-regulated genes survive cutoff 1.5");
    }
}
