//! Declare an error type for configuration validation.

/// An error related to a value read from a configuration source.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigBuildError {
    /// A mandatory field was not present.
    #[error("field was not provided: {0}")]
    MissingField(String),
    /// A single field had a value that proved to be unusable.
    #[error("value of {field} was incorrect: {problem}")]
    Invalid {
        /// The name of the offending field.
        field: String,
        /// What was wrong with it.
        problem: String,
    },
    /// Multiple fields are inconsistent with each other.
    #[error("fields {fields:?} are inconsistent: {problem}")]
    Inconsistent {
        /// The names of the offending fields.
        fields: Vec<String>,
        /// What is inconsistent about them.
        problem: String,
    },
}

impl ConfigBuildError {
    /// Return a new `ConfigBuildError` that prefixes its field name(s) with
    /// `prefix` and a dot.
    pub fn within(&self, prefix: &str) -> Self {
        use ConfigBuildError::*;
        match self {
            MissingField(f) => MissingField(format!("{prefix}.{f}")),
            Invalid { field, problem } => Invalid {
                field: format!("{prefix}.{field}"),
                problem: problem.clone(),
            },
            Inconsistent { fields, problem } => Inconsistent {
                fields: fields.iter().map(|f| format!("{prefix}.{f}")).collect(),
                problem: problem.clone(),
            },
        }
    }
}
