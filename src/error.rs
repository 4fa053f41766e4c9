//! Error types for gt-rank

use thiserror::Error;

/// Result type for gt-rank operations.
pub type Result<T> = std::result::Result<T, AuditError>;

/// Errors raised while validating inputs or scoring a dataset.
#[derive(Error, Debug)]
pub enum AuditError {
    /// Error during JSON parsing or serialization.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Error while parsing a YAML configuration file.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Error during I/O operations.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A tunable, weight or method name is not acceptable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Annotation arrays are malformed.
    #[error("Invalid annotation: {0}")]
    InvalidAnnotation(String),

    /// Prediction arrays are malformed.
    #[error("Invalid prediction: {0}")]
    InvalidPrediction(String),

    /// Two per-image sequences do not have the same length.
    #[error("Length mismatch: {0}")]
    LengthMismatch(String),

    /// Neither raw inputs nor precomputed inputs were supplied.
    #[error("Missing inputs: {0}")]
    MissingInputs(String),
}
