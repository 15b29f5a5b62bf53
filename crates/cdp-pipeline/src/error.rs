//! Pipeline error types
//!
//! Record-level failures are [`DropReason`](crate::clean::DropReason)s and never
//! abort a batch. Everything here is batch-level or below: it fails the current
//! batch, is logged by the stage runner, and consumption continues.

use std::time::Duration;
use thiserror::Error;

/// Batch-level pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Source name is not registered
    #[error("Unknown source '{0}'")]
    UnknownSource(String),

    /// A source schema violates its structural invariants
    #[error("Invalid schema for '{schema}': {reason}")]
    InvalidSchema { schema: String, reason: String },

    /// Inferred columns disagree with the relation or with a row
    #[error("Schema inference mismatch on relation '{relation}': {detail}")]
    SchemaInferenceColumnMismatch { relation: String, detail: String },

    /// Rows could not be written
    #[error("Persistence failed for relation '{relation}': {reason}")]
    Persistence { relation: String, reason: String },

    /// SQL query or connection error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Payload was not the expected JSON shape
    #[error("Failed to decode batch: {0}")]
    Decode(#[from] serde_json::Error),

    /// Persist stage received a batch with no records
    #[error("Empty batch for '{0}'")]
    EmptyBatch(String),

    /// A collaborator call exceeded its deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Publish or ack failed after retries
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Reverse geocoding service returned an error status
    #[error("Geocoder error: {0}")]
    Geocoder(String),

    /// Invalid runtime configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn invalid_schema(schema: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSchema {
            schema: schema.to_string(),
            reason: reason.into(),
        }
    }

    pub fn column_mismatch(relation: &str, detail: impl Into<String>) -> Self {
        Self::SchemaInferenceColumnMismatch {
            relation: relation.to_string(),
            detail: detail.into(),
        }
    }

    pub fn persistence(relation: &str, reason: impl Into<String>) -> Self {
        Self::Persistence {
            relation: relation.to_string(),
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Message transport failures
///
/// The stage runner retries these according to its retry policy; they are
/// never handed to a stage processor.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Queue database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_relation() {
        let err = PipelineError::column_mismatch("taxi_trips", "column 'fare' not in relation");
        assert_eq!(
            err.to_string(),
            "Schema inference mismatch on relation 'taxi_trips': column 'fare' not in relation"
        );
    }

    #[test]
    fn test_timeout_message() {
        let err = PipelineError::Timeout {
            operation: "persist",
            after: Duration::from_secs(3),
        };
        assert_eq!(err.to_string(), "persist timed out after 3s");
    }

    #[test]
    fn test_transport_error_converts() {
        let err: PipelineError = TransportError::Unavailable("connection refused".into()).into();
        assert!(matches!(err, PipelineError::Transport(_)));
    }
}
