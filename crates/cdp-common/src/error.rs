//! Error types shared across the CDP workspace

use thiserror::Error;

/// Result type alias for shared CDP helpers
pub type Result<T> = std::result::Result<T, CdpError>;

/// Errors raised by the shared helpers
#[derive(Error, Debug)]
pub enum CdpError {
    /// A set environment variable did not parse as its expected type
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidEnv {
        key: String,
        value: String,
        reason: String,
    },
}
