//! CDP Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the City Data Pipeline workspace.
//!
//! # Overview
//!
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` variables
//! - **Error Handling**: the shared [`CdpError`] type and [`Result`] alias
//! - **Environment**: typed lookups of configuration variables
//!
//! # Example
//!
//! ```no_run
//! use cdp_common::env::env_or;
//! use cdp_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     let page_limit: usize = env_or("CDP_FETCH_PAGE_LIMIT", 500)?;
//!     tracing::info!(page_limit, "configured");
//!     Ok(())
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{CdpError, Result};
