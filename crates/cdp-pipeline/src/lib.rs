//! CDP Pipeline Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Multi-stage ETL over the City of Chicago open-data portal.
//!
//! # Overview
//!
//! - **Fetch**: pages Socrata datasets onto `<source>_raw` topics
//! - **Clean**: applies a per-source field contract, dropping records that violate it
//! - **Enrich**: derives fields such as zip codes through a reverse geocoder
//! - **Persist**: infers a relation schema from the first record and appends rows
//!
//! # Architecture
//!
//! Stages communicate only through a [`Transport`](transport::Transport). Each
//! `(stage, source)` pair runs as an independent [`StageRunner`](router::StageRunner):
//!
//! ```text
//! fetch -> <source>_raw -> clean -> <source>_bronze -> enrich -> <source>_silver -> persist -> <source>
//! ```
//!
//! Record-level failures are counted as [`DropReason`](clean::DropReason)s and
//! never abort a batch. Batch-level failures are [`PipelineError`]s, logged by
//! the runner before it moves on to the next delivery.

pub mod clean;
pub mod commands;
pub mod config;
pub mod db;
pub mod enrich;
pub mod error;
pub mod fetch;
pub mod persist;
pub mod record;
pub mod router;
pub mod schema;
pub mod transport;

// Re-export commonly used types
pub use config::{PipelineConfig, TransportKind};
pub use error::{PipelineError, PipelineResult, TransportError};
pub use router::{Stage, StageRunner};
pub use schema::{SchemaRegistry, SourceSchema};

use clap::{Parser, Subcommand};

/// CDP - City Data Pipeline
#[derive(Parser, Debug)]
#[command(name = "cdp")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List registered sources
    Sources,

    /// Page source datasets onto their raw topics
    Fetch {
        /// Sources to fetch (defaults to all)
        #[arg(short, long = "source")]
        sources: Vec<String>,
    },

    /// Run one stage until interrupted
    Stage {
        /// Stage to run
        #[arg(value_enum)]
        stage: Stage,

        /// Sources to consume (defaults to all)
        #[arg(short, long = "source")]
        sources: Vec<String>,

        /// Stop once every input topic is empty
        #[arg(long)]
        until_idle: bool,
    },

    /// Fetch and run every stage in this process
    Run {
        /// Transport between stages (overrides CDP_TRANSPORT)
        #[arg(short, long, value_enum)]
        transport: Option<TransportKind>,

        /// Sources to run (defaults to all)
        #[arg(short, long = "source")]
        sources: Vec<String>,

        /// Skip the fetch step
        #[arg(long)]
        no_fetch: bool,
    },
}
