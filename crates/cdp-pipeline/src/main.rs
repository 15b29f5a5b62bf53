//! CDP - Main entry point

use cdp_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use cdp_pipeline::{commands, Cli, Commands, PipelineConfig, SchemaRegistry};
use clap::Parser;
use std::process;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("cdp")
        .filter_directives("sqlx=warn,hyper=warn,reqwest=warn")
        .build();

    // Environment variables take precedence over the flags
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    let _guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        }
    };

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn execute_command(cli: &Cli) -> anyhow::Result<()> {
    let registry = SchemaRegistry::builtin()?;

    if let Commands::Sources = cli.command {
        commands::sources(&registry);
        return Ok(());
    }

    let config = PipelineConfig::load()?;
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown(cancel.clone()));

    match &cli.command {
        Commands::Sources => Ok(()),
        Commands::Fetch { sources } => commands::fetch(&config, &registry, sources, cancel).await,
        Commands::Stage {
            stage,
            sources,
            until_idle,
        } => commands::stage(&config, &registry, *stage, sources, *until_idle, cancel).await,
        Commands::Run {
            transport,
            sources,
            no_fetch,
        } => {
            let transport = transport.unwrap_or(config.transport.kind);
            commands::run(&config, &registry, transport, sources, !no_fetch, cancel).await
        }
    }
}

/// Cancel `token` on Ctrl+C or SIGTERM
///
/// Runners finish the batch in hand before observing the cancellation.
async fn cancel_on_shutdown(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, finishing in-flight batches"),
        _ = terminate => info!("Received terminate signal, finishing in-flight batches"),
    }

    token.cancel();
}
