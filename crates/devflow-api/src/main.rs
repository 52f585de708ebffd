//! devflow CLI and REST API entry point.
//!
//! Binary name: `devflow`
//!
//! Parses CLI arguments, loads the engine configuration, wires the engine,
//! then dispatches to the command handler or starts the API server.

mod cli;
mod http;
mod state;

use anyhow::Context;
use clap::Parser;

use devflow_infra::config::resolve_data_dir;
use devflow_observe::tracing_setup::{filter_for_verbosity, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.quiet && cli.verbose == 0 {
        "error"
    } else {
        filter_for_verbosity(cli.verbose)
    };
    init_tracing(filter, cli.log_format.into(), cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    let outcome = dispatch(cli).await;
    shutdown_tracing();

    match outcome {
        Ok(true) => Ok(()),
        // The failure was already reported by the command.
        Ok(false) => std::process::exit(1),
        Err(e) => Err(e),
    }
}

/// Run the selected command. `Ok(false)` means it completed but failed.
async fn dispatch(cli: Cli) -> anyhow::Result<bool> {
    // Validation only reads the given file.
    if let Commands::Validate { file } = &cli.command {
        cli::workflow::validate_workflow(file, cli.json)?;
        return Ok(true);
    }

    let data_dir = resolve_data_dir(cli.data_dir.as_deref());

    match cli.command {
        Commands::Run {
            workflow,
            payload,
            project,
        } => {
            let state = AppState::init(data_dir, None).await?;
            let success =
                cli::workflow::run_workflow(&state, &workflow, payload.as_deref(), project, cli.json)
                    .await?;
            state.shutdown();
            Ok(success)
        }

        Commands::List => {
            let state = AppState::init(data_dir, None).await?;
            cli::workflow::list_workflows(&state, cli.json).await?;
            Ok(true)
        }

        Commands::Serve { port, host } => {
            let state = AppState::init(data_dir, None).await?;
            serve(state, host, port).await?;
            Ok(true)
        }

        Commands::Validate { .. } => unreachable!("handled above"),
    }
}

async fn serve(state: AppState, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let loaded = state.reload_triggers().await?;
    state.scheduler.start();

    let host = host.unwrap_or_else(|| state.config.server.host.clone());
    let port = port.unwrap_or(state.config.server.port);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(addr = %addr, workflows = loaded, "devflow API listening");
    println!(
        "  {} devflow API listening on {} ({} workflows)",
        console::style("*").green().bold(),
        console::style(format!("http://{addr}")).cyan(),
        loaded
    );
    println!("  {}", console::style("Press Ctrl+C to stop").dim());

    let router = http::router::build_router(state.clone());
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server failed")?;

    state.shutdown();
    println!("\n  Server stopped.");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
