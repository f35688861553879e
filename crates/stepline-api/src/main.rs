//! Stepline CLI and REST API entry point.
//!
//! Binary name: `stepline`
//!
//! Parses CLI arguments, initializes database and services, then dispatches
//! to the appropriate command handler or starts the REST API server together
//! with the durable workflow engine.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;
use stepline_observe::tracing_setup::{init_tracing, shutdown_tracing, verbosity_filter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(verbosity_filter(cli.verbose, cli.quiet), cli.otel) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "stepline", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;

    let outcome = match cli.command {
        Commands::Serve { port, host } => serve(state, host, port).await,
        Commands::Status { instance_id } => {
            cli::instance::show_status(&state, &instance_id, cli.json).await
        }
        Commands::Instances {
            status,
            workflow,
            limit,
        } => {
            cli::instance::list_instances(
                &state,
                status.as_deref(),
                workflow.as_deref(),
                limit,
                cli.json,
            )
            .await
        }
        Commands::User { action } => {
            cli::user::handle_user_command(action, &state, cli.json).await
        }
        Commands::Completions { .. } => Ok(()),
    };

    shutdown_tracing();
    outcome
}

/// Run the engine and the HTTP server until Ctrl+C / SIGTERM.
async fn serve(state: AppState, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| state.config.server.host.clone());
    let port = port.unwrap_or(state.config.server.port);

    // Ensure an API key exists, print it if new
    if let Some(api_key) = http::extractors::auth::ensure_api_key(&state).await? {
        println!();
        println!(
            "  {} API key generated (save this -- it won't be shown again):",
            console::style("🔑").bold()
        );
        println!();
        println!("  {}", console::style(&api_key).yellow().bold());
        println!();
    }

    let timers = state.engine.start();
    let report = state.engine.recover().await?;

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!(
        "  {} Stepline listening on {}",
        console::style("⚡").bold(),
        console::style(format!("http://{addr}")).cyan()
    );
    println!("  Data directory: {}", state.data_dir.display());
    if report.resumed + report.sleeping > 0 {
        println!(
            "  Resumed {} instance(s), {} sleeping",
            report.resumed, report.sleeping
        );
    }
    if state.config.server.require_auth {
        println!("  {}", console::style("API key required for workflow routes").dim());
    }
    println!("  {}", console::style("Press Ctrl+C to stop").dim());

    let engine = state.engine.clone();
    let router = http::router::build_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.shutdown();
    if let Err(e) = timers.await {
        tracing::warn!(error = %e, "timer loop ended abnormally");
    }

    println!("\n  Server stopped.");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
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
}
