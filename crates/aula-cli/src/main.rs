//! Aula CLI
//!
//! Resolves the multimedia resources of a lesson batch, or serves the
//! progressive HTTP/WebSocket API.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use aula_backend::GeminiClient;
use aula_orchestrator::{
    create_router, AppState, Artifact, Config, Orchestrator, ResolutionBatch, ResolvedResource,
    ResourceStatus, ResourceUpdate, Resolver,
};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Aula - lesson resource resolution
///
/// Turns the resource requests of a lesson into generated illustrations,
/// diagrams, and links to real videos and photographs.
#[derive(Parser, Debug)]
#[command(name = "aula")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: aula.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve every resource of a batch file
    Resolve {
        /// Path to the batch JSON file
        #[arg(value_name = "BATCH")]
        batch: PathBuf,

        /// How results are delivered
        #[arg(short, long, value_enum, default_value_t = Mode::Progressive)]
        mode: Mode,

        /// Write the resolved resources as JSON to this file
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Run the HTTP API and WebSocket server
    Serve {
        /// Port to listen on (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Print each resource as soon as it settles
    Progressive,
    /// Resolve everything, then print
    Direct,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Resolve {
            batch,
            mode,
            output,
        } => run_resolve(&config, &batch, mode, output.as_deref()).await,
        Command::Serve { port } => run_serve(config, port).await,
    }
}

/// Loads configuration from the specified path or the default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Builds the Gemini client described by the `backend` config section.
fn build_backend(config: &Config) -> anyhow::Result<Arc<GeminiClient>> {
    let var = &config.backend.api_key_env;
    let api_key = std::env::var(var).map_err(|_| {
        anyhow::anyhow!(
            "Environment variable {var} is not set\n\nSuggestion: Export your API key as {var} or change backend.apiKeyEnv"
        )
    })?;

    let client = GeminiClient::with_timeout(api_key, config.backend.request_timeout())
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .with_base_url(&config.backend.base_url)
        .with_models(&config.backend.text_model, &config.backend.image_model);

    tracing::debug!(
        text_model = client.text_model(),
        image_model = client.image_model(),
        "Backend ready"
    );
    Ok(Arc::new(client))
}

// ============================================================================
// resolve
// ============================================================================

async fn run_resolve(
    config: &Config,
    batch_path: &Path,
    mode: Mode,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let mut batch = ResolutionBatch::load(batch_path).map_err(|e| anyhow::anyhow!("{e}"))?;
    let assigned = batch.assign_missing_ids();
    if assigned > 0 {
        tracing::info!(assigned, "Assigned ids to resources without one");
    }

    println!(
        "Resolving {} resources ({}, {})",
        batch.resources.len(),
        batch.context.level,
        mode_name(mode)
    );
    println!();

    let backend = build_backend(config)?;

    let resources = match mode {
        Mode::Direct => Resolver::from_config(backend, config)
            .resolve_all(&batch.resources, &batch.context)
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?,
        Mode::Progressive => {
            let orchestrator = Orchestrator::from_config(backend, config);
            let (tx, mut rx) = mpsc::unbounded_channel::<ResourceUpdate>();
            let printer = tokio::spawn(async move {
                while let Some(update) = rx.recv().await {
                    print_update(&update);
                }
            });

            let outcome = orchestrator
                .process_all(&batch.resources, &batch.context, &tx)
                .await;
            drop(tx);
            if let Err(e) = printer.await {
                tracing::warn!(error = %e, "Update printer stopped early");
            }
            outcome.map_err(|e| anyhow::anyhow!("{e}"))?.resources
        }
    };

    println!();
    print_summary(&resources);

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&resources)?;
        std::fs::write(path, json).map_err(|e| {
            anyhow::anyhow!("Failed to write output: {e}\n\nPath: {}", path.display())
        })?;
        println!("Resources written to {}", path.display());
    }

    Ok(())
}

const fn mode_name(mode: Mode) -> &'static str {
    match mode {
        Mode::Progressive => "progressive",
        Mode::Direct => "direct",
    }
}

const fn status_marker(status: ResourceStatus) -> &'static str {
    match status {
        ResourceStatus::Pending => "..",
        ResourceStatus::Loading => "~>",
        ResourceStatus::Ready => "ok",
        ResourceStatus::Error => "!!",
    }
}

fn print_update(update: &ResourceUpdate) {
    let resource = &update.resource;
    match resource.status {
        ResourceStatus::Ready => println!(
            "[{}] {} {}",
            status_marker(resource.status),
            update.id,
            describe_artifact(resource)
        ),
        ResourceStatus::Error => println!(
            "[{}] {} {}",
            status_marker(resource.status),
            update.id,
            resource.error.as_deref().unwrap_or("unknown error")
        ),
        ResourceStatus::Pending | ResourceStatus::Loading => {
            println!("[{}] {}", status_marker(resource.status), update.id);
        }
    }
}

fn describe_artifact(resource: &ResolvedResource) -> String {
    match &resource.artifact {
        Some(Artifact::Link { url }) => url.clone(),
        Some(Artifact::InlineImage { mime_type, data }) => {
            format!("({mime_type}, {} base64 chars)", data.len())
        }
        Some(Artifact::Diagram { source, .. }) => {
            format!("(diagram: {})", source.lines().next().unwrap_or_default())
        }
        None => String::new(),
    }
}

fn print_summary(resources: &[ResolvedResource]) {
    let ready = resources
        .iter()
        .filter(|r| r.status == ResourceStatus::Ready)
        .count();
    let failed = resources
        .iter()
        .filter(|r| r.status == ResourceStatus::Error)
        .count();

    println!("=== Aula Summary ===");
    println!("Resources: {}", resources.len());
    println!("Ready: {ready}");
    println!("Failed: {failed}");

    for resource in resources.iter().filter(|r| r.status == ResourceStatus::Error) {
        println!(
            "  {}: {}",
            resource.id(),
            resource.error.as_deref().unwrap_or("unknown error")
        );
    }
}

// ============================================================================
// serve
// ============================================================================

async fn run_serve(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    let backend = build_backend(&config)?;
    let port = port.unwrap_or(config.server.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let router = create_router(AppState::new(config, backend));

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!("HTTP API server running on http://{addr}");
    println!("WebSocket events on ws://{addr}/ws");
    println!("Press Ctrl+C to stop");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {e}"))?;

    println!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, shutting down");
}
