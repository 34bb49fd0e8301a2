//! jellyfin-stack entry point
//!
//! Resolves configuration, assembles the desired-state graph and either
//! renders it, applies it, or prints its outputs.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use jellyfin_stack::config::PROJECT;
use jellyfin_stack::orchestrator::{submit, ClusterOrchestrator, ManifestRenderer};
use jellyfin_stack::{export, stack, ConfigContext, ConfigStore, Environment, OutputSet};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    " ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "jellyfin-stack", version = VERSION, about = "Deploy the Jellyfin media stack")]
struct Cli {
    /// Stack config file with a `config:` map of `jellyfin:<key>` entries
    #[arg(long, global = true, env = "JELLYFIN_STACK_CONFIG")]
    stack_config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render the graph as multi-document YAML in submission order
    Render {
        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Apply the graph to the cluster and provision the database
    Apply(ApplyArgs),
    /// Print the exported outputs as JSON
    Outputs,
}

#[derive(Args, Debug)]
struct ApplyArgs {
    /// Log what would be applied without touching the cluster or the database
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    info!("Starting jellyfin-stack v{}", VERSION);

    let result = run(cli).await;
    jellyfin_stack::telemetry::shutdown_telemetry();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = load_context(cli.stack_config.as_deref())?;
    let handle = stack::assemble_stack(&ctx).context("failed to assemble the stack")?;

    match cli.command {
        Commands::Render { output } => {
            let renderer = ManifestRenderer::new();
            submit(&handle, &renderer).await?;
            let yaml = renderer.into_yaml();
            match output {
                Some(path) => {
                    std::fs::write(&path, yaml)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    info!("Manifests written to {}", path.display());
                }
                None => print!("{yaml}"),
            }
        }
        Commands::Apply(args) => {
            let client = kube::Client::try_default()
                .await
                .context("failed to build a Kubernetes client from the ambient kubeconfig")?;
            info!("Connected to Kubernetes cluster");

            let orchestrator = ClusterOrchestrator::new(client, args.dry_run);
            submit(&handle, &orchestrator).await?;
            print_outputs(&export(&handle))?;
        }
        Commands::Outputs => print_outputs(&export(&handle))?,
    }
    Ok(())
}

fn load_context(stack_config: Option<&Path>) -> anyhow::Result<ConfigContext> {
    let store = match stack_config {
        Some(path) => {
            let store = ConfigStore::from_file(PROJECT, path)
                .with_context(|| format!("failed to load stack config {}", path.display()))?;
            info!("Loaded {} entries from {}", store.len(), path.display());
            store
        }
        None => ConfigStore::new(PROJECT),
    };
    Ok(ConfigContext::new(store, Environment::from_process()))
}

fn print_outputs(outputs: &OutputSet) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(outputs)?);
    Ok(())
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    // stdout carries rendered manifests and outputs
    let fmt_layer = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        match jellyfin_stack::telemetry::init_telemetry(&registry) {
            Ok(otel_layer) => {
                registry.with(otel_layer).init();
                info!("OpenTelemetry tracing initialized");
            }
            Err(e) => {
                registry.init();
                warn!("OpenTelemetry tracing disabled: {}", e);
            }
        }
    } else {
        registry.init();
    }
}
