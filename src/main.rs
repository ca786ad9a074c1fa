//! Notegraph - derived views for a live knowledge graph
//!
//! Feeds recorded graph data and events through the view engine and prints
//! the resulting views as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use notegraph_engine::events::{GraphEvent, ViewSession};
use notegraph_engine::graph::{JsonLinesSink, RawGraphUpdate, ScopeCommand, ViewEngine};
use notegraph_engine::Config;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "notegraph")]
#[command(about = "Knowledge graph view engine")]
struct Cli {
    /// Path to the YAML config file (defaults to ./notegraph.yaml)
    #[arg(short, long, global = true, env = "NOTEGRAPH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the views for a single graph batch
    View {
        /// JSON file holding one `{nodes, links, tags}` batch
        #[arg(short, long)]
        graph: PathBuf,

        /// Open a local view around these node ids
        #[arg(short, long)]
        focus: Vec<String>,
    },

    /// Replay a recorded event stream, printing every published view
    Replay {
        /// File with one enveloped event per line
        #[arg(short, long)]
        events: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing (stderr keeps stdout for the JSON output)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,notegraph_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_yaml_and_env(cli.config.as_deref())?;

    match cli.command {
        Commands::View { graph, focus } => run_view(config, &graph, focus).await,
        Commands::Replay { events } => run_replay(config, &events).await,
    }
}

async fn run_view(config: Config, graph: &Path, focus: Vec<String>) -> Result<()> {
    let json = tokio::fs::read_to_string(graph)
        .await
        .with_context(|| format!("Failed to read {}", graph.display()))?;
    let update = RawGraphUpdate::from_json(&json)
        .with_context(|| format!("{} is not a JSON graph batch", graph.display()))?;

    let mut engine = ViewEngine::new(config.view);
    let (stats, _) = engine.apply_update(&update);
    tracing::info!(
        nodes = engine.snapshot().nodes.len(),
        links = engine.snapshot().links.len(),
        ghosts = stats.ghosts,
        "Graph loaded"
    );
    for id in focus {
        engine.command(ScopeCommand::Add(id));
    }

    let view = engine.view();
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

async fn run_replay(config: Config, events: &Path) -> Result<()> {
    let contents = tokio::fs::read_to_string(events)
        .await
        .with_context(|| format!("Failed to read {}", events.display()))?;

    let engine = ViewEngine::new(config.view);
    let sink = JsonLinesSink::new(std::io::stdout());
    let session = ViewSession::with_capacity(engine, sink, config.channel_capacity);

    let mut sent = 0usize;
    let mut skipped = 0usize;
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match GraphEvent::from_json(line) {
            Ok(event) => {
                session.send(event).await?;
                sent += 1;
            }
            Err(e) => {
                tracing::warn!(line = lineno + 1, error = %e, "Skipping undecodable event");
                skipped += 1;
            }
        }
    }

    let engine = session.shutdown().await?;
    tracing::info!(
        "Replay complete: {} events applied, {} skipped, {} nodes in final graph",
        sent,
        skipped,
        engine.snapshot().nodes.len()
    );
    Ok(())
}
