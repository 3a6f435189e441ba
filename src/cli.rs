use crate::config::{Config, load_config};
use crate::ir::GraphDocument;
use crate::layout::{DagreEngine, LayoutBridge};
use crate::pipeline::{ContainerOpOptions, PipelineCoordinator, PipelineOptions};
use crate::render_data::write_render_dump;
use crate::state::VisualizationState;
use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "ngv",
    version,
    about = "Collapse, expand and lay out a nested graph, then dump the visible subset"
)]
pub struct Args {
    /// Input graph document (.json) or '-' for stdin
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// Output file for the render dump. Defaults to stdout.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Config file (JSON5)
    #[arg(short = 'c', long = "configFile")]
    pub config: Option<PathBuf>,

    /// Container to collapse (repeatable, applied in order)
    #[arg(long = "collapse", value_name = "ID")]
    pub collapse: Vec<String>,

    /// Container to expand (repeatable, applied after collapses)
    #[arg(long = "expand", value_name = "ID")]
    pub expand: Vec<String>,

    /// Search query; `/pattern/` is a case-insensitive regex
    #[arg(long = "search", value_name = "QUERY")]
    pub search: Option<String>,

    /// Only check invariants and report
    #[arg(long = "check")]
    pub check: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

pub fn run() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = load_config(args.config.as_deref())?;
    let document = read_document(args.input.as_deref())?;
    let state = VisualizationState::from_document(document)?;

    if args.check {
        state.validate_invariants()?;
        eprintln!(
            "ok: {} nodes, {} containers, {} edges",
            state.node_count(),
            state.container_count(),
            state.edges().count()
        );
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("failed to start runtime")?;
    let data = runtime.block_on(apply_operations(&args, config, state))?;
    write_render_dump(args.output.as_deref(), &data)
}

async fn apply_operations(
    args: &Args,
    config: Config,
    state: VisualizationState,
) -> Result<crate::render_data::RenderData> {
    let state = crate::shared(state);
    let bridge = LayoutBridge::new(DagreEngine::new(config.layout.clone()), config.layout);
    let coordinator = PipelineCoordinator::new(bridge, config.pipeline);
    let deferred = ContainerOpOptions {
        skip_layout: true,
        ..Default::default()
    };

    for id in &args.collapse {
        coordinator.collapse_container(id, &state, deferred.clone()).await?;
    }
    for id in &args.expand {
        coordinator.expand_container(id, &state, deferred.clone()).await?;
    }
    if let Some(query) = &args.search {
        let matches = coordinator
            .update_search_results(query, &state, deferred.clone())
            .await?;
        tracing::info!(query = %query, matches = matches.len(), "search applied");
    }

    let data = coordinator
        .execute_layout_and_render_pipeline(&state, PipelineOptions::default())
        .await?;
    Ok(data)
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn read_document(path: Option<&Path>) -> Result<GraphDocument> {
    let content = match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        _ => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    parse_document(&content)
}

fn parse_document(content: &str) -> Result<GraphDocument> {
    serde_json::from_str(content).context("invalid graph document")
}
