//! Run the cached multi-round analysis over a project directory.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable. The key
//! may be empty when `endpoint` points at a local OpenAI-compatible server.
//!
//! # Examples
//!
//! ```sh
//! # Analyze the current directory with the standard rounds
//! roundwise run
//!
//! # Only the data-flow round (and what it depends on), two at a time
//! roundwise run --round data_flow --concurrency 2
//!
//! # Discard cached results first
//! roundwise run --force
//!
//! # Show waves, cached entries, or wipe the cache
//! roundwise plan
//! roundwise status
//! roundwise clear
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use roundwise::cache::store::STATE_DIR;
use roundwise::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Cached, dependency-aware multi-round LLM analysis of a codebase.
#[derive(Parser)]
#[command(name = "roundwise", version)]
struct Cli {
    /// Project directory to analyze.
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    /// Config file. Defaults to `<project>/roundwise.json` when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` wins.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every selected round, reusing cached results.
    Run {
        /// Model identifier.
        #[arg(long)]
        model: Option<String>,

        /// Maximum rounds in flight.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Round id or name to run. Repeatable. Dependencies are included.
        #[arg(long = "round")]
        rounds: Vec<String>,

        /// Clear the round cache before running.
        #[arg(long)]
        force: bool,

        /// Fingerprint and budget the project without calling the model.
        #[arg(long)]
        static_only: bool,
    },
    /// Print the execution waves.
    Plan {
        #[arg(long = "round")]
        rounds: Vec<String>,
    },
    /// Show cached rounds.
    Status,
    /// Delete every cached round.
    Clear,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let project = std::fs::canonicalize(&cli.project).unwrap_or_else(|_| cli.project.clone());
    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path),
        None => PipelineConfig::load_for_project(&project),
    };
    let config = match config {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Run {
            model,
            concurrency,
            rounds,
            force,
            static_only,
        } => {
            let force = config.force || force;
            let static_only = config.static_only || static_only;
            let mut config = config.with_force(force).with_static_only(static_only);
            if let Some(model) = model {
                config = config.with_model(model);
            }
            if let Some(concurrency) = concurrency {
                config = config.with_concurrency(concurrency);
            }
            if !rounds.is_empty() {
                config = config.with_rounds(rounds);
            }
            run(&project, &config).await
        }
        Command::Plan { rounds } => {
            let config = if rounds.is_empty() {
                config
            } else {
                config.with_rounds(rounds)
            };
            plan(&config)
        }
        Command::Status => status(&project, &config).await,
        Command::Clear => clear(&project, &config).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "roundwise=info",
        1 => "roundwise=debug",
        _ => "roundwise=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

async fn run(
    project: &Path,
    config: &PipelineConfig,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let graph = config.select_graph(standard_rounds())?;
    let files = discover(project, &config.discovery_options(project))?;
    let records: Vec<FileRecord> = files.iter().map(|f| f.record.clone()).collect();
    let fp = fingerprint(&records);

    let budgeter = config.budgeter();
    let candidates: Vec<Candidate> = files
        .into_iter()
        .filter_map(|f| f.text.map(|text| budgeter.candidate(f.record.path, text)))
        .collect();

    if config.static_only {
        let tokens: usize = candidates.iter().map(|c| c.estimated_tokens).sum();
        println!("fingerprint: {fp}");
        println!("files:       {} ({} text)", records.len(), candidates.len());
        println!("est. tokens: {tokens}");
        println!("budget:      {} tokens per round", budgeter.effective_tokens());
        return Ok(ExitCode::SUCCESS);
    }

    let cache = RoundCache::new(config.cache_store(project));
    if config.force {
        info!("Clearing round cache (--force)");
        cache.clear().await?;
    }

    let api_key = std::env::var("OPENROUTER_KEY").unwrap_or_default();
    if api_key.is_empty() && config.endpoint.is_none() {
        return Err("OPENROUTER_KEY environment variable is not set".into());
    }
    let mut client = OpenRouterClient::new(api_key)?;
    if let Some(endpoint) = &config.endpoint {
        client = client.with_endpoint(endpoint.clone());
    }
    let executor = OpenRouterExecutor::new(Arc::new(client), config.retry_config())
        .with_timeout(config.request_timeout());

    let cancel = CancelToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing in-flight rounds");
            ctrl_c.cancel();
        }
    });

    let report = Orchestrator::new(&graph, &cache, &executor, config.orchestrator_config())
        .with_composer(PromptComposer::new(budgeter, candidates))
        .with_event_handler(&LoggingHandler)
        .with_cancel_token(cancel)
        .run(&fp)
        .await?;

    print!("{}", report.summary_table());
    let stats = cache.stats();
    info!(
        "Cache: {} hits, {} misses, {} unreadable ({:.0}% hit rate)",
        stats.hits,
        stats.misses,
        stats.corrupt,
        stats.hit_rate() * 100.0
    );

    let out_dir = project.join(STATE_DIR);
    tokio::fs::create_dir_all(&out_dir).await?;
    let results = serde_json::to_vec_pretty(&report.outcomes())?;
    tokio::fs::write(out_dir.join("results.json"), results).await?;
    tokio::fs::write(out_dir.join("report.md"), report.render_markdown()).await?;
    info!("Wrote {}", out_dir.join("report.md").display());

    Ok(if report.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn plan(config: &PipelineConfig) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let graph = config.select_graph(standard_rounds())?;
    for (index, wave) in graph.waves().iter().enumerate() {
        let names: Vec<String> = wave
            .iter()
            .filter_map(|id| graph.get(*id))
            .map(|d| format!("{} ({})", d.name, d.id))
            .collect();
        println!("wave {}: {}", index + 1, names.join(", "));
    }
    Ok(ExitCode::SUCCESS)
}

async fn status(
    project: &Path,
    config: &PipelineConfig,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let graph = RoundGraph::new(standard_rounds())?;
    let cache = RoundCache::new(config.cache_store(project));
    let completed = cache.list_completed().await?;
    if completed.is_empty() {
        println!("No cached rounds in {}", cache.store().dir().display());
        return Ok(ExitCode::SUCCESS);
    }
    for id in completed {
        let name = graph.get(id).map_or("?", |d| d.name.as_str());
        match cache.peek(id).await {
            Some(entry) => println!(
                "{id:>3}  {name:<14} v{}  {}  {}",
                entry.schema_version,
                entry.model,
                entry.created_at.to_rfc3339()
            ),
            None => println!("{id:>3}  {name:<14} (unreadable)"),
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn clear(
    project: &Path,
    config: &PipelineConfig,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cache = RoundCache::new(config.cache_store(project));
    cache.clear().await?;
    println!("Cleared {}", cache.store().dir().display());
    Ok(ExitCode::SUCCESS)
}
