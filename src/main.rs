use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _};
use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use strand_agent::graph::executor::ExecutorSettings;
use strand_agent::graph::validate::validate;
use strand_agent::{
    GraphExecutor, GraphRuntime, RunLogger, Sandbox, ScriptedInvoker, TriggerRequest,
    ValidatedGraph,
};
use strand_core::config::AppConfig;
use strand_core::event::EventBus;
use strand_core::traits::RunStore;
use strand_core::types::{ExecutionResult, RunId, RunStatus};
use strand_core::{EntryPointSpec, GraphSpec};
use strand_store::FileStore;

#[derive(Parser)]
#[command(name = "strand", version, about = "Graph workflow engine with sandboxed edge conditions")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "strand.toml", env = "STRAND_CONFIG")]
    config: PathBuf,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a graph definition and report errors and warnings
    Validate {
        /// Graph definition (JSON)
        graph: PathBuf,
    },
    /// Execute a graph with scripted node outputs
    Run {
        /// Graph definition (JSON)
        graph: PathBuf,
        /// Entry point to trigger
        #[arg(long, default_value = "start")]
        entry: String,
        /// Initial Shared Memory as a JSON object
        #[arg(long)]
        input: Option<String>,
        /// Scripted node results: {"node_id": result | [result, ...]}
        #[arg(long)]
        script: Option<PathBuf>,
        /// Seconds to wait for the run (default: engine.wait_timeout_secs)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Continue a paused run through a resume entry point
    Resume {
        /// Run id printed when the run paused
        run_id: String,
        /// Resume entry point
        #[arg(long)]
        entry: String,
        /// Values merged into the restored memory, as a JSON object
        #[arg(long)]
        input: Option<String>,
        /// Graph definition (JSON). Defaults to the stored copy.
        #[arg(long)]
        graph: Option<PathBuf>,
        /// Scripted node results
        #[arg(long)]
        script: Option<PathBuf>,
        /// Seconds to wait for the run
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Inspect stored runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },
    /// Evaluate an expression in the condition sandbox
    Eval {
        expr: String,
        /// Variables as a JSON object
        #[arg(long)]
        context: Option<String>,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum RunsAction {
    /// List stored runs, newest first
    List {
        /// Maximum number of runs to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Print a stored run record
    Show {
        run_id: String,
        /// Also print the decision log
        #[arg(long)]
        decisions: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "strand=debug,info"
    } else {
        "strand=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "strand", &mut std::io::stdout());
        return Ok(());
    }

    let config = AppConfig::load_or_default(&cli.config)?;
    let sandbox = Sandbox::new(config.sandbox);

    match cli.command {
        Commands::Validate { graph } => {
            let graph = load_graph(&graph)?;
            let report = validate(&graph, &sandbox, None);
            for warning in &report.warnings {
                println!("warning: {}", warning);
            }
            for error in &report.errors {
                println!("error: {}", error);
            }
            if !report.is_valid() {
                bail!("graph '{}' is invalid ({} error(s))", graph.id, report.errors.len());
            }
            println!(
                "graph '{}' is valid: {} node(s), {} edge(s)",
                graph.id,
                graph.nodes.len(),
                graph.edges.len()
            );
        }
        Commands::Run {
            graph,
            entry,
            input,
            script,
            timeout,
        } => {
            let graph = load_graph(&graph)?;
            let store = open_store(&config)?;
            store.save_graph(&graph).await?;

            let request = TriggerRequest::new(entry).with_input(parse_object(input.as_deref())?);
            let result = execute(
                &config,
                sandbox,
                graph,
                store,
                script.as_deref(),
                None,
                request,
                timeout,
            )
            .await?;
            print_result(result)?;
        }
        Commands::Resume {
            run_id,
            entry,
            input,
            graph,
            script,
            timeout,
        } => {
            let store = open_store(&config)?;
            let run_id = RunId::from_string(run_id);
            let record = store
                .load_run(&run_id)
                .await?
                .ok_or_else(|| anyhow!("run '{}' not found", run_id))?;
            if record.status != RunStatus::Paused {
                bail!("run '{}' is {}, not paused", run_id, record.status);
            }
            let state = record
                .session_state
                .ok_or_else(|| anyhow!("run '{}' has no session state", run_id))?;

            let graph = match graph {
                Some(path) => load_graph(&path)?,
                None => store
                    .load_graph(&record.graph_id)
                    .await?
                    .ok_or_else(|| anyhow!("graph '{}' not stored, pass --graph", record.graph_id))?,
            };
            let node = graph
                .entry_points
                .get(&entry)
                .cloned()
                .unwrap_or_else(|| state.paused_at.clone());
            let resume_entry = EntryPointSpec::resume(entry.clone(), node);

            let request = TriggerRequest::new(entry)
                .with_session(state)
                .with_input(parse_object(input.as_deref())?);
            let result = execute(
                &config,
                sandbox,
                graph,
                store,
                script.as_deref(),
                Some(resume_entry),
                request,
                timeout,
            )
            .await?;
            print_result(result)?;
        }
        Commands::Runs { action } => {
            let store = open_store(&config)?;
            match action {
                RunsAction::List { limit } => {
                    let runs = store.list_runs().await?;
                    if runs.is_empty() {
                        println!("No runs stored in {}", store.root().display());
                    }
                    for run in runs.iter().take(limit) {
                        println!(
                            "{}  {:<9}  {:<20}  {:<16}  steps={}  {}",
                            run.run_id,
                            run.status.to_string(),
                            run.graph_id,
                            run.entry_point,
                            run.steps_executed,
                            run.started_at.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }
                RunsAction::Show { run_id, decisions } => {
                    let run_id = RunId::from_string(run_id);
                    let record = store
                        .load_run(&run_id)
                        .await?
                        .ok_or_else(|| anyhow!("run '{}' not found", run_id))?;
                    println!("{}", serde_json::to_string_pretty(&record)?);
                    if decisions {
                        for decision in store.decision_recorder().read(&run_id).await? {
                            println!("{}", serde_json::to_string(&decision)?);
                        }
                    }
                }
            }
        }
        Commands::Eval { expr, context } => {
            let context = parse_object(context.as_deref())?;
            match sandbox.evaluate_json(&expr, &context) {
                Ok(value) => {
                    println!("{}", value.repr());
                    println!("truthy: {}", value.truthy());
                }
                Err(e) => bail!("rejected: {}", e),
            }
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        // Handled before config loading
        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Build a runtime around `graph`, trigger `request` and wait for it.
#[allow(clippy::too_many_arguments)]
async fn execute(
    config: &AppConfig,
    sandbox: Sandbox,
    graph: GraphSpec,
    store: Arc<FileStore>,
    script: Option<&Path>,
    entry: Option<EntryPointSpec>,
    request: TriggerRequest,
    timeout: Option<u64>,
) -> anyhow::Result<Option<ExecutionResult>> {
    let graph = ValidatedGraph::new(graph, &sandbox, None)?;
    let invoker = match script {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading script {}", path.display()))?;
            ScriptedInvoker::from_json(&json)?
        }
        None => ScriptedInvoker::new(),
    };

    let event_bus = Arc::new(EventBus::new(config.engine.event_capacity));
    let executor = GraphExecutor::new(graph, Arc::new(invoker))
        .with_sandbox(sandbox)
        .with_recorder(Arc::new(store.decision_recorder()))
        .with_event_bus(event_bus.clone())
        .with_settings(ExecutorSettings::from(&config.engine));

    let mut runtime = GraphRuntime::new(executor)
        .with_store(store)
        .with_wait_timeout(Duration::from_secs(config.engine.wait_timeout_secs));
    if let Some(entry) = entry {
        runtime = runtime.with_entry_point(entry);
    }

    let cancel = CancellationToken::new();
    let logger = config.log.enabled.then(|| {
        let logger = RunLogger::new(config.log_dir(), config.log.level);
        tokio::spawn(logger.run(event_bus.clone(), cancel.clone()))
    });

    let result = runtime
        .trigger_and_wait(request, timeout.map(Duration::from_secs))
        .await;

    cancel.cancel();
    if let Some(task) = logger {
        if let Err(e) = task.await {
            warn!(error = %e, "Run logger task failed");
        }
    }
    Ok(result?)
}

fn print_result(result: Option<ExecutionResult>) -> anyhow::Result<()> {
    let Some(result) = result else {
        println!("Run still in progress; it stops with this process. Raise --timeout to wait longer.");
        return Ok(());
    };

    info!(
        run_id = %result.run_id,
        status = %result.status,
        steps = result.steps_executed,
        duration_ms = result.duration_ms,
        "Run stopped"
    );
    println!("run:    {}", result.run_id);
    println!("status: {}", result.status);
    println!("path:   {}", result.path.join(" -> "));
    if result.metrics.total_tokens > 0 {
        println!(
            "tokens: {} (${:.4})",
            result.metrics.total_tokens, result.metrics.total_cost_usd
        );
    }
    println!("output: {}", serde_json::to_string_pretty(&result.output)?);

    match result.status {
        RunStatus::Paused => {
            if let Some(node) = result.paused_at() {
                println!(
                    "paused before '{}'; continue with: strand resume {} --entry <resume entry>",
                    node, result.run_id
                );
            }
            Ok(())
        }
        RunStatus::Failed => Err(anyhow!(result
            .error
            .unwrap_or_else(|| "run failed".to_string()))),
        _ => Ok(()),
    }
}

fn load_graph(path: &Path) -> anyhow::Result<GraphSpec> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading graph {}", path.display()))?;
    GraphSpec::from_json(&json).with_context(|| format!("parsing graph {}", path.display()))
}

fn open_store(config: &AppConfig) -> anyhow::Result<Arc<FileStore>> {
    let dir = config.storage_dir();
    let store = FileStore::from_config(&dir, &config.storage)
        .with_context(|| format!("opening storage at {}", dir.display()))?;
    Ok(Arc::new(store))
}

/// Parse an optional JSON object argument into a map.
fn parse_object(raw: Option<&str>) -> anyhow::Result<HashMap<String, serde_json::Value>> {
    match raw {
        None => Ok(HashMap::new()),
        Some(raw) => serde_json::from_str(raw).context("expected a JSON object"),
    }
}
