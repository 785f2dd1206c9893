// crates/botcli/src/main.rs

use anyhow::{bail, Context, Result};
use botcore::{Map, PendingExecution, RuntimeContext, Value, Workflow};
use botruntime::{ActionRegistry, ExecutionPlan, ExecutionResult, FlowRuntime, RuntimeConfig};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bot")]
#[command(about = "Chat-bot workflow engine CLI", long_about = None)]
struct Cli {
    /// Show debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Directory of workflow JSON files available to sub-workflow nodes
        #[arg(short, long)]
        workflows: Option<PathBuf>,

        /// Initial variables as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Runtime config JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Where to write the pending execution if the run suspends
        #[arg(long, default_value = "pending.json")]
        pending_out: PathBuf,
    },

    /// Resume a suspended execution
    Resume {
        /// Pending execution written by `run`
        #[arg(short, long)]
        pending: PathBuf,

        /// Reply as JSON; bare text is taken as a string
        #[arg(short, long)]
        input: Option<String>,

        /// Directory of workflow JSON files
        #[arg(short, long)]
        workflows: Option<PathBuf>,

        /// Extra workflow files
        #[arg(short, long)]
        file: Vec<PathBuf>,

        /// Runtime config JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long, default_value = "pending.json")]
        pending_out: PathBuf,
    },

    /// Validate a workflow file and print its execution order
    Validate {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List available actions
    Actions,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            file,
            workflows,
            input,
            config,
            pending_out,
        } => {
            run_workflow(file, workflows, input, config, pending_out).await?;
        }

        Commands::Resume {
            pending,
            input,
            workflows,
            file,
            config,
            pending_out,
        } => {
            resume_workflow(pending, input, workflows, file, config, pending_out).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(file)?;
        }

        Commands::Actions => {
            list_actions();
        }
    }

    Ok(())
}

fn standard_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    botnodes::register_all(&mut registry);
    registry
}

fn load_workflow(path: &Path) -> Result<Workflow> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading workflow {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing workflow {}", path.display()))
}

async fn build_runtime(
    config: Option<PathBuf>,
    workflows: Option<PathBuf>,
    files: &[PathBuf],
) -> Result<FlowRuntime> {
    let config = match config {
        Some(path) => RuntimeConfig::from_file(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    let runtime = FlowRuntime::with_registry(Arc::new(standard_registry()), config);

    let mut paths = match workflows {
        Some(dir) => workflow_files(&dir)?,
        None => Vec::new(),
    };
    paths.extend(files.iter().cloned());

    for path in &paths {
        let workflow = load_workflow(path)?;
        tracing::debug!("Loaded workflow {} from {}", workflow.id, path.display());
        runtime.register_workflow(workflow).await?;
    }
    tracing::info!("Registered {} workflow(s)", paths.len());

    Ok(runtime)
}

/// JSON files directly inside `dir`, sorted by name.
fn workflow_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("reading workflow directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
            paths.push(path);
        } else {
            tracing::debug!("Skipping {}", path.display());
        }
    }
    paths.sort();
    Ok(paths)
}

fn parse_variables(input: Option<String>) -> Result<Map> {
    let Some(raw) = input else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(&raw)? {
        Value::Object(map) => Ok(map),
        _ => bail!("Input must be a JSON object"),
    }
}

async fn run_workflow(
    file: PathBuf,
    workflows: Option<PathBuf>,
    input: Option<String>,
    config: Option<PathBuf>,
    pending_out: PathBuf,
) -> Result<()> {
    println!("Loading workflow from: {}", file.display());
    let workflow = load_workflow(&file)?;

    println!("Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    println!();

    let runtime = build_runtime(config, workflows, std::slice::from_ref(&file)).await?;
    let mut ctx = RuntimeContext::new();
    ctx.variables = parse_variables(input)?;

    let result = runtime.execute_workflow(ctx, &workflow, None).await;
    report(&result, &pending_out)
}

async fn resume_workflow(
    pending: PathBuf,
    input: Option<String>,
    workflows: Option<PathBuf>,
    files: Vec<PathBuf>,
    config: Option<PathBuf>,
    pending_out: PathBuf,
) -> Result<()> {
    let raw = std::fs::read_to_string(&pending)
        .with_context(|| format!("reading pending execution {}", pending.display()))?;
    let pending_execution: PendingExecution = serde_json::from_str(&raw)?;
    let reply = input.map(|text| serde_json::from_str(&text).unwrap_or(Value::String(text)));

    println!(
        "Resuming {} at node {}",
        pending_execution.workflow_id, pending_execution.node_id
    );

    let runtime = build_runtime(config, workflows, &files).await?;
    let result = runtime
        .resume(pending_execution, reply, RuntimeContext::new())
        .await;
    report(&result, &pending_out)
}

fn report(result: &ExecutionResult, pending_out: &Path) -> Result<()> {
    println!("Execution Summary:");
    println!("   Execution ID: {}", result.execution_id);
    println!("   Workflow: {}", result.workflow_id);

    if let Some(error) = &result.error {
        println!("   Failed: {}", error);
        bail!("workflow failed");
    }

    for line in &result.text {
        println!("   > {}", line);
    }

    if let Some(pending) = &result.pending {
        std::fs::write(pending_out, serde_json::to_string_pretty(pending)?)?;
        println!(
            "   Waiting for input at {}::{} ({})",
            pending.workflow_id, pending.node_id, pending.suspend.reason
        );
        if let Some(prompt) = &pending.suspend.prompt {
            println!("   Prompt: {}", prompt);
        }
        println!("   Pending execution written to {}", pending_out.display());
        return Ok(());
    }

    if !result.variables.is_empty() {
        println!();
        println!("Variables:");
        println!("{}", serde_json::to_string_pretty(&result.variables)?);
    }

    Ok(())
}

fn validate_workflow(file: PathBuf) -> Result<()> {
    println!("Validating workflow: {}", file.display());
    let workflow = load_workflow(&file)?;
    let registry = standard_registry();

    let plan = ExecutionPlan::build(&workflow)?;
    println!("Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Control bus: {}", plan.control_bus);
    println!("   Order: {}", plan.order.join(" -> "));

    for node in &workflow.nodes {
        if registry.kind_of(&node.action_id).is_none() {
            println!("   warning: node {} uses unknown action {}", node.id, node.action_id);
        }
    }

    Ok(())
}

fn list_actions() {
    println!("Available Actions:");
    println!();

    let registry = standard_registry();
    for action_id in registry.list_actions() {
        if let Some(metadata) = registry.get_metadata(&action_id) {
            println!("  - {} ({})", action_id, metadata.kind);
            println!("    {}", metadata.description);
        }
    }
    println!("  - {} (workflow)", botruntime::SUB_WORKFLOW_ACTION);
    println!("    Run another workflow and wait for it");
}
