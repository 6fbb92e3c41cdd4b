use clap::{Parser, Subcommand};
use promptbus::{
    Error, InternalResult,
    binding::Source,
    config::SystemConfig,
    dispatcher::HandlerError,
    prompt::{PromptDefinition, PromptRegistry},
    system::System,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const RENDER_OPERATION: &str = "prompt-render";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a prompt locally and print the request as JSON
    Render {
        /// Prompt definition file (one definition or an array)
        #[arg(short, long)]
        prompt: PathBuf,
        /// Prompt key when the file holds several prompts
        #[arg(short, long)]
        key: Option<String>,
        /// JSON object of arguments
        #[arg(short, long)]
        args: Option<PathBuf>,
        /// Source files to bind arguments from, highest priority first
        #[arg(short, long)]
        source: Vec<PathBuf>,
    },
    /// Render on an in-process worker and receive the result through the bus
    Demo {
        #[arg(short, long)]
        prompt: PathBuf,
        #[arg(short, long)]
        key: Option<String>,
        #[arg(short, long, required = true)]
        source: Vec<PathBuf>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct RenderJob {
    prompt: String,
    sources: Vec<String>,
}

fn load_config(path: &Path) -> InternalResult<SystemConfig> {
    if path.exists() {
        SystemConfig::from_file(path)
    } else {
        Ok(SystemConfig::default())
    }
}

fn read(path: &Path) -> InternalResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::internal(format!("Failed to read {}: {}", path.display(), e)))
}

fn select(registry: &PromptRegistry, key: Option<&str>) -> InternalResult<Arc<PromptDefinition>> {
    let key = match key {
        Some(key) => key.to_string(),
        None => registry
            .keys()
            .into_iter()
            .next()
            .ok_or_else(|| Error::internal("Prompt file holds no definitions"))?,
    };
    Ok(registry.latest(&key)?)
}

fn print_json<T: Serialize>(value: &T) -> InternalResult<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::internal(format!("Failed to serialize output: {}", e)))?;
    println!("{}", json);
    Ok(())
}

fn render(
    system: &System,
    prompt: &Path,
    key: Option<&str>,
    args: Option<&Path>,
    sources: &[PathBuf],
) -> InternalResult<()> {
    let prompts = system.prompts();
    prompts.load_from_file(prompt)?;
    let definition = select(&prompts, key)?;
    let assembler = system.assembler();

    let mut merged = Map::new();
    if !sources.is_empty() {
        let sources = sources
            .iter()
            .map(|path| read(path).map(Source::text))
            .collect::<InternalResult<Vec<_>>>()?;
        merged = assembler
            .binder()
            .bind(&definition.args_schema, &definition.defaults, &sources)?;
    }
    if let Some(path) = args {
        let args: Map<String, Value> = serde_json::from_str(&read(path)?)
            .map_err(|e| Error::internal(format!("Arguments must be a JSON object: {}", e)))?;
        merged.extend(args);
    }

    let rendered = assembler.render(&definition, &merged)?;
    print_json(&rendered)
}

async fn demo(
    system: &System,
    prompt: &Path,
    key: Option<&str>,
    sources: &[PathBuf],
) -> InternalResult<()> {
    let prompts = system.prompts();
    prompts.load_from_file(prompt)?;
    let definition = select(&prompts, key)?;

    // worker side
    let dispatcher = system.dispatcher(RENDER_OPERATION)?;
    let assembler = system.assembler();
    let worker_prompts = prompts.clone();
    dispatcher.register_fn("render", move |job: RenderJob| {
        let assembler = assembler.clone();
        let prompts = worker_prompts.clone();
        async move {
            let definition = prompts.latest(&job.prompt).map_err(HandlerError::failed)?;
            let sources: Vec<Source> = job.sources.into_iter().map(Source::Text).collect();
            assembler
                .render_from_sources(&definition, &sources)
                .map_err(HandlerError::failed)
        }
    });

    // caller side
    let manager = system.request_manager::<RenderJob, promptbus::prompt::RenderedRequest>(
        RENDER_OPERATION,
        "render-worker",
    )?;
    let job = RenderJob {
        prompt: definition.key.clone(),
        sources: sources.iter().map(|path| read(path)).collect::<InternalResult<_>>()?,
    };
    debug!(prompt = %job.prompt, sources = job.sources.len(), "Sending render job");

    let rendered = manager.call("render", &job).await?;
    info!(prompt = %rendered.prompt_key, version = rendered.version, "Received rendered request");
    print_json(&rendered)
}

async fn run(cli: &Cli) -> InternalResult<()> {
    let config = load_config(&cli.config)?;
    debug!("config: {:?}", config);

    let system = System::new(&config);
    let result = match &cli.command {
        Command::Render {
            prompt,
            key,
            args,
            source,
        } => render(&system, prompt, key.as_deref(), args.as_deref(), source),
        Command::Demo {
            prompt,
            key,
            source,
        } => demo(&system, prompt, key.as_deref(), source).await,
    };

    system.shutdown()?;
    result
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
