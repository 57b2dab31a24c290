use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use stackcore::{GraphSpec, KnowledgeBaseConfig, LlmEngineConfig, Node, NodeConfig, RunEvent};
use stacknodes::{
    Collaborators, GeneratorConfig, MemoryRetriever, OpenRouterGenerator, SearchConfig,
    SerpApiSearcher,
};
use stackruntime::{RuntimeConfig, StageRegistry, WorkflowExecutor};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stack")]
#[command(about = "Stack Engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a stack file against a question
    Run {
        /// Path to stack JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// The question to ask
        #[arg(short, long)]
        query: String,

        /// OpenRouter key used when nodes carry none
        #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        #[arg(long, env = "OPENROUTER_BASE_URL")]
        base_url: Option<String>,

        #[arg(long, env = "SERPAPI_KEY", hide_env_values = true)]
        serpapi_key: Option<String>,

        /// JSON map of collection name to passages
        #[arg(long, env = "PASSAGES_FILE")]
        passages: Option<PathBuf>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a stack file
    Validate {
        /// Path to stack JSON file
        file: PathBuf,
    },

    /// List available stage kinds
    Stages,

    /// Create a new example stack
    Init {
        /// Output file path
        #[arg(short, long, default_value = "stack.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            query,
            api_key,
            base_url,
            serpapi_key,
            passages,
            timeout,
            verbose,
        } => {
            let default_level = if verbose { "debug" } else { "info" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new(default_level)),
                )
                .with_writer(std::io::stderr)
                .init();

            let generator = GeneratorConfig {
                api_key,
                base_url: base_url.unwrap_or_else(|| GeneratorConfig::default().base_url),
                ..GeneratorConfig::default()
            };
            let search = SearchConfig {
                api_key: serpapi_key,
                ..SearchConfig::default()
            };
            let config = RuntimeConfig {
                run_timeout: timeout.map(Duration::from_secs),
                ..RuntimeConfig::default()
            };

            run_stack(&file, query, generator, search, passages, config).await?;
        }

        Commands::Validate { file } => {
            validate_stack(&file)?;
        }

        Commands::Stages => {
            list_stages();
        }

        Commands::Init { output } => {
            create_example_stack(&output)?;
        }
    }

    Ok(())
}

fn load_stack(file: &Path) -> Result<GraphSpec> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let spec = serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?;
    Ok(spec)
}

fn registry(collaborators: Collaborators) -> StageRegistry {
    let mut registry = StageRegistry::new();
    stacknodes::register_all(&mut registry, collaborators);
    registry
}

async fn run_stack(
    file: &Path,
    query: String,
    generator: GeneratorConfig,
    search: SearchConfig,
    passages: Option<PathBuf>,
    config: RuntimeConfig,
) -> Result<()> {
    let spec = load_stack(file)?;
    let retriever = match passages {
        Some(path) => MemoryRetriever::from_file(path).await?,
        None => MemoryRetriever::new(),
    };

    let registry = registry(Collaborators {
        retriever: Arc::new(retriever),
        generator: Arc::new(OpenRouterGenerator::new(generator)),
        searcher: Arc::new(SerpApiSearcher::new(search)),
        search_results: config.search_results,
    });
    let executor = WorkflowExecutor::new(Arc::new(registry)).with_timeout(config.run_timeout);

    let mut run = executor.execute(spec, query);
    let mut stdout = std::io::stdout();
    while let Some(event) = run.next().await {
        match event {
            RunEvent::Fragment { text } => {
                write!(stdout, "{}", text)?;
                stdout.flush()?;
            }
            RunEvent::Completed { metadata } => {
                writeln!(stdout)?;
                eprintln!();
                eprintln!("✨ Completed with {}", metadata.model);
                if metadata.retrieval_degraded {
                    eprintln!("⚠️  Knowledge base retrieval failed; answered without it");
                }
                if metadata.search_degraded {
                    eprintln!("⚠️  Web search failed; answered without it");
                }
                return Ok(());
            }
            RunEvent::Error { kind, message } => {
                writeln!(stdout)?;
                bail!("run failed ({:?}): {}", kind, message);
            }
        }
    }

    bail!("run was cancelled")
}

fn validate_stack(file: &Path) -> Result<()> {
    println!("🔍 Validating stack: {}", file.display());

    let spec = load_stack(file)?;
    let executor = WorkflowExecutor::new(Arc::new(StageRegistry::new()));
    match executor.plan(spec) {
        Ok(plan) => {
            println!("✅ Workflow is valid and ready for execution");
            let order: Vec<String> = plan.kinds().iter().map(ToString::to_string).collect();
            println!("   Stages: {}", order.join(" → "));
            for id in plan.excluded() {
                println!("   ⚠️  Knowledge base '{}' is not connected and will be skipped", id);
            }
            Ok(())
        }
        Err(e) => {
            println!("❌ Workflow validation failed");
            bail!("{}", e)
        }
    }
}

fn list_stages() {
    println!("📦 Available Stages:");
    println!();

    let registry = registry(Collaborators {
        retriever: Arc::new(MemoryRetriever::new()),
        generator: Arc::new(OpenRouterGenerator::new(GeneratorConfig::default())),
        searcher: Arc::new(SerpApiSearcher::new(SearchConfig::default())),
        search_results: RuntimeConfig::default().search_results,
    });

    for kind in registry.kinds() {
        match registry.metadata(kind) {
            Some(metadata) => {
                println!("  • {} [{}] ({})", kind, kind.as_tag(), metadata.category);
                println!("    {}", metadata.description);
            }
            None => println!("  • {}", kind),
        }
    }
}

fn create_example_stack(output: &Path) -> Result<()> {
    let mut spec = GraphSpec::new();

    let query = spec.add_node(Node::user_query("query-1").with_position(100.0, 100.0));
    let kb = spec.add_node(
        Node::new(
            "kb-1",
            NodeConfig::KnowledgeBase(KnowledgeBaseConfig {
                label: "Docs".to_string(),
                collection_name: Some("docs".to_string()),
                ..Default::default()
            }),
        )
        .with_position(300.0, 100.0),
    );
    let llm = spec.add_node(
        Node::llm_engine(
            "llm-1",
            LlmEngineConfig {
                label: "Answer".to_string(),
                prompt: "Answer using the context.\n\n{{context}}\n\nQuestion: {{query}}"
                    .to_string(),
                ..Default::default()
            },
        )
        .with_position(500.0, 100.0),
    );
    let out = spec.add_node(Node::output("output-1").with_position(700.0, 100.0));

    spec.connect(query, kb.clone());
    spec.connect(kb, llm.clone());
    spec.connect(llm, out);

    let json = serde_json::to_string_pretty(&spec)?;
    std::fs::write(output, json)?;

    println!("✨ Created example stack: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  stack run --file {} --query 'What is Tokio?' --passages passages.json",
        output.display()
    );

    Ok(())
}
