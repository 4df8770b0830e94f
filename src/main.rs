use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use chunkmill::config::Config;
use chunkmill::gateway::{self, AppState};
use chunkmill::models::{ModelCatalog, OpenAICompatClient};
use chunkmill::store::JobStore;
use chunkmill::{chunker, tokens};

#[derive(Parser, Debug)]
#[command(name = "chunkmill", version, about = "Big-context document processing engine")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the engine (gateway + scheduler)
    Start,
    /// Preview how a local file would be chunked, without touching the
    /// network or the database
    Estimate {
        /// File to chunk
        #[arg(long)]
        file: PathBuf,
        /// Instruction that would be applied per chunk
        #[arg(long)]
        instruction: String,
        /// Model context window in tokens
        #[arg(long, default_value_t = 128_000)]
        context_length: usize,
        /// Model max output tokens, if limited
        #[arg(long)]
        max_output: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(|| chunkmill::chunkmill_home().join("config.yaml"));

    match cli.command {
        Some(Command::Estimate {
            file,
            instruction,
            context_length,
            max_output,
        }) => {
            return estimate_file(&file, &instruction, context_length, max_output);
        }
        Some(Command::Start) | None => { /* fall through to server startup */ }
    }

    info!(path = %config_path.display(), "loading configuration");
    let cfg = Config::load(&config_path).await?;

    let db_path = cfg.database_path();
    let store = Arc::new(JobStore::open_path(&db_path)?);
    info!(db = %db_path.display(), "job store opened");

    let api_key = cfg.provider.resolve_api_key();
    if api_key.is_empty() {
        tracing::warn!("no provider API key configured — only keyless endpoints will work");
    }
    let client = Arc::new(OpenAICompatClient::new(
        cfg.provider.endpoint.clone(),
        api_key.clone(),
    ));
    let catalog = Arc::new(ModelCatalog::with_ttl(
        cfg.provider.endpoint.clone(),
        api_key,
        std::time::Duration::from_secs(cfg.catalog_ttl_secs),
    ));

    let addr: std::net::SocketAddr = cfg
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {:?}", cfg.bind))?;
    let gw = gateway::start_gateway(
        addr,
        AppState {
            store,
            client,
            catalog,
        },
    )
    .await?;

    info!(
        addr = %gw.addr,
        provider = %cfg.provider.endpoint,
        "chunkmill ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("received Ctrl-C, shutting down");
    gw.handle.abort();

    Ok(())
}

/// Chunk a local file and print the plan.
fn estimate_file(
    file: &PathBuf,
    instruction: &str,
    context_length: usize,
    max_output: Option<usize>,
) -> anyhow::Result<()> {
    let text =
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;

    let total_tokens = tokens::estimate_tokens(&text);
    let instruction_tokens = tokens::estimate_tokens(instruction);
    let budget = tokens::max_chunk_tokens(context_length, instruction_tokens, max_output);
    let chunks = chunker::split(&text, budget);

    println!("file:            {}", file.display());
    println!("characters:      {}", text.chars().count());
    println!("estimated tokens: {total_tokens}");
    println!("chunk budget:    {budget} tokens");
    println!("chunks:          {}", chunks.len());
    for chunk in &chunks {
        println!(
            "  [{:>3}] {:>7} chars  ~{:>6} tokens",
            chunk.index,
            chunk.text.chars().count(),
            tokens::estimate_tokens(&chunk.text)
        );
    }
    Ok(())
}
