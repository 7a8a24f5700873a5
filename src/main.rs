use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use semvault::api::{self, AppState};
use semvault::config::{Config, CONFIG_FILE};
use semvault::embed::{create_embedder, Embedder};
use semvault::indexer::{IndexJob, IndexWorker, JobQueue, RetryPolicy};
use semvault::search::SearchEngine;
use semvault::store::{DocumentStore, UserRecord};

#[derive(Parser)]
#[command(name = "semvault")]
#[command(about = "Per-user document store with async embedding indexing and semantic search", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API with the background index worker
    Serve {
        #[arg(long, env = "SEMVAULT_BIND", help = "Override the configured bind address")]
        bind: Option<String>,
    },
    /// Create the database (and optionally a default config file)
    Init {
        #[arg(long, help = "Also write a default config file")]
        write_config: bool,
    },
    /// Register a user and print the API key
    Register { email: String },
    /// Add a document for a user and index it before returning
    Add {
        #[arg(long)]
        email: String,
        title: String,
        content: String,
    },
    /// Semantic search over a user's documents
    Search {
        #[arg(long)]
        email: String,
        query: String,
        #[arg(long, help = "JSON output")]
        json: bool,
    },
    /// List a user's documents, newest first
    List {
        #[arg(long)]
        email: String,
    },
    /// Show one document
    Get {
        #[arg(long)]
        email: String,
        id: i64,
    },
    /// Delete one document
    Delete {
        #[arg(long)]
        email: String,
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(Path::new(&cli.config));

    match cli.command {
        Commands::Serve { bind } => serve(config, bind).await,
        Commands::Init { write_config } => init(&config, &cli.config, write_config),
        Commands::Register { email } => {
            let (store, _) = open_components(&config)?;
            let user = store.create_user(&email)?;
            println!("registered {} (user id {})", user.email, user.id);
            println!("api key: {}", user.api_key);
            Ok(())
        }
        Commands::Add {
            email,
            title,
            content,
        } => add(&config, &email, &title, &content).await,
        Commands::Search { email, query, json } => search(&config, &email, &query, json).await,
        Commands::List { email } => {
            let (store, _) = open_components(&config)?;
            let user = resolve_user(&store, &email)?;
            for doc in store.list_documents(user.id)? {
                println!(
                    "{:>6}  {}  {}",
                    doc.id,
                    doc.created_at.format("%Y-%m-%d %H:%M"),
                    doc.title
                );
            }
            Ok(())
        }
        Commands::Get { email, id } => {
            let (store, _) = open_components(&config)?;
            let user = resolve_user(&store, &email)?;
            match store.get_document(user.id, id)? {
                Some(doc) => {
                    println!("# {} ({})", doc.title, doc.created_at.to_rfc3339());
                    println!("{}", doc.content);
                    Ok(())
                }
                None => bail!("document {id} not found"),
            }
        }
        Commands::Delete { email, id } => {
            let (store, _) = open_components(&config)?;
            let user = resolve_user(&store, &email)?;
            if store.delete_document(user.id, id)? {
                println!("deleted document {id}");
                Ok(())
            } else {
                bail!("document {id} not found")
            }
        }
    }
}

fn open_components(config: &Config) -> Result<(Arc<DocumentStore>, Arc<dyn Embedder>)> {
    let embedder = create_embedder(&config.embedding).context("failed to create embedder")?;
    let store = DocumentStore::open(Path::new(&config.database.path), embedder.dimension())
        .with_context(|| format!("failed to open database {}", config.database.path))?;
    Ok((Arc::new(store), embedder))
}

fn resolve_user(store: &DocumentStore, email: &str) -> Result<UserRecord> {
    match store.find_user_by_email(email)? {
        Some(user) => Ok(user),
        None => bail!("no user registered as {email}; run `semvault register {email}` first"),
    }
}

fn init(config: &Config, config_path: &str, write_config: bool) -> Result<()> {
    if write_config {
        config.save(Path::new(config_path))?;
        println!("wrote {config_path}");
    }
    let (store, embedder) = open_components(config)?;
    println!(
        "database {} ready ({} dims, {})",
        config.database.path,
        store.dimension(),
        embedder.name()
    );
    Ok(())
}

async fn serve(config: Config, bind: Option<String>) -> Result<()> {
    let (store, embedder) = open_components(&config)?;

    let (queue, rx) = JobQueue::new();
    let worker = IndexWorker::new(
        store.clone(),
        embedder.clone(),
        rx,
        RetryPolicy::from(&config.indexing),
    );
    tokio::spawn(worker.run());

    let engine = Arc::new(SearchEngine::new(
        store.clone(),
        embedder,
        config.search.top_k,
    ));
    let state = AppState {
        store,
        engine,
        queue,
    };
    let app = api::router(state);

    let bind = bind.unwrap_or(config.server.bind);
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address {bind}"))?;
    tracing::info!(%addr, "semvault listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("server shutdown")?;
    Ok(())
}

/// Insert the document, then drain the queue so the command returns with the
/// embedding already written, so there is no eventual-consistency window to reason
/// about in a one-shot invocation.
async fn add(config: &Config, email: &str, title: &str, content: &str) -> Result<()> {
    let (store, embedder) = open_components(config)?;
    let user = resolve_user(&store, email)?;

    let (queue, rx) = JobQueue::new();
    let mut worker = IndexWorker::new(
        store.clone(),
        embedder,
        rx,
        RetryPolicy::from(&config.indexing),
    );

    let doc = store.insert_document(user.id, title, content)?;
    queue.enqueue(IndexJob::new(doc.id, doc.content.clone()));
    worker.run_until_idle().await;

    println!("added document {} ({})", doc.id, doc.title);
    Ok(())
}

async fn search(config: &Config, email: &str, query: &str, json: bool) -> Result<()> {
    let (store, embedder) = open_components(config)?;
    let user = resolve_user(&store, email)?;

    let engine = SearchEngine::new(store, embedder, config.search.top_k);
    let hits = engine.search(user.id, query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("no results");
        return Ok(());
    }
    for hit in hits {
        let snippet: String = hit.content.chars().take(80).collect();
        println!("{:>6.3}  [{}] {}", hit.similarity, hit.id, hit.title);
        println!("        {snippet}");
    }
    Ok(())
}
