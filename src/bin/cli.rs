//! Memoria CLI
//!
//! Command-line interface for storing memory items and running retrievals.

use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{Duration, Utc};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use memoria::config::{EmbeddingConfig, RetrievalConfig};
use memoria::embedding::{create_embedder, Embedder};
use memoria::storage::queries::{
    insert_memory, items_missing_embedding, purge_expired, set_embedding, soft_delete_memory,
};
use memoria::storage::{
    query_audit_log, AuditFilter, CompositeAuditSink, SqliteAuditSink, Storage, TracingAuditSink,
};
use memoria::types::*;
use memoria::MemoryRetriever;

#[derive(Parser)]
#[command(name = "memoria")]
#[command(about = "Memory retrieval engine CLI")]
#[command(version)]
struct Cli {
    /// Database path
    #[arg(
        long,
        env = "MEMORIA_DB_PATH",
        default_value = "~/.local/share/memoria/memoria.db"
    )]
    db_path: String,

    /// Storage mode: local or cloud-safe
    #[arg(long, env = "MEMORIA_STORAGE_MODE", default_value = "local")]
    storage_mode: String,

    /// Emit logs as JSON
    #[arg(long, env = "MEMORIA_LOG_JSON")]
    log_json: bool,

    #[command(flatten)]
    embedding: EmbeddingArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct EmbeddingArgs {
    /// Embedding backend: tfidf or openai
    #[arg(long, env = "MEMORIA_EMBEDDING_MODEL", default_value = "tfidf")]
    embedding_model: String,

    /// API key for the openai backend
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, env = "OPENAI_BASE_URL")]
    openai_base_url: Option<String>,

    /// Remote embedding model name
    #[arg(long, env = "OPENAI_EMBEDDING_MODEL")]
    openai_embedding_model: Option<String>,

    /// Embedding dimensions
    #[arg(long, env = "MEMORIA_EMBEDDING_DIMENSIONS", default_value = "384")]
    embedding_dimensions: usize,
}

impl EmbeddingArgs {
    fn to_config(&self) -> EmbeddingConfig {
        EmbeddingConfig {
            model: self.embedding_model.clone(),
            api_key: self.openai_api_key.clone(),
            base_url: self.openai_base_url.clone(),
            embedding_model: self.openai_embedding_model.clone(),
            dimensions: self.embedding_dimensions,
        }
    }
}

#[derive(Args)]
struct RetrievalArgs {
    /// Token budget for returned content
    #[arg(long, env = "MEMORIA_TOKEN_BUDGET", default_value = "1000")]
    token_budget: usize,

    /// Per-call deadline in milliseconds
    #[arg(long, env = "MEMORIA_DEADLINE_MS", default_value = "200")]
    deadline_ms: u64,

    /// Extra milliseconds allowed for hydration and again for the audit write
    #[arg(long, env = "MEMORIA_GRACE_MS", default_value = "50")]
    grace_ms: u64,

    /// Embedding client timeout in milliseconds
    #[arg(long, env = "MEMORIA_EMBEDDING_TIMEOUT_MS", default_value = "150")]
    embedding_timeout_ms: u64,

    /// Requests allowed per owner per minute
    #[arg(long, env = "MEMORIA_RATE_LIMIT", default_value = "10")]
    rate_limit: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a memory item
    Add {
        /// Owner of the item
        #[arg(short, long)]
        owner: String,
        /// Content to remember
        content: String,
        /// Memory type
        #[arg(short, long, default_value = "note")]
        r#type: MemoryType,
        /// Importance (0-1)
        #[arg(short, long)]
        importance: Option<f32>,
        /// Expire the item after this many seconds
        #[arg(long)]
        expires_in_secs: Option<i64>,
        /// Store without an embedding
        #[arg(long)]
        no_embed: bool,
    },
    /// Soft-delete a memory item
    Delete {
        #[arg(short, long)]
        owner: String,
        id: i64,
    },
    /// Embed items stored without an embedding
    EmbedMissing {
        #[arg(short, long)]
        owner: String,
        /// Items per batch
        #[arg(long, default_value = "100")]
        batch: usize,
    },
    /// Retrieve memory items for a query (JSON output)
    Retrieve {
        #[arg(short, long)]
        owner: String,
        query: String,
        /// Maximum number of items
        #[arg(short, long)]
        limit: Option<usize>,
        /// Restrict to these types (comma-separated)
        #[arg(short = 't', long = "types", value_delimiter = ',')]
        types: Vec<MemoryType>,
        /// Minimum relevance (0-1)
        #[arg(long)]
        min_relevance: Option<f64>,
        #[command(flatten)]
        retrieval: RetrievalArgs,
    },
    /// Show recent retrieval audit records
    Audit {
        #[arg(short, long)]
        owner: Option<String>,
        /// Only records from the last N hours
        #[arg(long)]
        since_hours: Option<i64>,
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
    /// Soft-delete every expired item
    PurgeExpired,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    // Expand ~ in path
    let db_path = shellexpand::tilde(&cli.db_path).to_string();
    let storage_mode = match cli.storage_mode.as_str() {
        "local" => StorageMode::Local,
        "cloud-safe" => StorageMode::CloudSafe,
        other => bail!("unknown storage mode '{}', expected local or cloud-safe", other),
    };

    let storage = Storage::open(StorageConfig {
        db_path,
        storage_mode,
    })
    .context("failed to open database")?;
    if let Some(warning) = storage.storage_mode_warning() {
        tracing::warn!("{}", warning);
    }

    match cli.command {
        Commands::Add {
            owner,
            content,
            r#type,
            importance,
            expires_in_secs,
            no_embed,
        } => {
            let mut input = NewMemory::new(owner, content, r#type);
            input.importance = importance;
            input.expires_at = expires_in_secs.map(|secs| Utc::now() + Duration::seconds(secs));
            if !no_embed {
                let embedder = create_embedder(&cli.embedding.to_config())?;
                input.embedding = Some(embedder.embed(&input.content).await?);
            }

            let item = storage.with_transaction(|conn| insert_memory(conn, &input))?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }

        Commands::Delete { owner, id } => {
            let scope = OwnerScope::new(owner)?;
            if storage.with_transaction(|conn| soft_delete_memory(conn, &scope, id))? {
                println!("Deleted memory #{}", id);
            } else {
                bail!("memory #{} not found for owner {}", id, scope);
            }
        }

        Commands::EmbedMissing { owner, batch } => {
            let scope = OwnerScope::new(owner)?;
            let embedder = create_embedder(&cli.embedding.to_config())?;
            let embedded = embed_missing(&storage, embedder.as_ref(), &scope, batch.max(1)).await?;
            println!("Embedded {} memories", embedded);
        }

        Commands::Retrieve {
            owner,
            query,
            limit,
            types,
            min_relevance,
            retrieval,
        } => {
            let config = RetrievalConfig {
                token_budget: retrieval.token_budget,
                deadline_ms: retrieval.deadline_ms,
                grace_ms: retrieval.grace_ms,
                embedding_timeout_ms: retrieval.embedding_timeout_ms,
                rate_limit_per_window: retrieval.rate_limit,
                ..Default::default()
            };
            let embedder = create_embedder(&cli.embedding.to_config())?;
            let audit = CompositeAuditSink::new(vec![
                Arc::new(TracingAuditSink),
                Arc::new(SqliteAuditSink::new(storage.clone())),
            ]);
            let retriever = MemoryRetriever::sqlite(storage.clone(), config)
                .embedder(embedder)
                .audit(Arc::new(audit))
                .build()?;

            let mut request = RetrievalRequest::new(owner, query);
            request.result_limit = limit;
            request.min_relevance = min_relevance;
            if !types.is_empty() {
                request.type_filter = Some(types);
            }

            let response = retriever.retrieve(request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Commands::Audit {
            owner,
            since_hours,
            limit,
        } => {
            let filter = AuditFilter {
                owner_id: owner,
                since: since_hours.map(|h| Utc::now() - Duration::hours(h)),
                limit: Some(limit),
            };
            let records = storage.with_connection(|conn| query_audit_log(conn, &filter))?;
            for record in records {
                println!("{}", serde_json::to_string(&record)?);
            }
        }

        Commands::PurgeExpired => {
            let purged = storage.with_transaction(|conn| purge_expired(conn, Utc::now()))?;
            println!("Purged {} expired memories", purged);
        }
    }

    Ok(())
}

async fn embed_missing(
    storage: &Storage,
    embedder: &dyn Embedder,
    scope: &OwnerScope,
    batch: usize,
) -> anyhow::Result<usize> {
    let mut total = 0;
    loop {
        let items = storage.with_connection(|conn| items_missing_embedding(conn, scope, batch))?;
        if items.is_empty() {
            break;
        }

        let texts: Vec<&str> = items.iter().map(|m| m.content.as_str()).collect();
        let embeddings = embedder.embed_batch(&texts).await?;
        if embeddings.len() != items.len() {
            bail!(
                "embedding backend returned {} vectors for {} inputs",
                embeddings.len(),
                items.len()
            );
        }

        storage.with_transaction(|conn| {
            for (item, embedding) in items.iter().zip(&embeddings) {
                set_embedding(conn, scope, item.id, embedding)?;
            }
            Ok(())
        })?;

        total += items.len();
        tracing::info!(batch = items.len(), total, "embedded memory items");
    }
    Ok(total)
}
