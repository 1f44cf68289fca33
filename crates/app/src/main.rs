use chrono::Utc;
use clap::{Parser, Subcommand};
use docchat_core::gemini::{DEFAULT_API_BASE, DEFAULT_EMBEDDING_MODEL, DEFAULT_GENERATION_MODEL};
use docchat_core::{
    AppError, CharacterNgramEmbedder, ChatOrchestrator, ChatRequest, DocumentService, Embedder,
    FileStorage, GeminiConfig, GeminiEmbedder, GeminiGenerator, QdrantStore, RetrievalPipeline,
    SqliteRepository, UploadRequest, DEFAULT_QUERY_TOP_K,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docchat", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite database holding documents and chats
    #[arg(long, env = "DOCCHAT_DATABASE", default_value = "docchat.sqlite3")]
    database: PathBuf,

    /// Directory for uploaded files
    #[arg(long, env = "DOCCHAT_MEDIA_ROOT", default_value = "media")]
    media_root: PathBuf,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    /// Gemini API base URL
    #[arg(long, env = "GEMINI_API_BASE", default_value = DEFAULT_API_BASE)]
    gemini_api_base: String,

    /// Embedding model used for both ingestion and queries
    #[arg(long, env = "GEMINI_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Generation model for chat replies
    #[arg(long, env = "GEMINI_GENERATION_MODEL", default_value = DEFAULT_GENERATION_MODEL)]
    generation_model: String,

    /// Embed with the local character-trigram model instead of Gemini.
    #[arg(long, default_value_t = false)]
    offline_embeddings: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Store a .pdf, .docx or .txt file, create its chat and index its text.
    Upload {
        #[arg(long)]
        file: PathBuf,
    },
    /// List documents, newest first.
    Documents,
    /// Delete a document with its file, chat links and index collection.
    Delete {
        #[arg(long)]
        id: i64,
    },
    /// Show the chunks of a document nearest to a question.
    Query {
        #[arg(long)]
        document_id: Option<i64>,
        #[arg(long)]
        question: Option<String>,
        #[arg(long, default_value_t = DEFAULT_QUERY_TOP_K)]
        top_k: usize,
    },
    /// Send one chat message and print the reply.
    Chat {
        #[arg(long)]
        chat_id: Option<i64>,
        #[arg(long, default_value = "")]
        message: String,
    },
}

struct Services {
    documents: DocumentService,
    chat: ChatOrchestrator,
}

impl Services {
    async fn build(cli: &Cli) -> anyhow::Result<Self> {
        let gemini = GeminiConfig {
            api_base: cli.gemini_api_base.clone(),
            api_key: cli
                .gemini_api_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
            embedding_model: cli.embedding_model.clone(),
            generation_model: cli.generation_model.clone(),
        };
        if gemini.api_key.is_none() {
            warn!("GEMINI_API_KEY is not set; hosted embedding and generation will fail");
        }

        let repository = Arc::new(SqliteRepository::open(&cli.database).await?);
        let index = Arc::new(QdrantStore::new(cli.qdrant_url.as_str()));
        let embedder: Arc<dyn Embedder> = if cli.offline_embeddings {
            Arc::new(CharacterNgramEmbedder::default())
        } else {
            Arc::new(GeminiEmbedder::new(gemini.clone()))
        };
        let pipeline = RetrievalPipeline::new(embedder, index);
        info!(
            database = %cli.database.display(),
            qdrant = %cli.qdrant_url,
            embedding_model = pipeline.embedding_model(),
            "services ready"
        );

        Ok(Self {
            documents: DocumentService::new(
                repository.clone(),
                FileStorage::new(&cli.media_root),
                pipeline.clone(),
            ),
            chat: ChatOrchestrator::new(
                repository,
                pipeline,
                Arc::new(GeminiGenerator::new(gemini)),
            ),
        })
    }
}

async fn read_upload(path: &Path) -> anyhow::Result<UploadRequest> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let bytes = tokio::fs::read(path).await?;
    Ok(UploadRequest { file_name, bytes })
}

async fn run(command: Command, services: &Services) -> anyhow::Result<Result<Value, AppError>> {
    let outcome = match command {
        Command::Upload { file } => {
            let request = read_upload(&file).await?;
            services
                .documents
                .upload(request)
                .await
                .map(|report| json!(report))
        }
        Command::Documents => services
            .documents
            .list()
            .await
            .map(|documents| json!(documents)),
        Command::Delete { id } => services
            .documents
            .delete(id)
            .await
            .map(|report| json!(report)),
        Command::Query {
            document_id,
            question,
            top_k,
        } => services
            .documents
            .query(document_id, question.as_deref().unwrap_or_default(), Some(top_k))
            .await
            .map(|results| json!({ "results": results })),
        Command::Chat { chat_id, message } => services
            .chat
            .answer(ChatRequest { message, chat_id })
            .await
            .map(|reply| json!({ "reply": reply.reply, "grounding": reply.grounding })),
    };
    Ok(outcome)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "docchat boot"
    );

    let services = Services::build(&cli).await?;

    match run(cli.command, &services).await? {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(error) => {
            warn!(status = error.status_code(), error = %error, "request failed");
            println!("{}", json!({ "error": error.to_string() }));
            Ok(ExitCode::FAILURE)
        }
    }
}
