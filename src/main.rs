//! # Lectern CLI
//!
//! The `lectern` binary is the operational interface to the tutoring
//! backend: database initialization, document ingestion, the background
//! worker, ad-hoc questions, and the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! lectern --config ./config/lectern.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lectern init` | Create the SQLite database and run schema migrations |
//! | `lectern ingest <file>` | Upload a document and index it (or queue it with `--queue`) |
//! | `lectern jobs` | List ingestion jobs and their statuses |
//! | `lectern worker` | Run the background worker draining queued jobs |
//! | `lectern ask "<question>"` | Ask a question and stream the answer |
//! | `lectern serve` | Start the HTTP server |

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use lectern::answer::{AnswerEvent, AnswerStreamer};
use lectern::config::{load_config, Config};
use lectern::conversations::ConversationStore;
use lectern::embedding::EmbeddingClient;
use lectern::generation::GenerationClient;
use lectern::index::VectorIndex;
use lectern::ingestion::IngestionCoordinator;
use lectern::retrieval::RetrievalOrchestrator;
use lectern::server::AppState;
use lectern::{db, migrate, server, worker};

/// Lectern — a grade-aware tutoring backend over ingested textbooks.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lectern.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "lectern",
    about = "Lectern — ingest textbooks and answer grade-aware student questions",
    version,
    long_about = "Lectern ingests textbook documents into a searchable passage index \
    and answers student questions with retrieval-grounded, streamed responses, \
    recording each exchange as a conversation."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lectern.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Upload a document and ingest it into the passage index.
    ///
    /// Copies the file into the upload directory, creates an ingestion
    /// job, and processes it in place unless `--queue` defers it to a
    /// running worker.
    Ingest {
        /// Path to the source document (.pdf, .txt, or .md).
        file: PathBuf,

        /// Grade level the document is for (1-12).
        #[arg(long)]
        grade: i64,

        /// Subject the document covers, e.g. "Physics".
        #[arg(long)]
        subject: String,

        /// Chapter or unit name, e.g. "Motion".
        #[arg(long)]
        chapter: String,

        /// Leave the job PENDING for a background worker instead of
        /// processing it now.
        #[arg(long)]
        queue: bool,
    },

    /// List ingestion jobs, newest first.
    Jobs,

    /// Run the background worker draining PENDING jobs.
    Worker,

    /// Ask a question and print the answer.
    Ask {
        /// The question to ask.
        question: String,

        /// Grade level to retrieve passages for (1-12).
        #[arg(long)]
        grade: i64,

        /// Student identifier the conversation is recorded under.
        #[arg(long, default_value = "cli-student")]
        student: String,

        /// Continue an existing conversation.
        #[arg(long)]
        conversation: Option<String>,

        /// Wait for the complete answer instead of streaming, and print
        /// the source passages.
        #[arg(long)]
        no_stream: bool,
    },

    /// Start the HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lectern=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config.db.path).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("initialized database at {}", config.db.path.display());
        }

        Commands::Ingest {
            file,
            grade,
            subject,
            chapter,
            queue,
        } => {
            let coordinator = build_coordinator(&config).await?;

            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .context("file path has no filename")?
                .to_string();
            let bytes = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            coordinator.save_upload(&filename, &bytes)?;

            let job = coordinator.create_job(&filename, grade, &subject, &chapter).await?;
            println!("created job {} for {}", job.id, job.filename);

            if queue {
                println!("queued; a running worker will pick it up");
            } else {
                let passages = coordinator.start(&job.id).await?;
                println!("indexed {} passages", passages);
                println!("ok");
            }
        }

        Commands::Jobs => {
            let coordinator = build_coordinator(&config).await?;
            let jobs = coordinator.list_jobs().await?;
            if jobs.is_empty() {
                println!("no ingestion jobs");
            }
            for job in jobs {
                let when = chrono::DateTime::from_timestamp(job.created_at, 0)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                println!(
                    "{}  {:10}  grade {:2}  {} / {}  {}",
                    job.id, job.status.as_str(), job.grade, job.subject, job.chapter, when
                );
                if let Some(ref error) = job.error {
                    println!("    error: {}", error);
                }
            }
        }

        Commands::Worker => {
            let coordinator = build_coordinator(&config).await?;
            let poll = Duration::from_secs(config.worker.poll_interval_secs);
            worker::run(&coordinator, poll).await;
        }

        Commands::Ask {
            question,
            grade,
            student,
            conversation,
            no_stream,
        } => {
            let streamer = build_streamer(&config).await?;

            if no_stream {
                let (text, sources) = streamer.answer(&question, grade).await?;
                println!("{}", text);
                if !sources.is_empty() {
                    println!();
                    println!("sources:");
                    for source in sources {
                        println!(
                            "  [{:.2}] {} (grade {}, {} / {}, chunk {})",
                            source.score,
                            source.passage.metadata.filename,
                            source.passage.metadata.grade,
                            source.passage.metadata.subject,
                            source.passage.metadata.chapter,
                            source.passage.metadata.chunk_index
                        );
                    }
                }
            } else {
                let (conversation, mut rx) = streamer
                    .stream_answer(&student, &question, grade, conversation.as_deref())
                    .await?;
                eprintln!("conversation: {}", conversation.id);

                let mut stdout = std::io::stdout();
                while let Some(event) = rx.recv().await {
                    match event {
                        AnswerEvent::Delta(delta) => {
                            print!("{}", delta);
                            stdout.flush().ok();
                        }
                        AnswerEvent::Error(message) => {
                            println!();
                            eprintln!("error: {}", message);
                        }
                        AnswerEvent::Done => println!(),
                    }
                }
            }
        }

        Commands::Serve => {
            let state = build_state(&config).await?;
            server::run_server(&config.server.bind, state).await?;
        }
    }

    Ok(())
}

/// Construct the shared handles once and wire the components together.
/// Every command goes through here, so there is exactly one pool and one
/// client of each capability per process.
async fn build_state(config: &Config) -> Result<AppState> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;

    let embedder = Arc::new(EmbeddingClient::new(&config.embedding)?);
    let index = VectorIndex::new(
        pool.clone(),
        embedder,
        config.index.collection.clone(),
        config.embedding.batch_size,
    );

    let coordinator = IngestionCoordinator::new(
        pool.clone(),
        index.clone(),
        config.storage.upload_dir.clone(),
        config.chunking.chunk_size,
        config.chunking.overlap,
    );

    let retriever = RetrievalOrchestrator::new(index, &config.retrieval);
    let generator = Arc::new(GenerationClient::new(&config.generation)?);
    let conversations = ConversationStore::new(pool);
    let streamer = AnswerStreamer::new(retriever, generator, conversations.clone());

    Ok(AppState {
        coordinator,
        streamer,
        conversations,
    })
}

async fn build_coordinator(config: &Config) -> Result<IngestionCoordinator> {
    Ok(build_state(config).await?.coordinator)
}

async fn build_streamer(config: &Config) -> Result<AnswerStreamer> {
    Ok(build_state(config).await?.streamer)
}
