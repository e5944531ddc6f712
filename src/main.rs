//! # course-rag CLI
//!
//! ## Usage
//!
//! ```bash
//! course-rag --config ./config/course-rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `course-rag init` | Create the SQLite database and schema |
//! | `course-rag ingest [PATH]` | Ingest course documents (default `documents.path`) |
//! | `course-rag courses` | List stored courses |
//! | `course-rag search "<query>"` | Semantic search over lesson content |
//! | `course-rag ask "<question>"` | Answer one question with the model |
//! | `course-rag serve` | Start the HTTP API and frontend |
//!
//! `ask` and `serve` need `ANTHROPIC_API_KEY` (read from the environment or
//! a `.env` file). Log verbosity follows `RUST_LOG` (default `info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use course_rag::config::{self, Config};
use course_rag::rag::RagSystem;
use course_rag::{ingest, migrate, search, server};

/// Course materials assistant: ingest course documents, search them, and
/// answer questions about them over HTTP.
#[derive(Parser)]
#[command(name = "course-rag", version)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when it is missing.
    #[arg(long, global = true, default_value = "./config/course-rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema. Safe to run repeatedly.
    Init,

    /// Ingest course documents from a folder or a single file.
    Ingest {
        /// Folder or file to ingest. Defaults to `[documents].path`.
        path: Option<PathBuf>,

        /// Delete all stored courses first.
        #[arg(long)]
        clear: bool,
    },

    /// List stored courses with their lesson counts.
    Courses,

    /// Search lesson content.
    Search {
        query: String,

        /// Restrict to a course (partial names are resolved).
        #[arg(long)]
        course: Option<String>,

        /// Restrict to a lesson number.
        #[arg(long)]
        lesson: Option<i64>,
    },

    /// Ask one question and print the answer with its sources.
    Ask {
        question: String,

        /// Continue an existing session.
        #[arg(long)]
        session: Option<String>,
    },

    /// Start the HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { path, clear } => {
            ingest::run_ingest(&cfg, path.as_deref(), clear).await?;
        }
        Commands::Courses => {
            search::run_courses(&cfg).await?;
        }
        Commands::Search {
            query,
            course,
            lesson,
        } => {
            search::run_search(&cfg, &query, course.as_deref(), lesson).await?;
        }
        Commands::Ask { question, session } => {
            run_ask(&cfg, &question, session.as_deref()).await?;
        }
        Commands::Serve => {
            run_serve(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_ask(cfg: &Config, question: &str, session: Option<&str>) -> Result<()> {
    let api_key = config::anthropic_api_key()?;
    let rag = RagSystem::from_config(cfg, &api_key).await?;
    let outcome = rag.query(question, session).await?;

    println!("{}", outcome.answer);
    if !outcome.sources.is_empty() {
        println!();
        println!("Sources:");
        for source in &outcome.sources {
            match &source.url {
                Some(url) => println!("  - {} ({})", source.text, url),
                None => println!("  - {}", source.text),
            }
        }
    }
    println!();
    println!("session: {}", outcome.session_id);
    Ok(())
}

async fn run_serve(cfg: &Config) -> Result<()> {
    let api_key = config::anthropic_api_key()?;
    let rag = Arc::new(RagSystem::from_config(cfg, &api_key).await?);

    if cfg.server.ingest_on_startup {
        match rag.add_course_folder(&cfg.documents.path, false).await {
            Ok(report) => tracing::info!(
                courses = report.courses_added,
                chunks = report.chunks_added,
                skipped = report.skipped,
                failed = report.failed,
                "startup ingestion complete"
            ),
            Err(e) => tracing::warn!(error = %format!("{:#}", e), "startup ingestion failed"),
        }
    }

    server::run_server(cfg, rag).await
}
