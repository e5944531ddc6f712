//! The RAG orchestrator.
//!
//! [`RagSystem`] wires the document processor, vector store, tools,
//! generator, and session manager together. It is shared behind an `Arc`
//! by the HTTP handlers and used directly by the CLI.
//!
//! # Ingestion
//!
//! ```text
//! docs/ ──walk + globs──▶ DocumentProcessor ──▶ fingerprint unchanged? ──yes──▶ skip
//!                                                        │ no
//!                                                        ▼
//!                                          VectorStore::add_course (replace)
//! ```
//!
//! # Query
//!
//! ```text
//! session history ─┐
//! prefetched hits ─┼─▶ AiGenerator (tools) ──▶ answer + sources ──▶ append turn
//! user query ──────┘
//! ```

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::generator::{AiGenerator, AnthropicClient, GeneratorError, LlmClient};
use crate::ingest::{IngestReport, Ingestor};
use crate::models::{Course, CourseAnalytics, Source};
use crate::session::SessionManager;
use crate::store::{SqliteStore, Store};
use crate::tools::{CourseSearchTool, Tool, ToolRegistry};
use crate::vector_store::VectorStore;

/// A successful query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub answer: String,
    pub sources: Vec<Source>,
    pub session_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("retrieval failed: {0:#}")]
    Retrieval(anyhow::Error),
    #[error(transparent)]
    Generation(GeneratorError),
}

impl From<GeneratorError> for QueryError {
    fn from(err: GeneratorError) -> Self {
        match err {
            GeneratorError::Tool { name, message } => {
                QueryError::Retrieval(anyhow::anyhow!("tool '{}' failed: {}", name, message))
            }
            other => QueryError::Generation(other),
        }
    }
}

pub struct RagSystem {
    ingestor: Ingestor,
    vector_store: Arc<VectorStore>,
    tools: ToolRegistry,
    generator: AiGenerator,
    sessions: SessionManager,
    prefetch_context: bool,
}

impl RagSystem {
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        let vector_store = Arc::new(VectorStore::new(
            store,
            embedder,
            config.retrieval.max_results,
        ));
        Self {
            ingestor: Ingestor::new(config, vector_store.clone()),
            tools: ToolRegistry::with_course_tools(vector_store.clone()),
            vector_store,
            generator: AiGenerator::new(llm, &config.generation),
            sessions: SessionManager::from_config(&config.session),
            prefetch_context: config.retrieval.prefetch_context,
        }
    }

    /// SQLite store, the configured embedding provider, and the Anthropic client.
    pub async fn from_config(config: &Config, api_key: &str) -> Result<Self> {
        let store = SqliteStore::open(config).await?;
        let embedder = create_provider(&config.embedding)?;
        let llm = AnthropicClient::new(api_key, &config.generation)
            .context("Failed to build Anthropic client")?;
        Ok(Self::new(config, Arc::new(store), embedder, Arc::new(llm)))
    }

    pub fn vector_store(&self) -> &Arc<VectorStore> {
        &self.vector_store
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Parse, chunk, embed, and store one course document, replacing any
    /// stored course with the same title.
    pub async fn add_course_document(&self, path: &Path) -> Result<(Course, usize)> {
        self.ingestor.add_course_document(path).await
    }

    /// Ingest every matching document under `path`, skipping unchanged ones.
    pub async fn add_course_folder(&self, path: &Path, clear_existing: bool) -> Result<IngestReport> {
        self.ingestor.add_course_folder(path, clear_existing).await
    }

    /// Answer a question within a session, creating the session if needed.
    pub async fn query(
        &self,
        query: &str,
        session_id: Option<&str>,
    ) -> Result<QueryOutcome, QueryError> {
        let session_id = self.sessions.resolve(session_id);
        let history = self.sessions.formatted_history(&session_id);

        let mut sources = Vec::new();
        let context = if self.prefetch_context {
            let output = CourseSearchTool::new(self.vector_store.clone())
                .execute(json!({ "query": query }))
                .await
                .map_err(QueryError::Retrieval)?;
            sources.extend(output.sources);
            Some(output.content)
        } else {
            None
        };

        let prompt = format!("Answer this question about course materials: {}", query);
        let generation = self
            .generator
            .generate(&prompt, history.as_deref(), context.as_deref(), Some(&self.tools))
            .await?;

        for source in generation.sources {
            if !sources.contains(&source) {
                sources.push(source);
            }
        }

        self.sessions.append(&session_id, query, &generation.answer);
        tracing::debug!(session = %session_id, tool_calls = generation.tool_calls, "query answered");

        Ok(QueryOutcome {
            answer: generation.answer,
            sources,
            session_id,
        })
    }

    pub async fn course_analytics(&self) -> Result<CourseAnalytics> {
        let course_titles = self.vector_store.course_titles().await?;
        Ok(CourseAnalytics {
            total_courses: course_titles.len(),
            course_titles,
        })
    }
}
