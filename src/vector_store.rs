//! Embedding-aware facade over a [`Store`].
//!
//! Owns the embedding provider so callers deal in text: courses go in with
//! their chunks, queries come back as [`SearchResults`]. Course names in
//! queries are resolved against the catalog before filtering, so
//! `"MCP"` finds `"MCP: Build Rich-Context AI Apps with Anthropic"`.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::models::{Course, CourseChunk};
use crate::store::{check_meta, ChunkFilter, CourseRecord, IndexMeta, SqliteStore, Store};

/// One retrieved chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub content: String,
    pub course_title: String,
    pub lesson_number: Option<i64>,
    /// `1 - cosine similarity`; smaller is closer.
    pub distance: f32,
}

/// Result of a content search. `error` carries a user-facing reason when
/// the search could not run as asked (e.g. an unknown course name).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    pub error: Option<String>,
}

impl SearchResults {
    pub fn empty(error: impl Into<String>) -> Self {
        Self {
            hits: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

pub struct VectorStore {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    max_results: usize,
}

impl VectorStore {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        max_results: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            max_results,
        }
    }

    /// SQLite-backed store with the configured embedding provider.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = SqliteStore::open(config).await?;
        let embedder = create_provider(&config.embedding)?;
        Ok(Self::new(
            Arc::new(store),
            embedder,
            config.retrieval.max_results,
        ))
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Model and dims of the configured embedding provider.
    pub fn index_meta(&self) -> IndexMeta {
        IndexMeta {
            model: self.embedder.model_name().to_string(),
            dims: self.embedder.dims(),
        }
    }

    /// Fail when the stored index was built by a different embedding model.
    ///
    /// Fingerprints only track source text, so without this check a model
    /// change would skip every unchanged course and leave vectors behind
    /// that no query can be compared with.
    pub async fn check_index(&self) -> Result<()> {
        let stored = self.store.index_meta().await?;
        check_meta(stored.as_ref(), &self.index_meta())
    }

    /// Embed and store a course and its chunks, replacing any earlier
    /// version of the same course. Returns the number of chunks stored.
    ///
    /// Nothing is written unless every embedding succeeds, so a failed call
    /// leaves the previous version (and its fingerprint) in place.
    pub async fn add_course(
        &self,
        course: &Course,
        chunks: &[CourseChunk],
        fingerprint: &str,
    ) -> Result<usize> {
        let title_vector = self
            .embedder
            .embed_query(&course.title)
            .await
            .with_context(|| format!("Failed to embed course title '{}'", course.title))?;

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder
                .embed(&texts)
                .await
                .with_context(|| format!("Failed to embed chunks of '{}'", course.title))?
        };
        if vectors.len() != chunks.len() {
            anyhow::bail!(
                "embedding provider returned {} vectors for {} chunks of '{}'",
                vectors.len(),
                chunks.len(),
                course.title
            );
        }

        let record = CourseRecord {
            course,
            fingerprint,
            title_vector: &title_vector,
            chunks,
            vectors: &vectors,
        };
        self.store.replace_course(&self.index_meta(), &record).await?;
        Ok(chunks.len())
    }

    /// Top-k content search, optionally restricted to a course and lesson.
    pub async fn search(
        &self,
        query: &str,
        course_name: Option<&str>,
        lesson_number: Option<i64>,
    ) -> Result<SearchResults> {
        self.search_with_limit(query, course_name, lesson_number, self.max_results)
            .await
    }

    pub async fn search_with_limit(
        &self,
        query: &str,
        course_name: Option<&str>,
        lesson_number: Option<i64>,
        limit: usize,
    ) -> Result<SearchResults> {
        self.check_index().await?;

        let course_title = match course_name {
            Some(name) => match self.resolve_course_name(name).await? {
                Some(title) => Some(title),
                None => {
                    return Ok(SearchResults::empty(format!(
                        "No course found matching '{}'",
                        name
                    )))
                }
            },
            None => None,
        };

        if limit == 0 {
            return Ok(SearchResults::default());
        }

        let filter = ChunkFilter {
            course_title,
            lesson_number,
        };
        let query_vec = self.embedder.embed_query(query).await?;
        let matches = self.store.search_chunks(&query_vec, &filter, limit).await?;

        Ok(SearchResults {
            hits: matches
                .into_iter()
                .map(|m| SearchHit {
                    content: m.chunk.content,
                    course_title: m.chunk.course_title,
                    lesson_number: m.chunk.lesson_number,
                    distance: 1.0 - m.similarity,
                })
                .collect(),
            error: None,
        })
    }

    /// Map a possibly partial course name to a stored title.
    ///
    /// Exact (case-insensitive) match wins, then a unique substring match,
    /// then the nearest title embedding. `None` only for an empty catalog.
    pub async fn resolve_course_name(&self, name: &str) -> Result<Option<String>> {
        let titles = self.store.course_titles().await?;
        if titles.is_empty() {
            return Ok(None);
        }

        let needle = name.trim().to_lowercase();
        if let Some(title) = titles.iter().find(|t| t.to_lowercase() == needle) {
            return Ok(Some(title.clone()));
        }

        if !needle.is_empty() {
            let partial: Vec<&String> = titles
                .iter()
                .filter(|t| t.to_lowercase().contains(&needle))
                .collect();
            if partial.len() == 1 {
                return Ok(Some(partial[0].clone()));
            }
        }

        let query_vec = self.embedder.embed_query(name).await?;
        let best = self.store.search_courses(&query_vec, 1).await?;
        Ok(best.into_iter().next().map(|m| m.title))
    }

    pub async fn get_course(&self, title: &str) -> Result<Option<Course>> {
        self.store.get_course(title).await
    }

    pub async fn course_fingerprint(&self, title: &str) -> Result<Option<String>> {
        self.store.course_fingerprint(title).await
    }

    pub async fn course_link(&self, course_title: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .get_course(course_title)
            .await?
            .and_then(|c| c.course_link))
    }

    pub async fn lesson_link(&self, course_title: &str, lesson_number: i64) -> Result<Option<String>> {
        Ok(self
            .store
            .get_course(course_title)
            .await?
            .and_then(|c| c.lesson(lesson_number).and_then(|l| l.lesson_link.clone())))
    }

    pub async fn course_titles(&self) -> Result<Vec<String>> {
        self.store.course_titles().await
    }

    pub async fn course_count(&self) -> Result<usize> {
        Ok(self.store.course_titles().await?.len())
    }

    pub async fn all_courses(&self) -> Result<Vec<Course>> {
        self.store.all_courses().await
    }

    pub async fn chunk_count(&self) -> Result<usize> {
        self.store.chunk_count().await
    }

    pub async fn clear_all(&self) -> Result<()> {
        self.store.clear().await
    }
}
