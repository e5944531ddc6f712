//! Storage abstraction for the course index.
//!
//! The [`Store`] trait covers both collections the vector store needs: the
//! course catalog (one embedding per course title) and the course content
//! (one embedding per chunk). [`SqliteStore`] persists to disk;
//! [`InMemoryStore`] backs tests and throwaway runs.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Course, CourseChunk};

/// Restricts a chunk search to one course and/or one lesson.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkFilter {
    pub course_title: Option<String>,
    pub lesson_number: Option<i64>,
}

impl ChunkFilter {
    pub fn matches(&self, chunk: &CourseChunk) -> bool {
        if let Some(title) = &self.course_title {
            if &chunk.course_title != title {
                return false;
            }
        }
        if let Some(n) = self.lesson_number {
            if chunk.lesson_number != Some(n) {
                return false;
            }
        }
        true
    }
}

/// A course title scored against a query.
#[derive(Debug, Clone)]
pub struct CourseMatch {
    pub title: String,
    pub similarity: f32,
}

/// A chunk scored against a query.
#[derive(Debug, Clone)]
pub struct ChunkMatch {
    pub chunk: CourseChunk,
    pub similarity: f32,
}

/// Embedding model and dimensionality an index was built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMeta {
    pub model: String,
    pub dims: usize,
}

impl std::fmt::Display for IndexMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} dims)", self.model, self.dims)
    }
}

/// One course with everything the index stores for it.
///
/// `vectors[i]` is the embedding of `chunks[i]`.
#[derive(Debug, Clone, Copy)]
pub struct CourseRecord<'a> {
    pub course: &'a Course,
    pub fingerprint: &'a str,
    pub title_vector: &'a [f32],
    pub chunks: &'a [CourseChunk],
    pub vectors: &'a [Vec<f32>],
}

impl CourseRecord<'_> {
    /// Reject a record that would leave the index inconsistent.
    pub(crate) fn validate(&self, meta: &IndexMeta) -> Result<()> {
        let title = &self.course.title;
        if self.chunks.len() != self.vectors.len() {
            anyhow::bail!(
                "{} chunks but {} vectors for course '{}'",
                self.chunks.len(),
                self.vectors.len(),
                title
            );
        }
        if let Some(chunk) = self.chunks.iter().find(|c| &c.course_title != title) {
            anyhow::bail!(
                "chunk {} belongs to '{}', not '{}'",
                chunk.chunk_index,
                chunk.course_title,
                title
            );
        }
        check_dims(meta.dims, self.title_vector.len())?;
        for vector in self.vectors {
            check_dims(meta.dims, vector.len())?;
        }
        Ok(())
    }
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`replace_course`](Store::replace_course) | Atomically write a course, its lessons, chunks and fingerprint |
/// | [`index_meta`](Store::index_meta) | Embedding model and dims the index was built with |
/// | [`course_fingerprint`](Store::course_fingerprint) | Fingerprint of the stored source text |
/// | [`search_courses`](Store::search_courses) | Nearest course titles to a vector |
/// | [`search_chunks`](Store::search_chunks) | Nearest chunks to a vector, filtered |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or replace a course together with all of its chunks.
    ///
    /// Either everything in `record` is stored or nothing changes. The first
    /// write records `meta`; later writes with a different `meta` fail.
    async fn replace_course(&self, meta: &IndexMeta, record: &CourseRecord<'_>) -> Result<()>;

    /// `None` until the first course is written, and again after [`clear`](Store::clear).
    async fn index_meta(&self) -> Result<Option<IndexMeta>>;

    async fn course_fingerprint(&self, title: &str) -> Result<Option<String>>;

    /// All course titles, sorted.
    async fn course_titles(&self) -> Result<Vec<String>>;

    /// Course metadata and lesson outline (lesson content is not stored).
    async fn get_course(&self, title: &str) -> Result<Option<Course>>;

    async fn all_courses(&self) -> Result<Vec<Course>>;

    async fn search_courses(&self, query_vec: &[f32], limit: usize) -> Result<Vec<CourseMatch>>;

    async fn search_chunks(
        &self,
        query_vec: &[f32],
        filter: &ChunkFilter,
        limit: usize,
    ) -> Result<Vec<ChunkMatch>>;

    async fn chunk_count(&self) -> Result<usize>;

    /// Drop every course and chunk, and forget the index metadata.
    async fn clear(&self) -> Result<()>;
}

/// Fail loudly instead of scoring vectors from different embedding models.
pub(crate) fn check_dims(stored: usize, query: usize) -> Result<()> {
    if stored != query {
        anyhow::bail!(
            "embedding dimension mismatch: index has {} dims, query has {}; re-ingest with --clear",
            stored,
            query
        );
    }
    Ok(())
}

/// The index may only be extended with vectors from the model it was built with.
pub(crate) fn check_meta(stored: Option<&IndexMeta>, current: &IndexMeta) -> Result<()> {
    match stored {
        Some(stored) if stored != current => anyhow::bail!(
            "index was built with {} but the configured embedding provider is {}; re-ingest with --clear",
            stored,
            current
        ),
        _ => Ok(()),
    }
}

/// Highest similarity first.
pub(crate) fn sort_by_similarity<T>(items: &mut [T], score: impl Fn(&T) -> f32) {
    items.sort_by(|a, b| {
        score(b)
            .partial_cmp(&score(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
