//! In-memory [`Store`] implementation.
//!
//! Uses a `BTreeMap` (sorted by title) and a `Vec` behind `std::sync::RwLock` for thread safety.
//! Vector search is brute-force cosine similarity over all stored vectors.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Course, CourseChunk};

use super::{
    check_dims, check_meta, sort_by_similarity, ChunkFilter, ChunkMatch, CourseMatch, CourseRecord,
    IndexMeta, Store,
};

struct StoredCourse {
    course: Course,
    fingerprint: String,
    vector: Vec<f32>,
}

struct StoredChunk {
    chunk: CourseChunk,
    vector: Vec<f32>,
}

/// In-memory store for tests and ephemeral runs.
pub struct InMemoryStore {
    meta: RwLock<Option<IndexMeta>>,
    courses: RwLock<BTreeMap<String, StoredCourse>>,
    chunks: RwLock<Vec<StoredChunk>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            meta: RwLock::new(None),
            courses: RwLock::new(BTreeMap::new()),
            chunks: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Lesson text is not kept in the index.
fn outline(course: &Course) -> Course {
    let mut course = course.clone();
    for lesson in &mut course.lessons {
        lesson.content.clear();
    }
    course
}

#[async_trait]
impl Store for InMemoryStore {
    async fn replace_course(&self, meta: &IndexMeta, record: &CourseRecord<'_>) -> Result<()> {
        record.validate(meta)?;

        // Lock order: meta, courses, chunks.
        let mut stored_meta = self.meta.write().unwrap();
        check_meta(stored_meta.as_ref(), meta)?;
        let mut courses = self.courses.write().unwrap();
        let mut chunks = self.chunks.write().unwrap();

        let title = &record.course.title;
        if stored_meta.is_none() {
            *stored_meta = Some(meta.clone());
        }
        courses.insert(
            title.clone(),
            StoredCourse {
                course: outline(record.course),
                fingerprint: record.fingerprint.to_string(),
                vector: record.title_vector.to_vec(),
            },
        );
        chunks.retain(|sc| &sc.chunk.course_title != title);
        for (chunk, vector) in record.chunks.iter().zip(record.vectors) {
            chunks.push(StoredChunk {
                chunk: chunk.clone(),
                vector: vector.clone(),
            });
        }
        Ok(())
    }

    async fn index_meta(&self) -> Result<Option<IndexMeta>> {
        Ok(self.meta.read().unwrap().clone())
    }

    async fn course_fingerprint(&self, title: &str) -> Result<Option<String>> {
        let courses = self.courses.read().unwrap();
        Ok(courses.get(title).map(|c| c.fingerprint.clone()))
    }

    async fn course_titles(&self) -> Result<Vec<String>> {
        let courses = self.courses.read().unwrap();
        Ok(courses.keys().cloned().collect())
    }

    async fn get_course(&self, title: &str) -> Result<Option<Course>> {
        let courses = self.courses.read().unwrap();
        Ok(courses.get(title).map(|c| c.course.clone()))
    }

    async fn all_courses(&self) -> Result<Vec<Course>> {
        let courses = self.courses.read().unwrap();
        Ok(courses.values().map(|c| c.course.clone()).collect())
    }

    async fn search_courses(&self, query_vec: &[f32], limit: usize) -> Result<Vec<CourseMatch>> {
        let courses = self.courses.read().unwrap();
        let mut matches = Vec::with_capacity(courses.len());
        for stored in courses.values() {
            check_dims(stored.vector.len(), query_vec.len())?;
            matches.push(CourseMatch {
                title: stored.course.title.clone(),
                similarity: cosine_similarity(query_vec, &stored.vector),
            });
        }
        sort_by_similarity(&mut matches, |m| m.similarity);
        matches.truncate(limit);
        Ok(matches)
    }

    async fn search_chunks(
        &self,
        query_vec: &[f32],
        filter: &ChunkFilter,
        limit: usize,
    ) -> Result<Vec<ChunkMatch>> {
        let chunks = self.chunks.read().unwrap();
        let mut matches = Vec::new();
        for stored in chunks.iter().filter(|sc| filter.matches(&sc.chunk)) {
            check_dims(stored.vector.len(), query_vec.len())?;
            matches.push(ChunkMatch {
                chunk: stored.chunk.clone(),
                similarity: cosine_similarity(query_vec, &stored.vector),
            });
        }
        sort_by_similarity(&mut matches, |m| m.similarity);
        matches.truncate(limit);
        Ok(matches)
    }

    async fn chunk_count(&self) -> Result<usize> {
        Ok(self.chunks.read().unwrap().len())
    }

    async fn clear(&self) -> Result<()> {
        let mut meta = self.meta.write().unwrap();
        let mut courses = self.courses.write().unwrap();
        self.chunks.write().unwrap().clear();
        courses.clear();
        *meta = None;
        Ok(())
    }
}
