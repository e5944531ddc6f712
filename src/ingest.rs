//! Course ingestion.
//!
//! Walks the documents folder, parses each matching file into a course,
//! and stores it through the [`VectorStore`]. Each document carries a
//! fingerprint of its text; when the stored fingerprint matches, the
//! course is left alone, so re-running ingestion over an unchanged folder
//! writes nothing.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::config::{Config, DocumentsConfig};
use crate::document::{DocumentProcessor, ProcessedCourse};
use crate::models::Course;
use crate::vector_store::VectorStore;

/// Counts from one folder ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub courses_added: usize,
    pub chunks_added: usize,
    /// Unchanged documents and duplicate titles.
    pub skipped: usize,
    pub failed: usize,
}

pub struct Ingestor {
    processor: DocumentProcessor,
    documents: DocumentsConfig,
    vector_store: Arc<VectorStore>,
}

impl Ingestor {
    pub fn new(config: &Config, vector_store: Arc<VectorStore>) -> Self {
        Self {
            processor: DocumentProcessor::from_config(&config.chunking),
            documents: config.documents.clone(),
            vector_store,
        }
    }

    /// Parse, chunk, embed, and store one course document, replacing any
    /// stored course with the same title.
    pub async fn add_course_document(&self, path: &Path) -> Result<(Course, usize)> {
        let processed = self.process(path).await?;
        let count = self
            .vector_store
            .add_course(&processed.course, &processed.chunks, &processed.fingerprint)
            .await?;
        tracing::info!(course = %processed.course.title, chunks = count, "added course");
        Ok((processed.course, count))
    }

    /// Ingest every matching document under `path` (or `path` itself when
    /// it is a file).
    ///
    /// A document that fails to parse or embed is logged and counted; the
    /// rest of the folder is still processed.
    pub async fn add_course_folder(&self, path: &Path, clear_existing: bool) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        if clear_existing {
            self.vector_store.clear_all().await?;
            tracing::info!("cleared existing course data");
        }

        // Unchanged courses are skipped below, which would hide a model change.
        self.vector_store.check_index().await?;

        if !path.exists() {
            tracing::warn!(path = %path.display(), "course folder does not exist");
            return Ok(report);
        }

        let files = self.scan(path)?;
        let mut seen = HashSet::new();

        for file in files {
            let processed = match self.process(&file).await {
                Ok(processed) => processed,
                Err(e) => {
                    tracing::warn!(path = %file.display(), error = %format!("{:#}", e), "skipping document");
                    report.failed += 1;
                    continue;
                }
            };

            let title = processed.course.title.clone();
            if !seen.insert(title.clone()) {
                tracing::warn!(path = %file.display(), course = %title, "duplicate course title, skipping");
                report.skipped += 1;
                continue;
            }

            let stored = match self.vector_store.course_fingerprint(&title).await {
                Ok(stored) => stored,
                Err(e) => {
                    tracing::warn!(course = %title, error = %format!("{:#}", e), "fingerprint lookup failed");
                    report.failed += 1;
                    continue;
                }
            };
            if stored.as_deref() == Some(processed.fingerprint.as_str()) {
                tracing::debug!(course = %title, "unchanged, skipping");
                report.skipped += 1;
                continue;
            }

            match self
                .vector_store
                .add_course(&processed.course, &processed.chunks, &processed.fingerprint)
                .await
            {
                Ok(count) => {
                    tracing::info!(course = %title, chunks = count, "added course");
                    report.courses_added += 1;
                    report.chunks_added += count;
                }
                Err(e) => {
                    tracing::warn!(course = %title, error = %format!("{:#}", e), "failed to store course");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            courses = report.courses_added,
            chunks = report.chunks_added,
            skipped = report.skipped,
            failed = report.failed,
            "ingestion finished"
        );
        Ok(report)
    }

    async fn process(&self, path: &Path) -> Result<ProcessedCourse> {
        let processor = self.processor.clone();
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || processor.process_file(&owned))
            .await
            .context("document processing task panicked")?
    }

    /// Matching files under `root`, sorted by path.
    fn scan(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if root.is_file() {
            return Ok(vec![root.to_path_buf()]);
        }

        let include_set = build_globset(&self.documents.include_globs)?;
        let exclude_set = build_globset(&self.documents.exclude_globs)?;

        let mut files = Vec::new();
        for entry in WalkDir::new(root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy();
            if exclude_set.is_match(rel_str.as_ref()) || !include_set.is_match(rel_str.as_ref()) {
                continue;
            }
            files.push(path.to_path_buf());
        }

        files.sort();
        Ok(files)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob '{}'", pattern))?);
    }
    Ok(builder.build()?)
}

/// `course-rag ingest`: ingest a folder (default `documents.path`) and print
/// a summary.
pub async fn run_ingest(config: &Config, path: Option<&Path>, clear: bool) -> Result<()> {
    let vector_store = Arc::new(VectorStore::from_config(config).await?);
    let ingestor = Ingestor::new(config, vector_store.clone());
    let root = path.unwrap_or(&config.documents.path);

    let report = ingestor.add_course_folder(root, clear).await?;

    println!("ingest {}", root.display());
    println!("  courses added: {}", report.courses_added);
    println!("  chunks added: {}", report.chunks_added);
    println!("  skipped: {}", report.skipped);
    println!("  failed: {}", report.failed);
    println!("  total courses: {}", vector_store.course_count().await?);
    println!("ok");
    Ok(())
}
