//! SQLite-backed [`Store`] implementation.
//!
//! Vectors are stored as little-endian `f32` BLOBs next to the rows they
//! describe and scored with a brute-force cosine scan.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::migrate;
use crate::models::{Course, CourseChunk, Lesson};

use super::{
    check_dims, check_meta, sort_by_similarity, ChunkFilter, ChunkMatch, CourseMatch, CourseRecord,
    IndexMeta, Store,
};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate(&pool).await?;
        Ok(Self::new(pool))
    }

    async fn lessons_for(&self, course_title: &str) -> Result<Vec<Lesson>> {
        let rows = sqlx::query(
            "SELECT lesson_number, title, lesson_link FROM lessons WHERE course_title = ? ORDER BY lesson_number ASC",
        )
        .bind(course_title)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Lesson {
                lesson_number: row.get("lesson_number"),
                title: row.get("title"),
                lesson_link: row.get("lesson_link"),
                content: String::new(),
            })
            .collect())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn replace_course(&self, meta: &IndexMeta, record: &CourseRecord<'_>) -> Result<()> {
        record.validate(meta)?;
        let course = record.course;
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let stored = sqlx::query("SELECT model, dims FROM index_meta WHERE id = 1")
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| IndexMeta {
                model: row.get("model"),
                dims: row.get::<i64, _>("dims") as usize,
            });
        check_meta(stored.as_ref(), meta)?;
        if stored.is_none() {
            sqlx::query("INSERT INTO index_meta (id, model, dims) VALUES (1, ?, ?)")
                .bind(&meta.model)
                .bind(meta.dims as i64)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO courses (title, course_link, instructor, fingerprint, embedding, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(title) DO UPDATE SET
                course_link = excluded.course_link,
                instructor = excluded.instructor,
                fingerprint = excluded.fingerprint,
                embedding = excluded.embedding,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&course.title)
        .bind(&course.course_link)
        .bind(&course.instructor)
        .bind(record.fingerprint)
        .bind(vec_to_blob(record.title_vector))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM lessons WHERE course_title = ?")
            .bind(&course.title)
            .execute(&mut *tx)
            .await?;

        for lesson in &course.lessons {
            sqlx::query(
                r#"
                INSERT INTO lessons (course_title, lesson_number, title, lesson_link)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(course_title, lesson_number) DO UPDATE SET
                    title = excluded.title,
                    lesson_link = excluded.lesson_link
                "#,
            )
            .bind(&course.title)
            .bind(lesson.lesson_number)
            .bind(&lesson.title)
            .bind(&lesson.lesson_link)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM chunks WHERE course_title = ?")
            .bind(&course.title)
            .execute(&mut *tx)
            .await?;

        for (chunk, vector) in record.chunks.iter().zip(record.vectors) {
            sqlx::query(
                "INSERT INTO chunks (course_title, chunk_index, lesson_number, content, embedding) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&course.title)
            .bind(chunk.chunk_index)
            .bind(chunk.lesson_number)
            .bind(&chunk.content)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn index_meta(&self) -> Result<Option<IndexMeta>> {
        let row = sqlx::query("SELECT model, dims FROM index_meta WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| IndexMeta {
            model: row.get("model"),
            dims: row.get::<i64, _>("dims") as usize,
        }))
    }

    async fn course_fingerprint(&self, title: &str) -> Result<Option<String>> {
        let fingerprint: Option<String> =
            sqlx::query_scalar("SELECT fingerprint FROM courses WHERE title = ?")
                .bind(title)
                .fetch_optional(&self.pool)
                .await?;
        Ok(fingerprint)
    }

    async fn course_titles(&self) -> Result<Vec<String>> {
        let titles: Vec<String> = sqlx::query_scalar("SELECT title FROM courses ORDER BY title ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(titles)
    }

    async fn get_course(&self, title: &str) -> Result<Option<Course>> {
        let row = sqlx::query("SELECT title, course_link, instructor FROM courses WHERE title = ?")
            .bind(title)
            .fetch_optional(&self.pool)
            .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        Ok(Some(Course {
            title: row.get("title"),
            course_link: row.get("course_link"),
            instructor: row.get("instructor"),
            lessons: self.lessons_for(title).await?,
        }))
    }

    async fn all_courses(&self) -> Result<Vec<Course>> {
        let rows =
            sqlx::query("SELECT title, course_link, instructor FROM courses ORDER BY title ASC")
                .fetch_all(&self.pool)
                .await?;

        let mut courses = Vec::with_capacity(rows.len());
        for row in rows {
            let title: String = row.get("title");
            let lessons = self.lessons_for(&title).await?;
            courses.push(Course {
                title,
                course_link: row.get("course_link"),
                instructor: row.get("instructor"),
                lessons,
            });
        }
        Ok(courses)
    }

    async fn search_courses(&self, query_vec: &[f32], limit: usize) -> Result<Vec<CourseMatch>> {
        let rows = sqlx::query("SELECT title, embedding FROM courses")
            .fetch_all(&self.pool)
            .await?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let vector = blob_to_vec(&blob);
            check_dims(vector.len(), query_vec.len())?;
            matches.push(CourseMatch {
                title: row.get("title"),
                similarity: cosine_similarity(query_vec, &vector),
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
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT course_title, chunk_index, lesson_number, content, embedding
            FROM chunks
            WHERE (? IS NULL OR course_title = ?)
              AND (? IS NULL OR lesson_number = ?)
            "#,
        )
        .bind(&filter.course_title)
        .bind(&filter.course_title)
        .bind(filter.lesson_number)
        .bind(filter.lesson_number)
        .fetch_all(&self.pool)
        .await?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let vector = blob_to_vec(&blob);
            check_dims(vector.len(), query_vec.len())?;
            matches.push(ChunkMatch {
                chunk: CourseChunk {
                    content: row.get("content"),
                    course_title: row.get("course_title"),
                    lesson_number: row.get("lesson_number"),
                    chunk_index: row.get("chunk_index"),
                },
                similarity: cosine_similarity(query_vec, &vector),
            });
        }

        sort_by_similarity(&mut matches, |m| m.similarity);
        matches.truncate(limit);
        Ok(matches)
    }

    async fn chunk_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM lessons").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM courses").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM index_meta").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}
