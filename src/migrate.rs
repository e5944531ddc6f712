use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the database file and schema, then close the pool.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Idempotent schema creation.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    // Course catalog: one row per course, with its title embedding.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS courses (
            title TEXT PRIMARY KEY,
            course_link TEXT,
            instructor TEXT,
            fingerprint TEXT NOT NULL,
            embedding BLOB NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lessons (
            course_title TEXT NOT NULL,
            lesson_number INTEGER NOT NULL,
            title TEXT NOT NULL,
            lesson_link TEXT,
            PRIMARY KEY (course_title, lesson_number),
            FOREIGN KEY (course_title) REFERENCES courses(title) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Course content: chunk text plus its embedding.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            course_title TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            lesson_number INTEGER,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (course_title, chunk_index),
            FOREIGN KEY (course_title) REFERENCES courses(title) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Embedding model and dims every stored vector was produced with.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            model TEXT NOT NULL,
            dims INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_lesson ON chunks(course_title, lesson_number)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
