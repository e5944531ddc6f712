//! `course-rag search` and `course-rag courses`.

use anyhow::Result;

use crate::config::Config;
use crate::vector_store::VectorStore;

/// Maximum excerpt length shown per hit.
const EXCERPT_CHARS: usize = 240;

pub async fn run_search(
    config: &Config,
    query: &str,
    course: Option<&str>,
    lesson: Option<i64>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let vector_store = VectorStore::from_config(config).await?;
    let results = vector_store.search(query, course, lesson).await?;

    if let Some(error) = &results.error {
        println!("{}", error);
        return Ok(());
    }
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in results.hits.iter().enumerate() {
        let lesson = hit
            .lesson_number
            .map(|n| format!(" - Lesson {}", n))
            .unwrap_or_default();
        println!(
            "{}. [{:.3}] {}{}",
            i + 1,
            hit.distance,
            hit.course_title,
            lesson
        );
        println!("    excerpt: \"{}\"", excerpt(&hit.content));
        println!();
    }
    Ok(())
}

pub async fn run_courses(config: &Config) -> Result<()> {
    let vector_store = VectorStore::from_config(config).await?;
    let courses = vector_store.all_courses().await?;

    if courses.is_empty() {
        println!("No courses.");
        return Ok(());
    }

    for course in &courses {
        println!("{}", course.title);
        if let Some(instructor) = &course.instructor {
            println!("    instructor: {}", instructor);
        }
        if let Some(link) = &course.course_link {
            println!("    link: {}", link);
        }
        println!("    lessons: {}", course.lessons.len());
    }
    println!();
    println!("{} course(s), {} chunk(s)", courses.len(), vector_store.chunk_count().await?);
    Ok(())
}

fn excerpt(content: &str) -> String {
    let flat = content.replace('\n', " ");
    let flat = flat.trim();
    match flat.char_indices().nth(EXCERPT_CHARS) {
        Some((end, _)) => format!("{}...", &flat[..end]),
        None => flat.to_string(),
    }
}
