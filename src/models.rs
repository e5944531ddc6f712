//! Core data models.
//!
//! Courses and lessons come out of the document processor; chunks are what
//! gets embedded and searched; sources travel back to the client alongside
//! each answer.

use serde::{Deserialize, Serialize};

/// A course parsed from one source document. The title is unique and acts
/// as the course identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub title: String,
    pub course_link: Option<String>,
    pub instructor: Option<String>,
    pub lessons: Vec<Lesson>,
}

impl Course {
    pub fn lesson(&self, lesson_number: i64) -> Option<&Lesson> {
        self.lessons
            .iter()
            .find(|l| l.lesson_number == lesson_number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub lesson_number: i64,
    pub title: String,
    pub lesson_link: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
}

/// A searchable slice of course text.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseChunk {
    pub content: String,
    pub course_title: String,
    pub lesson_number: Option<i64>,
    pub chunk_index: i64,
}

/// Attribution for an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub text: String,
    pub url: Option<String>,
}

/// Catalog summary returned by `GET /api/courses`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseAnalytics {
    pub total_courses: usize,
    pub course_titles: Vec<String>,
}
