//! Course document parsing and sentence-aware chunking.
//!
//! A course file starts with a few header lines, followed by lessons:
//!
//! ```text
//! Course Title: Building Towards Computer Use
//! Course Link: https://example.com/course
//! Course Instructor: Colt Steele
//!
//! Lesson 0: Introduction
//! Lesson Link: https://example.com/course/lesson0
//! Welcome to the course. ...
//! ```
//!
//! [`DocumentProcessor::process_text`] turns that into a [`Course`] plus its
//! [`CourseChunk`]s. Chunks are built from whole sentences, at most
//! `chunk_size` characters each, and consecutive chunks share up to
//! `chunk_overlap` characters of trailing sentences.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::config::ChunkingConfig;
use crate::extract;
use crate::models::{Course, CourseChunk, Lesson};

const TITLE_KEY: &str = "Course Title:";
const LINK_KEY: &str = "Course Link:";
const INSTRUCTOR_KEY: &str = "Course Instructor:";
const LESSON_LINK_KEY: &str = "Lesson Link:";

/// Abbreviations whose trailing period does not end a sentence.
const ABBREVIATIONS: &[&str] = &[
    "Mrs", "Prof", "Sr", "Jr", "St", "vs", "etc", "Inc", "Ltd", "Fig", "No", "approx",
];

/// Output of processing one course document.
#[derive(Debug, Clone)]
pub struct ProcessedCourse {
    pub course: Course,
    pub chunks: Vec<CourseChunk>,
    /// SHA-256 of the document text. Unchanged fingerprint means the stored
    /// course is current.
    pub fingerprint: String,
}

#[derive(Debug, Clone)]
pub struct DocumentProcessor {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl DocumentProcessor {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap,
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Read and parse a course file. The file stem is the title of last resort.
    pub fn process_file(&self, path: &Path) -> Result<ProcessedCourse> {
        let text = extract::read_document(path)
            .with_context(|| format!("Failed to read course document {}", path.display()))?;
        let fallback_title = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Ok(self.process_text(&text, &fallback_title))
    }

    pub fn process_text(&self, text: &str, fallback_title: &str) -> ProcessedCourse {
        let (mut course, body) = parse_course(text);
        if course.title.is_empty() {
            course.title = fallback_title.trim().to_string();
        }

        let mut chunks = Vec::new();
        if course.lessons.is_empty() {
            for content in self.chunk_text(&body) {
                push_chunk(&mut chunks, &course.title, None, content);
            }
        } else {
            for lesson in &course.lessons {
                let prefix = format!("Lesson {} content: ", lesson.lesson_number);
                let pieces = self.pack(&lesson.content, char_len(&prefix));
                for (i, content) in pieces.into_iter().enumerate() {
                    let content = if i == 0 {
                        format!("{}{}", prefix, content)
                    } else {
                        content
                    };
                    push_chunk(&mut chunks, &course.title, Some(lesson.lesson_number), content);
                }
            }
        }

        ProcessedCourse {
            course,
            chunks,
            fingerprint: fingerprint(text),
        }
    }

    /// Split text into overlapping sentence-aligned chunks.
    ///
    /// Whitespace is collapsed first. Returns no chunks for blank input.
    pub fn chunk_text(&self, text: &str) -> Vec<String> {
        self.pack(text, 0)
    }

    /// [`chunk_text`](Self::chunk_text) with the first chunk kept `reserve`
    /// characters short, so a prefix can be added without exceeding
    /// `chunk_size`.
    fn pack(&self, text: &str, reserve: usize) -> Vec<String> {
        let normalized = normalize_whitespace(text);
        if normalized.is_empty() {
            return Vec::new();
        }
        let first_limit = self.chunk_size.saturating_sub(reserve).max(1);

        let mut sentences: Vec<String> = Vec::new();
        for sentence in split_sentences(&normalized) {
            let max = if sentences.is_empty() {
                first_limit
            } else {
                self.chunk_size
            };
            if char_len(sentence) > max {
                sentences.extend(hard_split(sentence, max));
            } else {
                sentences.push(sentence.to_string());
            }
        }

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < sentences.len() {
            let limit = if chunks.is_empty() {
                first_limit
            } else {
                self.chunk_size
            };
            let mut len = 0;
            let mut end = start;
            while end < sentences.len() {
                let add = char_len(&sentences[end]) + usize::from(end > start);
                if end > start && len + add > limit {
                    break;
                }
                len += add;
                end += 1;
            }
            chunks.push(sentences[start..end].join(" "));
            if end >= sentences.len() {
                break;
            }

            // Step back over trailing sentences that fit in the overlap, but
            // always advance and always leave room for the next sentence.
            let mut overlap_len = 0;
            let mut next = end;
            while next > start + 1 {
                let l = char_len(&sentences[next - 1]) + 1;
                if overlap_len + l > self.chunk_overlap {
                    break;
                }
                overlap_len += l;
                next -= 1;
            }
            while next < end && overlap_len + char_len(&sentences[end]) > self.chunk_size {
                overlap_len -= char_len(&sentences[next]) + 1;
                next += 1;
            }
            start = next;
        }

        chunks
    }
}

fn push_chunk(
    chunks: &mut Vec<CourseChunk>,
    course_title: &str,
    lesson_number: Option<i64>,
    content: String,
) {
    let chunk_index = chunks.len() as i64;
    chunks.push(CourseChunk {
        content,
        course_title: course_title.to_string(),
        lesson_number,
        chunk_index,
    });
}

/// Parse headers and lessons. Returns the course (title possibly empty) and
/// the body text that followed the headers.
fn parse_course(text: &str) -> (Course, String) {
    let mut course = Course {
        title: String::new(),
        course_link: None,
        instructor: None,
        lessons: Vec::new(),
    };

    let lines: Vec<&str> = text.lines().collect();
    let mut idx = 0;
    while idx < lines.len() {
        let line = lines[idx].trim();
        if line.is_empty() {
            idx += 1;
            continue;
        }
        if let Some(v) = strip_key(line, TITLE_KEY) {
            course.title = v.to_string();
        } else if let Some(v) = strip_key(line, LINK_KEY) {
            course.course_link = non_empty(v);
        } else if let Some(v) = strip_key(line, INSTRUCTOR_KEY) {
            course.instructor = non_empty(v);
        } else {
            break;
        }
        idx += 1;
    }

    let body = lines[idx..].join("\n");

    let mut current: Option<Lesson> = None;
    let mut content_lines: Vec<&str> = Vec::new();
    let mut i = idx;
    while i < lines.len() {
        let line = lines[i];
        if let Some((number, title)) = parse_lesson_marker(line) {
            if let Some(mut lesson) = current.take() {
                lesson.content = content_lines.join("\n").trim().to_string();
                course.lessons.push(lesson);
            }
            content_lines.clear();

            let mut lesson_link = None;
            if let Some(next) = lines.get(i + 1) {
                if let Some(link) = strip_key(next.trim(), LESSON_LINK_KEY) {
                    lesson_link = non_empty(link);
                    i += 1;
                }
            }
            current = Some(Lesson {
                lesson_number: number,
                title,
                lesson_link,
                content: String::new(),
            });
        } else if current.is_some() {
            content_lines.push(line);
        }
        i += 1;
    }
    if let Some(mut lesson) = current.take() {
        lesson.content = content_lines.join("\n").trim().to_string();
        course.lessons.push(lesson);
    }

    (course, body)
}

/// Case-insensitive `Key: value` match.
fn strip_key<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let head = line.get(..key.len())?;
    if head.eq_ignore_ascii_case(key) {
        Some(line[key.len()..].trim())
    } else {
        None
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Match `Lesson <n>: <title>`.
fn parse_lesson_marker(line: &str) -> Option<(i64, String)> {
    let line = line.trim();
    let head = line.get(..6)?;
    if !head.eq_ignore_ascii_case("lesson") {
        return None;
    }
    let rest = &line[6..];
    let after_ws = rest.trim_start();
    if after_ws.len() == rest.len() {
        return None;
    }
    let digits_end = after_ws
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(after_ws.len());
    if digits_end == 0 {
        return None;
    }
    let number: i64 = after_ws[..digits_end].parse().ok()?;
    let title = after_ws[digits_end..].trim_start().strip_prefix(':')?;
    Some((number, title.trim().to_string()))
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split whitespace-normalized text at `.`, `!` or `?` followed by a space
/// and an uppercase letter.
fn split_sentences(text: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start = 0;

    for i in 0..chars.len() {
        let (pos, c) = chars[i];
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        if !matches!(chars.get(i + 1), Some((_, ' '))) {
            continue;
        }
        let Some(&(next_pos, next)) = chars.get(i + 2) else {
            continue;
        };
        if !next.is_uppercase() {
            continue;
        }
        if c == '.' && is_abbreviation(&text[start..pos]) {
            continue;
        }
        let sentence = text[start..pos + c.len_utf8()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = next_pos;
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// `before` is the sentence text up to (not including) a period.
fn is_abbreviation(before: &str) -> bool {
    let word = before.rsplit(' ').next().unwrap_or("");
    if word.is_empty() {
        return false;
    }
    // e.g. / i.e. / U.S.
    if word.contains('.') {
        return true;
    }
    // Mr. / Dr. / Ms.
    let mut cs = word.chars();
    if let (Some(a), Some(b), None) = (cs.next(), cs.next(), cs.next()) {
        if a.is_uppercase() && b.is_lowercase() {
            return true;
        }
    }
    ABBREVIATIONS.iter().any(|a| a.eq_ignore_ascii_case(word))
}

/// Break an oversized sentence at word boundaries; words longer than `max`
/// are cut on char boundaries.
fn hard_split(sentence: &str, max: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in sentence.split(' ') {
        let mut word = word;
        while char_len(word) > max {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let cut = word
                .char_indices()
                .nth(max)
                .map(|(i, _)| i)
                .unwrap_or(word.len());
            pieces.push(word[..cut].to_string());
            word = &word[cut..];
        }
        if word.is_empty() {
            continue;
        }
        let wl = char_len(word);
        let add = wl + usize::from(!current.is_empty());
        if current_len + add > max && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += wl;
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
