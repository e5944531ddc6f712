//! Search tools exposed to the model.
//!
//! Each [`Tool`] declares a name, a description, and a JSON Schema for its
//! input; the generator forwards those declarations to the Messages API and
//! routes `tool_use` blocks back here through [`ToolRegistry::execute`].
//!
//! | Tool | Purpose |
//! |------|---------|
//! | `search_course_content` | Semantic search over lesson content, optionally filtered by course and lesson |
//! | `get_course_outline` | Title, link, instructor, and lesson list of one course |
//!
//! Tools return their sources alongside their text, so every query gathers
//! its own attributions and concurrent queries never share state.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::models::Source;
use crate::vector_store::{SearchResults, VectorStore};

/// Tool declaration in the shape the Messages API expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// What a tool hands back to the model, plus the sources it drew on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub sources: Vec<Source>,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sources: Vec::new(),
            is_error: true,
        }
    }
}

/// A capability the model can invoke during generation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Identifier used in `tool_use` blocks (e.g. `"search_course_content"`).
    fn name(&self) -> &str;

    /// Tells the model when to reach for this tool.
    fn description(&self) -> &str;

    /// JSON Schema for the tool input (`type: "object"`).
    fn input_schema(&self) -> Value;

    /// Run the tool. `Err` means the tool could not run at all (the store or
    /// embedder failed); answers the model should read come back as `Ok`.
    async fn execute(&self, input: Value) -> Result<ToolOutput>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

// ============ search_course_content ============

pub struct CourseSearchTool {
    vector_store: Arc<VectorStore>,
}

impl CourseSearchTool {
    pub fn new(vector_store: Arc<VectorStore>) -> Self {
        Self { vector_store }
    }

    async fn format_results(&self, results: &SearchResults) -> Result<ToolOutput> {
        let mut blocks = Vec::with_capacity(results.hits.len());
        let mut sources = Vec::with_capacity(results.hits.len());

        for hit in &results.hits {
            let label = match hit.lesson_number {
                Some(n) => format!("{} - Lesson {}", hit.course_title, n),
                None => hit.course_title.clone(),
            };
            let url = match hit.lesson_number {
                Some(n) => self.vector_store.lesson_link(&hit.course_title, n).await?,
                None => self.vector_store.course_link(&hit.course_title).await?,
            };
            blocks.push(format!("[{}]\n{}", label, hit.content));
            sources.push(Source { text: label, url });
        }

        Ok(ToolOutput {
            content: blocks.join("\n\n"),
            sources,
            is_error: false,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SearchInput {
    query: String,
    #[serde(default)]
    course_name: Option<String>,
    #[serde(default)]
    lesson_number: Option<i64>,
}

#[async_trait]
impl Tool for CourseSearchTool {
    fn name(&self) -> &str {
        "search_course_content"
    }

    fn description(&self) -> &str {
        "Search course materials with smart course name matching and lesson filtering"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to search for in the course content"
                },
                "course_name": {
                    "type": "string",
                    "description": "Course title (partial matches work, e.g. 'MCP', 'Introduction')"
                },
                "lesson_number": {
                    "type": "integer",
                    "description": "Specific lesson number to search within (e.g. 1, 2, 3)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let input: SearchInput = match serde_json::from_value(input) {
            Ok(input) => input,
            Err(e) => return Ok(ToolOutput::error(format!("Invalid input: {}", e))),
        };

        let results = self
            .vector_store
            .search(&input.query, input.course_name.as_deref(), input.lesson_number)
            .await?;

        if let Some(error) = results.error {
            return Ok(ToolOutput::text(error));
        }

        if results.is_empty() {
            let mut message = "No relevant content found".to_string();
            if let Some(course) = &input.course_name {
                message.push_str(&format!(" in course '{}'", course));
            }
            if let Some(lesson) = input.lesson_number {
                message.push_str(&format!(" in lesson {}", lesson));
            }
            message.push('.');
            return Ok(ToolOutput::text(message));
        }

        self.format_results(&results).await
    }
}

// ============ get_course_outline ============

pub struct CourseOutlineTool {
    vector_store: Arc<VectorStore>,
}

impl CourseOutlineTool {
    pub fn new(vector_store: Arc<VectorStore>) -> Self {
        Self { vector_store }
    }
}

#[derive(Debug, Deserialize)]
struct OutlineInput {
    course_title: String,
}

#[async_trait]
impl Tool for CourseOutlineTool {
    fn name(&self) -> &str {
        "get_course_outline"
    }

    fn description(&self) -> &str {
        "Get the complete outline of a course: title, link, instructor, and numbered lesson list"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "course_title": {
                    "type": "string",
                    "description": "Course title (partial matches work, e.g. 'MCP', 'Introduction')"
                }
            },
            "required": ["course_title"]
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let input: OutlineInput = match serde_json::from_value(input) {
            Ok(input) => input,
            Err(e) => return Ok(ToolOutput::error(format!("Invalid input: {}", e))),
        };

        let not_found =
            || ToolOutput::text(format!("No course found matching '{}'", input.course_title));

        let Some(title) = self.vector_store.resolve_course_name(&input.course_title).await? else {
            return Ok(not_found());
        };
        let Some(course) = self.vector_store.get_course(&title).await? else {
            return Ok(not_found());
        };

        let mut lines = vec![format!("Course Title: {}", course.title)];
        if let Some(link) = &course.course_link {
            lines.push(format!("Course Link: {}", link));
        }
        if let Some(instructor) = &course.instructor {
            lines.push(format!("Course Instructor: {}", instructor));
        }
        lines.push(String::new());
        lines.push(format!("Lessons ({} total):", course.lessons.len()));
        for lesson in &course.lessons {
            lines.push(format!("Lesson {}: {}", lesson.lesson_number, lesson.title));
        }

        Ok(ToolOutput {
            content: lines.join("\n"),
            sources: vec![Source {
                text: course.title.clone(),
                url: course.course_link.clone(),
            }],
            is_error: false,
        })
    }
}

// ============ Registry ============

/// Holds the tools offered to the model.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty tool registry.
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry with `search_course_content` and `get_course_outline`.
    pub fn with_course_tools(vector_store: Arc<VectorStore>) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(CourseSearchTool::new(vector_store.clone())));
        registry.register(Box::new(CourseOutlineTool::new(vector_store)));
        registry
    }

    /// Register a tool. Lookups return the first tool registered under a name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Dispatch a `tool_use` block by name.
    pub async fn execute(&self, name: &str, input: Value) -> Result<ToolOutput> {
        match self.find(name) {
            Some(tool) => {
                tracing::debug!(tool = name, %input, "executing tool");
                tool.execute(input).await
            }
            None => Ok(ToolOutput::error(format!("Tool '{}' not found", name))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
