#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use course_rag::config::Config;
use course_rag::embedding::HashedProvider;
use course_rag::generator::{
    ContentBlock, GeneratorError, LlmClient, MessagesRequest, MessagesResponse,
};
use course_rag::rag::RagSystem;
use course_rag::store::InMemoryStore;

pub const MCP_COURSE: &str = "Course Title: MCP: Build Rich-Context AI Apps
Course Link: https://example.com/mcp
Course Instructor: Elie Schoppik

Lesson 0: Introduction
Lesson Link: https://example.com/mcp/0
Welcome to the course. The Model Context Protocol connects language models to tools and data.

Lesson 1: Servers
Lesson Link: https://example.com/mcp/1
An MCP server exposes resources, prompts, and tools. Servers talk to clients over stdio or HTTP.
";

pub const RETRIEVAL_COURSE: &str = "Course Title: Advanced Retrieval for AI
Course Link: https://example.com/retrieval
Course Instructor: Anton Troynikov

Lesson 0: Overview
Lesson Link: https://example.com/retrieval/0
Embeddings place similar text close together. Retrieval finds the nearest chunks for a query.

Lesson 1: Query Expansion
Query expansion rewrites the question to improve recall. Reranking orders the results.
";

/// Replays queued responses, then answers every further request with `fallback`.
pub struct ScriptedClient {
    script: Mutex<VecDeque<Result<MessagesResponse, GeneratorError>>>,
    fallback: String,
    requests: Mutex<Vec<MessagesRequest>>,
}

impl ScriptedClient {
    pub fn answering(fallback: &str) -> Arc<Self> {
        Self::scripted(Vec::new(), fallback)
    }

    pub fn scripted(
        script: Vec<Result<MessagesResponse, GeneratorError>>,
        fallback: &str,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback: fallback.to_string(),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<MessagesRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn create_message(
        &self,
        request: &MessagesRequest,
    ) -> Result<MessagesResponse, GeneratorError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.script.lock().unwrap().pop_front() {
            Some(response) => response,
            None => Ok(MessagesResponse::from_text(self.fallback.clone())),
        }
    }
}

pub fn tool_use(id: &str, name: &str, input: serde_json::Value) -> MessagesResponse {
    MessagesResponse {
        id: String::new(),
        model: String::new(),
        content: vec![ContentBlock::ToolUse {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }],
        stop_reason: Some("tool_use".to_string()),
        usage: None,
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.embedding.provider = "hashed".to_string();
    config.embedding.dims = Some(256);
    config.chunking.chunk_size = 200;
    config.chunking.chunk_overlap = 40;
    config
}

/// In-memory store, hashed embeddings, scripted model.
pub fn rag_with(config: &Config, client: Arc<ScriptedClient>) -> RagSystem {
    RagSystem::new(
        config,
        Arc::new(InMemoryStore::new()),
        Arc::new(HashedProvider::new(config.embedding.dims.unwrap_or(256))),
        client,
    )
}

pub fn write_courses(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("course1_script.txt"), MCP_COURSE).unwrap();
    fs::write(dir.join("course2_script.txt"), RETRIEVAL_COURSE).unwrap();
}
