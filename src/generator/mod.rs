//! Answer generation with the Anthropic Messages API.
//!
//! [`AiGenerator`] drives a bounded tool-calling loop. Each round sends the
//! conversation with the registered tool declarations; when the model stops
//! with `tool_use`, every requested tool runs through the
//! [`ToolRegistry`](crate::tools::ToolRegistry) and its output goes back as a
//! `tool_result` block. Once `max_tool_rounds` rounds have used tools, one
//! last request is made with `tool_choice: none` so the model must answer
//! from what it has gathered.
//!
//! The HTTP transport sits behind [`LlmClient`], so the loop can be driven
//! by a scripted client in tests.

pub mod anthropic;
pub mod types;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::GenerationConfig;
use crate::models::Source;
use crate::tools::ToolRegistry;

pub use anthropic::AnthropicClient;
pub use types::{
    ContentBlock, Message, MessageContent, MessagesRequest, MessagesResponse, Role, ToolChoice,
    Usage,
};

/// Instructions sent as the system prompt of every request.
pub const SYSTEM_PROMPT: &str = "You are an assistant for course materials and educational content, with tools for looking up course information.

Tools:
1. search_course_content: find specific lesson content, concepts, or detailed material. It can be narrowed to one course and one lesson.
2. get_course_outline: fetch a course's title, link, instructor, and numbered lesson list.

When to use them:
- Questions about what a lesson or course teaches: search the course content first, then answer.
- Questions about course structure, lesson lists, titles, or links: use the outline tool and present the course title, instructor, course link, and the complete numbered lesson list.
- Complex questions may need several lookups; use the results of one to shape the next.
- General knowledge questions: answer directly without tools.
- If a tool finds nothing, say so plainly.

How to answer:
- Give the answer only. Do not describe your reasoning, the tools, or the search results.
- Be brief and focused, keep educational value, use clear language, and add an example when it helps understanding.";

const FINAL_ROUND_NOTE: &str =
    "Please provide your final response based on the information available. No more tools can be used.";

#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("request to the language model timed out")]
    Timeout,
    #[error("rate limited by the language model API: {0}")]
    RateLimited(String),
    #[error("language model API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("invalid response from the language model API: {0}")]
    Decode(String),
    #[error("no text content in the model response")]
    NoContent,
    #[error("tool '{name}' failed: {message}")]
    Tool { name: String, message: String },
}

impl GeneratorError {
    /// Whether sending the same request again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GeneratorError::Http(_) | GeneratorError::Timeout | GeneratorError::RateLimited(_) => {
                true
            }
            GeneratorError::Api { status, .. } => *status >= 500,
            GeneratorError::Decode(_) | GeneratorError::NoContent | GeneratorError::Tool { .. } => {
                false
            }
        }
    }
}

/// Transport for Messages API calls.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn create_message(
        &self,
        request: &MessagesRequest,
    ) -> Result<MessagesResponse, GeneratorError>;
}

/// Final answer plus the sources gathered by the tools that produced it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    pub answer: String,
    pub sources: Vec<Source>,
    pub tool_calls: usize,
}

pub struct AiGenerator {
    client: Arc<dyn LlmClient>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    max_tool_rounds: usize,
}

impl AiGenerator {
    pub fn new(client: Arc<dyn LlmClient>, config: &GenerationConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_tool_rounds: config.max_tool_rounds,
        }
    }

    /// The system prompt, extended with prior turns and pre-fetched material.
    pub fn system_prompt(history: Option<&str>, context: Option<&str>) -> String {
        let mut system = SYSTEM_PROMPT.to_string();
        if let Some(history) = history.filter(|h| !h.trim().is_empty()) {
            system.push_str("\n\nPrevious conversation:\n");
            system.push_str(history);
        }
        if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
            system.push_str("\n\nRelevant course material:\n");
            system.push_str(context);
        }
        system
    }

    /// Answer `query`, letting the model call `tools` for up to
    /// `max_tool_rounds` rounds.
    pub async fn generate(
        &self,
        query: &str,
        history: Option<&str>,
        context: Option<&str>,
        tools: Option<&ToolRegistry>,
    ) -> Result<Generation, GeneratorError> {
        let system = Self::system_prompt(history, context);
        let mut messages = vec![Message::user(query)];

        let registry = match tools.filter(|t| !t.is_empty()) {
            Some(registry) if self.max_tool_rounds > 0 => registry,
            _ => {
                let request = self.request(&system, messages, Vec::new(), None);
                let response = self.client.create_message(&request).await?;
                return finish(&response, Vec::new(), 0);
            }
        };

        let definitions = registry.definitions();
        let mut sources: Vec<Source> = Vec::new();
        let mut tool_calls = 0;

        for round in 1..=self.max_tool_rounds {
            let request = self.request(
                &system,
                messages.clone(),
                definitions.clone(),
                Some(ToolChoice::Auto),
            );
            let response = self.client.create_message(&request).await?;
            if !response.wants_tools() {
                return finish(&response, sources, tool_calls);
            }

            tracing::debug!(round, "model requested tools");
            let mut results = Vec::new();
            for (id, name, input) in response.tool_uses() {
                let output = registry
                    .execute(name, input.clone())
                    .await
                    .map_err(|e| GeneratorError::Tool {
                        name: name.to_string(),
                        message: format!("{:#}", e),
                    })?;
                tool_calls += 1;
                for source in output.sources {
                    if !sources.contains(&source) {
                        sources.push(source);
                    }
                }
                results.push(ContentBlock::ToolResult {
                    tool_use_id: id.to_string(),
                    content: output.content,
                    is_error: output.is_error,
                });
            }

            messages.push(Message::assistant_blocks(response.replayable_content()));
            if round == self.max_tool_rounds {
                results.push(ContentBlock::Text {
                    text: FINAL_ROUND_NOTE.to_string(),
                });
            }
            messages.push(Message::user_blocks(results));
        }

        let request = self.request(&system, messages, definitions, Some(ToolChoice::None));
        let response = self.client.create_message(&request).await?;
        finish(&response, sources, tool_calls)
    }

    fn request(
        &self,
        system: &str,
        messages: Vec<Message>,
        tools: Vec<crate::tools::ToolDefinition>,
        tool_choice: Option<ToolChoice>,
    ) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: system.to_string(),
            messages,
            tools,
            tool_choice,
        }
    }
}

fn finish(
    response: &MessagesResponse,
    sources: Vec<Source>,
    tool_calls: usize,
) -> Result<Generation, GeneratorError> {
    let answer = response.text();
    if answer.trim().is_empty() {
        return Err(GeneratorError::NoContent);
    }
    Ok(Generation {
        answer,
        sources,
        tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Tool, ToolOutput};
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedClient {
        responses: Mutex<VecDeque<Result<MessagesResponse, GeneratorError>>>,
        requests: Mutex<Vec<MessagesRequest>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<Result<MessagesResponse, GeneratorError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<MessagesRequest> {
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
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(GeneratorError::NoContent))
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the query back"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {"query": {"type": "string"}}})
        }

        async fn execute(&self, input: Value) -> anyhow::Result<ToolOutput> {
            let query = input["query"].as_str().unwrap_or_default().to_string();
            Ok(ToolOutput {
                content: format!("echo: {}", query),
                sources: vec![Source {
                    text: "Course - Lesson 1".to_string(),
                    url: Some("https://example.com/1".to_string()),
                }],
                is_error: false,
            })
        }
    }

    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _input: Value) -> anyhow::Result<ToolOutput> {
            anyhow::bail!("store unavailable")
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(BrokenTool));
        registry
    }

    fn tool_use(id: &str, name: &str, query: &str) -> MessagesResponse {
        MessagesResponse {
            id: String::new(),
            model: String::new(),
            content: vec![ContentBlock::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input: json!({"query": query}),
            }],
            stop_reason: Some("tool_use".to_string()),
            usage: None,
        }
    }

    fn generator(client: Arc<ScriptedClient>, max_tool_rounds: usize) -> AiGenerator {
        let config = GenerationConfig {
            max_tool_rounds,
            ..GenerationConfig::default()
        };
        AiGenerator::new(client, &config)
    }

    #[tokio::test]
    async fn test_direct_answer_without_tools() {
        let client = ScriptedClient::new(vec![Ok(MessagesResponse::from_text("Paris."))]);
        let generation = generator(client.clone(), 2)
            .generate("Capital of France?", None, None, Some(&registry()))
            .await
            .unwrap();

        assert_eq!(generation.answer, "Paris.");
        assert!(generation.sources.is_empty());
        assert_eq!(generation.tool_calls, 0);

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].tools.len(), 2);
        assert_eq!(requests[0].tool_choice, Some(ToolChoice::Auto));
        assert_eq!(requests[0].temperature, 0.0);
        assert_eq!(requests[0].max_tokens, 800);
    }

    #[tokio::test]
    async fn test_single_tool_round() {
        let client = ScriptedClient::new(vec![
            Ok(tool_use("tu_1", "echo", "mcp")),
            Ok(MessagesResponse::from_text("MCP is a protocol.")),
        ]);
        let generation = generator(client.clone(), 2)
            .generate("What is MCP?", None, None, Some(&registry()))
            .await
            .unwrap();

        assert_eq!(generation.answer, "MCP is a protocol.");
        assert_eq!(generation.tool_calls, 1);
        assert_eq!(generation.sources.len(), 1);

        let requests = client.requests();
        assert_eq!(requests.len(), 2);
        let second = &requests[1].messages;
        assert_eq!(second.len(), 3);
        assert_eq!(second[1].role, Role::Assistant);
        assert_eq!(
            second[2].content,
            MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: "tu_1".to_string(),
                content: "echo: mcp".to_string(),
                is_error: false,
            }])
        );
    }

    #[tokio::test]
    async fn test_round_limit_forces_final_answer() {
        let client = ScriptedClient::new(vec![
            Ok(tool_use("tu_1", "echo", "first")),
            Ok(tool_use("tu_2", "echo", "second")),
            Ok(MessagesResponse::from_text("Done.")),
        ]);
        let generation = generator(client.clone(), 2)
            .generate("Compare", None, None, Some(&registry()))
            .await
            .unwrap();

        assert_eq!(generation.answer, "Done.");
        assert_eq!(generation.tool_calls, 2);
        assert_eq!(generation.sources.len(), 1);

        let requests = client.requests();
        assert_eq!(requests.len(), 3);
        let last = &requests[2];
        assert_eq!(last.tool_choice, Some(ToolChoice::None));
        match &last.messages[4].content {
            MessageContent::Blocks(blocks) => {
                assert!(matches!(blocks.last(), Some(ContentBlock::Text { text }) if text == FINAL_ROUND_NOTE));
            }
            other => panic!("unexpected content: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tool_use_stop_without_calls_is_final() {
        let mut response = MessagesResponse::from_text("Here is what I know.");
        response.stop_reason = Some("tool_use".to_string());
        let client = ScriptedClient::new(vec![Ok(response)]);
        let generation = generator(client.clone(), 2)
            .generate("q", None, None, Some(&registry()))
            .await
            .unwrap();
        assert_eq!(generation.answer, "Here is what I know.");
        assert_eq!(generation.tool_calls, 0);
        assert_eq!(client.requests().len(), 1);

        let mut empty = MessagesResponse::from_text("");
        empty.stop_reason = Some("tool_use".to_string());
        empty.content.clear();
        let client = ScriptedClient::new(vec![Ok(empty)]);
        let err = generator(client.clone(), 2)
            .generate("q", None, None, Some(&registry()))
            .await
            .unwrap_err();
        assert!(matches!(err, GeneratorError::NoContent));
        assert_eq!(client.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_reported_to_model() {
        let client = ScriptedClient::new(vec![
            Ok(tool_use("tu_1", "missing", "x")),
            Ok(MessagesResponse::from_text("Sorry.")),
        ]);
        generator(client.clone(), 2)
            .generate("q", None, None, Some(&registry()))
            .await
            .unwrap();

        let requests = client.requests();
        match &requests[1].messages[2].content {
            MessageContent::Blocks(blocks) => match &blocks[0] {
                ContentBlock::ToolResult { is_error, content, .. } => {
                    assert!(*is_error);
                    assert!(content.contains("not found"));
                }
                other => panic!("unexpected block: {:?}", other),
            },
            other => panic!("unexpected content: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tool_failure_aborts() {
        let client = ScriptedClient::new(vec![Ok(tool_use("tu_1", "broken", "x"))]);
        let err = generator(client, 2)
            .generate("q", None, None, Some(&registry()))
            .await
            .unwrap_err();
        assert!(matches!(err, GeneratorError::Tool { ref name, .. } if name == "broken"));
    }

    #[tokio::test]
    async fn test_api_error_propagates() {
        let client = ScriptedClient::new(vec![Err(GeneratorError::RateLimited("slow down".into()))]);
        let err = generator(client, 2)
            .generate("q", None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GeneratorError::RateLimited(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_empty_answer_is_an_error() {
        let client = ScriptedClient::new(vec![Ok(MessagesResponse::from_text("  "))]);
        let err = generator(client, 2)
            .generate("q", None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GeneratorError::NoContent));
    }

    #[tokio::test]
    async fn test_no_tools_sends_plain_request() {
        let client = ScriptedClient::new(vec![Ok(MessagesResponse::from_text("Hi"))]);
        generator(client.clone(), 2)
            .generate("q", None, None, Some(&ToolRegistry::new()))
            .await
            .unwrap();
        let requests = client.requests();
        assert!(requests[0].tools.is_empty());
        assert_eq!(requests[0].tool_choice, None);
    }

    #[test]
    fn test_system_prompt_sections() {
        assert_eq!(AiGenerator::system_prompt(None, None), SYSTEM_PROMPT);
        let system = AiGenerator::system_prompt(Some("User: hi\nAssistant: hello"), Some("ctx"));
        assert!(system.contains("\n\nPrevious conversation:\nUser: hi\nAssistant: hello"));
        assert!(system.ends_with("\n\nRelevant course material:\nctx"));
        assert_eq!(AiGenerator::system_prompt(Some(""), Some(" ")), SYSTEM_PROMPT);
    }
}
