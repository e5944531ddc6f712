//! # course-rag
//!
//! A retrieval-augmented question-answering service over course materials.
//!
//! Course documents (plain text, Markdown, PDF, DOCX) are parsed into
//! courses, lessons, and overlapping text chunks, embedded, and stored in
//! SQLite. Questions go to Claude with two tools, a content search and a
//! course outline lookup, which the model calls as it sees fit before
//! answering. Conversations are kept per session.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Documents  │──▶│  Processor   │──▶│ VectorStore  │
//! │ txt/md/pdf  │   │ parse+chunk  │   │ embed+SQLite │
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │ tools
//!                   ┌──────────────┐   ┌──────┴───────┐
//!                   │   Sessions   │──▶│ AiGenerator  │
//!                   └──────────────┘   │ Messages API │
//!                                      └──────┬───────┘
//!                          ┌──────────────────┤
//!                          ▼                  ▼
//!                     ┌──────────┐      ┌──────────┐
//!                     │   CLI    │      │   HTTP   │
//!                     └──────────┘      └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Courses, lessons, chunks, sources |
//! | [`extract`] | Text extraction from PDF and DOCX |
//! | [`document`] | Course document parsing and chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`store`] | Storage trait with SQLite and in-memory backends |
//! | [`vector_store`] | Embedding-aware search facade |
//! | [`tools`] | Tools exposed to the model |
//! | [`generator`] | Messages API client and tool-calling loop |
//! | [`session`] | Conversation history |
//! | [`ingest`] | Folder ingestion |
//! | [`rag`] | Orchestrator |
//! | [`search`] | CLI search and course listing |
//! | [`server`] | HTTP API |

pub mod config;
pub mod db;
pub mod document;
pub mod embedding;
pub mod extract;
pub mod generator;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod rag;
pub mod search;
pub mod server;
pub mod session;
pub mod store;
pub mod tools;
pub mod vector_store;
