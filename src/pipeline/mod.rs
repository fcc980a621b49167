//! Lecture processing pipelines.
//!
//! Two pipelines share the store and the inference provider:
//! 1. `ContentPipeline`: `Processing` notes → transcript, summary, quiz,
//!    flashcards, tasks and topic tree
//! 2. `ChatPipeline`: unanswered questions → answers grounded on the
//!    note's transcript
//!
//! Both call the model through `llm::retry` and are driven by the
//! scheduler in `worker`.

pub mod chat;
pub mod ingest;
pub mod prompts;
pub mod sections;
pub mod types;

pub use chat::{ChatPipeline, ChatReport};
pub use ingest::{ContentPipeline, IngestReport};
