//! Question answering over lecture transcripts.
//!
//! Each tick picks up every chat message without a response, grounds a
//! prompt on the owning note's transcript and stores the answer once.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::config::ChatConfig;
use crate::error::{DatabaseError, PipelineError};
use crate::llm::provider::{GenerateRequest, InferenceProvider};
use crate::llm::retry;
use crate::pipeline::prompts::{CHAT_UNAVAILABLE_RESPONSE, build_chat_question, build_chat_system};
use crate::pipeline::types::ChatMessage;
use crate::store::Database;

/// Outcome counts for one chat pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChatReport {
    pub answered: usize,
    /// Note missing or not transcribed yet; retried next tick.
    pub skipped: usize,
    /// Left unanswered after an error; retried next tick.
    pub failed: usize,
}

/// What happened to a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatOutcome {
    Answered,
    /// The model stayed rate limited; the fallback reply was stored.
    Unavailable,
    Skipped,
    /// Someone else answered it first.
    AlreadyAnswered,
}

/// Answers pending chat messages.
pub struct ChatPipeline {
    db: Arc<dyn Database>,
    llm: Arc<dyn InferenceProvider>,
    config: ChatConfig,
}

impl ChatPipeline {
    pub fn new(db: Arc<dyn Database>, llm: Arc<dyn InferenceProvider>, config: ChatConfig) -> Self {
        Self { db, llm, config }
    }

    /// Run one pass over all unanswered messages.
    pub async fn run_once(&self) -> Result<ChatReport, DatabaseError> {
        let messages = self.db.unanswered_messages().await?;
        let mut report = ChatReport::default();
        if messages.is_empty() {
            return Ok(report);
        }

        debug!(count = messages.len(), "Answering chat messages");

        for message in messages {
            let outcome = AssertUnwindSafe(self.answer(&message))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(PipelineError::from_panic(panic)));

            match outcome {
                Ok(ChatOutcome::Answered | ChatOutcome::Unavailable) => report.answered += 1,
                Ok(ChatOutcome::Skipped) => report.skipped += 1,
                Ok(ChatOutcome::AlreadyAnswered) => {}
                Err(e) => {
                    // Leave unanswered; picked up again next tick
                    error!(message_id = %message.id, note_id = %message.note_id, error = %e, "Failed to answer chat message");
                    report.failed += 1;
                }
            }
        }

        if report.answered > 0 || report.failed > 0 {
            info!(
                answered = report.answered,
                skipped = report.skipped,
                failed = report.failed,
                "Chat pass complete"
            );
        }
        Ok(report)
    }

    /// Answer a single message.
    pub async fn answer(&self, message: &ChatMessage) -> Result<ChatOutcome, PipelineError> {
        let Some(note) = self.db.get_note(&message.note_id).await? else {
            debug!(message_id = %message.id, note_id = %message.note_id, "Note not found, skipping");
            return Ok(ChatOutcome::Skipped);
        };
        let Some(transcript) = note.context() else {
            debug!(message_id = %message.id, note_id = %note.id, "No transcript yet, skipping");
            return Ok(ChatOutcome::Skipped);
        };

        let request = GenerateRequest::new(build_chat_question(&message.question))
            .with_system(build_chat_system(transcript, self.config.context_chars));

        let generated = retry::invoke(&self.config.retry, "chat", || {
            self.llm.generate(request.clone())
        })
        .await;

        let (response, outcome) = match generated {
            Ok(text) => (text.trim().to_string(), ChatOutcome::Answered),
            Err(e) if e.is_rate_limited() => {
                warn!(message_id = %message.id, "Model still rate limited, storing fallback reply");
                (CHAT_UNAVAILABLE_RESPONSE.to_string(), ChatOutcome::Unavailable)
            }
            Err(e) => return Err(e.into()),
        };

        if self.db.answer_message(&message.id, &response).await? {
            debug!(message_id = %message.id, "Chat message answered");
            Ok(outcome)
        } else {
            debug!(message_id = %message.id, "Chat message already answered");
            Ok(ChatOutcome::AlreadyAnswered)
        }
    }
}
