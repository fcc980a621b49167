//! Unified `Database` trait, a single async interface for all persistence.
//!
//! Every method is one statement; nothing spans a transaction.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::DatabaseError;
use crate::pipeline::types::{ChatMessage, Flashcard, Note, NoteResults, NoteStatus, StudyTask};

/// Backend-agnostic database trait covering notes, derived artifacts and chat.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Notes ───────────────────────────────────────────────────────

    /// Insert a new note. Returns the generated id.
    async fn insert_note(
        &self,
        user_id: &str,
        source_path: &str,
        status: NoteStatus,
    ) -> Result<String, DatabaseError>;

    /// Get a note by id.
    async fn get_note(&self, id: &str) -> Result<Option<Note>, DatabaseError>;

    /// All notes in the given status, in store order.
    async fn notes_with_status(&self, status: NoteStatus) -> Result<Vec<Note>, DatabaseError>;

    /// Set a note's status.
    async fn update_note_status(&self, id: &str, status: NoteStatus)
    -> Result<(), DatabaseError>;

    /// Write the derived artifacts and mark the note `Done`, in one update.
    async fn complete_note(&self, id: &str, results: &NoteResults) -> Result<(), DatabaseError>;

    // ── Flashcards ──────────────────────────────────────────────────

    /// Insert one flashcard. Returns the generated id.
    async fn insert_flashcard(
        &self,
        note_id: &str,
        front: &str,
        back: &str,
    ) -> Result<String, DatabaseError>;

    /// Flashcards belonging to a note, oldest first.
    async fn list_flashcards(&self, note_id: &str) -> Result<Vec<Flashcard>, DatabaseError>;

    // ── Study tasks ─────────────────────────────────────────────────

    /// Insert one study task. Returns the generated id.
    async fn insert_study_task(
        &self,
        user_id: &str,
        note_id: &str,
        title: &str,
        due_date: Option<NaiveDate>,
    ) -> Result<String, DatabaseError>;

    /// Study tasks derived from a note, oldest first.
    async fn list_study_tasks(&self, note_id: &str) -> Result<Vec<StudyTask>, DatabaseError>;

    // ── Chat ────────────────────────────────────────────────────────

    /// Insert an unanswered question. Returns the generated id.
    async fn insert_chat_message(
        &self,
        note_id: &str,
        question: &str,
    ) -> Result<String, DatabaseError>;

    /// Get a chat message by id.
    async fn get_chat_message(&self, id: &str) -> Result<Option<ChatMessage>, DatabaseError>;

    /// All messages whose response is still null, oldest first.
    async fn unanswered_messages(&self) -> Result<Vec<ChatMessage>, DatabaseError>;

    /// Set the response if none has been set yet.
    ///
    /// Returns `false` when the message was already answered (or is unknown).
    async fn answer_message(&self, id: &str, response: &str) -> Result<bool, DatabaseError>;
}
