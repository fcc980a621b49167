//! libSQL backend for the async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Quiz and topic tree are
//! stored as JSON text on the note row.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::pipeline::types::{
    ChatMessage, Flashcard, Note, NoteResults, NoteStatus, QuizQuestion, StudyTask, TopicNode,
};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    // Try RFC 3339 first (our canonical write format)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    // Try SQLite datetime() output with fractional seconds
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    // Try SQLite datetime() output without fractional seconds
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

/// Decode a JSON column, treating NULL and garbage alike as absent.
fn json_column<T: serde::de::DeserializeOwned>(raw: Option<String>, column: &str) -> Option<T> {
    let raw = raw?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(column, "Ignoring undecodable JSON column: {e}");
            None
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn row_to_note(row: &libsql::Row) -> Result<Note, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("note row parse: {e}"));

    let status_str: String = row.get(3).map_err(parse)?;
    let status = status_str
        .parse::<NoteStatus>()
        .map_err(DatabaseError::Serialization)?;
    let created_str: String = row.get(8).map_err(parse)?;
    let updated_str: String = row.get(9).map_err(parse)?;

    Ok(Note {
        id: row.get(0).map_err(parse)?,
        user_id: row.get(1).map_err(parse)?,
        source_path: row.get(2).map_err(parse)?,
        status,
        transcript: row.get(4).ok(),
        summary: row.get(5).ok(),
        quiz: json_column::<Vec<QuizQuestion>>(row.get(6).ok(), "quiz"),
        topic_tree: json_column::<TopicNode>(row.get(7).ok(), "mind_map"),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_flashcard(row: &libsql::Row) -> Result<Flashcard, libsql::Error> {
    Ok(Flashcard {
        id: row.get(0)?,
        note_id: row.get(1)?,
        front: row.get(2)?,
        back: row.get(3)?,
    })
}

fn row_to_study_task(row: &libsql::Row) -> Result<StudyTask, libsql::Error> {
    let due_str: Option<String> = row.get(4).ok();
    Ok(StudyTask {
        id: row.get(0)?,
        user_id: row.get(1)?,
        note_id: row.get(2)?,
        title: row.get(3)?,
        due_date: due_str.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
    })
}

fn row_to_chat_message(row: &libsql::Row) -> Result<ChatMessage, libsql::Error> {
    let created_str: String = row.get(4)?;
    let answered_str: Option<String> = row.get(5).ok();
    Ok(ChatMessage {
        id: row.get(0)?,
        note_id: row.get(1)?,
        question: row.get(2)?,
        response: row.get(3).ok(),
        created_at: parse_datetime(&created_str),
        answered_at: parse_optional_datetime(&answered_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const NOTE_COLUMNS: &str =
    "id, user_id, audio_path, status, transcript, summary, quiz, mind_map, created_at, updated_at";

const CHAT_COLUMNS: &str = "id, note_id, question, response, created_at, answered_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Notes ───────────────────────────────────────────────────────

    async fn insert_note(
        &self,
        user_id: &str,
        source_path: &str,
        status: NoteStatus,
    ) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO notes (id, user_id, audio_path, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![id.clone(), user_id, source_path, status.as_str(), now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_note: {e}")))?;

        debug!(id = %id, source_path, "Note inserted into DB");
        Ok(id)
    }

    async fn get_note(&self, id: &str) -> Result<Option<Note>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_note: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_note(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_note: {e}"))),
        }
    }

    async fn notes_with_status(&self, status: NoteStatus) -> Result<Vec<Note>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {NOTE_COLUMNS} FROM notes WHERE status = ?1 ORDER BY created_at ASC, rowid ASC"
                ),
                params![status.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("notes_with_status: {e}")))?;

        let mut notes = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_note(&row) {
                Ok(note) => notes.push(note),
                Err(e) => {
                    tracing::warn!("Skipping note row: {e}");
                }
            }
        }
        Ok(notes)
    }

    async fn update_note_status(
        &self,
        id: &str,
        status: NoteStatus,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .execute(
                "UPDATE notes SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_note_status: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "note".into(),
                id: id.into(),
            });
        }
        Ok(())
    }

    async fn complete_note(&self, id: &str, results: &NoteResults) -> Result<(), DatabaseError> {
        let quiz_json = to_json(&results.quiz)?;
        let tree_json = match &results.topic_tree {
            Some(tree) => Some(to_json(tree)?),
            None => None,
        };
        let now = Utc::now().to_rfc3339();

        let affected = self
            .conn()
            .execute(
                "UPDATE notes SET transcript = ?1, summary = ?2, quiz = ?3, mind_map = ?4,
                    status = ?5, updated_at = ?6
                 WHERE id = ?7",
                params![
                    results.transcript.as_str(),
                    results.summary.as_str(),
                    quiz_json,
                    opt_text_owned(tree_json),
                    NoteStatus::Done.as_str(),
                    now,
                    id,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("complete_note: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "note".into(),
                id: id.into(),
            });
        }
        debug!(id, quiz = results.quiz.len(), "Note completed");
        Ok(())
    }

    // ── Flashcards ──────────────────────────────────────────────────

    async fn insert_flashcard(
        &self,
        note_id: &str,
        front: &str,
        back: &str,
    ) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO flashcards (id, note_id, front, back, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id.clone(), note_id, front, back, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_flashcard: {e}")))?;
        Ok(id)
    }

    async fn list_flashcards(&self, note_id: &str) -> Result<Vec<Flashcard>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, note_id, front, back FROM flashcards
                 WHERE note_id = ?1 ORDER BY created_at ASC, rowid ASC",
                params![note_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_flashcards: {e}")))?;

        let mut cards = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_flashcard(&row) {
                Ok(card) => cards.push(card),
                Err(e) => tracing::warn!("Skipping flashcard row: {e}"),
            }
        }
        Ok(cards)
    }

    // ── Study tasks ─────────────────────────────────────────────────

    async fn insert_study_task(
        &self,
        user_id: &str,
        note_id: &str,
        title: &str,
        due_date: Option<NaiveDate>,
    ) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let due = due_date.map(|d| d.format("%Y-%m-%d").to_string());
        self.conn()
            .execute(
                "INSERT INTO study_tasks (id, user_id, note_id, title, due_date, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id.clone(), user_id, note_id, title, opt_text_owned(due), now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_study_task: {e}")))?;
        Ok(id)
    }

    async fn list_study_tasks(&self, note_id: &str) -> Result<Vec<StudyTask>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, user_id, note_id, title, due_date FROM study_tasks
                 WHERE note_id = ?1 ORDER BY created_at ASC, rowid ASC",
                params![note_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_study_tasks: {e}")))?;

        let mut tasks = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_study_task(&row) {
                Ok(task) => tasks.push(task),
                Err(e) => tracing::warn!("Skipping study task row: {e}"),
            }
        }
        Ok(tasks)
    }

    // ── Chat ────────────────────────────────────────────────────────

    async fn insert_chat_message(
        &self,
        note_id: &str,
        question: &str,
    ) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO chat_messages (id, note_id, question, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id.clone(), note_id, question, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_chat_message: {e}")))?;
        Ok(id)
    }

    async fn get_chat_message(&self, id: &str) -> Result<Option<ChatMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CHAT_COLUMNS} FROM chat_messages WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_chat_message: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let msg = row_to_chat_message(&row)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(Some(msg))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_chat_message: {e}"))),
        }
    }

    async fn unanswered_messages(&self) -> Result<Vec<ChatMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CHAT_COLUMNS} FROM chat_messages
                     WHERE response IS NULL ORDER BY created_at ASC, rowid ASC"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("unanswered_messages: {e}")))?;

        let mut messages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_chat_message(&row) {
                Ok(msg) => messages.push(msg),
                Err(e) => tracing::warn!("Skipping chat message row: {e}"),
            }
        }
        Ok(messages)
    }

    async fn answer_message(&self, id: &str, response: &str) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .execute(
                "UPDATE chat_messages SET response = ?1, answered_at = ?2
                 WHERE id = ?3 AND response IS NULL",
                params![response, now, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("answer_message: {e}")))?;
        Ok(affected > 0)
    }
}
