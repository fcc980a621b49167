//! Shared types for the lecture processing pipelines.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ── Notes ───────────────────────────────────────────────────────────

/// Processing state of an uploaded lecture.
///
/// `Pending → Processing → {Done, Error}`. The producer sets `Processing`;
/// the ingestion pipeline only ever writes `Done` or `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl NoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteStatus::Pending => "Pending",
            NoteStatus::Processing => "Processing",
            NoteStatus::Done => "Done",
            NoteStatus::Error => "Error",
        }
    }

    /// `Done` and `Error` are never revisited.
    pub fn is_terminal(&self) -> bool {
        matches!(self, NoteStatus::Done | NoteStatus::Error)
    }
}

impl fmt::Display for NoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NoteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(NoteStatus::Pending),
            "Processing" => Ok(NoteStatus::Processing),
            "Done" => Ok(NoteStatus::Done),
            "Error" => Ok(NoteStatus::Error),
            other => Err(format!("unknown note status '{other}'")),
        }
    }
}

/// One uploaded lecture artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub id: String,
    pub user_id: String,
    /// Blob store key of the uploaded file (audio or document).
    pub source_path: String,
    pub status: NoteStatus,
    pub transcript: Option<String>,
    pub summary: Option<String>,
    pub quiz: Option<Vec<QuizQuestion>>,
    pub topic_tree: Option<TopicNode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    /// Transcript usable as chat context, if any.
    pub fn context(&self) -> Option<&str> {
        self.transcript
            .as_deref()
            .filter(|t| !t.trim().is_empty())
    }
}

/// Everything the ingestion pipeline writes back onto a note.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteResults {
    pub transcript: String,
    pub summary: String,
    pub quiz: Vec<QuizQuestion>,
    pub topic_tree: Option<TopicNode>,
}

// ── Derived artifacts ───────────────────────────────────────────────

/// Multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
}

impl QuizQuestion {
    /// At least two options are needed for a usable question.
    pub fn is_usable(&self) -> bool {
        !self.question.trim().is_empty() && self.options.len() >= 2
    }
}

/// Flashcard as emitted by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashcardDraft {
    pub front: String,
    pub back: String,
}

/// Persisted flashcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flashcard {
    pub id: String,
    pub note_id: String,
    pub front: String,
    pub back: String,
}

/// Task as emitted by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(default, alias = "due", alias = "dueDate")]
    pub due_date: Option<String>,
}

impl TaskDraft {
    /// Due date if the model produced something parseable.
    pub fn parsed_due_date(&self) -> Option<NaiveDate> {
        let raw = self.due_date.as_deref()?.trim();
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .or_else(|| {
                DateTime::parse_from_rfc3339(raw)
                    .ok()
                    .map(|dt| dt.date_naive())
            })
    }
}

/// Persisted study task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyTask {
    pub id: String,
    pub user_id: String,
    pub note_id: String,
    pub title: String,
    pub due_date: Option<NaiveDate>,
}

/// Recursive topic outline. The root is the lecture's subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicNode {
    #[serde(default)]
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub children: Vec<TopicNode>,
}

impl TopicNode {
    /// Total node count, root included.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(TopicNode::node_count).sum::<usize>()
    }
}

// ── Chat ────────────────────────────────────────────────────────────

/// A student question against a note's transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub note_id: String,
    pub question: String,
    /// `None` until answered; never overwritten once set.
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
}

// ── Media classification ────────────────────────────────────────────

/// How an uploaded file is fed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Text is extracted locally and embedded in the prompt.
    Document,
    /// File is uploaded to the inference service.
    Audio,
}

impl MediaKind {
    /// `pdf` and `txt` are documents; everything else is audio.
    pub fn classify(path: &str) -> Self {
        match extension(path).as_deref() {
            Some("pdf") | Some("txt") => MediaKind::Document,
            _ => MediaKind::Audio,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MediaKind::Document => "document",
            MediaKind::Audio => "audio",
        }
    }
}

/// Lower-cased file extension of a storage key.
pub fn extension(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .filter(|e| !e.is_empty())
}

/// MIME type to declare when uploading audio.
pub fn audio_mime_type(path: &str) -> &'static str {
    match extension(path).as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("m4a") => "audio/mp4",
        Some("aac") => "audio/aac",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("webm") => "audio/webm",
        Some("aiff") | Some("aif") => "audio/aiff",
        _ => "application/octet-stream",
    }
}
