//! Content ingestion: turns uploaded lectures into study material.
//!
//! Each tick:
//! 1. `notes_with_status(Processing)` from the store
//! 2. Download the upload and stage it in a scoped temp file
//! 3. Documents: extract text, embed it in the prompt.
//!    Audio: upload to the provider, wait until it is ready, attach it
//! 4. Generate under the ingest retry policy
//! 5. Parse the sectioned response and persist flashcards, tasks and the note
//!
//! Any failure, including a panic while handling a note, marks the note
//! `Error`. Notes are processed one at a time and a failure never stops the
//! rest of the batch.

use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use tempfile::NamedTempFile;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::IngestConfig;
use crate::error::{DatabaseError, LlmError, PipelineError};
use crate::extract::TextExtractor;
use crate::llm::provider::{GenerateRequest, InferenceProvider, MediaHandle, MediaState};
use crate::llm::retry;
use crate::pipeline::prompts::{build_audio_prompt, build_document_prompt, truncate_chars};
use crate::pipeline::sections::{ParsedLecture, parse_lecture};
use crate::pipeline::types::{
    MediaKind, Note, NoteResults, NoteStatus, audio_mime_type, extension,
};
use crate::storage::BlobStore;
use crate::store::Database;

/// Outcome counts for one ingestion pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub done: usize,
    pub failed: usize,
}

impl IngestReport {
    pub fn total(&self) -> usize {
        self.done + self.failed
    }
}

/// What a successfully processed note produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub quiz: usize,
    pub flashcards: usize,
    pub tasks: usize,
}

/// Processes every note in `Processing` state.
pub struct ContentPipeline {
    db: Arc<dyn Database>,
    blobs: Arc<dyn BlobStore>,
    llm: Arc<dyn InferenceProvider>,
    extractor: Arc<dyn TextExtractor>,
    config: IngestConfig,
}

impl ContentPipeline {
    pub fn new(
        db: Arc<dyn Database>,
        blobs: Arc<dyn BlobStore>,
        llm: Arc<dyn InferenceProvider>,
        extractor: Arc<dyn TextExtractor>,
        config: IngestConfig,
    ) -> Self {
        Self {
            db,
            blobs,
            llm,
            extractor,
            config,
        }
    }

    /// Run one pass over all `Processing` notes.
    ///
    /// Only a failure to list the notes is returned; per-note failures are
    /// recorded on the note and counted in the report.
    pub async fn run_once(&self) -> Result<IngestReport, DatabaseError> {
        let notes = self.db.notes_with_status(NoteStatus::Processing).await?;
        let mut report = IngestReport::default();
        if notes.is_empty() {
            return Ok(report);
        }

        info!(count = notes.len(), "Processing lecture batch");

        for note in notes {
            let outcome = AssertUnwindSafe(self.process(&note))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(PipelineError::from_panic(panic)));

            match outcome {
                Ok(summary) => {
                    info!(
                        note_id = %note.id,
                        quiz = summary.quiz,
                        flashcards = summary.flashcards,
                        tasks = summary.tasks,
                        "Lecture processed"
                    );
                    report.done += 1;
                }
                Err(e) => {
                    error!(note_id = %note.id, source = %note.source_path, error = %e, "Lecture processing failed");
                    if let Err(db_err) = self.db.update_note_status(&note.id, NoteStatus::Error).await {
                        error!(note_id = %note.id, error = %db_err, "Failed to mark note as errored");
                    }
                    report.failed += 1;
                }
            }
        }

        info!(done = report.done, failed = report.failed, "Lecture batch complete");
        Ok(report)
    }

    /// Process one note end to end. The staged file is removed on return.
    pub async fn process(&self, note: &Note) -> Result<IngestSummary, PipelineError> {
        let bytes = retry::invoke(&self.config.download_retry, "download", || {
            self.blobs.fetch(&note.source_path)
        })
        .await?;
        debug!(note_id = %note.id, bytes = bytes.len(), "Downloaded lecture");

        let staged = self.stage(note, bytes).await?;
        let kind = MediaKind::classify(&note.source_path);
        debug!(note_id = %note.id, kind = kind.label(), "Classified lecture");

        let raw = match kind {
            MediaKind::Document => self.analyze_document(staged.path()).await?,
            MediaKind::Audio => self.analyze_audio(note, staged.path()).await?,
        };
        drop(staged);

        let parsed = parse_lecture(&raw);
        self.persist(note, parsed).await
    }

    /// Write the upload to a temp file that keeps the source extension.
    async fn stage(&self, note: &Note, bytes: Vec<u8>) -> Result<NamedTempFile, PipelineError> {
        let suffix = extension(&note.source_path)
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();
        let dir = self.config.staging_dir.clone();

        // Blocking file IO
        let staged = tokio::task::spawn_blocking(move || -> std::io::Result<NamedTempFile> {
            let mut builder = tempfile::Builder::new();
            builder.prefix("lumen-").suffix(&suffix);
            let mut file = match dir {
                Some(dir) => {
                    std::fs::create_dir_all(&dir)?;
                    builder.tempfile_in(&dir)?
                }
                None => builder.tempfile()?,
            };
            file.write_all(&bytes)?;
            file.flush()?;
            Ok(file)
        })
        .await;

        let reason = match staged {
            Ok(Ok(file)) => return Ok(file),
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("staging task failed: {e}"),
        };
        Err(PipelineError::Staging {
            note_id: note.id.clone(),
            reason,
        })
    }

    async fn analyze_document(&self, path: &Path) -> Result<String, PipelineError> {
        let text = self.extractor.extract(path).await?;
        let text = match self.config.document_char_limit {
            Some(max) => truncate_chars(&text, max),
            None => text.as_str(),
        };
        let request = GenerateRequest::new(build_document_prompt(text));
        Ok(self.generate(request).await?)
    }

    async fn analyze_audio(&self, note: &Note, path: &Path) -> Result<String, PipelineError> {
        let handle = self
            .llm
            .upload_media(path, audio_mime_type(&note.source_path))
            .await?;
        debug!(note_id = %note.id, media = %handle.name, "Uploaded lecture audio");

        let result = match self.wait_until_ready(&handle).await {
            Ok(()) => {
                let request = GenerateRequest::new(build_audio_prompt()).with_media(handle.clone());
                self.generate(request).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = self.llm.delete_media(&handle).await {
            warn!(note_id = %note.id, media = %handle.name, error = %e, "Failed to delete uploaded media");
        }
        Ok(result?)
    }

    /// Poll the provider until uploaded media is usable.
    async fn wait_until_ready(&self, handle: &MediaHandle) -> Result<(), LlmError> {
        let started = Instant::now();
        loop {
            match self.llm.media_state(handle).await? {
                MediaState::Ready => return Ok(()),
                MediaState::Failed => {
                    return Err(LlmError::MediaFailed {
                        provider: self.llm.model_name().to_string(),
                        name: handle.name.clone(),
                    });
                }
                MediaState::Processing => {
                    let waited = started.elapsed();
                    if waited >= self.config.media_ready_timeout {
                        return Err(LlmError::MediaTimeout {
                            name: handle.name.clone(),
                            waited,
                        });
                    }
                    debug!(media = %handle.name, "Media still processing");
                    tokio::time::sleep(self.config.media_poll_interval).await;
                }
            }
        }
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, LlmError> {
        retry::invoke(&self.config.retry, "ingest", || {
            self.llm.generate(request.clone())
        })
        .await
    }

    async fn persist(
        &self,
        note: &Note,
        parsed: ParsedLecture,
    ) -> Result<IngestSummary, PipelineError> {
        for card in &parsed.flashcards {
            self.db
                .insert_flashcard(&note.id, &card.front, &card.back)
                .await?;
        }
        for task in &parsed.tasks {
            self.db
                .insert_study_task(&note.user_id, &note.id, &task.title, task.parsed_due_date())
                .await?;
        }

        let summary = IngestSummary {
            quiz: parsed.quiz.len(),
            flashcards: parsed.flashcards.len(),
            tasks: parsed.tasks.len(),
        };
        let results = NoteResults {
            transcript: parsed.transcript,
            summary: parsed.summary,
            quiz: parsed.quiz,
            topic_tree: parsed.topic_tree,
        };
        self.db.complete_note(&note.id, &results).await?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{ExtractionError, StorageError};
    use crate::extract::DocumentExtractor;
    use crate::llm::RetryPolicy;
    use crate::pipeline::sections::SUMMARY_PLACEHOLDER;
    use crate::store::LibSqlBackend;

    const FULL_RESPONSE: &str = r#"TRANSCRIPT_START
Speaker 1: Today we discuss the cell.
TRANSCRIPT_END
SUMMARY_START
- The cell is the unit of life
SUMMARY_END
QUIZ_START
[{"question":"Unit of life?","options":["Atom","Cell"],"answer":"Cell"}]
QUIZ_END
FLASHCARDS_START
[{"front":"Cell","back":"Unit of life"},{"front":"ATP","back":"Energy"}]
FLASHCARDS_END
TASKS_START
[{"title":"Lab report","due_date":"2026-11-02"}]
TASKS_END
MIND_MAP_START
{"id":"root","label":"Biology","children":[{"id":"c","label":"Cells","children":[]}]}
MIND_MAP_END"#;

    #[derive(Default)]
    struct MockBlobs {
        objects: HashMap<String, Vec<u8>>,
        fetches: AtomicUsize,
    }

    impl MockBlobs {
        fn with(key: &str, bytes: &[u8]) -> Self {
            let mut objects = HashMap::new();
            objects.insert(key.to_string(), bytes.to_vec());
            Self {
                objects,
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl BlobStore for MockBlobs {
        fn name(&self) -> &str {
            "mock"
        }

        async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.objects
                .get(key)
                .cloned()
                .ok_or_else(|| StorageError::NotFound {
                    bucket: "mock".into(),
                    key: key.into(),
                })
        }
    }

    struct MockLlm {
        responses: Mutex<VecDeque<Result<String, LlmError>>>,
        states: Mutex<VecDeque<MediaState>>,
        prompts: Mutex<Vec<GenerateRequest>>,
        uploads: AtomicUsize,
        deletes: AtomicUsize,
    }

    impl MockLlm {
        fn new(responses: Vec<Result<String, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                states: Mutex::new(VecDeque::new()),
                prompts: Mutex::new(Vec::new()),
                uploads: AtomicUsize::new(0),
                deletes: AtomicUsize::new(0),
            }
        }

        fn with_states(self, states: Vec<MediaState>) -> Self {
            *self.states.lock().unwrap() = states.into();
            self
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl InferenceProvider for MockLlm {
        fn model_name(&self) -> &str {
            "mock"
        }

        fn supports_media(&self) -> bool {
            true
        }

        async fn generate(&self, request: GenerateRequest) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(FULL_RESPONSE.to_string()))
        }

        async fn upload_media(&self, path: &Path, mime_type: &str) -> Result<MediaHandle, LlmError> {
            assert!(path.exists(), "staged file must exist during upload");
            self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(MediaHandle {
                name: "files/mock-1".into(),
                uri: "https://files/mock-1".into(),
                mime_type: mime_type.into(),
            })
        }

        async fn media_state(&self, _handle: &MediaHandle) -> Result<MediaState, LlmError> {
            Ok(self
                .states
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(MediaState::Ready))
        }

        async fn delete_media(&self, _handle: &MediaHandle) -> Result<(), LlmError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn rate_limited() -> LlmError {
        LlmError::RateLimited {
            provider: "mock".into(),
            retry_after: None,
        }
    }

    fn permanent() -> LlmError {
        LlmError::RequestFailed {
            provider: "mock".into(),
            reason: "bad request".into(),
        }
    }

    fn test_config() -> IngestConfig {
        IngestConfig {
            retry: RetryPolicy::new(3, Duration::from_secs(30)),
            download_retry: RetryPolicy::new(2, Duration::from_secs(2)),
            media_poll_interval: Duration::from_secs(2),
            media_ready_timeout: Duration::from_secs(10),
            document_char_limit: None,
            staging_dir: None,
        }
    }

    async fn pipeline_with(
        blobs: MockBlobs,
        llm: Arc<MockLlm>,
        config: IngestConfig,
    ) -> (ContentPipeline, Arc<LibSqlBackend>) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let pipeline = ContentPipeline::new(
            db.clone(),
            Arc::new(blobs),
            llm,
            Arc::new(DocumentExtractor::new()),
            config,
        );
        (pipeline, db)
    }

    #[tokio::test]
    async fn document_note_completes() {
        let llm = Arc::new(MockLlm::new(vec![]));
        let blobs = MockBlobs::with("u1/week1.txt", b"Mitochondria are the powerhouse.");
        let (pipeline, db) = pipeline_with(blobs, llm.clone(), test_config()).await;
        let id = db.insert_note("u1", "u1/week1.txt", NoteStatus::Processing).await.unwrap();

        let report = pipeline.run_once().await.unwrap();
        assert_eq!(report, IngestReport { done: 1, failed: 0 });

        let note = db.get_note(&id).await.unwrap().unwrap();
        assert_eq!(note.status, NoteStatus::Done);
        assert_eq!(note.transcript.as_deref(), Some("Speaker 1: Today we discuss the cell."));
        assert_eq!(note.quiz.unwrap().len(), 1);
        assert_eq!(note.topic_tree.unwrap().label, "Biology");

        let cards = db.list_flashcards(&id).await.unwrap();
        assert_eq!(cards.len(), 2);
        let tasks = db.list_study_tasks(&id).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].user_id, "u1");
        assert_eq!(tasks[0].due_date, chrono::NaiveDate::from_ymd_opt(2026, 11, 2));

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].prompt.contains("Mitochondria are the powerhouse."));
        assert!(prompts[0].media.is_none());
        assert_eq!(llm.uploads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn document_text_is_truncated() {
        let llm = Arc::new(MockLlm::new(vec![]));
        let body = format!("{}{}", "x".repeat(50), "TAIL_MARKER");
        let blobs = MockBlobs::with("notes.txt", body.as_bytes());
        let config = IngestConfig {
            document_char_limit: Some(50),
            ..test_config()
        };
        let (pipeline, db) = pipeline_with(blobs, llm.clone(), config).await;
        db.insert_note("u1", "notes.txt", NoteStatus::Processing).await.unwrap();

        pipeline.run_once().await.unwrap();
        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].prompt.contains(&"x".repeat(50)));
        assert!(!prompts[0].prompt.contains("TAIL_MARKER"));
    }

    #[tokio::test(start_paused = true)]
    async fn audio_waits_for_media_then_cleans_up() {
        let llm = Arc::new(
            MockLlm::new(vec![]).with_states(vec![MediaState::Processing, MediaState::Processing]),
        );
        let blobs = MockBlobs::with("lecture1.mp3", b"ID3fake");
        let (pipeline, db) = pipeline_with(blobs, llm.clone(), test_config()).await;
        let id = db.insert_note("u1", "lecture1.mp3", NoteStatus::Processing).await.unwrap();

        let start = Instant::now();
        let report = pipeline.run_once().await.unwrap();
        assert_eq!(report.done, 1);
        // Two polls while processing, one sleep after each
        assert_eq!(start.elapsed(), Duration::from_secs(4));

        assert_eq!(llm.uploads.load(Ordering::SeqCst), 1);
        assert_eq!(llm.deletes.load(Ordering::SeqCst), 1);
        let prompts = llm.prompts.lock().unwrap();
        let media = prompts[0].media.as_ref().unwrap();
        assert_eq!(media.mime_type, "audio/mpeg");
        assert!(prompts[0].prompt.contains("Speaker 1"));
        drop(prompts);

        let note = db.get_note(&id).await.unwrap().unwrap();
        assert_eq!(note.status, NoteStatus::Done);
    }

    #[tokio::test]
    async fn failed_media_marks_error() {
        let llm = Arc::new(MockLlm::new(vec![]).with_states(vec![MediaState::Failed]));
        let blobs = MockBlobs::with("lecture.wav", b"RIFF");
        let (pipeline, db) = pipeline_with(blobs, llm.clone(), test_config()).await;
        let id = db.insert_note("u1", "lecture.wav", NoteStatus::Processing).await.unwrap();

        let report = pipeline.run_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(llm.calls(), 0);
        assert_eq!(llm.deletes.load(Ordering::SeqCst), 1);
        let note = db.get_note(&id).await.unwrap().unwrap();
        assert_eq!(note.status, NoteStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn media_timeout_marks_error() {
        let states = vec![MediaState::Processing; 20];
        let llm = Arc::new(MockLlm::new(vec![]).with_states(states));
        let blobs = MockBlobs::with("lecture.m4a", b"ftyp");
        let (pipeline, db) = pipeline_with(blobs, llm.clone(), test_config()).await;
        let id = db.insert_note("u1", "lecture.m4a", NoteStatus::Processing).await.unwrap();

        let report = pipeline.run_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(llm.calls(), 0);
        let note = db.get_note(&id).await.unwrap().unwrap();
        assert_eq!(note.status, NoteStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_is_waited_out() {
        let llm = Arc::new(MockLlm::new(vec![Err(rate_limited())]));
        let blobs = MockBlobs::with("week2.txt", b"Osmosis moves water.");
        let (pipeline, db) = pipeline_with(blobs, llm.clone(), test_config()).await;
        let id = db.insert_note("u1", "week2.txt", NoteStatus::Processing).await.unwrap();

        let start = Instant::now();
        pipeline.run_once().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(30));
        assert_eq!(llm.calls(), 2);
        let note = db.get_note(&id).await.unwrap().unwrap();
        assert_eq!(note.status, NoteStatus::Done);
    }

    #[tokio::test]
    async fn permanent_failure_marks_error_without_artifacts() {
        let llm = Arc::new(MockLlm::new(vec![Err(permanent())]));
        let blobs = MockBlobs::with("week3.txt", b"Enzymes lower activation energy.");
        let (pipeline, db) = pipeline_with(blobs, llm.clone(), test_config()).await;
        let id = db.insert_note("u1", "week3.txt", NoteStatus::Processing).await.unwrap();

        let report = pipeline.run_once().await.unwrap();
        assert_eq!(report, IngestReport { done: 0, failed: 1 });
        assert_eq!(llm.calls(), 1);
        let note = db.get_note(&id).await.unwrap().unwrap();
        assert_eq!(note.status, NoteStatus::Error);
        assert!(db.list_flashcards(&id).await.unwrap().is_empty());
        assert!(db.list_study_tasks(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_blob_marks_error() {
        let llm = Arc::new(MockLlm::new(vec![]));
        let blobs = MockBlobs::default();
        let (pipeline, db) = pipeline_with(blobs, llm.clone(), test_config()).await;
        let id = db.insert_note("u1", "gone.mp3", NoteStatus::Processing).await.unwrap();

        let report = pipeline.run_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(llm.calls(), 0);
        assert_eq!(db.get_note(&id).await.unwrap().unwrap().status, NoteStatus::Error);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_batch() {
        let llm = Arc::new(MockLlm::new(vec![Err(permanent())]));
        let mut blobs = MockBlobs::with("first.txt", b"first lecture");
        blobs.objects.insert("second.txt".into(), b"second lecture".to_vec());
        let (pipeline, db) = pipeline_with(blobs, llm.clone(), test_config()).await;
        let first = db.insert_note("u1", "first.txt", NoteStatus::Processing).await.unwrap();
        let second = db.insert_note("u1", "second.txt", NoteStatus::Processing).await.unwrap();

        let report = pipeline.run_once().await.unwrap();
        assert_eq!(report, IngestReport { done: 1, failed: 1 });
        assert_eq!(db.get_note(&first).await.unwrap().unwrap().status, NoteStatus::Error);
        assert_eq!(db.get_note(&second).await.unwrap().unwrap().status, NoteStatus::Done);
        assert!(db.notes_with_status(NoteStatus::Processing).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn other_statuses_are_ignored() {
        let llm = Arc::new(MockLlm::new(vec![]));
        let blobs = MockBlobs::with("a.txt", b"text");
        let (pipeline, db) = pipeline_with(blobs, llm.clone(), test_config()).await;
        db.insert_note("u1", "a.txt", NoteStatus::Pending).await.unwrap();
        db.insert_note("u1", "a.txt", NoteStatus::Done).await.unwrap();

        let report = pipeline.run_once().await.unwrap();
        assert_eq!(report.total(), 0);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn unstructured_output_uses_placeholders() {
        let llm = Arc::new(MockLlm::new(vec![Ok("I could not follow the format.".into())]));
        let blobs = MockBlobs::with("a.txt", b"text");
        let (pipeline, db) = pipeline_with(blobs, llm, test_config()).await;
        let id = db.insert_note("u1", "a.txt", NoteStatus::Processing).await.unwrap();

        pipeline.run_once().await.unwrap();
        let note = db.get_note(&id).await.unwrap().unwrap();
        assert_eq!(note.status, NoteStatus::Done);
        assert_eq!(note.summary.as_deref(), Some(SUMMARY_PLACEHOLDER));
        assert_eq!(note.quiz, Some(vec![]));
        assert!(note.topic_tree.is_none());
        assert!(db.list_flashcards(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn staged_file_removed_after_processing() {
        let staging = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlm::new(vec![Err(permanent())]));
        let mut blobs = MockBlobs::with("a.txt", b"text");
        blobs.objects.insert("b.txt".into(), b"more".to_vec());
        let config = IngestConfig {
            staging_dir: Some(staging.path().to_path_buf()),
            ..test_config()
        };
        let (pipeline, db) = pipeline_with(blobs, llm, config).await;
        db.insert_note("u1", "a.txt", NoteStatus::Processing).await.unwrap();
        db.insert_note("u1", "b.txt", NoteStatus::Processing).await.unwrap();

        pipeline.run_once().await.unwrap();
        assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
    }

    /// Answers normally except for prompts mentioning `trigger`.
    struct PanicsOn {
        trigger: &'static str,
    }

    #[async_trait]
    impl InferenceProvider for PanicsOn {
        fn model_name(&self) -> &str {
            "panics-on"
        }

        async fn generate(&self, request: GenerateRequest) -> Result<String, LlmError> {
            if request.prompt.contains(self.trigger) {
                panic!("model crashed on {}", self.trigger);
            }
            Ok(FULL_RESPONSE.to_string())
        }
    }

    #[tokio::test]
    async fn panic_on_one_note_marks_it_error_and_continues() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mut blobs = MockBlobs::with("first.txt", b"first lecture");
        blobs.objects.insert("second.txt".into(), b"second lecture".to_vec());
        let pipeline = ContentPipeline::new(
            db.clone(),
            Arc::new(blobs),
            Arc::new(PanicsOn { trigger: "first lecture" }),
            Arc::new(DocumentExtractor::new()),
            test_config(),
        );
        let first = db.insert_note("u1", "first.txt", NoteStatus::Processing).await.unwrap();
        let second = db.insert_note("u1", "second.txt", NoteStatus::Processing).await.unwrap();

        let report = pipeline.run_once().await.unwrap();
        assert_eq!(report, IngestReport { done: 1, failed: 1 });
        assert_eq!(db.get_note(&first).await.unwrap().unwrap().status, NoteStatus::Error);
        assert_eq!(db.get_note(&second).await.unwrap().unwrap().status, NoteStatus::Done);
        assert!(db.notes_with_status(NoteStatus::Processing).await.unwrap().is_empty());

        // The errored note is not picked up again
        assert_eq!(pipeline.run_once().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn staging_creates_missing_dir() {
        let root = tempfile::tempdir().unwrap();
        let staging = root.path().join("nested").join("staging");
        let llm = Arc::new(MockLlm::new(vec![]));
        let config = IngestConfig {
            staging_dir: Some(staging.clone()),
            ..test_config()
        };
        let (pipeline, db) = pipeline_with(MockBlobs::with("a.txt", b"text"), llm, config).await;
        let id = db.insert_note("u1", "a.txt", NoteStatus::Processing).await.unwrap();

        assert_eq!(pipeline.run_once().await.unwrap().done, 1);
        assert_eq!(db.get_note(&id).await.unwrap().unwrap().status, NoteStatus::Done);
        assert!(staging.is_dir());
        assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
    }

    struct FailingExtractor;

    #[async_trait]
    impl TextExtractor for FailingExtractor {
        async fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
            Err(ExtractionError::Empty {
                path: path.display().to_string(),
            })
        }
    }

    #[tokio::test]
    async fn extraction_failure_marks_error() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let llm = Arc::new(MockLlm::new(vec![]));
        let pipeline = ContentPipeline::new(
            db.clone(),
            Arc::new(MockBlobs::with("scan.pdf", b"%PDF-1.4")),
            llm.clone(),
            Arc::new(FailingExtractor),
            test_config(),
        );
        let id = db.insert_note("u1", "scan.pdf", NoteStatus::Processing).await.unwrap();

        pipeline.run_once().await.unwrap();
        assert_eq!(llm.calls(), 0);
        assert_eq!(db.get_note(&id).await.unwrap().unwrap().status, NoteStatus::Error);
    }
}
