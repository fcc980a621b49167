//! Structured-block parser for multi-section model output.
//!
//! The lecture prompt asks the model to wrap each artifact in
//! `<TAG>_START` / `<TAG>_END` markers. Extraction is lenient: a missing
//! section is `None`, malformed JSON degrades to an empty collection.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::pipeline::types::{FlashcardDraft, QuizQuestion, TaskDraft, TopicNode};

/// Stored when the model omits the transcript.
pub const TRANSCRIPT_PLACEHOLDER: &str = "Transcript unavailable.";

/// Stored when the model omits the summary.
pub const SUMMARY_PLACEHOLDER: &str = "Summary unavailable.";

/// First `{...}` or `[...]` span, greedy across newlines.
static JSON_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(\{.*\}|\[.*\])").unwrap());

/// The six sections of the lecture response. Tag names are part of the
/// prompt contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Transcript,
    Summary,
    Quiz,
    Flashcards,
    Tasks,
    MindMap,
}

impl Section {
    pub const ALL: [Section; 6] = [
        Section::Transcript,
        Section::Summary,
        Section::Quiz,
        Section::Flashcards,
        Section::Tasks,
        Section::MindMap,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            Section::Transcript => "TRANSCRIPT",
            Section::Summary => "SUMMARY",
            Section::Quiz => "QUIZ",
            Section::Flashcards => "FLASHCARDS",
            Section::Tasks => "TASKS",
            Section::MindMap => "MIND_MAP",
        }
    }

    pub fn start_marker(&self) -> String {
        format!("{}_START", self.tag())
    }

    pub fn end_marker(&self) -> String {
        format!("{}_END", self.tag())
    }
}

/// Text strictly between `start` and the nearest following `end`, trimmed.
///
/// Returns `None` if either marker is missing or `end` only occurs before
/// `start`.
pub fn extract_between<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let begin = text.find(start)? + start.len();
    let rest = &text[begin..];
    let stop = rest.find(end)?;
    Some(rest[..stop].trim())
}

/// Extract one section's body.
pub fn extract_block(text: &str, section: Section) -> Option<&str> {
    extract_between(text, &section.start_marker(), &section.end_marker())
}

/// Remove markdown code fences the model likes to add around JSON.
fn strip_code_fences(fragment: &str) -> &str {
    let mut s = fragment.trim();
    if let Some(rest) = s.strip_prefix("```") {
        // Drop the info string (`json`, `JSON`, ...) up to the first newline.
        s = match rest.find('\n') {
            Some(nl) if rest[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
                &rest[nl + 1..]
            }
            _ => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
        };
    }
    if let Some(rest) = s.trim_end().strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

/// First balanced `{...}` or `[...]` span, string-literal aware.
fn balanced_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Best-effort JSON recovery. Never fails; total failure yields `[]`.
///
/// 1. strip code fences and parse directly
/// 2. parse the first balanced `{...}` / `[...]` span
/// 3. parse the greedy first-open-to-last-close span
pub fn recover_json(fragment: &str) -> Value {
    let cleaned = strip_code_fences(fragment);
    if cleaned.is_empty() {
        return Value::Array(Vec::new());
    }

    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return value;
    }

    let candidates = balanced_span(cleaned)
        .into_iter()
        .chain(JSON_SPAN.find(cleaned).map(|m| m.as_str()));
    for candidate in candidates {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            return value;
        }
    }

    debug!(len = fragment.len(), "No JSON recoverable from section");
    Value::Array(Vec::new())
}

/// Recover a JSON array of `T`, keeping entries that deserialize.
///
/// A lone object is treated as a one-element list.
pub fn parse_list<T: DeserializeOwned>(fragment: Option<&str>) -> Vec<T> {
    let Some(fragment) = fragment else {
        return Vec::new();
    };
    let items = match recover_json(fragment) {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => Vec::new(),
    };
    let total = items.len();
    let parsed: Vec<T> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();
    if parsed.len() < total {
        debug!(
            kept = parsed.len(),
            dropped = total - parsed.len(),
            "Dropped malformed entries"
        );
    }
    parsed
}

/// Recover the topic tree. Accepts a bare root object or a one-element list.
pub fn parse_topic_tree(fragment: Option<&str>) -> Option<TopicNode> {
    let value = match recover_json(fragment?) {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    };
    serde_json::from_value(value).ok()
}

/// All artifacts parsed from one lecture response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLecture {
    pub transcript: String,
    pub summary: String,
    pub quiz: Vec<QuizQuestion>,
    pub flashcards: Vec<FlashcardDraft>,
    pub tasks: Vec<TaskDraft>,
    pub topic_tree: Option<TopicNode>,
}

/// Parse every section of a lecture response. Never fails.
pub fn parse_lecture(text: &str) -> ParsedLecture {
    let non_empty = |s: Option<&str>| s.filter(|s| !s.is_empty()).map(str::to_string);

    let quiz: Vec<QuizQuestion> = parse_list(extract_block(text, Section::Quiz))
        .into_iter()
        .filter(QuizQuestion::is_usable)
        .collect();

    let flashcards: Vec<FlashcardDraft> = parse_list(extract_block(text, Section::Flashcards))
        .into_iter()
        .filter(|c: &FlashcardDraft| !c.front.trim().is_empty())
        .collect();

    let tasks: Vec<TaskDraft> = parse_list(extract_block(text, Section::Tasks))
        .into_iter()
        .filter(|t: &TaskDraft| !t.title.trim().is_empty())
        .collect();

    ParsedLecture {
        transcript: non_empty(extract_block(text, Section::Transcript))
            .unwrap_or_else(|| TRANSCRIPT_PLACEHOLDER.to_string()),
        summary: non_empty(extract_block(text, Section::Summary))
            .unwrap_or_else(|| SUMMARY_PLACEHOLDER.to_string()),
        quiz,
        flashcards,
        tasks,
        topic_tree: parse_topic_tree(extract_block(text, Section::MindMap)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── Block extraction ────────────────────────────────────────────

    #[test]
    fn extract_simple_block() {
        assert_eq!(
            extract_between("SUMMARY_STARTfooSUMMARY_END", "SUMMARY_START", "SUMMARY_END"),
            Some("foo")
        );
    }

    #[test]
    fn extract_missing_markers() {
        assert_eq!(extract_between("no markers", "X_START", "X_END"), None);
        assert_eq!(extract_between("X_START only", "X_START", "X_END"), None);
        assert_eq!(extract_between("only X_END", "X_START", "X_END"), None);
    }

    #[test]
    fn extract_out_of_order() {
        assert_eq!(
            extract_between("X_END stuff X_START", "X_START", "X_END"),
            None
        );
    }

    #[test]
    fn extract_trims_and_uses_nearest_end() {
        let text = "QUIZ_START\n  [1]  \nQUIZ_END trailing QUIZ_END";
        assert_eq!(extract_block(text, Section::Quiz), Some("[1]"));
    }

    #[test]
    fn sections_are_independent() {
        let text = "SUMMARY_START s SUMMARY_END TASKS_START [] TASKS_END";
        assert_eq!(extract_block(text, Section::Transcript), None);
        assert_eq!(extract_block(text, Section::Summary), Some("s"));
        assert_eq!(extract_block(text, Section::Tasks), Some("[]"));
    }

    #[test]
    fn wire_tags() {
        let tags: Vec<_> = Section::ALL.iter().map(|s| s.start_marker()).collect();
        assert_eq!(
            tags,
            vec![
                "TRANSCRIPT_START",
                "SUMMARY_START",
                "QUIZ_START",
                "FLASHCARDS_START",
                "TASKS_START",
                "MIND_MAP_START"
            ]
        );
        assert_eq!(Section::MindMap.end_marker(), "MIND_MAP_END");
    }

    // ── JSON recovery ───────────────────────────────────────────────

    #[test]
    fn recover_fenced_json() {
        assert_eq!(recover_json("```json\n[{\"a\":1}]\n```"), json!([{"a": 1}]));
    }

    #[test]
    fn recover_garbage_is_empty() {
        assert_eq!(recover_json("garbage"), json!([]));
        assert_eq!(recover_json(""), json!([]));
        assert_eq!(recover_json("[{broken"), json!([]));
    }

    #[test]
    fn recover_embedded_in_prose() {
        let text = "Here you go: [{\"front\": \"a\", \"back\": \"b\"}] hope it helps";
        assert_eq!(recover_json(text), json!([{"front": "a", "back": "b"}]));
    }

    #[test]
    fn recover_first_balanced_span() {
        let text = "{\"id\": \"root\", \"label\": \"x\"} and also {\"other\": 1}";
        assert_eq!(recover_json(text), json!({"id": "root", "label": "x"}));
    }

    #[test]
    fn recover_brackets_inside_strings() {
        let text = "note: [{\"question\": \"what is [x]?\", \"answer\": \"}\"}] end";
        assert_eq!(
            recover_json(text),
            json!([{"question": "what is [x]?", "answer": "}"}])
        );
    }

    #[test]
    fn recover_uppercase_fence_and_object() {
        let text = "```JSON\n{\"id\":\"root\",\"label\":\"Physics\",\"children\":[]}\n```";
        assert_eq!(recover_json(text)["label"], "Physics");
    }

    // ── Typed helpers ───────────────────────────────────────────────

    #[test]
    fn parse_list_drops_malformed_entries() {
        let cards: Vec<FlashcardDraft> = parse_list(Some(
            r#"[{"front":"a","back":"b"},{"front":"only front"},{"front":"c","back":"d"}]"#,
        ));
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[1].front, "c");
    }

    #[test]
    fn parse_list_absent_or_wrong_shape() {
        assert!(parse_list::<FlashcardDraft>(None).is_empty());
        assert!(parse_list::<FlashcardDraft>(Some("42")).is_empty());
        let single: Vec<FlashcardDraft> = parse_list(Some(r#"{"front":"a","back":"b"}"#));
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn parse_topic_tree_shapes() {
        let tree = parse_topic_tree(Some(
            r#"{"id":"root","label":"Main","children":[{"id":"c1","label":"Sub","children":[]}]}"#,
        ))
        .unwrap();
        assert_eq!(tree.label, "Main");
        assert_eq!(tree.children.len(), 1);

        let listed = parse_topic_tree(Some(r#"[{"id":"root","label":"Main"}]"#)).unwrap();
        assert_eq!(listed.id, "root");

        assert!(parse_topic_tree(Some("not json")).is_none());
        assert!(parse_topic_tree(None).is_none());
    }

    // ── Full lecture ────────────────────────────────────────────────

    #[test]
    fn parse_lecture_all_sections() {
        let text = r#"
TRANSCRIPT_START
Speaker 1: Welcome to biology.
TRANSCRIPT_END
SUMMARY_START
- Cells are the unit of life
SUMMARY_END
QUIZ_START
```json
[{"question": "Unit of life?", "options": ["Cell", "Atom"], "answer": "Cell"},
 {"question": "Bad", "options": ["Only"], "answer": "Only"}]
```
QUIZ_END
FLASHCARDS_START
[{"front": "Cell", "back": "Basic unit of life"}]
FLASHCARDS_END
TASKS_START
[{"title": "Read chapter 2", "due_date": "2026-02-10"}, {"title": "Lab report", "due_date": null}]
TASKS_END
MIND_MAP_START
{"id": "root", "label": "Biology", "children": [{"id": "cells", "label": "Cells", "children": []}]}
MIND_MAP_END
"#;
        let parsed = parse_lecture(text);
        assert_eq!(parsed.transcript, "Speaker 1: Welcome to biology.");
        assert_eq!(parsed.summary, "- Cells are the unit of life");
        assert_eq!(parsed.quiz.len(), 1);
        assert_eq!(parsed.flashcards.len(), 1);
        assert_eq!(parsed.tasks.len(), 2);
        assert_eq!(parsed.tasks[1].due_date, None);
        assert_eq!(parsed.topic_tree.unwrap().children[0].label, "Cells");
    }

    #[test]
    fn parse_lecture_degrades_to_placeholders() {
        let parsed = parse_lecture("The model ignored the format entirely.");
        assert_eq!(parsed.transcript, TRANSCRIPT_PLACEHOLDER);
        assert_eq!(parsed.summary, SUMMARY_PLACEHOLDER);
        assert!(parsed.quiz.is_empty());
        assert!(parsed.flashcards.is_empty());
        assert!(parsed.tasks.is_empty());
        assert!(parsed.topic_tree.is_none());
    }

    #[test]
    fn parse_lecture_empty_summary_uses_placeholder() {
        let parsed = parse_lecture("SUMMARY_START   SUMMARY_END");
        assert_eq!(parsed.summary, SUMMARY_PLACEHOLDER);
    }
}
