//! Prompt construction for lecture analysis and grounded chat.

use crate::pipeline::sections::Section;

/// Reply stored when the model stays rate limited through every retry.
pub const CHAT_UNAVAILABLE_RESPONSE: &str =
    "The tutor is temporarily unavailable due to high demand. Please ask again in a few minutes.";

/// Phrase the model is told to use when the lecture does not cover a question.
pub const NOT_IN_CONTEXT_PHRASE: &str = "This wasn't covered in the lecture.";

/// Output contract shared by both lecture prompts.
fn output_format() -> String {
    let example = |section: Section, body: &str| {
        format!(
            "{}\n{}\n{}\n",
            section.start_marker(),
            body,
            section.end_marker()
        )
    };

    let mut out = String::from("Output format (STRICTLY FOLLOW THIS, keep every marker):\n");
    out.push_str(&example(Section::Transcript, "[The full text or transcript here]"));
    out.push_str(&example(Section::Summary, "[Bullet points here]"));
    out.push_str(&example(
        Section::Quiz,
        r#"[{"question": "...", "options": ["A", "B", "C", "D"], "answer": "A"}]"#,
    ));
    out.push_str(&example(
        Section::Flashcards,
        r#"[{"front": "Term", "back": "Definition"}]"#,
    ));
    out.push_str(&example(
        Section::Tasks,
        r#"[{"title": "Homework or exam mentioned", "due_date": "YYYY-MM-DD or null"}]"#,
    ));
    out.push_str(&example(
        Section::MindMap,
        r#"{"id": "root", "label": "Main Topic", "children": [{"id": "t1", "label": "Subtopic", "children": []}]}"#,
    ));
    out
}

/// Numbered task list, shared by both variants after the transcript step.
const ARTIFACT_STEPS: &str = "\
2. Create a concise Summary with bullet points of the key concepts.
3. Generate a Quiz with 5 multiple-choice questions as a JSON array. Each answer must be one of its options.
4. Create 5 Flashcards (term on the front, definition on the back) as a JSON array.
5. List every homework, assignment or exam mentioned as Tasks (JSON array); use null when no date is given.
6. Build a Mind Map: a hierarchical JSON tree whose root is the main subject.
";

/// Prompt for audio lectures; the recording is attached separately.
pub fn build_audio_prompt() -> String {
    let mut prompt = String::with_capacity(2048);
    prompt.push_str("You are an expert tutor listening to this lecture recording.\n");
    prompt.push_str(
        "1. Write a clear, word-for-word Transcript. When more than one voice is present, \
         label each turn with its speaker (e.g. \"Speaker 1:\", \"Speaker 2:\").\n",
    );
    prompt.push_str(ARTIFACT_STEPS);
    prompt.push('\n');
    prompt.push_str(&output_format());
    prompt
}

/// Prompt for documents, with the extracted text embedded.
pub fn build_document_prompt(document_text: &str) -> String {
    let mut prompt = String::with_capacity(document_text.len() + 2048);
    prompt.push_str("You are an expert tutor analyzing this document.\n");
    prompt.push_str(
        "1. Reproduce the document text, cleanly formatted, as the Transcript.\n",
    );
    prompt.push_str(ARTIFACT_STEPS);
    prompt.push('\n');
    prompt.push_str(&output_format());
    prompt.push_str("\nDOCUMENT:\n");
    prompt.push_str(document_text);
    prompt
}

/// Longest prefix of `text` with at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// System instruction restricting chat answers to one lecture transcript.
pub fn build_chat_system(transcript: &str, context_chars: usize) -> String {
    let context = truncate_chars(transcript, context_chars);
    format!(
        "You are a study assistant answering a student's question about one lecture.\n\
         Answer ONLY from the lecture context below. If the answer is not contained in it, \
         say exactly: \"{NOT_IN_CONTEXT_PHRASE}\" Keep the answer short and helpful.\n\n\
         Context:\n{context}\n"
    )
}

/// User turn carrying the student's question.
pub fn build_chat_question(question: &str) -> String {
    format!("Question: {question}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_prompt_requests_all_sections_and_speakers() {
        let prompt = build_audio_prompt();
        for section in Section::ALL {
            assert!(prompt.contains(&section.start_marker()), "{:?}", section);
            assert!(prompt.contains(&section.end_marker()), "{:?}", section);
        }
        assert!(prompt.contains("speaker"));
    }

    #[test]
    fn document_prompt_embeds_text() {
        let prompt = build_document_prompt("Photosynthesis converts light.");
        assert!(prompt.contains("Photosynthesis converts light."));
        assert!(prompt.contains("MIND_MAP_START"));
        assert!(!prompt.contains("Speaker 1"));
    }

    #[test]
    fn chat_system_caps_context() {
        let transcript = "a".repeat(30_000);
        let system = build_chat_system(&transcript, 20_000);
        assert!(system.contains(NOT_IN_CONTEXT_PHRASE));
        assert!(system.contains(&"a".repeat(20_000)));
        assert!(!system.contains(&"a".repeat(20_001)));
        assert_eq!(build_chat_question("What is a?"), "Question: What is a?");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
        assert_eq!(truncate_chars("", 3), "");
    }
}
