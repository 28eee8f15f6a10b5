//! Chunking of long text into episode-sized pieces.

use regex::Regex;
use std::sync::LazyLock;

/// Blank-line runs separate paragraphs.
static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("paragraph regex"));

/// A sentence is the longest maximal run of non-terminator characters
/// followed by any run of terminators.
static SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^.!?\n]+[.!?\n]*").expect("sentence regex"));

/// How text passed to `remember` is split into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkMode {
    /// Split on blank-line runs.
    Paragraph,
    /// Greedily accumulate sentences up to the token budget (default).
    #[default]
    Sentence,
    /// Fixed-size sliding window over whitespace tokens.
    Fixed,
}

impl ChunkMode {
    /// Returns the mode as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Paragraph => "paragraph",
            Self::Sentence => "sentence",
            Self::Fixed => "fixed",
        }
    }

    /// Parses a chunk mode from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "paragraph" => Some(Self::Paragraph),
            "sentence" => Some(Self::Sentence),
            "fixed" => Some(Self::Fixed),
            _ => None,
        }
    }
}

/// Splits `text` into chunks according to `mode`.
///
/// `max_tokens` bounds the whitespace-token count of each chunk for the
/// `Sentence` and `Fixed` modes; `overlap` only applies to `Fixed` and is the
/// number of tokens shared between consecutive windows.
#[must_use]
pub fn chunk_text(text: &str, mode: ChunkMode, max_tokens: usize, overlap: usize) -> Vec<String> {
    let max_tokens = max_tokens.max(1);
    match mode {
        ChunkMode::Paragraph => chunk_paragraphs(text),
        ChunkMode::Sentence => chunk_sentences(text, max_tokens),
        ChunkMode::Fixed => chunk_fixed(text, max_tokens, overlap),
    }
}

fn chunk_paragraphs(text: &str) -> Vec<String> {
    let chunks: Vec<String> = PARAGRAPH_BREAK
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect();

    if chunks.is_empty() {
        vec![text.to_string()]
    } else {
        chunks
    }
}

fn chunk_sentences(text: &str, max_tokens: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0usize;

    for m in SENTENCE.find_iter(text) {
        let sentence = m.as_str();
        let sentence_tokens = sentence.split_whitespace().count();
        if sentence_tokens == 0 {
            continue;
        }

        if current_tokens > 0 && current_tokens + sentence_tokens > max_tokens {
            chunks.push(current.trim().to_string());
            current.clear();
            current_tokens = 0;
        }

        current.push_str(sentence);
        current_tokens += sentence_tokens;
    }

    let tail = current.trim();
    if !tail.is_empty() {
        chunks.push(tail.to_string());
    }

    if chunks.is_empty() {
        vec![text.to_string()]
    } else {
        chunks
    }
}

fn chunk_fixed(text: &str, max_tokens: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_tokens {
        return vec![text.to_string()];
    }

    // The window must advance by at least one token
    let step = max_tokens.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < words.len() {
        let end = (start + max_tokens).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paragraph_chunking() {
        let text = "First paragraph.\n\nSecond paragraph.\n\n\nThird.";
        let chunks = chunk_text(text, ChunkMode::Paragraph, 100, 0);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], "First paragraph.");
        assert_eq!(chunks[2], "Third.");
    }

    #[test]
    fn test_paragraph_chunking_no_breaks() {
        let text = "Just one line, no breaks.";
        let chunks = chunk_text(text, ChunkMode::Paragraph, 100, 0);
        assert_eq!(chunks, vec![text.to_string()]);
    }

    #[test]
    fn test_sentence_chunking_respects_budget() {
        let text = "One two three. Four five six. Seven eight nine.";
        // Budget of 6 words: first two sentences fit, the third starts a new chunk
        let chunks = chunk_text(text, ChunkMode::Sentence, 6, 0);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].contains("One two three."));
        assert!(chunks[0].contains("Four five six."));
        assert!(chunks[1].contains("Seven eight nine."));
    }

    #[test]
    fn test_sentence_chunking_single_oversized_sentence() {
        // A single sentence longer than the budget still becomes one chunk
        let text = "one two three four five six seven.";
        let chunks = chunk_text(text, ChunkMode::Sentence, 3, 0);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_fixed_chunking_window_and_overlap() {
        let words: Vec<String> = (0..10).map(|i| format!("w{i}")).collect();
        let text = words.join(" ");

        let chunks = chunk_text(&text, ChunkMode::Fixed, 4, 2);
        // Windows: [0..4), [2..6), [4..8), [6..10)
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0], "w0 w1 w2 w3");
        assert_eq!(chunks[1], "w2 w3 w4 w5");
        assert_eq!(chunks[3], "w6 w7 w8 w9");
    }

    #[test]
    fn test_fixed_chunking_short_text_passthrough() {
        let text = "short text here";
        let chunks = chunk_text(text, ChunkMode::Fixed, 10, 2);
        assert_eq!(chunks, vec![text.to_string()]);
    }

    #[test]
    fn test_fixed_chunking_degenerate_overlap() {
        // overlap >= max_tokens still advances the window
        let text = "a1 b2 c3 d4 e5 f6";
        let chunks = chunk_text(text, ChunkMode::Fixed, 2, 5);
        assert!(chunks.len() >= 3);
        assert_eq!(chunks[0], "a1 b2");
    }

    #[test]
    fn test_mode_parse_roundtrip() {
        for mode in [ChunkMode::Paragraph, ChunkMode::Sentence, ChunkMode::Fixed] {
            assert_eq!(ChunkMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(ChunkMode::parse("unknown"), None);
    }
}
