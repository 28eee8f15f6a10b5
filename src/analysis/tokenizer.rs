//! Tokenizer with stopword removal and lightweight suffix stripping.

use std::collections::HashSet;
use std::sync::LazyLock;

/// Closed English stopword list: determiners, auxiliaries, pronouns, common
/// prepositions and conjunctions. Fixed by contract; extending it changes
/// every persisted token list.
static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any",
        "are", "as", "at", "be", "because", "been", "before", "being", "below", "between",
        "both", "but", "by", "can", "cannot", "could", "did", "do", "does", "doing", "down",
        "during", "each", "few", "for", "from", "further", "had", "has", "have", "having",
        "he", "her", "here", "hers", "herself", "him", "himself", "his", "how", "i", "if",
        "in", "into", "is", "it", "its", "itself", "just", "me", "more", "most", "my",
        "myself", "no", "nor", "not", "now", "of", "off", "on", "once", "only", "or",
        "other", "our", "ours", "ourselves", "out", "over", "own", "same", "she", "should",
        "so", "some", "such", "than", "that", "the", "their", "theirs", "them", "themselves",
        "then", "there", "these", "they", "this", "those", "through", "to", "too", "under",
        "until", "up", "very", "was", "we", "were", "what", "when", "where", "which",
        "while", "who", "whom", "why", "will", "with", "would", "you", "your", "yours",
        "yourself", "yourselves",
    ]
    .into_iter()
    .collect()
});

/// Returns whether `word` is in the fixed stopword list.
#[must_use]
pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(word)
}

/// Tokenizes text into searchable terms.
///
/// Pipeline: lowercase, replace any character outside `[a-z0-9_\-\s]` with a
/// space, split on whitespace, drop stopwords and single-character tokens,
/// then apply [`stem`].
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' || c.is_whitespace()
            {
                c
            } else {
                ' '
            }
        })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|t| !is_stopword(t))
        .filter(|t| t.len() > 1)
        .map(stem)
        .collect()
}

/// Strips one common English suffix from a token.
///
/// The table is order-sensitive: the first matching rule wins, and each rule
/// is skipped when the token is too short. This is a deliberately crude
/// stemmer with no lexicon; the same rules run over stored text and over
/// queries, so both sides reduce to the same forms.
#[must_use]
pub fn stem(token: &str) -> String {
    let len = token.len();

    if token.ends_with("ies") && len > 4 {
        return format!("{}y", &token[..len - 3]);
    }
    if token.ends_with("ing") && len > 5 {
        return token[..len - 3].to_string();
    }
    if token.ends_with("tion") && len > 5 {
        return token[..len - 4].to_string();
    }
    for suffix in ["ment", "ness", "less", "able", "ible"] {
        if token.ends_with(suffix) && len > 5 {
            return token[..len - 4].to_string();
        }
    }
    if token.ends_with("ful") && len > 4 {
        return token[..len - 3].to_string();
    }
    if token.ends_with("ed") && len > 4 {
        return token[..len - 2].to_string();
    }
    for suffix in ["ly", "er"] {
        if token.ends_with(suffix) && len > 4 {
            return token[..len - 2].to_string();
        }
    }
    if token.ends_with("est") && len > 4 {
        return token[..len - 3].to_string();
    }
    if token.ends_with('s') && !token.ends_with("ss") && len > 3 {
        return token[..len - 1].to_string();
    }

    token.to_string()
}
