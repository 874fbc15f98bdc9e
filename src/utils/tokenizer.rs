use memchr::memchr2;
use regex::Regex;
use std::sync::OnceLock;

/// Maximum token length to store in the lexicon.
/// Longer tokens are likely base64, hex dumps, or other non-searchable content;
/// they still count as document tokens but never get a term id.
pub const MAX_TOKEN_LENGTH: usize = 128;

/// English stop words removed after normalization
const STOP_WORDS: &[&str] = &[
    "a", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

fn word_regex() -> &'static Regex {
    static WORDS: OnceLock<Regex> = OnceLock::new();
    WORDS.get_or_init(|| Regex::new(r"\w+").expect("static regex"))
}

fn glob_regex() -> &'static Regex {
    static GLOBS: OnceLock<Regex> = OnceLock::new();
    GLOBS.get_or_init(|| Regex::new(r"\w+[\w*?]*").expect("static regex"))
}

/// Check whether a normalized word is a stop word
pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.binary_search(&word).is_ok()
}

/// Whether a normalized word may be stored in the lexicon
pub fn is_indexable(word: &str) -> bool {
    word.len() <= MAX_TOKEN_LENGTH
}

/// Split text into normalized terms: word split, lower-case, stop words removed.
/// Order and duplicates are preserved since term frequency matters for scoring.
/// Over-long tokens are kept; see [`is_indexable`].
pub fn split_words(text: &str) -> Vec<String> {
    word_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| !is_stop_word(w))
        .collect()
}

/// Split a glob query into lower-cased patterns, keeping `*` and `?`
pub fn split_globs(pattern: &str) -> Vec<String> {
    glob_regex()
        .find_iter(pattern)
        .map(|m| m.as_str().to_lowercase())
        .filter(|g| is_indexable(g) && !is_stop_word(g))
        .collect()
}

/// Literal prefix of a glob, up to the first wildcard
pub fn glob_prefix(pattern: &str) -> &str {
    match memchr2(b'*', b'?', pattern.as_bytes()) {
        Some(pos) => &pattern[..pos],
        None => pattern,
    }
}

/// Whether a pattern contains any wildcard at all
pub fn has_wildcard(pattern: &str) -> bool {
    memchr2(b'*', b'?', pattern.as_bytes()).is_some()
}
