//! English stopword list shared by indexing, query sanitization and highlighting
//!
//! Uses the `stop-words` crate list, lowercased once and cached.

use std::collections::HashSet;
use std::sync::OnceLock;
use stop_words::{get, LANGUAGE};

fn stopwords() -> &'static HashSet<String> {
    static STOPWORDS: OnceLock<HashSet<String>> = OnceLock::new();
    STOPWORDS.get_or_init(|| {
        get(LANGUAGE::English)
            .iter()
            .map(|s| s.to_lowercase())
            .collect()
    })
}

/// Whether `word` is an English stopword (case-insensitive)
pub fn is_stopword(word: &str) -> bool {
    stopwords().contains(&word.to_lowercase())
}
