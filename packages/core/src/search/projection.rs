//! Page-to-index projection
//!
//! Indexed text is stripped of HTML, lowercased, and cleared of stopwords and
//! pure-numeric tokens. Stemming happens in the FTS5 `porter` tokenizer.

use crate::models::{PageNode, SearchIndexEntry};
use crate::search::stopwords::is_stopword;
use regex::Regex;
use std::sync::OnceLock;

// Regex pattern for HTML comments and tags
const TAG_PATTERN: &str = r"(?s)<!--.*?-->|<[^>]*>";

fn tag_pattern() -> &'static Regex {
    static TAG_REGEX: OnceLock<Regex> = OnceLock::new();
    TAG_REGEX.get_or_init(|| Regex::new(TAG_PATTERN).unwrap())
}

/// Replace tags with spaces and decode the common character entities
pub fn strip_html(html: &str) -> String {
    let text = tag_pattern().replace_all(html, " ");
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Lowercased words of `text` without stopwords or numbers
pub fn index_text(text: &str) -> String {
    strip_html(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .filter(|word| !word.chars().all(|c| c.is_numeric()))
        .filter(|word| !is_stopword(word))
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build the index entry for a page
pub fn project_page(page: &PageNode) -> SearchIndexEntry {
    SearchIndexEntry {
        page_id: page.id.clone(),
        title: index_text(&page.title),
        content: index_text(&page.content),
        display_title: page.title.clone(),
        slug: page.slug.clone(),
    }
}
