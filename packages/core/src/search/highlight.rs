//! Title highlighting
//!
//! The index stores a processed title (no stopwords, lowercased), so the
//! engine's own snippet function cannot mark the display title. Terms are
//! instead re-derived from the query and matched against the display title
//! on word boundaries, case-insensitively.

use crate::search::sanitizer::query_terms;
use regex::{Regex, RegexBuilder};

/// Wrap query terms found in `title` with `open`/`close` markers
///
/// The title is HTML-escaped; the markers are inserted as given. A title
/// with no usable query terms is returned escaped but otherwise unchanged,
/// so every result title is safe to render as HTML.
///
/// # Examples
///
/// ```
/// use folio_core::search::highlight_phrase;
///
/// assert_eq!(
///     highlight_phrase("empire", "Roman Empire", "<mark>", "</mark>"),
///     "Roman <mark>Empire</mark>"
/// );
/// ```
pub fn highlight_phrase(query: &str, title: &str, open: &str, close: &str) -> String {
    let Some(pattern) = term_pattern(query) else {
        return escape_html(title);
    };

    let mut out = String::with_capacity(title.len() + 16);
    let mut last = 0;
    for m in pattern.find_iter(title) {
        out.push_str(&escape_html(&title[last..m.start()]));
        out.push_str(open);
        out.push_str(&escape_html(m.as_str()));
        out.push_str(close);
        last = m.end();
    }
    out.push_str(&escape_html(&title[last..]));
    out
}

/// Case-insensitive, word-bounded alternation of the query's terms
///
/// A prefix term matches the rest of the word it starts.
fn term_pattern(query: &str) -> Option<Regex> {
    let mut terms = query_terms(query);
    if terms.is_empty() {
        return None;
    }
    // Longest first so overlapping alternatives prefer the fuller word
    terms.sort_by(|a, b| b.text.chars().count().cmp(&a.text.chars().count()));

    let alternation = terms
        .iter()
        .map(|t| {
            let text = regex::escape(&t.text);
            if t.prefix {
                format!(r"{}\w*", text)
            } else {
                text
            }
        })
        .collect::<Vec<_>>()
        .join("|");

    match RegexBuilder::new(&format!(r"\b(?:{})\b", alternation))
        .case_insensitive(true)
        .build()
    {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!("Failed to build highlight pattern for '{}': {}", query, e);
            None
        }
    }
}

/// Escape text for inclusion in HTML
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
