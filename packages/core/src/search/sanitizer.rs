//! Query sanitization
//!
//! Turns arbitrary user input into an FTS5 boolean query that the index
//! engine will always accept.
//!
//! # Modes
//!
//! - **Quoted**: input wrapped in a pair of double quotes is searched as one
//!   phrase. Internal quotes are escaped by doubling; nothing else changes.
//! - **Smart**: everything else. `and`/`or`/`not` become operators, characters
//!   with meaning to FTS5 are neutralized, stopwords are dropped, runs of
//!   operators collapse to the last one and dangling operators are removed.
//!   Quoted phrases inside the input are kept as phrases; an unterminated
//!   phrase is closed at the end of the input.
//!
//! An empty result means "no results"; it must not be sent to the engine.
//!
//! # Examples
//!
//! ```
//! use folio_core::search::prepare_query;
//!
//! assert_eq!(prepare_query("roman or greek"), "roman OR greek");
//! assert_eq!(prepare_query("AND"), "");
//! assert_eq!(prepare_query("\"hello"), "\"hello\"");
//! ```

use crate::search::stopwords::is_stopword;

const OPERATORS: [&str; 3] = ["AND", "OR", "NOT"];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Term(String),
    Phrase(String),
    Operator(&'static str),
}

/// Sanitize a raw user query into FTS5 syntax
pub fn prepare_query(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return String::new();
    }

    if collapsed.len() >= 2 && collapsed.starts_with('"') && collapsed.ends_with('"') {
        let inner = &collapsed[1..collapsed.len() - 1];
        if inner.trim().is_empty() {
            return String::new();
        }
        return quote_phrase(inner);
    }

    let tokens = collapse_operators(tokenize(&collapsed));
    tokens
        .iter()
        .map(|token| match token {
            Token::Term(term) => term.clone(),
            Token::Phrase(phrase) => quote_phrase(phrase),
            Token::Operator(op) => (*op).to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// One search term as the engine sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTerm {
    pub text: String,
    /// `emp*` style term matching any word that starts with `text`
    pub prefix: bool,
}

impl QueryTerm {
    pub fn exact(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            prefix: false,
        }
    }

    pub fn prefix(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            prefix: true,
        }
    }
}

/// Normalized search terms of a query, without operators, quotes or stopwords
///
/// Used by the highlighter so it marks the same words the engine matched on.
pub fn query_terms(raw: &str) -> Vec<QueryTerm> {
    let mut terms = Vec::new();
    for word in prepare_query(raw).split_whitespace() {
        if OPERATORS.contains(&word) {
            continue;
        }
        let text: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
        if text.is_empty() || is_stopword(&text) {
            continue;
        }
        let term = QueryTerm {
            text,
            prefix: word.ends_with('*'),
        };
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

fn quote_phrase(phrase: &str) -> String {
    format!("\"{}\"", phrase.replace('"', "\"\""))
}

fn operator_for(word: &str) -> Option<&'static str> {
    OPERATORS
        .iter()
        .copied()
        .find(|op| word.eq_ignore_ascii_case(op))
}

/// Split into terms, phrases and operators
fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                push_word(&mut tokens, &mut word);
                let phrase: String = chars.by_ref().take_while(|&c| c != '"').collect();
                if !phrase.trim().is_empty() {
                    tokens.push(Token::Phrase(phrase.trim().to_string()));
                }
            }
            c if c.is_whitespace() => push_word(&mut tokens, &mut word),
            c => word.push(c),
        }
    }
    push_word(&mut tokens, &mut word);
    tokens
}

/// Neutralize one whitespace-delimited word into zero or more tokens
fn push_word(tokens: &mut Vec<Token>, word: &mut String) {
    if word.is_empty() {
        return;
    }

    let prefix = word.len() > 1 && word.ends_with('*');
    let body = if prefix { &word[..word.len() - 1] } else { &word[..] };
    let neutralized: String = body
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
        .collect();

    let parts: Vec<&str> = neutralized.split_whitespace().collect();
    let last = parts.len().saturating_sub(1);
    for (i, part) in parts.iter().enumerate() {
        if let Some(op) = operator_for(part) {
            tokens.push(Token::Operator(op));
        } else if !is_stopword(part) {
            let star = if prefix && i == last { "*" } else { "" };
            tokens.push(Token::Term(format!("{}{}", part, star)));
        }
    }
    word.clear();
}

/// Keep the last of adjacent operators and drop leading/trailing ones
fn collapse_operators(tokens: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    for token in tokens {
        match (&token, out.last()) {
            (Token::Operator(_), None) => {}
            (Token::Operator(_), Some(Token::Operator(_))) => {
                out.pop();
                out.push(token);
            }
            _ => out.push(token),
        }
    }
    while matches!(out.last(), Some(Token::Operator(_))) {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_operator_only_queries() {
        assert_eq!(prepare_query(""), "");
        assert_eq!(prepare_query("   "), "");
        assert_eq!(prepare_query("AND"), "");
        assert_eq!(prepare_query("OR OR"), "");
        assert_eq!(prepare_query("not"), "");
        assert_eq!(prepare_query("\"\""), "");
        assert_eq!(prepare_query("\""), "");
    }

    #[test]
    fn test_unbalanced_quote_is_closed() {
        assert_eq!(prepare_query("\"hello"), "\"hello\"");
        assert_eq!(prepare_query("aqueduct \"roman empire"), "aqueduct \"roman empire\"");
    }

    #[test]
    fn test_quoted_mode_keeps_phrase_verbatim() {
        assert_eq!(
            prepare_query("  \"the   fall of (rome)\"  "),
            "\"the fall of (rome)\""
        );
        assert_eq!(
            prepare_query("\"say \"cheese\" now\""),
            "\"say \"\"cheese\"\" now\""
        );
    }

    #[test]
    fn test_operators_are_uppercased() {
        assert_eq!(prepare_query("roman or greek"), "roman OR greek");
        assert_eq!(prepare_query("senate And empire"), "senate AND empire");
        assert_eq!(prepare_query("empire not republic"), "empire NOT republic");
    }

    #[test]
    fn test_dangling_and_repeated_operators() {
        assert_eq!(prepare_query("OR empire"), "empire");
        assert_eq!(prepare_query("empire AND"), "empire");
        assert_eq!(prepare_query("empire AND OR senate"), "empire OR senate");
        assert_eq!(prepare_query("AND OR NOT empire NOT"), "empire");
    }

    #[test]
    fn test_special_characters_are_neutralized() {
        assert_eq!(prepare_query("empire^senate | (rome)"), "empire senate rome");
        assert_eq!(prepare_query("aqueduct:\\road/to [villa]"), "aqueduct road villa");
        assert_eq!(
            prepare_query("empire:senate {forum} -rome +villa"),
            "empire senate forum rome villa"
        );
        assert_eq!(prepare_query("(or)"), "");
    }

    #[test]
    fn test_prefix_star_is_kept_only_at_end() {
        assert_eq!(prepare_query("emp*"), "emp*");
        assert_eq!(prepare_query("aque*duct"), "aque duct");
        assert_eq!(prepare_query("*"), "");
    }

    #[test]
    fn test_stopwords_removed_outside_phrases() {
        assert_eq!(prepare_query("the roman empire"), "roman empire");
        assert_eq!(
            prepare_query("decline \"of the empire\""),
            "decline \"of the empire\""
        );
        assert_eq!(prepare_query("the of"), "");
    }

    #[test]
    fn test_query_terms() {
        assert_eq!(
            query_terms("The Roman OR \"empire's\" senate"),
            vec![
                QueryTerm::exact("Roman"),
                QueryTerm::exact("empires"),
                QueryTerm::exact("senate"),
            ]
        );
        assert!(query_terms("AND OR").is_empty());
    }

    #[test]
    fn test_query_terms_keep_prefix_flag() {
        assert_eq!(
            query_terms("emp* forum"),
            vec![QueryTerm::prefix("emp"), QueryTerm::exact("forum")]
        );
        assert_eq!(
            query_terms("villa* villa"),
            vec![QueryTerm::prefix("villa"), QueryTerm::exact("villa")]
        );
    }
}
