//! Lightweight lexical ranking for embedding-less retrieval

use regex::Regex;
use std::sync::OnceLock;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Alnum words and contiguous CJK spans.
    PATTERN.get_or_init(|| Regex::new(r"[A-Za-z0-9_]+|[一-鿿]+").expect("valid pattern"))
}

fn tokenize_for_match(query: &str) -> Vec<String> {
    let lowered = query.to_lowercase();
    token_pattern()
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .filter(|token| token.chars().count() >= 2)
        .collect()
}

/// Sum of matched token lengths over `title + content`. Zero when the query
/// yields no usable tokens.
pub fn lexical_match_score(query: &str, title: &str, content: &str) -> i64 {
    let tokens = tokenize_for_match(query);
    if tokens.is_empty() {
        return 0;
    }

    let haystack = format!("{} {}", title, content).to_lowercase();
    tokens
        .iter()
        .filter(|token| haystack.contains(token.as_str()))
        .map(|token| token.chars().count() as i64)
        .sum()
}
