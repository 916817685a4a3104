//! Keyword extraction and term-overlap scoring.
//!
//! Lexical matching complements embeddings: exact domain terms ("OAuth2",
//! "SAP", a module name) are often under-weighted by semantic similarity.

use std::collections::{HashMap, HashSet};

/// Common English function words plus requirement boilerplate.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "could", "do",
    "does", "for", "from", "has", "have", "how", "i", "if", "in", "into", "is", "it", "its",
    "let", "may", "me", "might", "must", "my", "need", "needs", "new", "no", "not", "of", "on",
    "or", "our", "should", "so", "such", "that", "the", "their", "them", "then", "there",
    "these", "they", "this", "to", "us", "via", "was", "we", "were", "what", "when", "where",
    "which", "while", "who", "will", "with", "would", "you", "your", "also", "all", "any",
    "some", "please", "want", "support", "system", "feature", "requirement",
];

fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Split text into lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Extract up to `max_terms` distinct non-stopword tokens from `query`.
///
/// Terms are ranked by frequency, then by first occurrence. Single-character
/// ASCII tokens are dropped as noise.
pub fn extract_keywords(query: &str, max_terms: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (pos, token) in tokenize(query).into_iter().enumerate() {
        if is_stopword(&token) || (token.len() == 1 && token.is_ascii()) {
            continue;
        }
        let entry = counts.entry(token).or_insert((0, pos));
        entry.0 += 1;
    }

    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(t, (count, first))| (t, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.into_iter().take(max_terms).map(|(t, _, _)| t).collect()
}

/// Fraction of `terms` that occur as whole tokens of `text`, case-insensitively.
///
/// `terms` must already be lowercase, as produced by [`extract_keywords`].
/// Terms outside ASCII (e.g. CJK runs, which carry no word breaks) fall back
/// to substring matching. An empty term set scores `0.0`.
pub fn lexical_score(terms: &[String], text: &str) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let tokens: HashSet<String> = tokenize(text).into_iter().collect();
    let haystack = text.to_lowercase();
    let matched = terms
        .iter()
        .filter(|t| tokens.contains(t.as_str()) || (!t.is_ascii() && haystack.contains(t.as_str())))
        .count();
    matched as f64 / terms.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopwords_and_punctuation_removed() {
        let kw = extract_keywords("Add OAuth2 login to the portal, please!", 20);
        assert_eq!(kw, vec!["add", "oauth2", "login", "portal"]);
    }

    #[test]
    fn frequency_ranks_before_position() {
        let kw = extract_keywords("export report; export csv; export pdf", 2);
        assert_eq!(kw[0], "export");
        assert_eq!(kw.len(), 2);
    }

    #[test]
    fn keywords_are_deduplicated() {
        let kw = extract_keywords("Login login LOGIN", 20);
        assert_eq!(kw, vec!["login"]);
    }

    #[test]
    fn score_is_fraction_of_matched_terms() {
        let terms = vec!["oauth2".to_string(), "login".to_string(), "ledger".to_string(), "sso".to_string()];
        let score = lexical_score(&terms, "OAuth2 Login revamp");
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn terms_match_whole_tokens_only() {
        let terms = vec!["log".to_string(), "add".to_string()];
        assert_eq!(lexical_score(&terms, "Catalog address book"), 0.0);
        assert!((lexical_score(&terms, "Add audit log") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cjk_terms_match_inside_runs() {
        let terms = vec!["单点登录".to_string()];
        assert_eq!(lexical_score(&terms, "门户实现单点登录功能"), 1.0);
    }

    #[test]
    fn empty_terms_score_zero() {
        assert_eq!(lexical_score(&[], "anything"), 0.0);
        assert!(extract_keywords("the and of", 20).is_empty());
    }
}
