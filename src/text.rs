//! Text normalization and tokenization helpers shared by the local
//! collaborators, the safety scan and the template summaries.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "about", "after", "all", "am", "an", "and", "any", "are", "as", "at", "be", "been", "but", "by",
        "can", "could", "did", "do", "does", "for", "from", "had", "has", "have", "how", "i", "if", "in",
        "into", "is", "it", "its", "just", "me", "my", "of", "on", "or", "our", "so", "that", "the", "their",
        "them", "then", "there", "they", "this", "to", "was", "we", "were", "what", "when", "which", "who",
        "why", "will", "with", "would", "you", "your",
    ]
    .into_iter()
    .collect()
});

/// Normalize caller input for scoring: trim and lower-case.
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Approximate token count: whitespace-separated words.
pub fn token_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Split text into lower-cased alphanumeric terms.
///
/// Apostrophes inside a word are kept (`i've`), everything else that is not
/// alphanumeric separates terms.
pub fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|t| t.trim_matches('\'').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Terms with common function words removed, used for relevance scoring.
pub fn content_terms(text: &str) -> Vec<String> {
    terms(text)
        .into_iter()
        .filter(|t| !STOPWORDS.contains(t.as_str()))
        .collect()
}

/// Set of distinct content terms in `text`.
pub fn term_set(text: &str) -> HashSet<String> {
    content_terms(text).into_iter().collect()
}

/// Content-term frequency vector of `text`.
pub fn term_frequencies(text: &str) -> HashMap<String, f64> {
    let mut tf = HashMap::new();
    for term in content_terms(text) {
        *tf.entry(term).or_insert(0.0) += 1.0;
    }
    tf
}

/// Cosine similarity between two term-frequency vectors, in [0, 1].
pub fn cosine(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .iter()
        .filter_map(|(term, wa)| large.get(term).map(|wb| wa * wb))
        .sum();
    let norm_a: f64 = a.values().map(|w| w * w).sum::<f64>().sqrt();
    let norm_b: f64 = b.values().map(|w| w * w).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// Jaccard overlap of two term sets, in [0, 1].
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Truncate `text` to at most `max_words` whitespace-separated words.
pub fn truncate_words(text: &str, max_words: usize) -> String {
    let mut out = String::new();
    for (i, word) in text.split_whitespace().enumerate() {
        if i >= max_words {
            break;
        }
        if i > 0 {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// First sentence of `text`, always ending in terminal punctuation.
pub fn first_sentence(text: &str) -> String {
    let trimmed = text.trim();
    let end = trimmed
        .char_indices()
        .find(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(trimmed.len());
    let sentence = trimmed[..end].trim();
    if sentence.is_empty() || sentence.ends_with(&['.', '!', '?'][..]) {
        sentence.to_string()
    } else {
        format!("{sentence}.")
    }
}

/// Shorten `text` to `max_chars` characters, appending an ellipsis when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sentence() {
        assert_eq!(first_sentence("Panic passes. Breathe."), "Panic passes.");
        assert_eq!(first_sentence("  no terminal punctuation "), "no terminal punctuation.");
        assert_eq!(first_sentence(""), "");
    }

    #[test]
    fn test_normalize_and_token_count() {
        assert_eq!(normalize("  What IS Quantum Physics?  "), "what is quantum physics?");
        assert_eq!(token_count("What is quantum physics?"), 4);
        assert_eq!(token_count("   "), 0);
    }

    #[test]
    fn test_terms_strip_punctuation() {
        assert_eq!(terms("I've felt ANXIOUS, lately."), vec!["i've", "felt", "anxious", "lately"]);
    }

    #[test]
    fn test_content_terms_drop_function_words() {
        assert_eq!(content_terms("What is the grief of it"), vec!["grief"]);
        assert!(term_set("what is this").is_empty());
    }

    #[test]
    fn test_cosine_identical_and_disjoint() {
        let a = term_frequencies("grief and loss");
        let b = term_frequencies("grief and loss");
        let c = term_frequencies("quantum physics");
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-9);
        assert_eq!(cosine(&a, &c), 0.0);
    }

    #[test]
    fn test_jaccard() {
        let a = term_set("x y z");
        let b = term_set("y z w");
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-9);
        assert_eq!(jaccard(&HashSet::new(), &HashSet::new()), 0.0);
    }

    #[test]
    fn test_truncate_and_preview() {
        assert_eq!(truncate_words("one two three four", 2), "one two");
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("abc", 3), "abc");
    }
}
