//! Citation markers in generated summaries.
//!
//! Markers are 1-based indices into the passage list handed to the
//! generator, written as parenthesized superscripts (`⁽2⁾`, `⁽²⁾`) or as a
//! bare superscript run (`²`). [`sanitize`] keeps only markers that point to
//! a passage that was actually retrieved with enough similarity.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::model::{Citation, RetrievedPassage};

static MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"⁽([0-9⁰¹²³⁴⁵⁶⁷⁸⁹]+)⁾|([⁰¹²³⁴⁵⁶⁷⁸⁹]+)").unwrap());
static SPACE_BEFORE_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+([.,;:!?])").unwrap());
static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").unwrap());

/// Render the marker for 1-based passage `n`.
pub fn marker(n: usize) -> String {
    format!("⁽{n}⁾")
}

/// Parse a run of ASCII or superscript digits.
fn parse_digits(s: &str) -> Option<usize> {
    let ascii: String = s
        .chars()
        .map(|c| match c {
            '⁰' => '0',
            '¹' => '1',
            '²' => '2',
            '³' => '3',
            '⁴' => '4',
            '⁵' => '5',
            '⁶' => '6',
            '⁷' => '7',
            '⁸' => '8',
            '⁹' => '9',
            other => other,
        })
        .collect();
    ascii.parse().ok()
}

/// All marker numbers in `text`, in order of appearance (duplicates kept).
pub fn extract_markers(text: &str) -> Vec<usize> {
    MARKER_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .filter_map(|m| parse_digits(m.as_str()))
        .collect()
}

/// Summary with invalid markers removed, plus the surviving citations.
#[derive(Debug, Clone, PartialEq)]
pub struct Sanitized {
    pub text: String,
    /// One entry per distinct valid marker, in order of first appearance.
    pub citations: Vec<Citation>,
    /// Number of marker occurrences removed.
    pub removed: usize,
}

/// Drop markers that are out of range or point to a passage below
/// `min_similarity`.
pub fn sanitize(text: &str, passages: &[RetrievedPassage], min_similarity: f64) -> Sanitized {
    let mut citations: Vec<Citation> = Vec::new();
    let mut removed = 0;

    let replaced = MARKER_RE.replace_all(text, |caps: &Captures| {
        let number = caps
            .get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| parse_digits(m.as_str()));
        let passage = number
            .filter(|n| *n >= 1)
            .and_then(|n| passages.get(n - 1).map(|p| (n, p)))
            .filter(|(_, p)| p.similarity >= min_similarity);

        match passage {
            Some((n, p)) => {
                if !citations.iter().any(|c| c.marker == n) {
                    citations.push(Citation {
                        marker: n,
                        passage_id: p.passage_id.clone(),
                        theme_id: p.theme_id.clone(),
                        similarity: p.similarity,
                    });
                }
                caps[0].to_string()
            }
            None => {
                removed += 1;
                String::new()
            }
        }
    });

    let text = if removed > 0 {
        let tidy = SPACE_BEFORE_PUNCT.replace_all(&replaced, "$1");
        MULTI_SPACE.replace_all(&tidy, " ").trim().to_string()
    } else {
        replaced.into_owned()
    };

    Sanitized {
        text,
        citations,
        removed,
    }
}
