//! Frequency-based topic keywords.

use rustc_hash::FxHashMap;
use std::collections::HashSet;

/// Extracts the `top_n` most frequent words longer than three characters.
///
/// Ties break alphabetically so the result is deterministic for a given text.
pub fn extract_keywords(text: &str, top_n: usize) -> Vec<String> {
    let mut counts: FxHashMap<String, usize> = FxHashMap::default();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        if word.chars().count() > 3 {
            *counts.entry(word.to_lowercase()).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(top_n);
    ranked.into_iter().map(|(word, _)| word).collect()
}

/// Fraction of the smaller keyword set shared with the other.
///
/// Either set being empty yields 1.0: a unit too short to carry keywords is
/// no evidence of a topic shift.
pub fn keyword_overlap(a: &[String], b: &[String]) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 1.0;
    }
    let set: HashSet<&String> = a.iter().collect();
    let shared = b.iter().filter(|word| set.contains(word)).count();
    shared as f32 / a.len().min(b.len()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_words_are_ignored() {
        let keywords = extract_keywords("the cat sat on a mat with the cat", 5);
        assert!(keywords.is_empty());
    }

    #[test]
    fn frequency_ranks_first() {
        let keywords =
            extract_keywords("consent consent consent records records procedure", 2);
        assert_eq!(keywords, vec!["consent".to_string(), "records".to_string()]);
    }

    #[test]
    fn overlap_of_disjoint_sets_is_zero() {
        let a = vec!["privacy".to_string(), "consent".to_string()];
        let b = vec!["throughput".to_string(), "latency".to_string()];
        assert_eq!(keyword_overlap(&a, &b), 0.0);
    }

    #[test]
    fn overlap_of_identical_sets_is_one() {
        let a = vec!["privacy".to_string(), "consent".to_string()];
        assert_eq!(keyword_overlap(&a, &a), 1.0);
    }

    #[test]
    fn empty_sets_do_not_signal_a_shift() {
        let a: Vec<String> = vec![];
        let b = vec!["anything".to_string()];
        assert_eq!(keyword_overlap(&a, &b), 1.0);
    }
}
