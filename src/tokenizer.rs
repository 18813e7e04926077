//! Token counting for chunk sizing.
//!
//! All size bounds in the chunker are expressed in tokens. With the default
//! `tokenizer-tiktoken` feature the counter uses the cl100k BPE encoding;
//! without it (or if the encoding fails to load) it falls back to a
//! deterministic word-count heuristic so chunking still behaves consistently.

use std::sync::Arc;

#[cfg(feature = "tokenizer-tiktoken")]
use tiktoken_rs::CoreBPE;

/// Counts tokens for chunk sizing decisions.
///
/// Cloning is cheap: the underlying BPE encoder is shared.
#[derive(Clone)]
pub struct TokenCounter {
    #[cfg(feature = "tokenizer-tiktoken")]
    bpe: Option<Arc<CoreBPE>>,
    #[cfg(not(feature = "tokenizer-tiktoken"))]
    _private: (),
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("backend", &self.backend_name())
            .finish()
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter {
    /// Creates a counter, loading the BPE encoding when available.
    pub fn new() -> Self {
        #[cfg(feature = "tokenizer-tiktoken")]
        {
            let bpe = tiktoken_rs::cl100k_base().ok().map(Arc::new);
            if bpe.is_none() {
                tracing::warn!("cl100k encoding unavailable, using word-count heuristic");
            }
            Self { bpe }
        }
        #[cfg(not(feature = "tokenizer-tiktoken"))]
        {
            Self { _private: () }
        }
    }

    /// Name of the active backend, for telemetry.
    pub fn backend_name(&self) -> &'static str {
        #[cfg(feature = "tokenizer-tiktoken")]
        if self.bpe.is_some() {
            return "cl100k";
        }
        "heuristic"
    }

    /// Returns the token count for `text`.
    ///
    /// Empty or whitespace-only text counts as zero tokens.
    pub fn count(&self, text: &str) -> usize {
        if text.trim().is_empty() {
            return 0;
        }
        #[cfg(feature = "tokenizer-tiktoken")]
        if let Some(bpe) = &self.bpe {
            return bpe.encode_with_special_tokens(text).len();
        }
        heuristic_count(text)
    }
}

/// Word-count heuristic: `ceil(words * 0.75)`, never zero for non-empty text.
fn heuristic_count(text: &str) -> usize {
    let words = text.split_whitespace().count();
    ((words as f64) * 0.75).ceil().max(1.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_counts_zero() {
        let counter = TokenCounter::new();
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("   \n\t "), 0);
    }

    #[test]
    fn non_empty_text_counts_at_least_one() {
        let counter = TokenCounter::new();
        assert!(counter.count("word") >= 1);
        assert!(counter.count("several words in a sentence") >= 1);
    }

    #[test]
    fn longer_text_counts_more() {
        let counter = TokenCounter::new();
        let short = counter.count("one two three");
        let long = counter.count(
            "one two three four five six seven eight nine ten eleven twelve thirteen fourteen",
        );
        assert!(long > short);
    }

    #[test]
    fn heuristic_rounds_up() {
        assert_eq!(heuristic_count("a"), 1);
        assert_eq!(heuristic_count("a b"), 2);
        assert_eq!(heuristic_count("a b c d"), 3);
    }
}
