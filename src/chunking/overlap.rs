//! Sentence-wise overlap injection between adjacent chunks.

use unicode_segmentation::UnicodeSegmentation;

use super::config::ChunkerConfig;
use super::tree::ChunkDraft;
use crate::tokenizer::TokenCounter;

/// Duplicates the trailing slice of each chunk into the next chunk's context.
///
/// The overlap target is `overlap_percentage` of the earlier chunk's tokens,
/// collected sentence-by-sentence from the end and never exceeding 1.5x the
/// target. The text lands on the earlier chunk as `overlap_text`; both sides
/// get their overlap flags set, keeping the symmetry invariant:
/// `has_overlap_next` on chunk `i` implies `has_overlap_previous` on `i + 1`.
pub(crate) fn inject_overlap(
    drafts: &mut [ChunkDraft],
    config: &ChunkerConfig,
    counter: &TokenCounter,
) {
    if config.overlap_percentage <= 0.0 || drafts.len() < 2 {
        return;
    }
    for i in 0..drafts.len() - 1 {
        let target = (drafts[i].tokens as f32 * config.overlap_percentage).round() as usize;
        if target == 0 {
            continue;
        }
        if let Some(text) = trailing_sentences(&drafts[i].content, target, counter) {
            drafts[i].overlap_text = Some(text);
            drafts[i].has_overlap_next = true;
            drafts[i + 1].has_overlap_previous = true;
        }
    }
}

/// Collects whole sentences from the end of `content` until the token target
/// is met, staying within 1.5x the target.
fn trailing_sentences(content: &str, target: usize, counter: &TokenCounter) -> Option<String> {
    let cap = ((target as f32) * 1.5).ceil() as usize;
    let sentences: Vec<&str> = content.unicode_sentences().collect();

    let mut taken: Vec<&str> = Vec::new();
    let mut taken_tokens = 0usize;
    for sentence in sentences.iter().rev() {
        let tokens = counter.count(sentence);
        if taken_tokens + tokens > cap {
            break;
        }
        taken.push(sentence);
        taken_tokens += tokens;
        if taken_tokens >= target {
            break;
        }
    }
    if taken.is_empty() {
        return None;
    }
    taken.reverse();
    let text = taken.concat().trim().to_string();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::chunk::ChunkType;

    fn draft(content: &str, tokens: usize) -> ChunkDraft {
        ChunkDraft {
            content: content.to_string(),
            tokens,
            start_position: 0,
            end_position: 0,
            heading_path: Vec::new(),
            level: 0,
            chunk_type: ChunkType::Paragraph,
            keywords: Vec::new(),
            section: None,
            heading_node: None,
            starts_with_heading: false,
            semantic_density: 1.0,
            overlap_text: None,
            has_overlap_previous: false,
            has_overlap_next: false,
        }
    }

    #[test]
    fn overlap_flags_stay_symmetric() {
        let counter = TokenCounter::new();
        let config = ChunkerConfig {
            overlap_percentage: 0.2,
            ..ChunkerConfig::default()
        };
        let text = "First sentence with words. Second sentence with words. \
                    Third sentence with words. Fourth sentence with words.";
        let tokens = counter.count(text);
        let mut drafts = vec![draft(text, tokens), draft(text, tokens), draft(text, tokens)];
        inject_overlap(&mut drafts, &config, &counter);

        for i in 0..drafts.len() - 1 {
            assert_eq!(drafts[i].has_overlap_next, drafts[i + 1].has_overlap_previous);
        }
        assert!(drafts[0].overlap_text.is_some());
        assert!(!drafts[0].has_overlap_previous);
        assert!(!drafts[drafts.len() - 1].has_overlap_next);
    }

    #[test]
    fn zero_overlap_percentage_injects_nothing() {
        let counter = TokenCounter::new();
        let config = ChunkerConfig {
            overlap_percentage: 0.0,
            ..ChunkerConfig::default()
        };
        let mut drafts = vec![draft("Some text here.", 4), draft("More text here.", 4)];
        inject_overlap(&mut drafts, &config, &counter);
        assert!(drafts.iter().all(|d| d.overlap_text.is_none()));
        assert!(drafts.iter().all(|d| !d.has_overlap_next && !d.has_overlap_previous));
    }

    #[test]
    fn overlap_respects_the_cap() {
        let counter = TokenCounter::new();
        let text = "This is a much longer sentence that would blow far past any reasonable \
                    overlap budget for a small chunk of text. Short tail.";
        // Tiny target: only the short trailing sentence fits under 1.5x.
        let target = 4;
        let overlap = trailing_sentences(text, target, &counter).expect("overlap produced");
        assert_eq!(overlap, "Short tail.");
        assert!(counter.count(&overlap) <= (target as f32 * 1.5).ceil() as usize);
    }

    #[test]
    fn overlap_takes_whole_trailing_sentences() {
        let counter = TokenCounter::new();
        let text = "Alpha beta gamma delta. Epsilon zeta eta theta. Iota kappa lambda mu.";
        let overlap = trailing_sentences(text, 8, &counter).expect("overlap produced");
        assert!(overlap.ends_with("Iota kappa lambda mu."));
        assert!(!overlap.contains("Alpha"));
    }
}
