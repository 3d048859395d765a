//! Similarity measures over normalized title keys.
//!
//! Both functions expect keys produced by the normalizer, never raw titles.

use std::collections::HashSet;

/// Character trigrams of a key, padded with two leading blanks and one
/// trailing blank. Hyphens are ordinary characters. An empty key has none.
pub fn trigrams(key: &str) -> HashSet<[char; 3]> {
    if key.is_empty() {
        return HashSet::new();
    }
    let padded: Vec<char> = "  ".chars().chain(key.chars()).chain(" ".chars()).collect();
    padded.windows(3).map(|w| [w[0], w[1], w[2]]).collect()
}

/// Jaccard similarity of the two keys' trigram sets, in `[0, 1]`.
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let left = trigrams(a);
    let right = trigrams(b);
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    let shared = left.intersection(&right).count();
    shared as f64 / union as f64
}

fn words(key: &str) -> HashSet<&str> {
    key.split('-').filter(|w| !w.is_empty()).collect()
}

/// Shared distinct words over the smaller side's distinct word count.
/// Zero when either key has no words.
pub fn word_overlap(a: &str, b: &str) -> f64 {
    let left = words(a);
    let right = words(b);
    let smaller = left.len().min(right.len());
    if smaller == 0 {
        return 0.0;
    }
    let shared = left.intersection(&right).count();
    shared as f64 / smaller as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigram_padding() {
        let grams = trigrams("ab");
        assert_eq!(grams.len(), 3);
        assert!(grams.contains(&[' ', ' ', 'a']));
        assert!(grams.contains(&[' ', 'a', 'b']));
        assert!(grams.contains(&['a', 'b', ' ']));
        assert!(trigrams("").is_empty());
    }

    #[test]
    fn test_identical_keys_score_one() {
        assert_eq!(trigram_similarity("stitch-plush", "stitch-plush"), 1.0);
        assert_eq!(word_overlap("stitch-plush", "stitch-plush"), 1.0);
    }

    #[test]
    fn test_empty_keys_score_zero() {
        assert_eq!(trigram_similarity("", ""), 0.0);
        assert_eq!(trigram_similarity("", "stitch"), 0.0);
        assert_eq!(word_overlap("", ""), 0.0);
        assert_eq!(word_overlap("stitch", ""), 0.0);
        assert_eq!(word_overlap("-", "stitch"), 0.0);
    }

    #[test]
    fn test_exact_seven_tenths() {
        // "abcdef" has 7 trigrams, all of them shared with the 10 of "abcdefxef"
        assert_eq!(trigram_similarity("abcdef", "abcdefxef"), 0.7);
    }

    #[test]
    fn test_trigram_similarity_is_symmetric() {
        let a = "castle-popcorn-bucket";
        let b = "castle-ornament";
        assert_eq!(trigram_similarity(a, b), trigram_similarity(b, a));
        assert!(trigram_similarity(a, b) < 0.7);
    }

    #[test]
    fn test_word_overlap_uses_smaller_side() {
        assert_eq!(word_overlap("castle-popcorn-bucket", "castle-ornament"), 0.5);
        assert_eq!(word_overlap("stitch-ears", "stitch-ears-headband-pink"), 1.0);
        assert_eq!(word_overlap("stitch-stitch-ears", "stitch-ears"), 1.0);
    }

    #[test]
    fn test_word_overlap_exact_threshold() {
        let a = "w1-w2-w3-w4-w5-w6-w7-w8-w9-w10";
        let b = "w1-w2-w3-w4-w5-w6-w7-x8-x9-x10";
        assert_eq!(word_overlap(a, b), 0.7);
    }
}
