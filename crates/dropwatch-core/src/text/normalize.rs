use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::DedupConfig;

/// Articles, prepositions and marketing filler removed from titles.
pub const DEFAULT_STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "for", "with", "by", "at", "in", "on", "to", "of", "new",
    "now", "available",
];

/// Brand and venue words present in nearly every title of this catalogue.
pub const DEFAULT_BRAND_WORDS: &[&str] = &[
    "disney", "universal", "seaworld", "orlando", "resort", "park", "parks", "world", "walt",
];

static POSSESSIVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'s\b").expect("valid possessive regex"));

static DEFAULT_NORMALIZER: Lazy<Normalizer> = Lazy::new(Normalizer::default);

/// Turns raw release titles into hyphen-joined comparison keys.
///
/// The step order is fixed: stored fingerprints depend on it.
#[derive(Debug, Clone)]
pub struct Normalizer {
    stop_words: HashSet<String>,
    brand_words: HashSet<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_STOP_WORDS, DEFAULT_BRAND_WORDS)
    }
}

impl Normalizer {
    pub fn new<S, B>(stop_words: S, brand_words: B) -> Self
    where
        S: IntoIterator,
        S::Item: AsRef<str>,
        B: IntoIterator,
        B::Item: AsRef<str>,
    {
        Self {
            stop_words: word_set(stop_words),
            brand_words: word_set(brand_words),
        }
    }

    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(&config.stop_words, &config.brand_words)
    }

    /// Normalize a title. Total: empty or all-filler input yields `""`.
    pub fn normalize(&self, title: &str) -> String {
        let lowered = title.to_lowercase();
        let without_possessive = POSSESSIVE_RE.replace_all(&lowered, "");
        let without_apostrophes = without_possessive.replace('\'', "");

        // Hyphens separate words so that an already-normalized key
        // normalizes to itself. Keys built by a rule that deleted hyphens
        // differ: "Spider-Man" was `spiderman`, here it is `spider-man`.
        let cleaned: String = without_apostrophes
            .chars()
            .filter_map(|c| match c {
                '-' => Some(' '),
                c if c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace() => Some(c),
                _ => None,
            })
            .collect();

        cleaned
            .split_whitespace()
            .filter(|word| !self.stop_words.contains(*word))
            .filter(|word| !self.brand_words.contains(*word))
            .collect::<Vec<_>>()
            .join("-")
    }

    pub fn is_stop_word(&self, word: &str) -> bool {
        self.stop_words.contains(word)
    }

    pub fn is_brand_word(&self, word: &str) -> bool {
        self.brand_words.contains(word)
    }
}

/// Normalize with the built-in word lists.
pub fn normalize_title(title: &str) -> String {
    DEFAULT_NORMALIZER.normalize(title)
}

fn word_set<I>(words: I) -> HashSet<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    words
        .into_iter()
        .map(|w| w.as_ref().trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}
