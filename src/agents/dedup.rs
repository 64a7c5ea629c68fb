//! Near-duplicate detection for research arguments.
//!
//! The producer tends to rephrase the same argument across rounds
//! ("Tariffs destroy manufacturing jobs" / "Tariffs eliminate manufacturing
//! jobs"). Arguments are reduced to a signature of key words and compared
//! with Jaccard similarity.

use std::collections::HashSet;

/// Similarity above which two arguments are the same argument.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.55;

/// Words that vary between phrasings without changing the argument.
const STOP_WORDS: &[&str] = &[
    "the", "and", "but", "for", "with", "from", "eliminates", "destroyed", "destroys", "loses",
    "lost", "creates", "causes", "leads", "harms", "impacts", "affects", "threatens", "violates",
    "requires", "needed", "harm", "impact", "affect", "threat", "violation", "requirement",
    "economic", "economically", "new", "large", "significant", "opportunity", "opportunities",
    "employment", "employed", "due", "able", "more", "most",
];

/// Reduces an argument to its key words.
///
/// Lowercases, strips the `AT:` and `Impact:` prefixes and any trailing
/// `+ variant` marker, drops stop words and words of two characters or
/// fewer, and removes punctuation.
pub fn normalize_argument(argument: &str) -> String {
    let mut text = argument.trim().to_lowercase();
    for prefix in ["at:", "impact:"] {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim_start().to_string();
        }
    }
    if let Some(idx) = text.find('+') {
        text.truncate(idx);
    }

    text.split_whitespace()
        .filter(|w| w.chars().count() > 2 && !STOP_WORDS.contains(w))
        .map(|w| w.chars().filter(|c| c.is_alphanumeric() || *c == '_').collect::<String>())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Jaccard similarity of two word sets.
pub fn jaccard(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Remembers argument signatures and rejects near-duplicates.
#[derive(Debug, Clone)]
pub struct ArgumentDeduper {
    threshold: f64,
    signatures: Vec<String>,
}

impl Default for ArgumentDeduper {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl ArgumentDeduper {
    /// # Arguments
    ///
    /// * `threshold` - Similarity above which arguments are duplicates; clamped to 0.0..=1.0
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            signatures: Vec::new(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// True if `argument` matches a remembered argument.
    pub fn is_duplicate(&self, argument: &str) -> bool {
        let signature = normalize_argument(argument);
        if self.signatures.iter().any(|s| *s == signature) {
            return true;
        }
        let words: HashSet<&str> = signature.split_whitespace().collect();
        if words.is_empty() {
            return false;
        }
        self.signatures.iter().any(|existing| {
            let other: HashSet<&str> = existing.split_whitespace().collect();
            !other.is_empty() && jaccard(&words, &other) > self.threshold
        })
    }

    /// Remembers `argument`.
    pub fn remember(&mut self, argument: &str) {
        self.signatures.push(normalize_argument(argument));
    }

    /// Remembers `argument` unless it is a duplicate. Returns whether it was new.
    pub fn check_and_remember(&mut self, argument: &str) -> bool {
        if self.is_duplicate(argument) {
            return false;
        }
        self.remember(argument);
        true
    }
}
