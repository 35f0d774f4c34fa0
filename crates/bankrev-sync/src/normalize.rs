use std::collections::HashSet;

use rust_stemmers::{Algorithm, Stemmer};
use stop_words::{get, LANGUAGE};
use unicode_normalization::UnicodeNormalization;

/// English text normalizer shared by theme matching and keyword extraction.
///
/// Stop-words come from the NLTK English list. The larger ISO list drops
/// domain words such as `good`, `use` and `help` that theme keywords and
/// keyword extraction rely on.
pub struct TextNormalizer {
    stopwords: HashSet<String>,
    stemmer: Stemmer,
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextNormalizer {
    pub fn new() -> Self {
        let stopwords: HashSet<String> = get(LANGUAGE::English)
            .iter()
            .map(ToString::to_string)
            .collect();
        Self {
            stopwords,
            stemmer: Stemmer::create(Algorithm::English),
        }
    }

    /// NFC, lowercase, alphabetic runs only.
    pub fn words(&self, text: &str) -> Vec<String> {
        text.nfc()
            .collect::<String>()
            .to_lowercase()
            .split(|c: char| !c.is_alphabetic())
            .filter(|w| !w.is_empty())
            .map(ToString::to_string)
            .collect()
    }

    pub fn is_stopword(&self, word: &str) -> bool {
        self.stopwords.contains(word)
    }

    pub fn stem(&self, word: &str) -> String {
        self.stemmer.stem(word).into_owned()
    }

    /// Stems of content words: stop-words removed before stemming.
    pub fn content_stems(&self, text: &str) -> Vec<String> {
        self.words(text)
            .iter()
            .filter(|w| !self.is_stopword(w))
            .map(|w| self.stem(w))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_keep_alphabetic_runs_only() {
        let n = TextNormalizer::new();
        assert_eq!(
            n.words("Login FAILED!! 3 times, app-crash"),
            vec!["login", "failed", "times", "app", "crash"]
        );
    }

    #[test]
    fn composed_and_decomposed_input_normalize_alike() {
        let n = TextNormalizer::new();
        assert_eq!(n.words("cafe\u{301}"), n.words("caf\u{e9}"));
    }

    #[test]
    fn content_stems_drop_stopwords_and_stem() {
        let n = TextNormalizer::new();
        let stems = n.content_stems("The transfers were delayed");
        assert!(stems.contains(&"transfer".to_string()));
        assert!(stems.contains(&"delay".to_string()));
        assert!(!stems.iter().any(|s| s == "the"));
    }

    #[test]
    fn review_vocabulary_is_not_treated_as_stopwords() {
        let n = TextNormalizer::new();
        for word in ["good", "great", "use", "well", "help", "new", "thank", "look", "fix"] {
            assert!(!n.is_stopword(word), "{word} should be kept");
        }
        assert!(n.is_stopword("the"));
        assert!(n.is_stopword("very"));
        assert_eq!(n.content_stems("the app works well"), vec!["app", "work", "well"]);
    }

    #[test]
    fn blank_text_has_no_tokens() {
        let n = TextNormalizer::new();
        assert!(n.content_stems("   ").is_empty());
        assert!(n.content_stems("!!! 123").is_empty());
    }
}
