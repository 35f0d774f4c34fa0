//! Advisory per-source keyword extraction (TF-IDF over unigrams and bigrams).
//!
//! Results are logged and written into the run report; nothing downstream
//! reads them.

use std::collections::{BTreeMap, HashMap, HashSet};

use bankrev_core::EnrichedRecord;

use crate::normalize::TextNormalizer;

#[derive(Debug, Clone, Copy)]
pub struct KeywordOptions {
    pub top_n: usize,
    /// Terms seen in fewer documents are dropped.
    pub min_df: usize,
    /// Terms seen in more than this share of documents are dropped.
    pub max_df_ratio: f64,
    /// Sources with fewer documents get no keywords.
    pub min_source_docs: usize,
}

impl Default for KeywordOptions {
    fn default() -> Self {
        Self {
            top_n: 20,
            min_df: 5,
            max_df_ratio: 0.8,
            min_source_docs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordDoc {
    pub source_name: String,
    pub terms: Vec<String>,
}

impl KeywordDoc {
    /// Unigrams and bigrams over content stems of at least two characters.
    pub fn from_text(source_name: &str, text: &str, normalizer: &TextNormalizer) -> Self {
        let tokens: Vec<String> = normalizer
            .content_stems(text)
            .into_iter()
            .filter(|t| t.chars().count() >= 2)
            .collect();
        let mut terms = tokens.clone();
        terms.extend(tokens.windows(2).map(|pair| format!("{} {}", pair[0], pair[1])));
        Self {
            source_name: source_name.to_string(),
            terms,
        }
    }
}

pub fn corpus_from_records(records: &[EnrichedRecord], normalizer: &TextNormalizer) -> Vec<KeywordDoc> {
    records
        .iter()
        .map(|r| KeywordDoc::from_text(&r.source_name, &r.review_text, normalizer))
        .collect()
}

struct Vocabulary {
    idf: HashMap<String, f64>,
}

impl Vocabulary {
    fn fit(corpus: &[KeywordDoc], options: &KeywordOptions) -> Self {
        let n_docs = corpus.len();
        let mut df: HashMap<&str, usize> = HashMap::new();
        for doc in corpus {
            let unique: HashSet<&str> = doc.terms.iter().map(String::as_str).collect();
            for term in unique {
                *df.entry(term).or_default() += 1;
            }
        }
        let max_df = options.max_df_ratio * n_docs as f64;
        let idf = df
            .into_iter()
            .filter(|(_, count)| *count >= options.min_df && (*count as f64) <= max_df)
            .map(|(term, count)| {
                let weight = ((1.0 + n_docs as f64) / (1.0 + count as f64)).ln() + 1.0;
                (term.to_string(), weight)
            })
            .collect();
        Self { idf }
    }

    /// L2-normalized tf-idf row for one document.
    fn row<'d>(&self, doc: &'d KeywordDoc) -> HashMap<&'d str, f64> {
        let mut counts: HashMap<&'d str, f64> = HashMap::new();
        for term in &doc.terms {
            if self.idf.contains_key(term) {
                *counts.entry(term.as_str()).or_default() += 1.0;
            }
        }
        let mut row: HashMap<&'d str, f64> = counts
            .into_iter()
            .map(|(term, tf)| (term, tf * self.idf[term]))
            .collect();
        let norm = row.values().map(|w| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            row.values_mut().for_each(|w| *w /= norm);
        }
        row
    }
}

/// Top terms for one source by mean weight over that source's documents,
/// ties broken by term. The vocabulary is fitted on the whole corpus.
pub fn top_keywords(
    corpus: &[KeywordDoc],
    source_name: &str,
    options: &KeywordOptions,
) -> Vec<String> {
    let vocabulary = Vocabulary::fit(corpus, options);
    ranked_for_source(&vocabulary, corpus, source_name, options)
}

/// `top_keywords` for every source present in the corpus.
pub fn keywords_by_source(
    corpus: &[KeywordDoc],
    options: &KeywordOptions,
) -> BTreeMap<String, Vec<String>> {
    let vocabulary = Vocabulary::fit(corpus, options);
    let sources: HashSet<&str> = corpus.iter().map(|d| d.source_name.as_str()).collect();
    sources
        .into_iter()
        .map(|source| {
            (
                source.to_string(),
                ranked_for_source(&vocabulary, corpus, source, options),
            )
        })
        .collect()
}

fn ranked_for_source(
    vocabulary: &Vocabulary,
    corpus: &[KeywordDoc],
    source_name: &str,
    options: &KeywordOptions,
) -> Vec<String> {
    let docs: Vec<&KeywordDoc> = corpus
        .iter()
        .filter(|d| d.source_name == source_name)
        .collect();
    if docs.len() < options.min_source_docs || vocabulary.idf.is_empty() {
        return Vec::new();
    }

    let mut sums: HashMap<&str, f64> = HashMap::new();
    for doc in &docs {
        for (term, weight) in vocabulary.row(doc) {
            *sums.entry(term).or_default() += weight;
        }
    }
    let n = docs.len() as f64;
    let mut ranked: Vec<(&str, f64)> = sums
        .into_iter()
        .map(|(term, sum)| (term, sum / n))
        .filter(|(_, mean)| *mean > 0.0)
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(options.top_n)
        .map(|(term, _)| term.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(source: &str, terms: &[&str]) -> KeywordDoc {
        KeywordDoc {
            source_name: source.to_string(),
            terms: terms.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn bigrams_are_built_from_filtered_stems() {
        let normalizer = TextNormalizer::new();
        let doc = KeywordDoc::from_text("Dashen Bank", "Transfers delayed again", &normalizer);
        assert!(doc.terms.contains(&"transfer".to_string()));
        assert!(doc.terms.contains(&"transfer delay".to_string()));
    }

    #[test]
    fn praise_and_usage_words_reach_the_vocabulary() {
        let normalizer = TextNormalizer::new();
        let doc = KeywordDoc::from_text("Bank of Abyssinia", "Good app, great to use", &normalizer);
        for term in ["good", "great", "use", "good app"] {
            assert!(doc.terms.contains(&term.to_string()), "missing {term}");
        }
    }

    #[test]
    fn document_frequency_bounds_apply() {
        let mut corpus = Vec::new();
        // "app" is everywhere (above max_df), "slow" in 6 docs, "pin" in 2 docs.
        for i in 0..10 {
            let mut terms = vec!["app"];
            if i < 6 {
                terms.push("slow");
            }
            if i < 2 {
                terms.push("pin");
            }
            corpus.push(doc("Bank of Abyssinia", &terms));
        }
        let keywords = top_keywords(&corpus, "Bank of Abyssinia", &KeywordOptions::default());
        assert_eq!(keywords, vec!["slow"]);
    }

    #[test]
    fn ties_break_alphabetically_and_small_sources_are_empty() {
        let mut corpus = Vec::new();
        for i in 0..10 {
            let terms: &[&str] = if i % 2 == 0 { &["fast", "easy"] } else { &["login", "error"] };
            corpus.push(doc("Dashen Bank", terms));
        }
        corpus.push(doc("Bank of Abyssinia", &["pin"]));

        let options = KeywordOptions::default();
        let dashen = top_keywords(&corpus, "Dashen Bank", &options);
        assert_eq!(dashen, vec!["easy", "error", "fast", "login"]);
        assert!(top_keywords(&corpus, "Bank of Abyssinia", &options).is_empty());

        let all = keywords_by_source(&corpus, &options);
        assert_eq!(all["Dashen Bank"], dashen);
        assert!(all["Bank of Abyssinia"].is_empty());
    }
}
