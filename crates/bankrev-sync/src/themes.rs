//! Per-source theme vocabularies and keyword-based theme assignment.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::normalize::TextNormalizer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeRule {
    pub theme: String,
    pub keywords: Vec<String>,
}

/// Ordered theme rules keyed by source name. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeTable {
    sources: BTreeMap<String, Vec<ThemeRule>>,
}

const ACCOUNT_ACCESS: &str = "Account Access Issues";
const TRANSACTION_PERFORMANCE: &str = "Transaction Performance";
const USER_EXPERIENCE: &str = "User Interface & Experience";
const CUSTOMER_SUPPORT: &str = "Customer Support";
const FEATURE_REQUESTS: &str = "Feature Requests";

fn rules(entries: &[(&str, &[&str])]) -> Vec<ThemeRule> {
    entries
        .iter()
        .map(|(theme, keywords)| ThemeRule {
            theme: theme.to_string(),
            keywords: keywords.iter().map(ToString::to_string).collect(),
        })
        .collect()
}

impl ThemeTable {
    pub fn new(sources: BTreeMap<String, Vec<ThemeRule>>) -> Self {
        Self { sources }
    }

    /// Vocabulary for the three tracked banks.
    pub fn builtin() -> Self {
        let mut sources = BTreeMap::new();
        sources.insert(
            "Commercial Bank of Ethiopia".to_string(),
            rules(&[
                (ACCOUNT_ACCESS, &["login", "password", "access", "sign", "account", "error"]),
                (TRANSACTION_PERFORMANCE, &["transfer", "slow", "speed", "transaction", "delay", "fast"]),
                (
                    USER_EXPERIENCE,
                    &["ui", "interface", "design", "navigate", "easy", "use", "application", "well", "great", "nice", "excellent"],
                ),
                (CUSTOMER_SUPPORT, &["support", "service", "help", "response", "customer", "thank"]),
                (FEATURE_REQUESTS, &["feature", "update", "add", "option", "fingerprint", "screenshot"]),
            ]),
        );
        sources.insert(
            "Bank of Abyssinia".to_string(),
            rules(&[
                (ACCOUNT_ACCESS, &["login", "error", "access", "account", "sign"]),
                (TRANSACTION_PERFORMANCE, &["slow", "transfer", "payment", "speed", "fail", "crash", "time"]),
                (
                    USER_EXPERIENCE,
                    &["ui", "design", "navigation", "look", "use", "mobile", "banking", "well", "nice", "good"],
                ),
                (CUSTOMER_SUPPORT, &["support", "help", "service", "contact", "respond", "fix"]),
                (FEATURE_REQUESTS, &["feature", "new", "add", "option", "security", "update"]),
            ]),
        );
        sources.insert(
            "Dashen Bank".to_string(),
            rules(&[
                (ACCOUNT_ACCESS, &["login", "access", "account", "sign", "error"]),
                (TRANSACTION_PERFORMANCE, &["transfer", "slow", "fast", "payment", "delay", "step"]),
                (
                    USER_EXPERIENCE,
                    &["ui", "design", "navigate", "user", "friendly", "easy", "super", "amazing", "good", "nice", "wow", "application"],
                ),
                (CUSTOMER_SUPPORT, &["support", "help", "service", "customer", "response"]),
                (FEATURE_REQUESTS, &["feature", "update", "add", "option", "login"]),
            ]),
        );
        Self { sources }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// `themes.yaml` under `root` replaces the built-in table when present.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join("themes.yaml");
        if !path.exists() {
            return Ok(Self::builtin());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let table =
            Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        info!(path = %path.display(), sources = table.sources.len(), "theme table loaded");
        Ok(table)
    }

    pub fn sources(&self) -> impl Iterator<Item = (&str, &[ThemeRule])> {
        self.sources.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Pre-stem every keyword with the same normalizer used on review text.
    pub fn matcher<'a>(&self, normalizer: &'a TextNormalizer) -> ThemeMatcher<'a> {
        let sources = self
            .sources
            .iter()
            .map(|(source, rules)| {
                let compiled = rules
                    .iter()
                    .map(|rule| CompiledTheme {
                        theme: rule.theme.clone(),
                        keywords: rule
                            .keywords
                            .iter()
                            .map(|kw| normalizer.content_stems(kw))
                            .filter(|stems| !stems.is_empty())
                            .collect(),
                    })
                    .collect();
                (source.clone(), compiled)
            })
            .collect();
        ThemeMatcher {
            normalizer,
            sources,
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledTheme {
    theme: String,
    keywords: Vec<Vec<String>>,
}

pub struct ThemeMatcher<'a> {
    normalizer: &'a TextNormalizer,
    sources: BTreeMap<String, Vec<CompiledTheme>>,
}

impl ThemeMatcher<'_> {
    pub fn knows_source(&self, source_name: &str) -> bool {
        self.sources.contains_key(source_name)
    }

    /// Themes whose keywords occur in the stop-word-filtered stems of `text`
    /// as whole tokens (or a contiguous run of them), in table order. Empty when nothing matches,
    /// the text is blank or the source is unknown.
    pub fn assign(&self, source_name: &str, text: &str) -> Vec<String> {
        let Some(themes) = self.sources.get(source_name) else {
            return Vec::new();
        };
        let tokens = self.normalizer.content_stems(text);
        if tokens.is_empty() {
            return Vec::new();
        }
        let mut assigned: Vec<String> = Vec::new();
        for compiled in themes {
            let hit = compiled
                .keywords
                .iter()
                .any(|kw| tokens.windows(kw.len()).any(|window| window == kw.as_slice()));
            if hit && !assigned.contains(&compiled.theme) {
                assigned.push(compiled.theme.clone());
            }
        }
        assigned
    }
}
