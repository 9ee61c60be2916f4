use std::{collections::BTreeSet, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{telemetry::OptimizerTelemetry, tokenizer::Tokenizer};

/// Counting class of a target term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermKind {
    /// Atomic sub-word unit, counted as a bare substring.
    Base,
    /// Whole keyword or phrase, counted only on boundaries.
    Compound,
}

impl TermKind {
    /// Stable lowercase label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Compound => "compound",
        }
    }
}

impl fmt::Display for TermKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Base and compound terms derived from one keyword. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetTermSet {
    keyword: String,
    base: BTreeSet<String>,
    compound: BTreeSet<String>,
}

impl TargetTermSet {
    /// Keyword the set was derived from.
    #[must_use]
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Base terms in lexicographic order.
    #[must_use]
    pub const fn base(&self) -> &BTreeSet<String> {
        &self.base
    }

    /// Compound terms in lexicographic order.
    #[must_use]
    pub const fn compound(&self) -> &BTreeSet<String> {
        &self.compound
    }

    /// Every term with its kind: base terms first, then compound terms.
    pub fn iter(&self) -> impl Iterator<Item = (&str, TermKind)> + '_ {
        self.base
            .iter()
            .map(|term| (term.as_str(), TermKind::Base))
            .chain(
                self.compound
                    .iter()
                    .map(|term| (term.as_str(), TermKind::Compound)),
            )
    }

    /// Total number of terms across both kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.base.len() + self.compound.len()
    }

    /// Whether no term was derived. Never true for a non-empty keyword.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Turns a keyword plus custom terms into a [`TargetTermSet`].
#[derive(Clone)]
pub struct TargetDeriver {
    tokenizer: Arc<dyn Tokenizer>,
    telemetry: Option<OptimizerTelemetry>,
}

impl fmt::Debug for TargetDeriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetDeriver")
            .field("telemetry", &self.telemetry)
            .finish_non_exhaustive()
    }
}

impl TargetDeriver {
    /// Creates a deriver over the given segmentation backend.
    #[must_use]
    pub fn new(tokenizer: Arc<dyn Tokenizer>, telemetry: Option<OptimizerTelemetry>) -> Self {
        Self {
            tokenizer,
            telemetry,
        }
    }

    /// Derives the term sets.
    ///
    /// A tokenizer failure is logged and degrades to keyword-derived base terms
    /// being empty; custom terms and the raw keyword still apply.
    pub fn derive(&self, keyword: &str, custom_terms: &[String]) -> TargetTermSet {
        let keyword = keyword.trim();
        let tokens: Vec<String> = match self.tokenizer.segment(keyword) {
            Ok(tokens) => tokens
                .into_iter()
                .filter(|token| token.chars().count() >= 2)
                .collect(),
            Err(err) => {
                tracing::warn!(keyword, error = %err, "keyword segmentation failed");
                if let Some(tel) = &self.telemetry {
                    let _ = tel.log(
                        LogLevel::Warn,
                        "optimizer.targets.degraded",
                        json!({ "keyword": keyword, "error": err.to_string() }),
                    );
                }
                Vec::new()
            }
        };

        let mut base: BTreeSet<String> = tokens.iter().cloned().collect();
        let mut compound = BTreeSet::from([keyword.to_string()]);

        for pair in tokens.windows(2) {
            let combined = format!("{}{}", pair[0], pair[1]);
            if combined.chars().count() > 2 {
                compound.insert(combined);
            }
        }

        for term in custom_terms.iter().map(|term| term.trim()) {
            if term.is_empty() {
                continue;
            }
            if term.contains(char::is_whitespace) {
                compound.insert(term.to_string());
            } else if term.chars().count() >= 2 {
                base.insert(term.to_string());
            }
        }

        TargetTermSet {
            keyword: keyword.to_string(),
            base,
            compound,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::tokenizer::TokenizationError;
    use shared_logging::MemoryLogger;

    /// Tokenizer answering from a fixed table, failing for anything else.
    pub(crate) struct FixedTokenizer(pub HashMap<String, Vec<String>>);

    impl FixedTokenizer {
        pub(crate) fn engine_oil() -> Arc<dyn Tokenizer> {
            Arc::new(Self(HashMap::from([(
                "엔진오일종류".to_string(),
                vec!["엔진".into(), "오일".into(), "종류".into()],
            )])))
        }
    }

    impl Tokenizer for FixedTokenizer {
        fn segment(&self, text: &str) -> Result<Vec<String>, TokenizationError> {
            self.0
                .get(text)
                .cloned()
                .ok_or_else(|| TokenizationError::Unsupported(text.to_string()))
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn derives_base_and_adjacent_compounds() {
        let deriver = TargetDeriver::new(FixedTokenizer::engine_oil(), None);
        let set = deriver.derive("엔진오일종류", &[]);
        assert_eq!(
            set.base().iter().cloned().collect::<Vec<_>>(),
            strings(&["엔진", "오일", "종류"])
        );
        assert_eq!(
            set.compound().iter().cloned().collect::<Vec<_>>(),
            strings(&["엔진오일", "엔진오일종류", "오일종류"])
        );
        assert_eq!(set.keyword(), "엔진오일종류");
        assert_eq!(set.len(), 6);
    }

    #[test]
    fn custom_terms_split_on_whitespace() {
        let deriver = TargetDeriver::new(FixedTokenizer::engine_oil(), None);
        let set = deriver.derive(
            "엔진오일종류",
            &strings(&["합성유", "엔진 오일", "  ", "엔진"]),
        );
        assert!(set.base().contains("합성유"));
        assert!(set.compound().contains("엔진 오일"));
        assert_eq!(set.base().len(), 4);
        assert_eq!(set.compound().len(), 4);
    }

    #[test]
    fn single_character_custom_terms_are_skipped() {
        let deriver = TargetDeriver::new(FixedTokenizer::engine_oil(), None);
        let set = deriver.derive("엔진오일종류", &strings(&["유", " 값 ", "W", "순정"]));
        assert!(set.base().contains("순정"));
        assert!(!set.base().contains("유"));
        assert!(!set.base().contains("값"));
        assert!(set.base().iter().all(|term| term.chars().count() >= 2));
        assert_eq!(set.base().len(), 4);
    }

    #[test]
    fn short_tokens_are_dropped_before_pairing() {
        let tokenizer: Arc<dyn Tokenizer> = Arc::new(FixedTokenizer(HashMap::from([(
            "오일의종류".to_string(),
            strings(&["오일", "의", "종류"]),
        )])));
        let set = TargetDeriver::new(tokenizer, None).derive("오일의종류", &[]);
        assert_eq!(
            set.base().iter().cloned().collect::<Vec<_>>(),
            strings(&["오일", "종류"])
        );
        // "의" is filtered first, so the surviving neighbours pair up
        assert!(set.compound().contains("오일종류"));
        assert!(!set.compound().contains("오일의"));
    }

    #[test]
    fn tokenizer_failure_degrades_and_logs() {
        let sink = Arc::new(MemoryLogger::default());
        let telemetry = OptimizerTelemetry::builder("targets")
            .log_sink(sink.clone())
            .build()
            .unwrap();
        let deriver = TargetDeriver::new(FixedTokenizer::engine_oil(), Some(telemetry));
        let set = deriver.derive("브레이크패드", &strings(&["패드"]));
        assert_eq!(set.base().iter().cloned().collect::<Vec<_>>(), strings(&["패드"]));
        assert_eq!(
            set.compound().iter().cloned().collect::<Vec<_>>(),
            strings(&["브레이크패드"])
        );
        let degraded = sink.find("optimizer.targets.degraded");
        assert_eq!(degraded.len(), 1);
        assert_eq!(degraded[0].level, LogLevel::Warn);
    }

    #[test]
    fn derivation_is_deterministic() {
        let deriver = TargetDeriver::new(FixedTokenizer::engine_oil(), None);
        let custom = strings(&["순정", "엔진 교체", "가격"]);
        let first = deriver.derive("엔진오일종류", &custom);
        let second = deriver.derive("엔진오일종류", &custom);
        assert_eq!(first, second);
        let order: Vec<_> = first.iter().map(|(term, _)| term.to_string()).collect();
        assert_eq!(order.first().map(String::as_str), Some("가격"));
    }
}
