use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt, fs,
    path::Path,
    sync::Arc,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    analysis::AnalysisVerdict,
    config::{TargetRanges, TermRange},
    targets::{TargetTermSet, TermKind},
};

/// Source of replacement wording for over-used terms.
pub trait SubstitutionSource: Send + Sync {
    /// Ordered suggestions for `term` in the context of `keyword`; may be empty.
    fn suggest(&self, keyword: &str, term: &str) -> Vec<String>;
}

/// Source that never suggests anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSubstitutions;

impl SubstitutionSource for NoSubstitutions {
    fn suggest(&self, _keyword: &str, _term: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Static suggestion table. Keyword-specific entries shadow generic ones.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubstitutionTable {
    #[serde(default)]
    terms: HashMap<String, Vec<String>>,
    #[serde(default)]
    keywords: HashMap<String, HashMap<String, Vec<String>>>,
}

impl SubstitutionTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds suggestions for `term` under any keyword.
    #[must_use]
    pub fn with_term<I, S>(mut self, term: &str, suggestions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.terms
            .insert(term.to_string(), suggestions.into_iter().map(Into::into).collect());
        self
    }

    /// Adds suggestions for `term` when optimizing `keyword`.
    #[must_use]
    pub fn with_keyword_term<I, S>(mut self, keyword: &str, term: &str, suggestions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords.entry(keyword.to_string()).or_default().insert(
            term.to_string(),
            suggestions.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Parses a TOML table with `[terms]` and `[keywords."<keyword>"]` sections.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("parsing substitution table")
    }

    /// Loads a TOML table from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading substitutions {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("loading {}", path.display()))
    }
}

impl SubstitutionSource for SubstitutionTable {
    fn suggest(&self, keyword: &str, term: &str) -> Vec<String> {
        self.keywords
            .get(keyword)
            .and_then(|terms| terms.get(term))
            .or_else(|| self.terms.get(term))
            .cloned()
            .unwrap_or_default()
    }
}

/// How the character count should move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CharGuidance {
    /// Body is shorter than the minimum by `missing` characters.
    Shortfall {
        /// Characters to add at least.
        missing: usize,
    },
    /// Body is longer than the maximum by `surplus` characters.
    Excess {
        /// Characters to remove at least.
        surplus: usize,
    },
    /// Length already fits; keep it there.
    WithinRange,
}

impl CharGuidance {
    /// Guidance for `char_count` against `range`.
    #[must_use]
    pub const fn for_count(char_count: usize, range: &TermRange) -> Self {
        if char_count < range.min {
            Self::Shortfall {
                missing: range.min - char_count,
            }
        } else if char_count > range.max {
            Self::Excess {
                surplus: char_count - range.max,
            }
        } else {
            Self::WithinRange
        }
    }
}

/// One out-of-range term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermIssue {
    /// The term.
    pub term: String,
    /// Counting class.
    pub kind: TermKind,
    /// Current occurrences.
    pub count: usize,
    /// Range the count has to reach.
    pub range: TermRange,
}

/// Advisory output fed into the next generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementAdvice {
    /// Terms above their maximum.
    pub over_used: BTreeSet<String>,
    /// Terms below their minimum.
    pub under_used: BTreeSet<String>,
    /// Replacement wording per over-used term.
    pub substitution_hints: BTreeMap<String, Vec<String>>,
    /// Out-of-range terms in target order.
    pub issues: Vec<TermIssue>,
    /// Character count direction.
    pub char_guidance: CharGuidance,
}

impl RefinementAdvice {
    /// Whether nothing needs to change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty() && self.char_guidance == CharGuidance::WithinRange
    }
}

/// Classifies term usage and collects substitution hints.
#[derive(Clone)]
pub struct RefinementAdvisor {
    ranges: TargetRanges,
    max_hints: usize,
    substitutions: Arc<dyn SubstitutionSource>,
}

impl fmt::Debug for RefinementAdvisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefinementAdvisor")
            .field("ranges", &self.ranges)
            .field("max_hints", &self.max_hints)
            .finish_non_exhaustive()
    }
}

impl RefinementAdvisor {
    /// Creates an advisor keeping at most `max_hints` suggestions per term.
    #[must_use]
    pub fn new(
        ranges: TargetRanges,
        max_hints: usize,
        substitutions: Arc<dyn SubstitutionSource>,
    ) -> Self {
        Self {
            ranges,
            max_hints,
            substitutions,
        }
    }

    /// Produces advice for `verdict`. Terms missing from the verdict are skipped.
    #[must_use]
    pub fn advise(&self, verdict: &AnalysisVerdict, targets: &TargetTermSet) -> RefinementAdvice {
        let mut over_used = BTreeSet::new();
        let mut under_used = BTreeSet::new();
        let mut issues = Vec::new();

        for (term, _) in targets.iter() {
            let Some(entry) = verdict.entry(term) else {
                continue;
            };
            if issues.iter().any(|issue: &TermIssue| issue.term == term) {
                continue;
            }
            let range = match entry.kind {
                TermKind::Base => self.ranges.base,
                TermKind::Compound => self.ranges.compound,
            };
            if entry.count > range.max {
                over_used.insert(term.to_string());
            } else if entry.count < range.min {
                under_used.insert(term.to_string());
            } else {
                continue;
            }
            issues.push(TermIssue {
                term: term.to_string(),
                kind: entry.kind,
                count: entry.count,
                range,
            });
        }

        let substitution_hints = over_used
            .iter()
            .filter_map(|term| {
                let hints = self.hints_for(targets, term);
                (!hints.is_empty()).then(|| (term.clone(), hints))
            })
            .collect();

        RefinementAdvice {
            over_used,
            under_used,
            substitution_hints,
            issues,
            char_guidance: CharGuidance::for_count(verdict.char_count, &self.ranges.chars),
        }
    }

    fn hints_for(&self, targets: &TargetTermSet, term: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.substitutions
            .suggest(targets.keyword(), term)
            .into_iter()
            .map(|hint| hint.trim().to_string())
            .filter(|hint| {
                !hint.is_empty()
                    && hint != term
                    && !targets.base().contains(hint)
                    && !targets.compound().contains(hint)
            })
            .filter(|hint| seen.insert(hint.clone()))
            .take(self.max_hints)
            .collect()
    }
}
