use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    config::{OptimizerConfig, TargetRanges},
    counter::{self, BoundaryMode},
    targets::{TargetTermSet, TermKind},
};

/// Count of one target term in a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermCountEntry {
    /// The term.
    pub term: String,
    /// Occurrences found.
    pub count: usize,
    /// Whether `count` lies in the range configured for `kind`.
    pub is_valid: bool,
    /// Counting class.
    pub kind: TermKind,
}

/// Scored result for one candidate text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisVerdict {
    /// Non-whitespace characters in the body.
    pub char_count: usize,
    /// `char_count` lies in the configured character range.
    pub is_valid_char_count: bool,
    /// Every entry is valid.
    pub is_valid_terms: bool,
    /// Both the character count and every term are valid.
    pub is_fully_optimized: bool,
    /// Entries keyed by term, base terms first.
    pub entries: IndexMap<String, TermCountEntry>,
}

impl AnalysisVerdict {
    /// Number of entries outside their range.
    #[must_use]
    pub fn invalid_entry_count(&self) -> usize {
        self.entries.values().filter(|entry| !entry.is_valid).count()
    }

    /// Entries outside their range, in entry order.
    pub fn invalid_entries(&self) -> impl Iterator<Item = &TermCountEntry> + '_ {
        self.entries.values().filter(|entry| !entry.is_valid)
    }

    /// Looks up the entry for `term`.
    #[must_use]
    pub fn entry(&self, term: &str) -> Option<&TermCountEntry> {
        self.entries.get(term)
    }
}

/// Scores candidate bodies against the configured ranges.
#[derive(Debug, Clone, Copy)]
pub struct Analyzer {
    ranges: TargetRanges,
    boundary: BoundaryMode,
}

impl Analyzer {
    /// Creates an analyzer from a validated configuration.
    #[must_use]
    pub const fn new(config: &OptimizerConfig) -> Self {
        Self {
            ranges: config.ranges,
            boundary: config.refinement.compound_boundary,
        }
    }

    /// Ranges the analyzer scores against.
    #[must_use]
    pub const fn ranges(&self) -> &TargetRanges {
        &self.ranges
    }

    /// Scores `text`. The caller passes body text only: anything appended after
    /// the body, such as a reference list, must be stripped first.
    ///
    /// A term present in both sets keeps its compound entry.
    #[must_use]
    pub fn analyze(&self, text: &str, targets: &TargetTermSet) -> AnalysisVerdict {
        let char_count = char_count(text);
        let is_valid_char_count = self.ranges.chars.contains(char_count);

        let mut entries = IndexMap::with_capacity(targets.len());
        for (term, kind) in targets.iter() {
            let count = counter::count(term, kind, text, self.boundary);
            let range = match kind {
                TermKind::Base => self.ranges.base,
                TermKind::Compound => self.ranges.compound,
            };
            entries.insert(
                term.to_string(),
                TermCountEntry {
                    term: term.to_string(),
                    count,
                    is_valid: range.contains(count),
                    kind,
                },
            );
        }

        let is_valid_terms = entries.values().all(|entry| entry.is_valid);
        AnalysisVerdict {
            char_count,
            is_valid_char_count,
            is_valid_terms,
            is_fully_optimized: is_valid_char_count && is_valid_terms,
            entries,
        }
    }
}

/// Characters in `text` excluding every whitespace character.
#[must_use]
pub fn char_count(text: &str) -> usize {
    text.chars().filter(|ch| !ch.is_whitespace()).count()
}
