//! Occurrence counting under the two matching policies.
//!
//! Base terms count as plain substrings. Compound terms count only when the
//! match is not glued to a longer run: for spaceless scripts the neighbouring
//! characters must not belong to the term's script, for whitespace-delimited
//! scripts the match must sit on word boundaries. Phrases with an internal space
//! are matched literally. No case folding or normalization happens here.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{script::ScriptClass, targets::TermKind};

/// Which neighbours a script-bounded compound match must keep clear.
///
/// `Both` is the boundary rule proper. Some worked counting examples treat a
/// compound at the start of a longer same-script run as a hit ("엔진오일종류"
/// counted once in "엔진오일종류대백과"); `Leading` reproduces those.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryMode {
    /// Neither the preceding nor the following character may share the script.
    #[default]
    Both,
    /// Only the preceding character is checked.
    Leading,
}

/// Matching rule resolved for one term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Any non-overlapping occurrence.
    Substring,
    /// Occurrence not adjacent to letters of the same spaceless script.
    ScriptBounded(ScriptClass),
    /// Exact phrase, spaces included.
    Literal,
    /// Occurrence on Unicode word boundaries.
    WordBounded,
}

impl MatchPolicy {
    /// Resolves the policy for `term` counted as `kind`.
    #[must_use]
    pub fn for_term(term: &str, kind: TermKind) -> Self {
        if kind == TermKind::Base {
            return Self::Substring;
        }
        if term.trim().contains(char::is_whitespace) {
            return Self::Literal;
        }
        ScriptClass::dominant(term).map_or(Self::WordBounded, Self::ScriptBounded)
    }
}

/// Counts occurrences of `term` in `text` for the given kind.
#[must_use]
pub fn count(term: &str, kind: TermKind, text: &str, mode: BoundaryMode) -> usize {
    count_with(term, MatchPolicy::for_term(term, kind), text, mode)
}

/// Counts occurrences of `term` under an explicit policy.
#[must_use]
pub fn count_with(term: &str, policy: MatchPolicy, text: &str, mode: BoundaryMode) -> usize {
    if term.is_empty() {
        return 0;
    }
    match policy {
        MatchPolicy::Substring | MatchPolicy::Literal => text.matches(term).count(),
        MatchPolicy::ScriptBounded(class) => count_script_bounded(term, text, class, mode),
        MatchPolicy::WordBounded => count_word_bounded(term, text),
    }
}

fn count_script_bounded(term: &str, text: &str, class: ScriptClass, mode: BoundaryMode) -> usize {
    let same_script = |ch: Option<char>| ch.and_then(ScriptClass::of) == Some(class);
    let mut total = 0;
    let mut from = 0;
    while let Some(offset) = text[from..].find(term) {
        let start = from + offset;
        let end = start + term.len();
        let before = text[..start].chars().next_back();
        let after = text[end..].chars().next();
        let clear = !same_script(before) && (mode == BoundaryMode::Leading || !same_script(after));
        if clear {
            total += 1;
            from = end;
        } else {
            // retry one character further so shifted candidates are still seen
            from = start + text[start..].chars().next().map_or(1, char::len_utf8);
        }
    }
    total
}

// compiled word-boundary patterns, keyed by term
static WORD_PATTERNS: Lazy<Mutex<HashMap<String, Regex>>> = Lazy::new(Mutex::default);

fn word_pattern(term: &str) -> Option<Regex> {
    let mut patterns = WORD_PATTERNS.lock();
    if let Some(re) = patterns.get(term) {
        return Some(re.clone());
    }
    let re = Regex::new(&format!(r"\b{}\b", regex::escape(term))).ok()?;
    patterns.insert(term.to_string(), re.clone());
    Some(re)
}

fn count_word_bounded(term: &str, text: &str) -> usize {
    word_pattern(term).map_or(0, |re| re.find_iter(text).count())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTH: BoundaryMode = BoundaryMode::Both;
    const LEADING: BoundaryMode = BoundaryMode::Leading;

    #[test]
    fn policy_selection() {
        assert_eq!(MatchPolicy::for_term("엔진", TermKind::Base), MatchPolicy::Substring);
        assert_eq!(
            MatchPolicy::for_term("엔진오일", TermKind::Compound),
            MatchPolicy::ScriptBounded(ScriptClass::Hangul)
        );
        assert_eq!(
            MatchPolicy::for_term("엔진 오일", TermKind::Compound),
            MatchPolicy::Literal
        );
        assert_eq!(
            MatchPolicy::for_term("engine oil", TermKind::Compound),
            MatchPolicy::Literal
        );
        assert_eq!(
            MatchPolicy::for_term("synthetic", TermKind::Compound),
            MatchPolicy::WordBounded
        );
    }

    #[test]
    fn base_terms_count_inside_runs() {
        let text = "엔진오일종류";
        for term in ["엔진", "오일", "종류"] {
            assert_eq!(count(term, TermKind::Base, text, BOTH), 1, "{term}");
        }
        assert_eq!(count("엔진", TermKind::Base, "엔진엔진 엔진오일", BOTH), 3);
    }

    #[test]
    fn base_counting_is_non_overlapping() {
        assert_eq!(count("가가", TermKind::Base, "가가가", BOTH), 1);
        assert_eq!(count("aa", TermKind::Base, "aaaa", BOTH), 2);
    }

    #[test]
    fn compound_whole_run_matches() {
        assert_eq!(count("엔진오일종류", TermKind::Compound, "엔진오일종류", BOTH), 1);
        assert_eq!(
            count("엔진오일종류", TermKind::Compound, "(엔진오일종류), 엔진오일종류!", BOTH),
            2
        );
    }

    #[test]
    fn compound_rejected_when_trailing_run_continues() {
        assert_eq!(count("엔진오일", TermKind::Compound, "엔진오일종류", BOTH), 0);
        assert_eq!(count("엔진오일종류", TermKind::Compound, "엔진오일종류대백과", BOTH), 0);
        // a particle attached to the noun is Hangul too
        assert_eq!(count("엔진오일", TermKind::Compound, "엔진오일은 중요하다", BOTH), 0);
    }

    #[test]
    fn compound_rejected_when_leading_run_continues() {
        assert_eq!(count("오일종류", TermKind::Compound, "엔진오일종류", BOTH), 0);
        assert_eq!(count("오일종류", TermKind::Compound, "엔진오일종류", LEADING), 0);
        assert_eq!(count("오일종류", TermKind::Compound, "합성 오일종류", BOTH), 1);
    }

    #[test]
    fn leading_mode_accepts_run_prefix() {
        assert_eq!(count("엔진오일", TermKind::Compound, "엔진오일종류", LEADING), 1);
        assert_eq!(
            count("엔진오일종류", TermKind::Compound, "엔진오일종류대백과", LEADING),
            1
        );
    }

    #[test]
    fn compound_neighbours_of_other_scripts_are_boundaries() {
        let text = "5W30엔진오일, 엔진오일(합성), engine엔진오일";
        assert_eq!(count("엔진오일", TermKind::Compound, text, BOTH), 3);
        // Han neighbour does not block a Hangul term
        assert_eq!(count("엔진오일", TermKind::Compound, "油엔진오일油", BOTH), 1);
    }

    #[test]
    fn rejected_candidate_does_not_hide_later_match() {
        // first candidate at 0 is glued to the run; the second one is free
        assert_eq!(count("가가", TermKind::Compound, "가가가 가가", BOTH), 1);
    }

    #[test]
    fn spaced_phrase_matches_literally() {
        assert_eq!(count("엔진 오일", TermKind::Compound, "새엔진 오일을 교체", BOTH), 1);
        assert_eq!(count("engine oil", TermKind::Compound, "engine oils", BOTH), 1);
    }

    #[test]
    fn latin_compound_uses_word_boundaries() {
        let text = "Synthetic oil beats semisynthetic; synthetic is case-sensitive. Synthetic.";
        assert_eq!(count("Synthetic", TermKind::Compound, text, BOTH), 2);
        assert_eq!(count("oil", TermKind::Compound, "oil, oily, toil, oil", BOTH), 2);
        // Hangul letters are word characters, so no boundary before them
        assert_eq!(count("5W30", TermKind::Compound, "5W30 or 5W30엔진", BOTH), 1);
    }

    #[test]
    fn word_patterns_are_compiled_once_per_term() {
        let term = "viscosity";
        for text in ["viscosity chart", "a viscosity, then viscosity"] {
            let _ = count(term, TermKind::Compound, text, BOTH);
        }
        let cached = WORD_PATTERNS.lock().get(term).map(|re| re.as_str().to_string());
        assert_eq!(cached.as_deref(), Some(r"\bviscosity\b"));
        assert_eq!(count(term, TermKind::Compound, "viscosity viscosities", BOTH), 1);
    }

    #[test]
    fn default_mode_is_both() {
        assert_eq!(BoundaryMode::default(), BOTH);
        assert_eq!(
            count("엔진오일종류", TermKind::Compound, "엔진오일종류대백과", BoundaryMode::default()),
            0
        );
    }

    #[test]
    fn kana_terms_respect_their_own_script() {
        assert_eq!(count("オイル", TermKind::Compound, "エンジンオイル", BOTH), 0);
        assert_eq!(count("オイル", TermKind::Compound, "エンジン・オイル", BOTH), 1);
    }

    #[test]
    fn empty_term_counts_zero() {
        assert_eq!(count("", TermKind::Base, "anything", BOTH), 0);
        assert_eq!(count("", TermKind::Compound, "anything", BOTH), 0);
    }
}
