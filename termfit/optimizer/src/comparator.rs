//! Preference between two scored candidates.
//!
//! The cascade ranks full optimization, then term validity, then length
//! validity, then fewer invalid entries, then closeness to the middle of the
//! character range. The first rule that tells the two apart decides.

use std::cmp::Ordering;

use crate::{analysis::AnalysisVerdict, config::TermRange};

/// Orders `candidate` relative to `baseline`: `Greater` means the candidate is
/// preferred, `Equal` means neither is.
#[must_use]
pub fn compare(
    candidate: &AnalysisVerdict,
    baseline: &AnalysisVerdict,
    char_range: &TermRange,
) -> Ordering {
    candidate
        .is_fully_optimized
        .cmp(&baseline.is_fully_optimized)
        .then_with(|| {
            if baseline.is_fully_optimized {
                // both perfect: keep the baseline
                return Ordering::Equal;
            }
            candidate
                .is_valid_terms
                .cmp(&baseline.is_valid_terms)
                .then(candidate.is_valid_char_count.cmp(&baseline.is_valid_char_count))
                .then_with(|| {
                    baseline
                        .invalid_entry_count()
                        .cmp(&candidate.invalid_entry_count())
                })
                .then_with(|| {
                    char_range
                        .midpoint_distance(baseline.char_count)
                        .cmp(&char_range.midpoint_distance(candidate.char_count))
                })
        })
}

/// Whether `candidate` should replace `baseline`. A fully optimized baseline is
/// never displaced and ties keep the baseline.
#[must_use]
pub fn is_better(
    candidate: &AnalysisVerdict,
    baseline: &AnalysisVerdict,
    char_range: &TermRange,
) -> bool {
    !baseline.is_fully_optimized && compare(candidate, baseline, char_range) == Ordering::Greater
}
