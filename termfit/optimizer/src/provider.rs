use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    advisor::RefinementAdvice, analysis::AnalysisVerdict, config::TargetRanges,
    targets::TargetTermSet,
};

/// Failure reported by the text generation backend.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class", content = "message", rename_all = "snake_case")]
pub enum ProviderError {
    /// Overload or congestion; the same request may succeed later.
    #[error("provider overloaded: {0}")]
    Transient(String),
    /// Rejected or malformed request; retrying will not help.
    #[error("provider rejected request: {0}")]
    Fatal(String),
}

const TRANSIENT_MARKERS: &[&str] = &["overloaded", "rate limit", "rate_limit", "too many requests"];

// status codes only as standalone numbers, never inside token counts or ids
static TRANSIENT_STATUS_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\b(?:429|529)\b").ok());

impl ProviderError {
    /// Classifies a raw backend message by its overload markers.
    #[must_use]
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();
        if TRANSIENT_MARKERS.iter().any(|marker| lowered.contains(marker))
            || TRANSIENT_STATUS_RE
                .as_ref()
                .is_some_and(|re| re.is_match(&lowered))
        {
            Self::Transient(message)
        } else {
            Self::Fatal(message)
        }
    }

    /// Whether a retry may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// First-draft request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialRequest {
    /// Target keyword.
    pub keyword: String,
    /// Terms the draft should hit.
    pub targets: TargetTermSet,
    /// Ranges the draft is scored against.
    pub ranges: TargetRanges,
    /// Caller-supplied research material; opaque to the engine.
    #[serde(default)]
    pub context: serde_json::Value,
}

/// Rewrite request for a non-compliant draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementRequest {
    /// Target keyword.
    pub keyword: String,
    /// Terms the rewrite should hit.
    pub targets: TargetTermSet,
    /// Ranges the rewrite is scored against.
    pub ranges: TargetRanges,
    /// Draft being refined.
    pub previous_text: String,
    /// Score of the draft.
    pub verdict: AnalysisVerdict,
    /// What to change.
    pub advice: RefinementAdvice,
    /// Same context the draft was generated from.
    #[serde(default)]
    pub context: serde_json::Value,
}

/// Request descriptor handed to a [`GenerationProvider`]. Turning it into a
/// prompt is the provider's business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum GenerationRequest {
    /// First draft.
    Initial(InitialRequest),
    /// Rewrite of a scored draft.
    Refine(RefinementRequest),
}

impl GenerationRequest {
    /// Keyword the request is for.
    #[must_use]
    pub fn keyword(&self) -> &str {
        match self {
            Self::Initial(request) => &request.keyword,
            Self::Refine(request) => &request.keyword,
        }
    }

    /// Whether this is a refinement request.
    #[must_use]
    pub const fn is_refinement(&self) -> bool {
        matches!(self, Self::Refine(_))
    }
}

/// External text generation backend.
pub trait GenerationProvider: Send + Sync {
    /// Produces candidate body text for `request`.
    fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError>;
}
