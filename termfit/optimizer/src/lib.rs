#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Keyword-driven text optimization: derives target terms, counts them in
//! candidate text, scores and compares candidates, and drives a bounded
//! generate/refine loop against an injected generation provider.

/// Count ranges, retry budget and refinement knobs.
pub mod config;

/// Script-class detection for boundary checks.
pub mod script;

/// Segmentation backends.
pub mod tokenizer;

/// Target term derivation.
pub mod targets;

/// Occurrence counting.
pub mod counter;

/// Candidate scoring.
pub mod analysis;

/// Candidate preference.
pub mod comparator;

/// Refinement advice and substitution hints.
pub mod advisor;

/// Generation backend interface.
pub mod provider;

/// Attempt counting and backoff.
pub mod retry;

/// Generate/refine loop.
pub mod controller;

/// Structured logs and outcome events.
pub mod telemetry;

pub use advisor::{
    CharGuidance, NoSubstitutions, RefinementAdvice, RefinementAdvisor, SubstitutionSource,
    SubstitutionTable, TermIssue,
};
pub use analysis::{char_count, AnalysisVerdict, Analyzer, TermCountEntry};
pub use config::{ConfigError, OptimizerConfig, RefinementSettings, RetryPolicy, TargetRanges, TermRange};
pub use counter::{count, BoundaryMode, MatchPolicy};
pub use controller::{LoopOutcome, LoopPhase, OptimizationJob, OptimizationLoop, OptimizeError};
pub use provider::{
    GenerationProvider, GenerationRequest, InitialRequest, ProviderError, RefinementRequest,
};
pub use retry::{Attempt, Sleeper, ThreadSleeper};
pub use script::ScriptClass;
pub use targets::{TargetDeriver, TargetTermSet, TermKind};
pub use telemetry::{OptimizerTelemetry, OptimizerTelemetryBuilder};
pub use tokenizer::{LexiconTokenizer, ScriptRunTokenizer, TokenizationError, Tokenizer};
