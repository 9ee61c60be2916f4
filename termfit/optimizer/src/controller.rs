//! Bounded generate → score → refine loop.
//!
//! Each attempt walks `Init → Generated → Scored`, then either `Accepted` (the
//! draft already complies) or `Refining → Rescored → Selected`, and finishes in
//! `Done`. A transient provider fault restarts the attempt from `Init` after a
//! fixed backoff while the budget lasts; any other fault, or an exhausted
//! budget, ends the run with [`OptimizeError::GenerationFailed`].

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_logging::LogLevel;
use thiserror::Error;

use crate::{
    advisor::{NoSubstitutions, RefinementAdvisor, SubstitutionSource},
    analysis::{AnalysisVerdict, Analyzer},
    comparator,
    config::{ConfigError, OptimizerConfig},
    provider::{GenerationProvider, GenerationRequest, InitialRequest, ProviderError, RefinementRequest},
    retry::{Attempt, Sleeper, ThreadSleeper},
    targets::{TargetDeriver, TargetTermSet},
    telemetry::OptimizerTelemetry,
    tokenizer::Tokenizer,
};

/// Terminal failures of a run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OptimizeError {
    /// The job cannot be sent to the provider at all.
    #[error("invalid optimization job: {0}")]
    InvalidJob(String),
    /// The provider failed fatally or the retry budget ran out.
    #[error("generation failed for '{keyword}' after {attempts} attempt(s): {source}")]
    GenerationFailed {
        /// Keyword of the failed job.
        keyword: String,
        /// Attempts made, the failing one included.
        attempts: u32,
        /// Last provider fault.
        source: ProviderError,
    },
}

/// Input of one optimization run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationJob {
    /// Target keyword.
    pub keyword: String,
    /// Extra user-supplied terms; spaced ones count as phrases.
    #[serde(default)]
    pub custom_terms: Vec<String>,
    /// Research material passed through to the provider untouched.
    #[serde(default)]
    pub context: Value,
}

impl OptimizationJob {
    /// Job for `keyword` without custom terms or context.
    #[must_use]
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            ..Self::default()
        }
    }

    /// Sets the custom terms.
    #[must_use]
    pub fn with_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.custom_terms = terms.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the provider context.
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

/// Loop states, as recorded in [`LoopOutcome::phases`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    /// About to request a first draft.
    Init,
    /// First draft received.
    Generated,
    /// First draft scored.
    Scored,
    /// First draft complied and was kept as is.
    Accepted,
    /// Rewrite requested.
    Refining,
    /// Rewrite received and scored.
    Rescored,
    /// Better of draft and rewrite picked.
    Selected,
    /// Run finished.
    Done,
}

/// Successful result of a run. Persisting it is up to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopOutcome {
    /// Chosen body text.
    pub selected_text: String,
    /// Score of `selected_text`.
    pub verdict: AnalysisVerdict,
    /// Terms the text was scored against.
    pub targets: TargetTermSet,
    /// Attempts used, the successful one included.
    pub attempts: u32,
    /// Provider calls across all attempts.
    pub provider_calls: u32,
    /// Whether the rewrite replaced the first draft.
    pub refined: bool,
    /// States visited by the successful attempt.
    pub phases: Vec<LoopPhase>,
}

#[derive(Debug)]
struct Candidate {
    text: String,
    verdict: AnalysisVerdict,
}

enum LoopState {
    Init,
    Generated(String),
    Scored(Candidate),
    Accepted(Candidate),
    Refining(Candidate),
    Rescored {
        original: Candidate,
        refined: Candidate,
    },
    Selected {
        candidate: Candidate,
        refined: bool,
    },
}

impl LoopState {
    const fn phase(&self) -> LoopPhase {
        match self {
            Self::Init => LoopPhase::Init,
            Self::Generated(_) => LoopPhase::Generated,
            Self::Scored(_) => LoopPhase::Scored,
            Self::Accepted(_) => LoopPhase::Accepted,
            Self::Refining(_) => LoopPhase::Refining,
            Self::Rescored { .. } => LoopPhase::Rescored,
            Self::Selected { .. } => LoopPhase::Selected,
        }
    }
}

struct Settled {
    candidate: Candidate,
    refined: bool,
    targets: TargetTermSet,
    phases: Vec<LoopPhase>,
}

/// Orchestrates provider calls, scoring, comparison and retries.
#[derive(Clone)]
pub struct OptimizationLoop {
    config: OptimizerConfig,
    tokenizer: Arc<dyn Tokenizer>,
    deriver: TargetDeriver,
    analyzer: Analyzer,
    advisor: RefinementAdvisor,
    provider: Arc<dyn GenerationProvider>,
    sleeper: Arc<dyn Sleeper>,
    telemetry: Option<OptimizerTelemetry>,
}

impl fmt::Debug for OptimizationLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimizationLoop")
            .field("config", &self.config)
            .field("telemetry", &self.telemetry)
            .finish_non_exhaustive()
    }
}

impl OptimizationLoop {
    /// Creates a loop; the configuration is validated here.
    pub fn new(
        config: OptimizerConfig,
        tokenizer: Arc<dyn Tokenizer>,
        provider: Arc<dyn GenerationProvider>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            deriver: TargetDeriver::new(Arc::clone(&tokenizer), None),
            tokenizer,
            analyzer: Analyzer::new(&config),
            advisor: RefinementAdvisor::new(
                config.ranges,
                config.refinement.max_substitutions,
                Arc::new(NoSubstitutions),
            ),
            provider,
            sleeper: Arc::new(ThreadSleeper),
            telemetry: None,
        })
    }

    /// Uses `source` for substitution hints.
    #[must_use]
    pub fn with_substitutions(mut self, source: Arc<dyn SubstitutionSource>) -> Self {
        self.advisor = RefinementAdvisor::new(
            self.config.ranges,
            self.config.refinement.max_substitutions,
            source,
        );
        self
    }

    /// Replaces the backoff sleeper.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Attaches telemetry to the loop and its target deriver.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: OptimizerTelemetry) -> Self {
        self.deriver = TargetDeriver::new(Arc::clone(&self.tokenizer), Some(telemetry.clone()));
        self.telemetry = Some(telemetry);
        self
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Runs one job to completion.
    pub fn run(&self, job: &OptimizationJob) -> Result<LoopOutcome, OptimizeError> {
        let keyword = job.keyword.trim();
        if keyword.is_empty() {
            return Err(OptimizeError::InvalidJob("keyword is empty".into()));
        }

        let mut attempt = Attempt::FIRST;
        let mut provider_calls = 0;
        loop {
            tracing::debug!(keyword, %attempt, "optimization attempt");
            self.log(
                LogLevel::Info,
                "optimizer.attempt.started",
                json!({ "keyword": keyword, "attempt": attempt.number() }),
            );
            let fault = match self.run_attempt(job, keyword, &mut provider_calls) {
                Ok(settled) => return Ok(self.finish(keyword, attempt, provider_calls, settled)),
                Err(fault) => fault,
            };
            let next = if fault.is_transient() {
                attempt.next_within(self.config.retry.max_attempts)
            } else {
                None
            };
            let Some(next) = next else {
                return Err(self.fail(keyword, attempt, fault));
            };
            tracing::warn!(keyword, %attempt, error = %fault, "transient provider fault, retrying");
            self.log(
                LogLevel::Warn,
                "optimizer.retry.scheduled",
                json!({
                    "keyword": keyword,
                    "attempt": attempt.number(),
                    "backoff_ms": self.config.retry.backoff_ms,
                    "error": fault.to_string(),
                }),
            );
            self.sleeper.sleep(self.config.retry.backoff());
            attempt = next;
        }
    }

    fn run_attempt(
        &self,
        job: &OptimizationJob,
        keyword: &str,
        provider_calls: &mut u32,
    ) -> Result<Settled, ProviderError> {
        let targets = self.deriver.derive(keyword, &job.custom_terms);
        let mut state = LoopState::Init;
        let mut phases = vec![state.phase()];
        loop {
            state = match state {
                LoopState::Init => {
                    let request = GenerationRequest::Initial(InitialRequest {
                        keyword: keyword.to_string(),
                        targets: targets.clone(),
                        ranges: self.config.ranges,
                        context: job.context.clone(),
                    });
                    *provider_calls += 1;
                    LoopState::Generated(self.provider.generate(&request)?)
                }
                LoopState::Generated(text) => {
                    let verdict = self.analyzer.analyze(&text, &targets);
                    self.log_verdict("initial", &verdict);
                    LoopState::Scored(Candidate { text, verdict })
                }
                LoopState::Scored(candidate) => {
                    if candidate.verdict.is_fully_optimized {
                        LoopState::Accepted(candidate)
                    } else {
                        LoopState::Refining(candidate)
                    }
                }
                LoopState::Refining(original) => {
                    let advice = self.advisor.advise(&original.verdict, &targets);
                    let request = GenerationRequest::Refine(RefinementRequest {
                        keyword: keyword.to_string(),
                        targets: targets.clone(),
                        ranges: self.config.ranges,
                        previous_text: original.text.clone(),
                        verdict: original.verdict.clone(),
                        advice,
                        context: job.context.clone(),
                    });
                    *provider_calls += 1;
                    let text = self.provider.generate(&request)?;
                    let verdict = self.analyzer.analyze(&text, &targets);
                    self.log_verdict("refined", &verdict);
                    LoopState::Rescored {
                        original,
                        refined: Candidate { text, verdict },
                    }
                }
                LoopState::Rescored { original, refined } => {
                    let take = comparator::is_better(
                        &refined.verdict,
                        &original.verdict,
                        &self.config.ranges.chars,
                    );
                    self.log(
                        LogLevel::Info,
                        "optimizer.refinement.selected",
                        json!({ "refined": take }),
                    );
                    LoopState::Selected {
                        candidate: if take { refined } else { original },
                        refined: take,
                    }
                }
                LoopState::Accepted(candidate) => {
                    phases.push(LoopPhase::Done);
                    return Ok(Settled {
                        candidate,
                        refined: false,
                        targets,
                        phases,
                    });
                }
                LoopState::Selected { candidate, refined } => {
                    phases.push(LoopPhase::Done);
                    return Ok(Settled {
                        candidate,
                        refined,
                        targets,
                        phases,
                    });
                }
            };
            phases.push(state.phase());
        }
    }

    fn finish(
        &self,
        keyword: &str,
        attempt: Attempt,
        provider_calls: u32,
        settled: Settled,
    ) -> LoopOutcome {
        let Settled {
            candidate,
            refined,
            targets,
            phases,
        } = settled;
        let summary = json!({
            "keyword": keyword,
            "attempts": attempt.number(),
            "provider_calls": provider_calls,
            "refined": refined,
            "fully_optimized": candidate.verdict.is_fully_optimized,
            "char_count": candidate.verdict.char_count,
            "invalid_terms": candidate.verdict.invalid_entry_count(),
        });
        self.log(LogLevel::Info, "optimizer.run.completed", summary.clone());
        self.emit("optimization.completed", summary);
        LoopOutcome {
            selected_text: candidate.text,
            verdict: candidate.verdict,
            targets,
            attempts: attempt.number(),
            provider_calls,
            refined,
            phases,
        }
    }

    fn fail(&self, keyword: &str, attempt: Attempt, fault: ProviderError) -> OptimizeError {
        tracing::warn!(keyword, %attempt, error = %fault, "optimization failed");
        let payload = json!({
            "keyword": keyword,
            "attempts": attempt.number(),
            "error": fault,
        });
        self.log(LogLevel::Error, "optimizer.run.failed", payload.clone());
        self.emit("optimization.failed", payload);
        OptimizeError::GenerationFailed {
            keyword: keyword.to_string(),
            attempts: attempt.number(),
            source: fault,
        }
    }

    fn log_verdict(&self, stage: &str, verdict: &AnalysisVerdict) {
        self.log(
            LogLevel::Info,
            "optimizer.candidate.scored",
            json!({
                "stage": stage,
                "char_count": verdict.char_count,
                "valid_chars": verdict.is_valid_char_count,
                "valid_terms": verdict.is_valid_terms,
                "invalid_terms": verdict.invalid_entry_count(),
            }),
        );
    }

    fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(tel) = &self.telemetry {
            let _ = tel.log(level, message, metadata);
        }
    }

    fn emit(&self, event_type: &str, payload: Value) {
        if let Some(tel) = &self.telemetry {
            let _ = tel.event(event_type, payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, time::Duration};

    use parking_lot::Mutex;
    use shared_event_bus::MemoryEventBus;
    use shared_logging::MemoryLogger;

    use super::*;
    use crate::{
        advisor::SubstitutionTable,
        analysis::tests::compliant_body,
        config::RetryPolicy,
        targets::tests::FixedTokenizer,
    };

    #[derive(Default)]
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<String, ProviderError>>>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                requests: Mutex::default(),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().len()
        }
    }

    impl GenerationProvider for ScriptedProvider {
        fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
            self.requests.lock().push(request.clone());
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::Fatal("script exhausted".into())))
        }
    }

    struct AlwaysOverloaded(Mutex<usize>);

    impl GenerationProvider for AlwaysOverloaded {
        fn generate(&self, _request: &GenerationRequest) -> Result<String, ProviderError> {
            *self.0.lock() += 1;
            Err(ProviderError::classify("Error code: 529 overloaded_error"))
        }
    }

    #[derive(Default)]
    struct RecordingSleeper(Mutex<Vec<Duration>>);

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.0.lock().push(duration);
        }
    }

    fn job() -> OptimizationJob {
        OptimizationJob::new("엔진오일종류").with_context(json!({ "news": [] }))
    }

    fn build(provider: Arc<dyn GenerationProvider>, sleeper: Arc<RecordingSleeper>) -> OptimizationLoop {
        OptimizationLoop::new(OptimizerConfig::default(), FixedTokenizer::engine_oil(), provider)
            .unwrap()
            .with_sleeper(sleeper)
    }

    fn transient() -> ProviderError {
        ProviderError::Transient("overloaded_error".into())
    }

    #[test]
    fn compliant_first_draft_needs_one_call() {
        let provider = ScriptedProvider::new(vec![Ok(compliant_body())]);
        let sleeper = Arc::new(RecordingSleeper::default());
        let outcome = build(provider.clone(), sleeper.clone()).run(&job()).unwrap();
        assert_eq!(provider.calls(), 1);
        assert_eq!(outcome.provider_calls, 1);
        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.refined);
        assert!(outcome.verdict.is_fully_optimized);
        assert_eq!(outcome.selected_text, compliant_body());
        assert_eq!(
            outcome.phases,
            vec![
                LoopPhase::Init,
                LoopPhase::Generated,
                LoopPhase::Scored,
                LoopPhase::Accepted,
                LoopPhase::Done
            ]
        );
        assert!(sleeper.0.lock().is_empty());
    }

    #[test]
    fn better_rewrite_replaces_draft() {
        let provider = ScriptedProvider::new(vec![Ok("엔진오일종류 초안".into()), Ok(compliant_body())]);
        let outcome = build(provider.clone(), Arc::default()).run(&job()).unwrap();
        assert_eq!(provider.calls(), 2);
        assert!(outcome.refined);
        assert!(outcome.verdict.is_fully_optimized);
        assert_eq!(
            outcome.phases,
            vec![
                LoopPhase::Init,
                LoopPhase::Generated,
                LoopPhase::Scored,
                LoopPhase::Refining,
                LoopPhase::Rescored,
                LoopPhase::Selected,
                LoopPhase::Done
            ]
        );

        let requests = provider.requests.lock();
        let GenerationRequest::Refine(refine) = &requests[1] else {
            panic!("second call should be a refinement");
        };
        assert_eq!(refine.previous_text, "엔진오일종류 초안");
        assert_eq!(refine.advice.under_used.len(), 3);
        assert_eq!(refine.context, json!({ "news": [] }));
        assert!(!requests[0].is_refinement());
    }

    #[test]
    fn worse_rewrite_keeps_draft_without_further_calls() {
        let draft = format!("{} 엔진오일종류", "엔진 오일 종류 ".repeat(16));
        let provider = ScriptedProvider::new(vec![Ok(draft.clone()), Ok("엉망".into())]);
        let outcome = build(provider.clone(), Arc::default()).run(&job()).unwrap();
        assert_eq!(provider.calls(), 2);
        assert!(!outcome.refined);
        assert_eq!(outcome.selected_text, draft);
        assert!(!outcome.verdict.is_fully_optimized);
        assert_eq!(outcome.attempts, 1);
    }

    #[test]
    fn retry_budget_is_exhausted_on_persistent_overload() {
        let provider = Arc::new(AlwaysOverloaded(Mutex::new(0)));
        let sleeper = Arc::new(RecordingSleeper::default());
        let err = build(provider.clone(), sleeper.clone()).run(&job()).unwrap_err();
        assert_eq!(*provider.0.lock(), 3);
        match err {
            OptimizeError::GenerationFailed {
                keyword,
                attempts,
                source,
            } => {
                assert_eq!(keyword, "엔진오일종류");
                assert_eq!(attempts, 3);
                assert!(source.is_transient());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*sleeper.0.lock(), vec![Duration::from_secs(5); 2]);
    }

    #[test]
    fn fatal_fault_is_not_retried() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::Fatal("invalid_request".into()))]);
        let sleeper = Arc::new(RecordingSleeper::default());
        let err = build(provider.clone(), sleeper.clone()).run(&job()).unwrap_err();
        assert_eq!(provider.calls(), 1);
        assert!(sleeper.0.lock().is_empty());
        assert!(matches!(err, OptimizeError::GenerationFailed { attempts: 1, .. }));
    }

    #[test]
    fn oversized_prompt_rejection_is_not_retried() {
        let rejection = "invalid_request_error: prompt is too long: 215290 tokens > 200000 maximum";
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::classify(rejection)),
            Ok(compliant_body()),
        ]);
        let sleeper = Arc::new(RecordingSleeper::default());
        let err = build(provider.clone(), sleeper.clone()).run(&job()).unwrap_err();
        assert_eq!(provider.calls(), 1);
        assert!(sleeper.0.lock().is_empty());
        assert!(matches!(
            err,
            OptimizeError::GenerationFailed { attempts: 1, source: ProviderError::Fatal(_), .. }
        ));
    }

    #[test]
    fn transient_fault_then_success() {
        let provider = ScriptedProvider::new(vec![Err(transient()), Ok(compliant_body())]);
        let sleeper = Arc::new(RecordingSleeper::default());
        let outcome = build(provider.clone(), sleeper.clone()).run(&job()).unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.provider_calls, 2);
        assert_eq!(sleeper.0.lock().len(), 1);
    }

    #[test]
    fn transient_fault_during_refinement_restarts_from_init() {
        let provider = ScriptedProvider::new(vec![
            Ok("초안".into()),
            Err(transient()),
            Ok(compliant_body()),
        ]);
        let outcome = build(provider.clone(), Arc::default()).run(&job()).unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.provider_calls, 3);
        assert!(!outcome.refined);
        let requests = provider.requests.lock();
        assert!(!requests[2].is_refinement());
    }

    #[test]
    fn empty_keyword_is_rejected_without_calls() {
        let provider = ScriptedProvider::new(vec![Ok(compliant_body())]);
        let err = build(provider.clone(), Arc::default())
            .run(&OptimizationJob::new("   "))
            .unwrap_err();
        assert!(matches!(err, OptimizeError::InvalidJob(_)));
        assert_eq!(provider.calls(), 0);
    }

    #[test]
    fn custom_retry_policy_is_honoured() {
        let config = OptimizerConfig::default()
            .with_retry(RetryPolicy {
                max_attempts: 1,
                backoff_ms: 10,
            })
            .unwrap();
        let provider = Arc::new(AlwaysOverloaded(Mutex::new(0)));
        let sleeper = Arc::new(RecordingSleeper::default());
        let err = OptimizationLoop::new(config, FixedTokenizer::engine_oil(), provider.clone())
            .unwrap()
            .with_sleeper(sleeper.clone())
            .run(&job())
            .unwrap_err();
        assert!(matches!(err, OptimizeError::GenerationFailed { attempts: 1, .. }));
        assert_eq!(*provider.0.lock(), 1);
        assert!(sleeper.0.lock().is_empty());
    }

    #[test]
    fn substitution_hints_reach_the_refinement_request() {
        let draft = "엔진 ".repeat(30);
        let provider = ScriptedProvider::new(vec![Ok(draft), Ok("엔진".into())]);
        let table = SubstitutionTable::new().with_term("엔진", ["기관", "모터"]);
        let optimizer = build(provider.clone(), Arc::default()).with_substitutions(Arc::new(table));
        optimizer.run(&job()).unwrap();
        let requests = provider.requests.lock();
        let GenerationRequest::Refine(refine) = &requests[1] else {
            panic!("second call should be a refinement");
        };
        assert!(refine.advice.over_used.contains("엔진"));
        assert_eq!(refine.advice.substitution_hints["엔진"], vec!["기관", "모터"]);
    }

    #[test]
    fn telemetry_records_outcome() {
        let logs = Arc::new(MemoryLogger::default());
        let bus = Arc::new(MemoryEventBus::new(8));
        let telemetry = OptimizerTelemetry::builder("optimizer")
            .log_sink(logs.clone())
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let provider = ScriptedProvider::new(vec![Err(transient()), Ok(compliant_body())]);
        build(provider, Arc::default())
            .with_telemetry(telemetry)
            .run(&job())
            .unwrap();
        assert_eq!(logs.find("optimizer.attempt.started").len(), 2);
        assert_eq!(logs.find("optimizer.retry.scheduled").len(), 1);
        assert_eq!(logs.find("optimizer.run.completed").len(), 1);
        let completed = bus.events_of("optimization.completed");
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].payload["attempts"], json!(2));
    }
}
