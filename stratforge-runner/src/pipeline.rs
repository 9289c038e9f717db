//! Batch pipeline — Spec → Compile → Submit → Parse → Validate → Rank.
//!
//! Each spec moves through the stages independently and ends in exactly one
//! [`SpecOutcome`]. A spec failing at any stage is a reportable end state,
//! never a batch abort: the batch result carries every outcome, partial
//! batches included. Only infrastructure failures (the service unreachable
//! with retries exhausted, registry io, a split policy no spec could
//! satisfy, artifact writes) abort the whole run.
//!
//! Compilation is pure and runs in parallel. Remote execution is sequential:
//! the service exposes one execution slot, so jobs submit and await one at a
//! time through the shared rate limiter.

use crate::client::ExecutionService;
use crate::config::PipelineConfig;
use crate::limiter::RateLimiter;
use crate::parser::{self, ParseError, StatsRecord};
use crate::ranker::{self, DisqualifyReason, RankCandidate, RankReport};
use crate::report::{self, ReportError, ReportPaths};
use crate::runner::{JobRunner, RunnerError};
use crate::validator::{self, ConsistencyVerdict, ValidateError, ValidationResult};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use stratforge_core::compile::{compile, CompiledProgram};
use stratforge_core::registry::{Registry, RegistryError, SpecStatus};
use stratforge_core::signals::Bar;
use stratforge_core::spec::{SpecError, StrategySpec};
use stratforge_core::{DateRange, SpecId};
use thiserror::Error;

/// Batch-level failures. Per-spec failures are [`SpecOutcome`]s, not errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("split policy rejects the configured date range: {0}")]
    Split(#[from] ValidateError),

    #[error(transparent)]
    Report(#[from] ReportError),

    /// The execution service is unreachable: a call exhausted its retries on
    /// transient errors. No spec can make progress, so the run aborts instead
    /// of burning the retry budget once per remaining spec.
    #[error("execution service unreachable: {0}")]
    Unreachable(#[source] RunnerError),
}

/// Terminal state of one spec after a batch run.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SpecOutcome {
    /// Rejected by local validation before any remote work.
    InvalidSpec { message: String },
    /// The remote service rejected the generated program.
    CompileRejected { message: String },
    /// Remote execution failed (service errors, remote runtime failure).
    Failed { message: String },
    /// The job passed its wall-clock deadline.
    TimedOut { waited_secs: u64 },
    /// The backtest completed but its statistics payload was unusable.
    ParseFailed { message: String },
    /// Validation could not pass or fail the spec; held for manual review.
    Inconclusive { reason: String },
    /// Removed from the ranking by a hard disqualifier.
    Disqualified { reasons: Vec<DisqualifyReason> },
    /// Scored and placed in the ranking.
    Ranked { score: f64 },
}

/// Everything a batch run produces.
#[derive(Debug)]
pub struct BatchReport {
    pub outcomes: Vec<(SpecId, SpecOutcome)>,
    pub report: RankReport,
    pub paths: ReportPaths,
}

/// Failure at any point of one window-scoped rerun.
#[derive(Debug, Error)]
enum StageError {
    #[error(transparent)]
    Spec(#[from] SpecError),
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

pub struct Pipeline<S: ExecutionService> {
    config: PipelineConfig,
    runner: JobRunner<S>,
    registry: Registry,
}

impl<S: ExecutionService> Pipeline<S> {
    pub fn new(service: S, config: PipelineConfig) -> Result<Self, PipelineError> {
        let limiter = Arc::new(RateLimiter::per_minute(config.runner.requests_per_minute));
        let runner = JobRunner::new(
            service,
            limiter,
            config.runner.retry,
            Duration::from_secs(config.runner.poll_interval_secs),
            Duration::from_secs(config.runner.job_timeout_secs),
        );
        let registry = Registry::open(&config.registry_dir)?;
        Ok(Self { config, runner, registry })
    }

    /// Run the full batch. `index` is the reference index series used for
    /// regime labels; an empty slice leaves windows unlabeled.
    pub fn run(
        &self,
        specs: &[StrategySpec],
        index: &[Bar],
    ) -> Result<BatchReport, PipelineError> {
        let full = self.config.date_range();
        // A split the range cannot satisfy would fail every spec identically;
        // reject it up front before any remote work.
        validator::split(full, &self.config.split)?;

        let mut outcomes: BTreeMap<SpecId, SpecOutcome> = BTreeMap::new();

        for spec in specs {
            self.registry.register(spec)?;
        }

        // ─── compile (pure, parallel) ────────────────────────────────
        let compiled: Vec<(SpecId, Result<CompiledProgram, SpecError>)> = specs
            .par_iter()
            .map(|spec| (spec.id(), compile(spec, full)))
            .collect();

        let mut ready: Vec<(&StrategySpec, CompiledProgram)> = Vec::new();
        for ((id, result), spec) in compiled.into_iter().zip(specs) {
            match result {
                Ok(program) => {
                    self.registry.record_status(&id, SpecStatus::Compiled)?;
                    ready.push((spec, program));
                }
                Err(err) => {
                    tracing::warn!(spec_id = %id, error = %err, "spec rejected locally");
                    self.registry.record_status(&id, SpecStatus::Failed)?;
                    outcomes.insert(id, SpecOutcome::InvalidSpec { message: err.to_string() });
                }
            }
        }

        // ─── execute, parse, validate (sequential) ───────────────────
        let mut candidates: Vec<RankCandidate> = Vec::new();
        let mut validations: Vec<(SpecId, ValidationResult)> = Vec::new();

        for (spec, program) in ready {
            let id = program.spec_id.clone();

            let payload = match self.execute(&program) {
                Ok(payload) => payload,
                Err(err) => {
                    if err.is_infrastructure() {
                        self.registry.record_status(&id, SpecStatus::Failed)?;
                        return Err(PipelineError::Unreachable(err));
                    }
                    let (status, outcome) = failure_outcome(err);
                    self.registry.record_status(&id, status)?;
                    outcomes.insert(id, outcome);
                    continue;
                }
            };

            if let Err(err) = parser::parse(&payload) {
                self.registry.record_status(&id, SpecStatus::Failed)?;
                outcomes.insert(id, SpecOutcome::ParseFailed { message: err.to_string() });
                continue;
            }
            self.registry.record_status(&id, SpecStatus::Completed)?;

            let validation = validator::validate(
                full,
                &self.config.split,
                &self.config.consistency,
                &self.config.regime,
                index,
                |range| self.rerun(spec, range),
            )?;
            self.registry.record_status(&id, SpecStatus::Validated)?;

            if let ConsistencyVerdict::Inconclusive { reason } = &validation.verdict {
                outcomes.insert(id.clone(), SpecOutcome::Inconclusive { reason: reason.clone() });
            }
            candidates.push(RankCandidate { spec_id: id.clone(), validation: validation.clone() });
            validations.push((id, validation));
        }

        // ─── rank and persist ────────────────────────────────────────
        let report = ranker::rank(&candidates, &self.config.ranker);
        for entry in &report.ranked {
            self.registry.record_score(&entry.spec_id, entry.score)?;
            self.registry.record_status(&entry.spec_id, SpecStatus::Ranked)?;
            outcomes.insert(entry.spec_id.clone(), SpecOutcome::Ranked { score: entry.score });
        }
        for dq in &report.disqualified {
            outcomes.insert(
                dq.spec_id.clone(),
                SpecOutcome::Disqualified { reasons: dq.reasons.clone() },
            );
        }

        let paths = report::save_report(&self.config.output_dir, &report, &validations)?;
        tracing::info!(
            ranked = report.ranked.len(),
            disqualified = report.disqualified.len(),
            for_review = report.for_review.len(),
            "batch complete"
        );

        Ok(BatchReport {
            outcomes: outcomes.into_iter().collect(),
            report,
            paths,
        })
    }

    /// Submit one program and await its raw statistics payload.
    fn execute(&self, program: &CompiledProgram) -> Result<serde_json::Value, RunnerError> {
        let mut handle = self.runner.submit(program)?;
        self.registry
            .record_status(&program.spec_id, SpecStatus::Submitted)
            .map_err(|err| RunnerError::RemoteFailure {
                spec_id: program.spec_id.clone(),
                message: format!("registry write failed: {err}"),
            })?;
        self.runner.await_result(&mut handle)
    }

    /// Window-scoped rerun: compile the spec against the window's range, run
    /// it, and parse the result.
    fn rerun(&self, spec: &StrategySpec, range: DateRange) -> Result<StatsRecord, StageError> {
        let program = compile(spec, range)?;
        let mut handle = self.runner.submit(&program)?;
        let payload = self.runner.await_result(&mut handle)?;
        Ok(parser::parse(&payload)?)
    }
}

fn failure_outcome(err: RunnerError) -> (SpecStatus, SpecOutcome) {
    match err {
        RunnerError::CompileRejected { message, .. } => {
            (SpecStatus::Failed, SpecOutcome::CompileRejected { message })
        }
        RunnerError::TimedOut { waited_secs, .. } => {
            (SpecStatus::TimedOut, SpecOutcome::TimedOut { waited_secs })
        }
        other => (
            SpecStatus::Failed,
            SpecOutcome::Failed { message: other.to_string() },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{
        BacktestId, BacktestState, CompileId, CompileState, ProjectId, ServiceError,
    };
    use crate::retry::RetryPolicy;
    use crate::validator::SplitPolicy;
    use chrono::NaiveDate;
    use serde_json::{json, Value};
    use stratforge_core::spec::test_fixtures::{rsi_reversion_spec, sma_cross_spec};

    /// Service that compiles everything and finishes every backtest with the
    /// same statistics payload.
    struct FixedService {
        payload: Value,
        reject_compiles: bool,
    }

    impl FixedService {
        fn completing(payload: Value) -> Self {
            Self { payload, reject_compiles: false }
        }
    }

    impl ExecutionService for FixedService {
        fn create_project(&self, _name: &str) -> Result<ProjectId, ServiceError> {
            Ok(ProjectId("p1".into()))
        }

        fn upload_program(
            &self,
            _project: &ProjectId,
            _filename: &str,
            _source: &str,
        ) -> Result<(), ServiceError> {
            Ok(())
        }

        fn start_compile(&self, _project: &ProjectId) -> Result<CompileId, ServiceError> {
            Ok(CompileId("c1".into()))
        }

        fn read_compile(
            &self,
            _project: &ProjectId,
            _compile: &CompileId,
        ) -> Result<CompileState, ServiceError> {
            if self.reject_compiles {
                Ok(CompileState::Error { message: "unsupported construct".into() })
            } else {
                Ok(CompileState::Success)
            }
        }

        fn start_backtest(
            &self,
            _project: &ProjectId,
            _compile: &CompileId,
            _name: &str,
        ) -> Result<BacktestId, ServiceError> {
            Ok(BacktestId("b1".into()))
        }

        fn read_backtest(
            &self,
            _project: &ProjectId,
            _backtest: &BacktestId,
        ) -> Result<BacktestState, ServiceError> {
            Ok(BacktestState::Completed { statistics: self.payload.clone() })
        }
    }

    /// Service that never answers: every call is a connection failure.
    struct DownService;

    impl ExecutionService for DownService {
        fn create_project(&self, _name: &str) -> Result<ProjectId, ServiceError> {
            Err(ServiceError::Network("connection refused".into()))
        }

        fn upload_program(
            &self,
            _project: &ProjectId,
            _filename: &str,
            _source: &str,
        ) -> Result<(), ServiceError> {
            Err(ServiceError::Network("connection refused".into()))
        }

        fn start_compile(&self, _project: &ProjectId) -> Result<CompileId, ServiceError> {
            Err(ServiceError::Network("connection refused".into()))
        }

        fn read_compile(
            &self,
            _project: &ProjectId,
            _compile: &CompileId,
        ) -> Result<CompileState, ServiceError> {
            Err(ServiceError::Network("connection refused".into()))
        }

        fn start_backtest(
            &self,
            _project: &ProjectId,
            _compile: &CompileId,
            _name: &str,
        ) -> Result<BacktestId, ServiceError> {
            Err(ServiceError::Network("connection refused".into()))
        }

        fn read_backtest(
            &self,
            _project: &ProjectId,
            _backtest: &BacktestId,
        ) -> Result<BacktestState, ServiceError> {
            Err(ServiceError::Network("connection refused".into()))
        }
    }

    fn healthy_payload() -> Value {
        json!({
            "SharpeRatio": 1.2,
            "Compounding Annual Return": "12.00%",
            "Drawdown": "8.00%",
            "Win Rate": "60%",
            "Profit Factor": 1.6,
            "Total Trades": 42,
            "Start Equity": "$100,000.00",
            "End Equity": "$126,000.00"
        })
    }

    fn test_config(dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            start_date: NaiveDate::from_ymd_opt(2018, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2022, 12, 31).unwrap(),
            reference_index: "SPY".into(),
            output_dir: dir.join("out"),
            registry_dir: dir.join("registry"),
            service: crate::config::ServiceConfig {
                base_url: "http://localhost".into(),
                token_env: "STRATFORGE_API_TOKEN".into(),
            },
            runner: crate::config::RunnerConfig {
                requests_per_minute: 100_000,
                poll_interval_secs: 0,
                job_timeout_secs: 5,
                retry: RetryPolicy { max_attempts: 2, base_delay_ms: 0, max_delay_ms: 0, jitter: false },
            },
            split: SplitPolicy::default(),
            consistency: Default::default(),
            regime: Default::default(),
            ranker: Default::default(),
        }
    }

    fn outcome_for<'a>(
        report: &'a BatchReport,
        spec: &StrategySpec,
    ) -> &'a SpecOutcome {
        let id = spec.id();
        report
            .outcomes
            .iter()
            .find(|(o, _)| *o == id)
            .map(|(_, outcome)| outcome)
            .unwrap()
    }

    #[test]
    fn healthy_batch_ranks_every_spec() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            FixedService::completing(healthy_payload()),
            test_config(dir.path()),
        )
        .unwrap();

        let specs = vec![rsi_reversion_spec(), sma_cross_spec()];
        let batch = pipeline.run(&specs, &[]).unwrap();

        assert_eq!(batch.report.ranked.len(), 2);
        for spec in &specs {
            assert!(matches!(outcome_for(&batch, spec), SpecOutcome::Ranked { .. }));
        }
        assert!(batch.paths.markdown.exists());
        assert!(batch.paths.summary_csv.exists());
    }

    #[test]
    fn invalid_spec_is_an_outcome_not_a_batch_abort() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            FixedService::completing(healthy_payload()),
            test_config(dir.path()),
        )
        .unwrap();

        let mut broken = rsi_reversion_spec();
        broken.name = "broken".into();
        broken.universe = stratforge_core::spec::Universe::Static { symbols: vec![] };
        let good = sma_cross_spec();

        let batch = pipeline.run(&[broken.clone(), good.clone()], &[]).unwrap();
        assert!(matches!(outcome_for(&batch, &broken), SpecOutcome::InvalidSpec { .. }));
        assert!(matches!(outcome_for(&batch, &good), SpecOutcome::Ranked { .. }));
        assert_eq!(batch.report.ranked.len(), 1);
    }

    #[test]
    fn remote_compile_rejection_is_an_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let service = FixedService {
            payload: healthy_payload(),
            reject_compiles: true,
        };
        let pipeline = Pipeline::new(service, test_config(dir.path())).unwrap();

        let batch = pipeline.run(&[rsi_reversion_spec()], &[]).unwrap();
        assert!(matches!(
            outcome_for(&batch, &rsi_reversion_spec()),
            SpecOutcome::CompileRejected { .. }
        ));
        assert!(batch.report.ranked.is_empty());
    }

    #[test]
    fn unreachable_service_aborts_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(DownService, test_config(dir.path())).unwrap();

        // A dead service must be fatal to the run, not a per-spec `Failed`
        // outcome repeated once per remaining spec.
        let specs = vec![rsi_reversion_spec(), sma_cross_spec()];
        let err = pipeline.run(&specs, &[]).unwrap_err();
        assert!(matches!(err, PipelineError::Unreachable(_)));
    }

    #[test]
    fn missing_trade_count_lands_in_review() {
        let dir = tempfile::tempdir().unwrap();
        // Recognizable metrics but no trade count: validation cannot pass or
        // fail the spec.
        let payload = json!({ "SharpeRatio": 1.0, "Compounding Annual Return": "10%" });
        let pipeline =
            Pipeline::new(FixedService::completing(payload), test_config(dir.path())).unwrap();

        let spec = rsi_reversion_spec();
        let batch = pipeline.run(&[spec.clone()], &[]).unwrap();
        assert!(matches!(outcome_for(&batch, &spec), SpecOutcome::Inconclusive { .. }));
        assert_eq!(batch.report.for_review, vec![spec.id()]);
        assert!(batch.report.ranked.is_empty());
    }

    #[test]
    fn registry_tracks_the_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let registry_dir = config.registry_dir.clone();
        let pipeline =
            Pipeline::new(FixedService::completing(healthy_payload()), config).unwrap();

        let spec = rsi_reversion_spec();
        pipeline.run(&[spec.clone()], &[]).unwrap();

        let registry = Registry::open(registry_dir).unwrap();
        let index = registry.index().unwrap();
        let meta = index.get(&spec.id()).unwrap();
        assert_eq!(meta.status, SpecStatus::Ranked);
        assert!(meta.best_score.is_some());
    }
}
