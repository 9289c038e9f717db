//! Remote job runner — drives programs through the execution service.
//!
//! The runner owns each job's state machine and is the single writer of its
//! state. All remote calls go through the shared rate limiter and the retry
//! policy; submission may pipeline across jobs, but the service is assumed to
//! expose one execution slot, so callers typically submit and await one
//! backtest at a time while polls for already-submitted jobs interleave
//! freely.
//!
//! Timeouts are explicit: a job past its wall-clock deadline gets one final
//! reconciliation poll and then transitions to `TimedOut`. It is reported,
//! never silently dropped.

use crate::client::{
    BacktestId, BacktestState, CompileId, CompileState, ExecutionService, ProjectId, ServiceError,
};
use crate::job::{InvalidTransition, Job, JobEvent, JobState};
use crate::limiter::RateLimiter;
use crate::retry::RetryPolicy;
use serde_json::Value;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use stratforge_core::{CompiledProgram, SpecId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// Transient retries exhausted or a fatal service rejection.
    #[error("service call failed for spec {spec_id}: {source}")]
    Service {
        spec_id: SpecId,
        #[source]
        source: ServiceError,
    },

    /// The remote service rejected the generated program. Not retried: this
    /// is a compiler defect or an unsupported construct, not a flaky network.
    #[error("remote compile rejected for spec {spec_id}: {message}")]
    CompileRejected { spec_id: SpecId, message: String },

    /// The backtest itself errored remotely.
    #[error("remote run failed for spec {spec_id}: {message}")]
    RemoteFailure { spec_id: SpecId, message: String },

    /// Wall-clock deadline passed without a terminal state.
    #[error("job for spec {spec_id} timed out after {waited_secs}s")]
    TimedOut { spec_id: SpecId, waited_secs: u64 },

    #[error(transparent)]
    Job(#[from] InvalidTransition),
}

impl RunnerError {
    /// True when the shared service itself is the problem: every retry
    /// attempt exhausted on a transient error (network, 5xx, rate limit).
    /// Distinct from a defect in this spec's program, which only fails the
    /// one spec.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, RunnerError::Service { source, .. } if source.is_transient())
    }
}

/// An in-flight job: state machine plus remote identifiers as they arrive.
#[derive(Debug)]
pub struct JobHandle {
    pub job: Job,
    project: ProjectId,
    compile: Option<CompileId>,
    backtest: Option<BacktestId>,
    statistics: Option<Value>,
    started: Instant,
}

impl JobHandle {
    pub fn state(&self) -> JobState {
        self.job.state()
    }

    /// Raw statistics payload, present once the job completes.
    pub fn statistics(&self) -> Option<&Value> {
        self.statistics.as_ref()
    }
}

pub struct JobRunner<S: ExecutionService> {
    service: S,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    poll_interval: Duration,
    job_timeout: Duration,
}

impl<S: ExecutionService> JobRunner<S> {
    pub fn new(
        service: S,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        poll_interval: Duration,
        job_timeout: Duration,
    ) -> Self {
        Self { service, limiter, retry, poll_interval, job_timeout }
    }

    /// One rate-limited, retry-wrapped remote call. Every attempt consumes a
    /// limiter permit, retries included.
    fn call<T>(
        &self,
        spec_id: &SpecId,
        mut op: impl FnMut(&S) -> Result<T, ServiceError>,
    ) -> Result<T, RunnerError> {
        self.retry
            .run(
                || {
                    self.limiter.acquire();
                    op(&self.service)
                },
                ServiceError::is_transient,
            )
            .map_err(|source| RunnerError::Service { spec_id: spec_id.clone(), source })
    }

    /// Create the remote project, upload the program, and start the compile.
    pub fn submit(&self, program: &CompiledProgram) -> Result<JobHandle, RunnerError> {
        let spec_id = program.spec_id.clone();
        let mut job = Job::new(spec_id.clone(), program.program_hash.clone());

        let project_name = format!("stratforge-{}", spec_id.short());
        let project = self.call(&spec_id, |s| s.create_project(&project_name))?;
        self.call(&spec_id, |s| s.upload_program(&project, "main.py", &program.source))?;
        job.apply(JobEvent::Submitted)?;

        let compile = self.call(&spec_id, |s| s.start_compile(&project))?;
        job.apply(JobEvent::CompileStarted)?;

        tracing::info!(spec_id = %spec_id, project = %project.0, "job submitted");
        Ok(JobHandle {
            job,
            project,
            compile: Some(compile),
            backtest: None,
            statistics: None,
            started: Instant::now(),
        })
    }

    /// Advance the job one step by asking the service where it stands.
    pub fn poll(&self, handle: &mut JobHandle) -> Result<JobState, RunnerError> {
        let spec_id = handle.job.spec_id.clone();
        match handle.state() {
            JobState::Compiling => {
                let compile = handle.compile.clone().ok_or_else(|| {
                    RunnerError::RemoteFailure {
                        spec_id: spec_id.clone(),
                        message: "compiling without a compile id".into(),
                    }
                })?;
                let state =
                    self.call(&spec_id, |s| s.read_compile(&handle.project, &compile))?;
                match state {
                    CompileState::InProgress => {}
                    CompileState::Success => {
                        let name = format!("run-{}", handle.job.program_hash.short());
                        let backtest = self.call(&spec_id, |s| {
                            s.start_backtest(&handle.project, &compile, &name)
                        })?;
                        handle.backtest = Some(backtest);
                        handle.job.apply(JobEvent::BacktestStarted)?;
                    }
                    CompileState::Error { message } => {
                        handle.job.apply(JobEvent::Errored)?;
                        return Err(RunnerError::CompileRejected { spec_id, message });
                    }
                }
            }
            JobState::Running => {
                let backtest = handle.backtest.clone().ok_or_else(|| {
                    RunnerError::RemoteFailure {
                        spec_id: spec_id.clone(),
                        message: "running without a backtest id".into(),
                    }
                })?;
                let state =
                    self.call(&spec_id, |s| s.read_backtest(&handle.project, &backtest))?;
                match state {
                    BacktestState::InProgress { progress } => {
                        tracing::debug!(spec_id = %spec_id, progress, "backtest in progress");
                    }
                    BacktestState::Completed { statistics } => {
                        handle.statistics = Some(statistics);
                        handle.job.apply(JobEvent::ResultReady)?;
                    }
                    BacktestState::Error { message } => {
                        handle.job.apply(JobEvent::Errored)?;
                        return Err(RunnerError::RemoteFailure { spec_id, message });
                    }
                }
            }
            // Queued/Submitted only exist inside submit; terminal states stay.
            _ => {}
        }
        Ok(handle.state())
    }

    /// Poll at a fixed interval until the job terminates or the wall-clock
    /// deadline passes. On deadline: one reconciliation poll, then `TimedOut`.
    pub fn await_result(&self, handle: &mut JobHandle) -> Result<Value, RunnerError> {
        let spec_id = handle.job.spec_id.clone();
        loop {
            if handle.started.elapsed() >= self.job_timeout {
                // Last chance: the result may have landed since the previous poll.
                if self.poll(handle)? != JobState::Completed {
                    handle.job.apply(JobEvent::DeadlinePassed)?;
                    let waited_secs = handle.started.elapsed().as_secs();
                    tracing::warn!(spec_id = %spec_id, waited_secs, "job timed out");
                    return Err(RunnerError::TimedOut { spec_id, waited_secs });
                }
            }
            match self.poll(handle)? {
                JobState::Completed => {
                    return handle.statistics.clone().ok_or_else(|| {
                        RunnerError::RemoteFailure {
                            spec_id,
                            message: "completed without statistics".into(),
                        }
                    });
                }
                JobState::Failed => {
                    return Err(RunnerError::RemoteFailure {
                        spec_id,
                        message: "job failed".into(),
                    });
                }
                JobState::TimedOut => {
                    let waited_secs = handle.started.elapsed().as_secs();
                    return Err(RunnerError::TimedOut { spec_id, waited_secs });
                }
                _ => thread::sleep(self.poll_interval),
            }
        }
    }
}
