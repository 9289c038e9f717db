//! StratForge Runner — remote execution, validation, and ranking.
//!
//! Everything between a compiled program and a ranked report lives here:
//! - Rate-limited, retrying HTTP client for the execution service
//! - Job state machine and the runner that drives it to a terminal state
//! - Statistics parser tolerant of the service's naming drift
//! - Walk-forward validator (train/validation/test windows, regime labels,
//!   consistency verdicts)
//! - Penalized composite ranker and report/artifact writers
//! - Batch pipeline tying the stages together per spec
//!
//! The clock and the network stop at this crate's boundary: `stratforge-core`
//! stays pure, and tests here run against in-process service fakes.

pub mod client;
pub mod config;
pub mod job;
pub mod limiter;
pub mod parser;
pub mod pipeline;
pub mod ranker;
pub mod report;
pub mod retry;
pub mod runner;
pub mod validator;

pub use client::{ExecutionService, HttpExecutionService, ServiceError};
pub use config::{ConfigError, PipelineConfig};
pub use job::{Job, JobEvent, JobState};
pub use limiter::RateLimiter;
pub use parser::{parse, MetricValue, ParseError, StatsRecord};
pub use pipeline::{BatchReport, Pipeline, PipelineError, SpecOutcome};
pub use ranker::{rank, RankCandidate, RankReport, RankerConfig};
pub use report::{save_report, ReportError, ReportPaths};
pub use retry::RetryPolicy;
pub use runner::{JobHandle, JobRunner, RunnerError};
pub use validator::{
    validate, ConsistencyThresholds, ConsistencyVerdict, RegimeConfig, SplitPolicy,
    ValidationResult,
};
