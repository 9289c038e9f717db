//! Job state machine.
//!
//! One `Job` per submitted program. State advances only through
//! [`transition`], a pure function over `(state, event)`, so tests drive the
//! machine with synthetic events and no timers. The runner is the single
//! writer of a job's state; nothing else mutates it.
//!
//! ```text
//! Queued → Submitted → Compiling → Running → Completed
//!                                          ↘ Failed
//!                                          ↘ TimedOut
//! ```
//!
//! `Failed` and `TimedOut` can be entered from any non-terminal state.
//! Terminal states absorb every further event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratforge_core::{ProgramHash, SpecId};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Submitted,
    Compiling,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::TimedOut)
    }
}

/// Events that advance a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    /// Program uploaded to the service.
    Submitted,
    /// Remote compile started.
    CompileStarted,
    /// Remote compile succeeded and the backtest started.
    BacktestStarted,
    /// Statistics payload received.
    ResultReady,
    /// Unrecoverable error (compile rejection, retries exhausted, remote
    /// runtime error).
    Errored,
    /// Wall-clock deadline passed without a terminal state.
    DeadlinePassed,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("event {event:?} is not valid in state {state:?}")]
pub struct InvalidTransition {
    pub state: JobState,
    pub event: JobEvent,
}

/// Pure transition function. Terminal states absorb every event; anything
/// else out of order is an error, never a silent state change.
pub fn transition(state: JobState, event: JobEvent) -> Result<JobState, InvalidTransition> {
    if state.is_terminal() {
        return Ok(state);
    }
    match (state, event) {
        (_, JobEvent::Errored) => Ok(JobState::Failed),
        (_, JobEvent::DeadlinePassed) => Ok(JobState::TimedOut),
        (JobState::Queued, JobEvent::Submitted) => Ok(JobState::Submitted),
        (JobState::Submitted, JobEvent::CompileStarted) => Ok(JobState::Compiling),
        (JobState::Compiling, JobEvent::BacktestStarted) => Ok(JobState::Running),
        (JobState::Running, JobEvent::ResultReady) => Ok(JobState::Completed),
        (state, event) => Err(InvalidTransition { state, event }),
    }
}

/// A tracked job: identity, current state, and the timestamp of every
/// transition in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub spec_id: SpecId,
    pub program_hash: ProgramHash,
    state: JobState,
    transitions: Vec<(JobState, DateTime<Utc>)>,
}

impl Job {
    pub fn new(spec_id: SpecId, program_hash: ProgramHash) -> Self {
        Self {
            spec_id,
            program_hash,
            state: JobState::Queued,
            transitions: vec![(JobState::Queued, Utc::now())],
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Apply an event through the pure transition function, recording the
    /// timestamp when the state actually changes.
    pub fn apply(&mut self, event: JobEvent) -> Result<JobState, InvalidTransition> {
        let next = transition(self.state, event)?;
        if next != self.state {
            self.state = next;
            self.transitions.push((next, Utc::now()));
            tracing::info!(
                spec_id = %self.spec_id,
                state = ?next,
                "job transition"
            );
        }
        Ok(next)
    }

    /// Every state the job has been in, with entry timestamps, in order.
    pub fn history(&self) -> &[(JobState, DateTime<Utc>)] {
        &self.transitions
    }
}
