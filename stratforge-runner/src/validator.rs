//! Walk-forward validation — split, regime-label, and consistency-check.
//!
//! The full date range is partitioned into three contiguous, non-overlapping
//! windows (train, validation, test) whose union is exactly the full range.
//! Per-window metrics come from a caller-supplied rerun function, so this
//! module never talks to the network itself; the pipeline passes a closure
//! that drives the runner scoped to each window.
//!
//! A pass does not predict forward performance. It only filters out specs
//! whose in-sample result does not survive an out-of-sample re-test.

use crate::parser::StatsRecord;
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use stratforge_core::signals::Bar;
use stratforge_core::DateRange;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("split fractions are invalid: {0}")]
    BadFractions(String),

    #[error("calendar boundary {boundary} falls outside the range {start}..{end}")]
    BoundaryOutOfRange {
        boundary: NaiveDate,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("date range too short to split: {days} days")]
    RangeTooShort { days: i64 },
}

/// How to cut the full range into train/validation/test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SplitPolicy {
    /// Fractions of the total day count; the test window takes the rest.
    Fractions { train: f64, validation: f64 },
    /// Explicit calendar boundaries: validation starts on `validation_start`,
    /// test on `test_start`.
    Calendar {
        validation_start: NaiveDate,
        test_start: NaiveDate,
    },
}

impl Default for SplitPolicy {
    fn default() -> Self {
        SplitPolicy::Fractions { train: 0.5, validation: 0.25 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Train,
    Validation,
    Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub kind: WindowKind,
    pub range: DateRange,
}

/// Cut `full` into three contiguous windows per `policy`.
///
/// Ranges are inclusive on both ends; each window starts the day after the
/// previous one ends, and the union covers `full` exactly.
pub fn split(full: DateRange, policy: &SplitPolicy) -> Result<[Window; 3], ValidateError> {
    let days = full.days();
    if days < 3 {
        return Err(ValidateError::RangeTooShort { days });
    }

    let (validation_start, test_start) = match *policy {
        SplitPolicy::Fractions { train, validation } => {
            if !(train > 0.0 && validation > 0.0 && train + validation < 1.0) {
                return Err(ValidateError::BadFractions(format!(
                    "train={train}, validation={validation}"
                )));
            }
            let validation_start = full.start + Days::new((days as f64 * train) as u64);
            let test_start =
                full.start + Days::new((days as f64 * (train + validation)) as u64);
            // Short ranges can floor a boundary onto the range start.
            if validation_start <= full.start {
                return Err(ValidateError::BadFractions(format!(
                    "train window is empty for a {days}-day range"
                )));
            }
            (validation_start, test_start)
        }
        SplitPolicy::Calendar { validation_start, test_start } => {
            for boundary in [validation_start, test_start] {
                if boundary <= full.start || boundary > full.end {
                    return Err(ValidateError::BoundaryOutOfRange {
                        boundary,
                        start: full.start,
                        end: full.end,
                    });
                }
            }
            (validation_start, test_start)
        }
    };

    if validation_start >= test_start {
        return Err(ValidateError::BadFractions(format!(
            "validation window is empty ({validation_start} >= {test_start})"
        )));
    }

    let day = Days::new(1);
    Ok([
        Window {
            kind: WindowKind::Train,
            range: DateRange::new(full.start, validation_start - day),
        },
        Window {
            kind: WindowKind::Validation,
            range: DateRange::new(validation_start, test_start - day),
        },
        Window {
            kind: WindowKind::Test,
            range: DateRange::new(test_start, full.end),
        },
    ])
}

// ─── Regime classification ───────────────────────────────────────────

/// Coarse market-condition label for a window, derived from a reference
/// index, not from the strategy itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Bull,
    Bear,
    Sideways,
}

/// Reference-index parameters for regime labels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeConfig {
    /// Long moving-average period over the reference index.
    pub sma_period: usize,
    /// Flat band around the moving average, as a fraction of it.
    pub band: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self { sma_period: 200, band: 0.02 }
    }
}

/// Label the regime at a window's start: the reference index's close against
/// its long SMA, with a flat band for `Sideways`. `None` when the index has
/// no bar at the window start or not enough history for the SMA.
pub fn classify_regime(index: &[Bar], window_start: NaiveDate, config: &RegimeConfig) -> Option<Regime> {
    let i = index.iter().position(|b| b.date >= window_start)?;
    if i + 1 < config.sma_period {
        return None;
    }
    let closes: Vec<f64> = index[i + 1 - config.sma_period..=i].iter().map(|b| b.close).collect();
    let sma = closes.iter().sum::<f64>() / config.sma_period as f64;
    let close = index[i].close;
    if close > sma * (1.0 + config.band) {
        Some(Regime::Bull)
    } else if close < sma * (1.0 - config.band) {
        Some(Regime::Bear)
    } else {
        Some(Regime::Sideways)
    }
}

// ─── Consistency verdict ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyThresholds {
    /// Statistical-significance floor per window.
    pub min_trades_per_window: u64,
    /// Test Sharpe must be at least this fraction of train Sharpe when train
    /// Sharpe is meaningfully positive.
    pub min_sharpe_retention: f64,
    /// Train Sharpe below this is too small for a ratio to mean anything.
    pub sharpe_ratio_floor: f64,
}

impl Default for ConsistencyThresholds {
    fn default() -> Self {
        Self {
            min_trades_per_window: 10,
            min_sharpe_retention: 0.5,
            sharpe_ratio_floor: 0.1,
        }
    }
}

/// Why consistency failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "flag", rename_all = "snake_case")]
pub enum ConsistencyFlag {
    ThinTrades { window: WindowKind, trades: u64 },
    SharpeCollapse { train: f64, test: f64 },
    CagrSignFlip { windows: Vec<WindowKind> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ConsistencyVerdict {
    Pass,
    Fail { flags: Vec<ConsistencyFlag> },
    /// Not enough data to pass or fail; flagged for manual review, neither
    /// promoted nor disqualified.
    Inconclusive { reason: String },
}

/// One window's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowReport {
    pub window: Window,
    pub regime: Option<Regime>,
    pub stats: StatsRecord,
}

/// Per-spec validation outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub windows: Vec<WindowReport>,
    pub verdict: ConsistencyVerdict,
}

/// Run the walk-forward check: split, rerun per window, label regimes, and
/// render a verdict. A window whose rerun fails makes the whole result
/// `Inconclusive` rather than aborting the batch.
pub fn validate<F, E>(
    full: DateRange,
    policy: &SplitPolicy,
    thresholds: &ConsistencyThresholds,
    regime_config: &RegimeConfig,
    index: &[Bar],
    mut rerun: F,
) -> Result<ValidationResult, ValidateError>
where
    F: FnMut(DateRange) -> Result<StatsRecord, E>,
    E: std::fmt::Display,
{
    let windows = split(full, policy)?;
    let mut reports = Vec::with_capacity(3);
    for window in windows {
        let stats = match rerun(window.range) {
            Ok(stats) => stats,
            Err(err) => {
                tracing::warn!(window = ?window.kind, error = %err, "window rerun failed");
                return Ok(ValidationResult {
                    windows: reports,
                    verdict: ConsistencyVerdict::Inconclusive {
                        reason: format!("{:?} window produced no metrics: {err}", window.kind),
                    },
                });
            }
        };
        let regime = classify_regime(index, window.range.start, regime_config);
        reports.push(WindowReport { window, regime, stats });
    }

    let verdict = consistency_verdict(&reports, thresholds);
    Ok(ValidationResult { windows: reports, verdict })
}

/// Render the verdict from three complete window reports.
pub fn consistency_verdict(
    reports: &[WindowReport],
    thresholds: &ConsistencyThresholds,
) -> ConsistencyVerdict {
    let mut flags = Vec::new();

    // Metrics the verdict depends on must exist in every window.
    for report in reports {
        let trades = match report.stats.trade_count {
            Some(t) => t,
            None => {
                return ConsistencyVerdict::Inconclusive {
                    reason: format!("{:?} window reported no trade count", report.window.kind),
                }
            }
        };
        if report.stats.sharpe.value().is_none() || report.stats.cagr.value().is_none() {
            return ConsistencyVerdict::Inconclusive {
                reason: format!("{:?} window is missing Sharpe or CAGR", report.window.kind),
            };
        }
        if trades < thresholds.min_trades_per_window {
            flags.push(ConsistencyFlag::ThinTrades {
                window: report.window.kind,
                trades,
            });
        }
    }

    let sharpe_of = |kind: WindowKind| {
        reports
            .iter()
            .find(|r| r.window.kind == kind)
            .and_then(|r| r.stats.sharpe.value())
    };
    let train_sharpe = sharpe_of(WindowKind::Train);
    let test_sharpe = sharpe_of(WindowKind::Test);
    if let (Some(train), Some(test)) = (train_sharpe, test_sharpe) {
        // Ratio is meaningless near zero; only a meaningfully positive train
        // Sharpe can collapse.
        if train >= thresholds.sharpe_ratio_floor
            && test < train * thresholds.min_sharpe_retention
        {
            flags.push(ConsistencyFlag::SharpeCollapse { train, test });
        }
    }

    // CAGR sign, with the train window as baseline: one out-of-sample window
    // flipping sign is tolerated, both flipping is not.
    let sign_of = |kind: WindowKind| {
        reports
            .iter()
            .find(|r| r.window.kind == kind)
            .and_then(|r| r.stats.cagr.value())
            .map(|c| c >= 0.0)
    };
    if let Some(train_positive) = sign_of(WindowKind::Train) {
        let flipped: Vec<WindowKind> = [WindowKind::Validation, WindowKind::Test]
            .into_iter()
            .filter(|&kind| sign_of(kind).is_some_and(|positive| positive != train_positive))
            .collect();
        if flipped.len() > 1 {
            flags.push(ConsistencyFlag::CagrSignFlip { windows: flipped });
        }
    }

    if flags.is_empty() {
        ConsistencyVerdict::Pass
    } else {
        ConsistencyVerdict::Fail { flags }
    }
}
