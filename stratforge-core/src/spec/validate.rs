//! Spec validation — structural checks that run before any code generation
//! or remote call.
//!
//! Unused indicators are a hard error, not a silent no-op: an indicator that
//! exists but is never referenced by a condition almost always means the
//! author renamed a condition operand and the strategy no longer trades what
//! they think it trades.

use super::{ParameterRange, StrategySpec};
use thiserror::Error;

/// Validation failures. Always recoverable by fixing the spec; never reaches
/// the runner.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("spec JSON is malformed: {0}")]
    Malformed(String),
    #[error("universe is empty")]
    EmptyUniverse,
    #[error("{which} condition group is empty")]
    EmptyConditions { which: &'static str },
    #[error("condition references undefined indicator '{name}'")]
    UnknownIndicator { name: String },
    #[error("indicator '{name}' is defined but referenced by no condition")]
    UnusedIndicator { name: String },
    #[error("indicator name '{name}' is defined more than once")]
    DuplicateIndicator { name: String },
    #[error("indicator '{name}' has invalid period {period}")]
    InvalidPeriod { name: String, period: usize },
    #[error("risk rule is invalid: {reason}")]
    InvalidRisk { reason: String },
    #[error("parameter range '{path}' is invalid: {reason}")]
    InvalidParameterRange { path: String, reason: String },
}

/// Validate a spec. Empty exit conditions are allowed only when a protective
/// exit (stop, take-profit, or max holding period) exists.
pub fn validate(spec: &StrategySpec) -> Result<(), SpecError> {
    if spec.universe.is_empty() {
        return Err(SpecError::EmptyUniverse);
    }

    if spec.entry_conditions.is_empty() {
        return Err(SpecError::EmptyConditions { which: "entry" });
    }

    let has_protective_exit = spec.risk.stop_loss_pct.is_some()
        || spec.risk.take_profit_pct.is_some()
        || spec.risk.max_holding_bars.is_some();
    if spec.exit_conditions.is_empty() && !has_protective_exit {
        return Err(SpecError::EmptyConditions { which: "exit" });
    }

    // Duplicate names and invalid periods.
    for (i, ind) in spec.indicators.iter().enumerate() {
        if spec.indicators[..i].iter().any(|other| other.name == ind.name) {
            return Err(SpecError::DuplicateIndicator { name: ind.name.clone() });
        }
        if ind.kind.period() == 0 {
            return Err(SpecError::InvalidPeriod { name: ind.name.clone(), period: 0 });
        }
    }

    // Every referenced indicator must exist.
    let referenced = spec.referenced_indicators();
    for name in &referenced {
        if spec.indicator(name).is_none() {
            return Err(SpecError::UnknownIndicator { name: name.clone() });
        }
    }

    // Every defined indicator must be referenced.
    for ind in &spec.indicators {
        if !referenced.contains(&ind.name) {
            return Err(SpecError::UnusedIndicator { name: ind.name.clone() });
        }
    }

    validate_risk(spec)?;

    for range in &spec.parameter_ranges {
        validate_range(spec, range)?;
    }

    Ok(())
}

fn validate_risk(spec: &StrategySpec) -> Result<(), SpecError> {
    let risk = &spec.risk;
    if risk.position_size_usd <= 0.0 {
        return Err(SpecError::InvalidRisk {
            reason: format!("position_size_usd must be positive, got {}", risk.position_size_usd),
        });
    }
    if let Some(sl) = risk.stop_loss_pct {
        if !(0.0..1.0).contains(&sl) || sl == 0.0 {
            return Err(SpecError::InvalidRisk {
                reason: format!("stop_loss_pct must be in (0, 1), got {sl}"),
            });
        }
    }
    if let Some(tp) = risk.take_profit_pct {
        if tp <= 0.0 {
            return Err(SpecError::InvalidRisk {
                reason: format!("take_profit_pct must be positive, got {tp}"),
            });
        }
    }
    if risk.max_holding_bars == Some(0) {
        return Err(SpecError::InvalidRisk {
            reason: "max_holding_bars must be at least 1".into(),
        });
    }
    Ok(())
}

fn validate_range(spec: &StrategySpec, range: &ParameterRange) -> Result<(), SpecError> {
    if range.values.is_empty() {
        return Err(SpecError::InvalidParameterRange {
            path: range.path.clone(),
            reason: "no candidate values".into(),
        });
    }

    let parts: Vec<&str> = range.path.split('/').collect();
    match parts.as_slice() {
        ["indicators", name, "period"] => {
            if spec.indicator(name).is_none() {
                return Err(SpecError::InvalidParameterRange {
                    path: range.path.clone(),
                    reason: format!("no indicator named '{name}'"),
                });
            }
            if range.values.iter().any(|v| *v < 1.0 || v.fract() != 0.0) {
                return Err(SpecError::InvalidParameterRange {
                    path: range.path.clone(),
                    reason: "periods must be positive integers".into(),
                });
            }
            Ok(())
        }
        ["risk", field] => match *field {
            "stop_loss_pct" | "take_profit_pct" | "max_holding_bars" | "position_size_usd" => {
                Ok(())
            }
            other => Err(SpecError::InvalidParameterRange {
                path: range.path.clone(),
                reason: format!("unknown risk field '{other}'"),
            }),
        },
        _ => Err(SpecError::InvalidParameterRange {
            path: range.path.clone(),
            reason: "path must be indicators/<name>/period or risk/<field>".into(),
        }),
    }
}
