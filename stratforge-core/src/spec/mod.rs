//! Strategy spec model — immutable, declarative strategy descriptions.
//!
//! A `StrategySpec` is pure data: universe, indicators, entry/exit condition
//! trees, risk rules, and parameter ranges for sweeping. Specs are validated
//! on construction and never mutated; a parameter sweep produces new child
//! specs with `parent_id` set, never edits the parent.

pub mod condition;
pub mod sweep;
pub mod validate;

pub use condition::{Combinator, Comparator, Condition, ConditionGroup, Operand};
pub use validate::SpecError;

use crate::ids::SpecId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Safety margin added to the longest indicator lookback when sizing the
/// warm-up period.
pub const WARMUP_MARGIN: usize = 5;

/// Bar timeframe the strategy trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    Daily,
    Weekly,
    Monthly,
}

/// Which price field an indicator consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceField {
    Open,
    High,
    Low,
    Close,
}

/// Indicator family plus its parameters. A closed enum: adding a kind forces
/// every match site (codegen, evaluator, lookback) to handle it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorKind {
    Sma { period: usize },
    Ema { period: usize },
    Rsi { period: usize },
}

impl IndicatorKind {
    /// Bars required before the indicator produces its first value.
    pub fn lookback(&self) -> usize {
        match self {
            IndicatorKind::Sma { period } | IndicatorKind::Ema { period } => *period,
            // Wilder RSI needs period changes, i.e. period + 1 bars.
            IndicatorKind::Rsi { period } => period + 1,
        }
    }

    pub fn period(&self) -> usize {
        match self {
            IndicatorKind::Sma { period }
            | IndicatorKind::Ema { period }
            | IndicatorKind::Rsi { period } => *period,
        }
    }

    /// Replace the period, keeping the kind. Used by parameter sweeps.
    pub fn with_period(&self, period: usize) -> Self {
        match self {
            IndicatorKind::Sma { .. } => IndicatorKind::Sma { period },
            IndicatorKind::Ema { .. } => IndicatorKind::Ema { period },
            IndicatorKind::Rsi { .. } => IndicatorKind::Rsi { period },
        }
    }
}

/// One named indicator in a spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSpec {
    /// Name conditions refer to, unique within the spec.
    pub name: String,
    #[serde(flatten)]
    pub kind: IndicatorKind,
    /// Price field the indicator is computed from.
    pub source: PriceField,
}

/// Trading universe: a fixed symbol list or a described dynamic filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Universe {
    Static { symbols: Vec<String> },
    Filtered {
        /// Free-text description of the selection logic; not interpreted here.
        description: String,
        /// Number of symbols the filter should retain.
        size: usize,
    },
}

impl Universe {
    pub fn is_empty(&self) -> bool {
        match self {
            Universe::Static { symbols } => symbols.is_empty(),
            Universe::Filtered { size, .. } => *size == 0,
        }
    }
}

/// Risk rules: fixed-dollar sizing plus optional protective exits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSpec {
    /// Fixed dollar amount per position.
    pub position_size_usd: f64,
    /// Stop-loss as a fraction of entry price (0.05 = 5%).
    pub stop_loss_pct: Option<f64>,
    /// Take-profit as a fraction of entry price.
    pub take_profit_pct: Option<f64>,
    /// Maximum holding period in bars.
    pub max_holding_bars: Option<usize>,
}

/// A sweepable parameter: a path into the spec plus candidate values.
///
/// Supported paths:
/// - `indicators/<name>/period`
/// - `risk/stop_loss_pct`, `risk/take_profit_pct`, `risk/max_holding_bars`,
///   `risk/position_size_usd`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRange {
    pub path: String,
    pub values: Vec<f64>,
}

/// Immutable strategy specification. Construct via [`StrategySpec::new`] or
/// [`StrategySpec::from_json`]; both validate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySpec {
    pub name: String,
    pub description: String,
    /// Free-text author rationale; carried through, never interpreted.
    pub rationale: String,
    /// Provenance: set on children produced by a parameter sweep.
    pub parent_id: Option<SpecId>,
    pub universe: Universe,
    pub timeframe: Timeframe,
    pub indicators: Vec<IndicatorSpec>,
    pub entry_conditions: ConditionGroup,
    pub exit_conditions: ConditionGroup,
    pub risk: RiskSpec,
    #[serde(default)]
    pub parameter_ranges: Vec<ParameterRange>,
}

impl StrategySpec {
    /// Validate and return the spec. The only public constructor besides
    /// `from_json`; an invalid spec never escapes into the pipeline.
    pub fn new(spec: StrategySpec) -> Result<StrategySpec, SpecError> {
        validate::validate(&spec)?;
        Ok(spec)
    }

    /// Parse a spec from its JSON document form, then validate.
    pub fn from_json(json: &str) -> Result<StrategySpec, SpecError> {
        let spec: StrategySpec =
            serde_json::from_str(json).map_err(|e| SpecError::Malformed(e.to_string()))?;
        validate::validate(&spec)?;
        Ok(spec)
    }

    /// Content-derived id. Identical spec content yields an identical id,
    /// regardless of when or where it was constructed.
    pub fn id(&self) -> SpecId {
        let canonical =
            serde_json::to_string(self).expect("StrategySpec must serialize");
        SpecId::from_content(canonical.as_bytes())
    }

    /// Longest indicator lookback across the spec.
    pub fn max_lookback(&self) -> usize {
        self.indicators.iter().map(|i| i.kind.lookback()).max().unwrap_or(0)
    }

    /// Bars to skip before signal evaluation begins: longest lookback plus a
    /// safety margin. The margin guarantees at least one fully-valid bar
    /// precedes the first live bar, which is what seeds crossover previous
    /// values (see `compile` and `signals::eval`).
    pub fn warmup_bars(&self) -> usize {
        self.max_lookback() + WARMUP_MARGIN
    }

    /// All indicator names referenced by entry or exit conditions.
    pub fn referenced_indicators(&self) -> BTreeSet<String> {
        let mut names = self.entry_conditions.referenced_indicators();
        names.extend(self.exit_conditions.referenced_indicators());
        names
    }

    /// Look up an indicator by name.
    pub fn indicator(&self, name: &str) -> Option<&IndicatorSpec> {
        self.indicators.iter().find(|i| i.name == name)
    }
}

/// Strategy fixtures shared by unit tests here and integration tests in
/// downstream crates.
#[cfg(any(test, feature = "test-fixtures"))]
pub mod test_fixtures {
    use super::*;

    /// Mean-reversion fixture: RSI(2) < 10 entry, RSI(2) > 70 exit.
    pub fn rsi_reversion_spec() -> StrategySpec {
        StrategySpec::new(StrategySpec {
            name: "rsi2-reversion".into(),
            description: "Buy deep oversold, sell overbought".into(),
            rationale: "Short-horizon mean reversion in liquid equities".into(),
            parent_id: None,
            universe: Universe::Static { symbols: vec!["SPY".into()] },
            timeframe: Timeframe::Daily,
            indicators: vec![IndicatorSpec {
                name: "rsi_2".into(),
                kind: IndicatorKind::Rsi { period: 2 },
                source: PriceField::Close,
            }],
            entry_conditions: ConditionGroup::all(vec![Condition::Comparison {
                left: Operand::Indicator { name: "rsi_2".into() },
                op: Comparator::LessThan,
                right: Operand::Const { value: 10.0 },
            }]),
            exit_conditions: ConditionGroup::all(vec![Condition::Comparison {
                left: Operand::Indicator { name: "rsi_2".into() },
                op: Comparator::GreaterThan,
                right: Operand::Const { value: 70.0 },
            }]),
            risk: RiskSpec {
                position_size_usd: 10_000.0,
                stop_loss_pct: Some(0.08),
                take_profit_pct: None,
                max_holding_bars: Some(20),
            },
            parameter_ranges: vec![],
        })
        .unwrap()
    }

    /// Trend fixture: price crosses above SMA(20) entry, crosses below exit.
    pub fn sma_cross_spec() -> StrategySpec {
        StrategySpec::new(StrategySpec {
            name: "price-sma20-cross".into(),
            description: "Long when price crosses above its 20-bar SMA".into(),
            rationale: "Simple trend following".into(),
            parent_id: None,
            universe: Universe::Static { symbols: vec!["SPY".into()] },
            timeframe: Timeframe::Daily,
            indicators: vec![IndicatorSpec {
                name: "sma_20".into(),
                kind: IndicatorKind::Sma { period: 20 },
                source: PriceField::Close,
            }],
            entry_conditions: ConditionGroup::all(vec![Condition::CrossAbove {
                left: Operand::Price,
                right: Operand::Indicator { name: "sma_20".into() },
            }]),
            exit_conditions: ConditionGroup::all(vec![Condition::CrossBelow {
                left: Operand::Price,
                right: Operand::Indicator { name: "sma_20".into() },
            }]),
            risk: RiskSpec {
                position_size_usd: 10_000.0,
                stop_loss_pct: None,
                take_profit_pct: None,
                max_holding_bars: None,
            },
            parameter_ranges: vec![],
        })
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_fixtures::*;
    use super::*;

    #[test]
    fn id_is_content_derived() {
        let a = rsi_reversion_spec();
        let b = rsi_reversion_spec();
        assert_eq!(a.id(), b.id());

        let mut c = rsi_reversion_spec();
        c.risk.position_size_usd = 20_000.0;
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn max_lookback_covers_rsi_seed() {
        let spec = rsi_reversion_spec();
        // RSI(2) needs 2 changes = 3 bars
        assert_eq!(spec.max_lookback(), 3);
    }

    #[test]
    fn json_round_trip_preserves_id() {
        let spec = sma_cross_spec();
        let json = serde_json::to_string(&spec).unwrap();
        let back = StrategySpec::from_json(&json).unwrap();
        assert_eq!(spec.id(), back.id());
    }

    #[test]
    fn from_json_rejects_malformed() {
        let err = StrategySpec::from_json("{not json").unwrap_err();
        assert!(matches!(err, SpecError::Malformed(_)));
    }

    #[test]
    fn indicator_lookup() {
        let spec = sma_cross_spec();
        assert!(spec.indicator("sma_20").is_some());
        assert!(spec.indicator("missing").is_none());
    }
}
