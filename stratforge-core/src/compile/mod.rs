//! Compiler — deterministic translation of a `StrategySpec` into program
//! source text for the remote execution service.
//!
//! `compile` is pure: identical spec content and date range produce
//! byte-identical output. Validation runs first, so no invalid spec ever
//! reaches code generation. The generated program carries the mandatory
//! guards regardless of what the spec asks for:
//!
//! - signals computed on bar T's close execute at bar T+1's open
//! - slippage % + per-share commission with a minimum
//! - minimum-price and minimum-dollar-volume universe filter
//! - warm-up sized to the longest indicator lookback plus a margin
//! - missing-data guard for every symbol on every bar
//! - crossover previous values seeded from the last warm-up bar
//!
//! Exit precedence in generated code matches `signals::sim`: stop-loss,
//! signal exit, take-profit, time exit.

mod codegen;

use crate::ids::{ProgramHash, SpecId};

/// Starting cash for every generated program and for the reference simulator.
pub const INITIAL_CAPITAL: f64 = 100_000.0;
use crate::spec::{validate, SpecError, StrategySpec};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Transaction-cost model injected into every generated program and mirrored
/// by the reference simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    /// Slippage as a fraction of fill price per side.
    pub slippage_pct: f64,
    /// Commission per share.
    pub commission_per_share: f64,
    /// Minimum commission per order.
    pub min_commission: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self { slippage_pct: 0.0005, commission_per_share: 0.005, min_commission: 1.0 }
    }
}

impl CostModel {
    pub fn commission(&self, quantity: f64) -> f64 {
        (quantity * self.commission_per_share).max(self.min_commission)
    }
}

/// Universe quality floor injected into every generated program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityFilter {
    pub min_price: f64,
    pub min_dollar_volume: f64,
}

impl Default for LiquidityFilter {
    fn default() -> Self {
        Self { min_price: 5.0, min_dollar_volume: 5_000_000.0 }
    }
}

/// The date range a compiled program runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

/// Cached compile artifact: source text plus provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledProgram {
    pub spec_id: SpecId,
    pub program_hash: ProgramHash,
    pub source: String,
}

/// Compile a spec into program source scoped to a date range.
///
/// Fails with `SpecError` before generating anything if the spec is invalid;
/// unused indicators and dangling references never reach the remote service.
pub fn compile(spec: &StrategySpec, range: DateRange) -> Result<CompiledProgram, SpecError> {
    validate::validate(spec)?;

    let source = codegen::generate(spec, range, &CostModel::default(), &LiquidityFilter::default());
    Ok(CompiledProgram {
        spec_id: spec.id(),
        program_hash: ProgramHash::from_source(&source),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::test_fixtures::{rsi_reversion_spec, sma_cross_spec};
    use crate::spec::{IndicatorKind, IndicatorSpec, PriceField};

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2018, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
        )
    }

    #[test]
    fn compile_is_deterministic() {
        let spec = rsi_reversion_spec();
        let a = compile(&spec, range()).unwrap();
        let b = compile(&spec, range()).unwrap();
        assert_eq!(a.source, b.source);
        assert_eq!(a.program_hash, b.program_hash);
    }

    #[test]
    fn equal_content_not_identity_compiles_identically() {
        // Two separately-constructed specs with the same content.
        let a = compile(&rsi_reversion_spec(), range()).unwrap();
        let b = compile(&rsi_reversion_spec(), range()).unwrap();
        assert_eq!(a.program_hash, b.program_hash);
    }

    #[test]
    fn different_range_changes_output() {
        let spec = rsi_reversion_spec();
        let a = compile(&spec, range()).unwrap();
        let other = DateRange::new(
            NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
        );
        let b = compile(&spec, other).unwrap();
        assert_ne!(a.program_hash, b.program_hash);
    }

    #[test]
    fn rejects_unused_indicator_before_codegen() {
        let mut spec = sma_cross_spec();
        spec.indicators.push(IndicatorSpec {
            name: "ema_50".into(),
            kind: IndicatorKind::Ema { period: 50 },
            source: PriceField::Close,
        });
        assert!(matches!(
            compile(&spec, range()),
            Err(SpecError::UnusedIndicator { .. })
        ));
    }

    #[test]
    fn guards_present_exactly_once() {
        let spec = sma_cross_spec();
        let program = compile(&spec, range()).unwrap();
        let src = &program.source;

        for marker in [
            "self.set_warm_up(",
            "def _coarse_filter(",
            "set_security_initializer(",
            "def _has_data(",
            "market_on_open_order",
        ] {
            let count = src.matches(marker).count();
            assert_eq!(count, 1, "guard '{marker}' appears {count} times");
        }
    }

    #[test]
    fn warmup_covers_longest_lookback() {
        let spec = sma_cross_spec(); // SMA(20) → lookback 20, +margin
        let program = compile(&spec, range()).unwrap();
        assert!(program.source.contains(&format!("self.set_warm_up({})", spec.warmup_bars())));
    }

    #[test]
    fn exit_precedence_order_in_source() {
        let spec = rsi_reversion_spec(); // has stop-loss and max holding
        let src = compile(&spec, range()).unwrap().source;
        let stop = src.find("# exit 1: stop-loss").unwrap();
        let signal = src.find("# exit 2: signal").unwrap();
        let time = src.find("# exit 4: max holding period").unwrap();
        assert!(stop < signal && signal < time);
    }

    #[test]
    fn cost_model_commission_floor() {
        let cost = CostModel::default();
        assert_eq!(cost.commission(10.0), cost.min_commission);
        assert!(cost.commission(10_000.0) > cost.min_commission);
    }

    proptest::proptest! {
        /// Determinism holds across the sweepable parameter space, not just
        /// the fixtures: equal content always hashes identically.
        #[test]
        fn compile_deterministic_over_parameters(
            rsi_period in 2usize..30,
            stop in proptest::option::of(0.01f64..0.5),
            hold in proptest::option::of(1usize..60),
            size in 1_000.0f64..50_000.0,
        ) {
            let mut spec = rsi_reversion_spec();
            spec.indicators[0].kind = IndicatorKind::Rsi { period: rsi_period };
            spec.risk.stop_loss_pct = stop;
            spec.risk.max_holding_bars = hold;
            spec.risk.position_size_usd = size;
            let spec = crate::spec::StrategySpec::new(spec).unwrap();

            let a = compile(&spec, range()).unwrap();
            let b = compile(&spec, range()).unwrap();
            proptest::prop_assert_eq!(&a.source, &b.source);
            proptest::prop_assert_eq!(a.program_hash, b.program_hash);
        }
    }
}
