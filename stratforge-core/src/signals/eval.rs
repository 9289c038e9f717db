//! Condition evaluation over indicator series.
//!
//! Crossover policy: previous-bar values are **seeded from the last warm-up
//! bar**. Evaluation at bar `i` reads series values at `i` and `i - 1`; the
//! warm-up margin guarantees `i - 1` is valid when `i` is the first live bar.
//! The alternative — skipping evaluation on the first live bar — was
//! rejected: it hides a legitimate first-bar cross and historically produced
//! permanently-zero-trade strategies when combined with a long warm-up.

use crate::spec::{Condition, Combinator, ConditionGroup, Operand, PriceField, StrategySpec};
use std::collections::BTreeMap;

use super::indicators;
use super::sim::Bar;

/// Named indicator series plus the price series conditions read.
#[derive(Debug)]
pub struct IndicatorTable {
    series: BTreeMap<String, Vec<f64>>,
    price: Vec<f64>,
}

impl IndicatorTable {
    pub fn price(&self) -> &[f64] {
        &self.price
    }

    fn operand_at(&self, operand: &Operand, i: usize) -> Option<f64> {
        let v = match operand {
            Operand::Indicator { name } => *self.series.get(name)?.get(i)?,
            Operand::Price => *self.price.get(i)?,
            Operand::Const { value } => *value,
        };
        if v.is_nan() {
            None
        } else {
            Some(v)
        }
    }
}

/// Compute every indicator the spec declares over the given bars.
///
/// Signal conditions read the close; each indicator reads its own declared
/// price field.
pub fn build_indicator_table(spec: &StrategySpec, bars: &[Bar]) -> IndicatorTable {
    let mut series = BTreeMap::new();
    for ind in &spec.indicators {
        let source: Vec<f64> = bars.iter().map(|b| b.field(ind.source)).collect();
        series.insert(ind.name.clone(), indicators::compute(&ind.kind, &source));
    }
    IndicatorTable {
        series,
        price: bars.iter().map(|b| b.field(PriceField::Close)).collect(),
    }
}

/// Evaluate a condition group at bar `i`.
///
/// Returns `None` when any required value is missing (NaN or out of range) —
/// the missing-data guard: a bar with unknown inputs produces no signal
/// rather than a false one. `i` must be at least 1 when the group contains a
/// crossover; warm-up sizing guarantees this for live bars.
pub fn evaluate_group(group: &ConditionGroup, table: &IndicatorTable, i: usize) -> Option<bool> {
    let mut results = Vec::with_capacity(group.conditions.len());
    for cond in &group.conditions {
        results.push(evaluate_condition(cond, table, i)?);
    }
    Some(match group.combinator {
        Combinator::All => results.iter().all(|&r| r),
        Combinator::Any => results.iter().any(|&r| r),
    })
}

fn evaluate_condition(cond: &Condition, table: &IndicatorTable, i: usize) -> Option<bool> {
    match cond {
        Condition::Comparison { left, op, right } => {
            let l = table.operand_at(left, i)?;
            let r = table.operand_at(right, i)?;
            Some(op.apply(l, r))
        }
        Condition::CrossAbove { left, right } => cross(table, left, right, i, true),
        Condition::CrossBelow { left, right } => cross(table, left, right, i, false),
    }
}

fn cross(
    table: &IndicatorTable,
    left: &Operand,
    right: &Operand,
    i: usize,
    above: bool,
) -> Option<bool> {
    if i == 0 {
        return None;
    }
    let l_now = table.operand_at(left, i)?;
    let r_now = table.operand_at(right, i)?;
    let l_prev = table.operand_at(left, i - 1)?;
    let r_prev = table.operand_at(right, i - 1)?;
    Some(if above {
        l_prev <= r_prev && l_now > r_now
    } else {
        l_prev >= r_prev && l_now < r_now
    })
}
