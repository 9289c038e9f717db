//! Condition AST — tagged-variant entry/exit logic.
//!
//! Conditions are a closed enum rather than stringly-typed operator fields,
//! so the compiler pattern-matches exhaustively and an unsupported operator
//! is a type error, not a runtime string mismatch.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One side of a condition: an indicator by name, the bar's price, or a constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operand {
    Indicator { name: String },
    Price,
    Const { value: f64 },
}

impl Operand {
    /// The indicator name this operand references, if any.
    pub fn indicator(&self) -> Option<&str> {
        match self {
            Operand::Indicator { name } => Some(name),
            _ => None,
        }
    }
}

/// Comparison operator for point-in-time conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Equal,
}

impl Comparator {
    pub fn apply(&self, left: f64, right: f64) -> bool {
        match self {
            Comparator::GreaterThan => left > right,
            Comparator::LessThan => left < right,
            Comparator::GreaterOrEqual => left >= right,
            Comparator::LessOrEqual => left <= right,
            Comparator::Equal => (left - right).abs() < f64::EPSILON,
        }
    }

    /// Python rendering for code generation.
    pub fn python_op(&self) -> &'static str {
        match self {
            Comparator::GreaterThan => ">",
            Comparator::LessThan => "<",
            Comparator::GreaterOrEqual => ">=",
            Comparator::LessOrEqual => "<=",
            Comparator::Equal => "==",
        }
    }
}

/// A single condition. Crossovers are distinct variants because they need the
/// previous bar's values, which changes both codegen and warm-up handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Comparison {
        left: Operand,
        op: Comparator,
        right: Operand,
    },
    CrossAbove {
        left: Operand,
        right: Operand,
    },
    CrossBelow {
        left: Operand,
        right: Operand,
    },
}

impl Condition {
    /// True if evaluating this condition requires the previous bar's values.
    pub fn needs_previous_bar(&self) -> bool {
        matches!(self, Condition::CrossAbove { .. } | Condition::CrossBelow { .. })
    }

    /// Both operands of the condition.
    pub fn operands(&self) -> [&Operand; 2] {
        match self {
            Condition::Comparison { left, right, .. }
            | Condition::CrossAbove { left, right }
            | Condition::CrossBelow { left, right } => [left, right],
        }
    }
}

/// Boolean combinator over a condition list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
    /// All conditions must hold (AND).
    All,
    /// At least one condition must hold (OR).
    Any,
}

/// A group of conditions joined by a single combinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub combinator: Combinator,
    pub conditions: Vec<Condition>,
}

impl ConditionGroup {
    pub fn all(conditions: Vec<Condition>) -> Self {
        Self { combinator: Combinator::All, conditions }
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Self { combinator: Combinator::Any, conditions }
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Names of all indicators referenced anywhere in the group.
    pub fn referenced_indicators(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for cond in &self.conditions {
            for operand in cond.operands() {
                if let Some(name) = operand.indicator() {
                    names.insert(name.to_string());
                }
            }
        }
        names
    }

    /// True if any condition in the group is a crossover.
    pub fn needs_previous_bar(&self) -> bool {
        self.conditions.iter().any(Condition::needs_previous_bar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ind(name: &str) -> Operand {
        Operand::Indicator { name: name.into() }
    }

    #[test]
    fn referenced_indicators_collects_both_sides() {
        let group = ConditionGroup::all(vec![
            Condition::CrossAbove { left: ind("fast"), right: ind("slow") },
            Condition::Comparison {
                left: ind("rsi_2"),
                op: Comparator::LessThan,
                right: Operand::Const { value: 10.0 },
            },
        ]);
        let names = group.referenced_indicators();
        assert_eq!(names.len(), 3);
        assert!(names.contains("fast"));
        assert!(names.contains("slow"));
        assert!(names.contains("rsi_2"));
    }

    #[test]
    fn price_and_const_reference_nothing() {
        let group = ConditionGroup::all(vec![Condition::Comparison {
            left: Operand::Price,
            op: Comparator::GreaterThan,
            right: Operand::Const { value: 5.0 },
        }]);
        assert!(group.referenced_indicators().is_empty());
        assert!(!group.needs_previous_bar());
    }

    #[test]
    fn crossover_needs_previous_bar() {
        let group = ConditionGroup::any(vec![Condition::CrossBelow {
            left: Operand::Price,
            right: ind("sma_20"),
        }]);
        assert!(group.needs_previous_bar());
    }

    #[test]
    fn comparator_apply() {
        assert!(Comparator::GreaterThan.apply(2.0, 1.0));
        assert!(!Comparator::GreaterThan.apply(1.0, 1.0));
        assert!(Comparator::GreaterOrEqual.apply(1.0, 1.0));
        assert!(Comparator::LessThan.apply(0.5, 1.0));
        assert!(Comparator::Equal.apply(1.0, 1.0));
    }

    #[test]
    fn condition_serde_round_trip() {
        let cond = Condition::CrossAbove {
            left: Operand::Price,
            right: ind("sma_20"),
        };
        let json = serde_json::to_string(&cond).unwrap();
        let back: Condition = serde_json::from_str(&json).unwrap();
        assert_eq!(cond, back);
        assert!(json.contains("cross_above"));
    }
}
