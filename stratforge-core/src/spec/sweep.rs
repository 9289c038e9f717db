//! Parameter sweeps — expand a spec's parameter ranges into child specs.
//!
//! Expansion is a cross product over all ranges. Each child gets concrete
//! values substituted, its `parameter_ranges` cleared, and `parent_id` set to
//! the parent's content id. The parent is never modified.

use super::{validate, SpecError, StrategySpec};

/// Expand all parameter ranges of `spec` into concrete child specs.
///
/// A spec with no ranges expands to an empty vec (the parent itself is the
/// only candidate). Children are re-validated after substitution, since a
/// swept value can produce an invalid combination.
pub fn expand(spec: &StrategySpec) -> Result<Vec<StrategySpec>, SpecError> {
    if spec.parameter_ranges.is_empty() {
        return Ok(Vec::new());
    }

    let parent_id = spec.id();
    let mut children = vec![template(spec)];

    // Cross product, one range at a time. Ranges were validated with the
    // parent, so paths are known-good here.
    for range in &spec.parameter_ranges {
        let mut next = Vec::with_capacity(children.len() * range.values.len());
        for child in &children {
            for &value in &range.values {
                let mut candidate = child.clone();
                apply_value(&mut candidate, &range.path, value)?;
                next.push(candidate);
            }
        }
        children = next;
    }

    for child in &mut children {
        child.parent_id = Some(parent_id.clone());
        validate::validate(child)?;
    }

    Ok(children)
}

/// Copy of the parent with sweep bookkeeping stripped, used as the expansion
/// seed so children do not themselves carry ranges.
fn template(spec: &StrategySpec) -> StrategySpec {
    let mut t = spec.clone();
    t.parameter_ranges = Vec::new();
    t
}

fn apply_value(spec: &mut StrategySpec, path: &str, value: f64) -> Result<(), SpecError> {
    let parts: Vec<&str> = path.split('/').collect();
    match parts.as_slice() {
        ["indicators", name, "period"] => {
            let ind = spec
                .indicators
                .iter_mut()
                .find(|i| i.name == *name)
                .ok_or_else(|| SpecError::InvalidParameterRange {
                    path: path.into(),
                    reason: format!("no indicator named '{name}'"),
                })?;
            ind.kind = ind.kind.with_period(value as usize);
            Ok(())
        }
        ["risk", "stop_loss_pct"] => {
            spec.risk.stop_loss_pct = Some(value);
            Ok(())
        }
        ["risk", "take_profit_pct"] => {
            spec.risk.take_profit_pct = Some(value);
            Ok(())
        }
        ["risk", "max_holding_bars"] => {
            spec.risk.max_holding_bars = Some(value as usize);
            Ok(())
        }
        ["risk", "position_size_usd"] => {
            spec.risk.position_size_usd = value;
            Ok(())
        }
        _ => Err(SpecError::InvalidParameterRange {
            path: path.into(),
            reason: "unsupported sweep path".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::test_fixtures::rsi_reversion_spec;
    use crate::spec::ParameterRange;

    fn swept_spec() -> StrategySpec {
        let mut spec = rsi_reversion_spec();
        spec.parameter_ranges = vec![
            ParameterRange {
                path: "indicators/rsi_2/period".into(),
                values: vec![2.0, 3.0, 4.0],
            },
            ParameterRange {
                path: "risk/stop_loss_pct".into(),
                values: vec![0.05, 0.10],
            },
        ];
        StrategySpec::new(spec).unwrap()
    }

    #[test]
    fn cross_product_size() {
        let children = expand(&swept_spec()).unwrap();
        assert_eq!(children.len(), 6); // 3 periods × 2 stops
    }

    #[test]
    fn children_carry_parent_id_and_no_ranges() {
        let parent = swept_spec();
        let children = expand(&parent).unwrap();
        for child in &children {
            assert_eq!(child.parent_id.as_ref(), Some(&parent.id()));
            assert!(child.parameter_ranges.is_empty());
        }
    }

    #[test]
    fn parent_is_untouched() {
        let parent = swept_spec();
        let before = parent.id();
        let _ = expand(&parent).unwrap();
        assert_eq!(parent.id(), before);
        assert_eq!(parent.parameter_ranges.len(), 2);
    }

    #[test]
    fn children_have_distinct_ids() {
        let children = expand(&swept_spec()).unwrap();
        let mut ids: Vec<_> = children.iter().map(|c| c.id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 6);
    }

    #[test]
    fn substituted_values_are_concrete() {
        let children = expand(&swept_spec()).unwrap();
        let periods: std::collections::BTreeSet<usize> =
            children.iter().map(|c| c.indicators[0].kind.period()).collect();
        assert_eq!(periods, [2, 3, 4].into_iter().collect());
    }

    #[test]
    fn no_ranges_expands_to_nothing() {
        let spec = rsi_reversion_spec();
        assert!(expand(&spec).unwrap().is_empty());
    }

    #[test]
    fn invalid_swept_value_is_rejected() {
        let mut spec = rsi_reversion_spec();
        spec.parameter_ranges = vec![ParameterRange {
            path: "risk/stop_loss_pct".into(),
            values: vec![1.5], // out of (0, 1)
        }];
        let spec = StrategySpec::new(spec).unwrap();
        assert!(expand(&spec).is_err());
    }
}
