//! Indicator math — SMA, EMA, and Wilder RSI over a value series.
//!
//! Each function returns a vector the same length as its input with NaN in
//! positions before the indicator's first valid value. NaN inputs propagate.

use crate::spec::IndicatorKind;

/// Compute an indicator series from a source price series.
pub fn compute(kind: &IndicatorKind, values: &[f64]) -> Vec<f64> {
    match kind {
        IndicatorKind::Sma { period } => sma(values, *period),
        IndicatorKind::Ema { period } => ema(values, *period),
        IndicatorKind::Rsi { period } => rsi(values, *period),
    }
}

/// Simple moving average. First valid index: period - 1.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < period {
        return out;
    }

    let mut sum = 0.0;
    for (i, &v) in values.iter().enumerate() {
        sum += v;
        if i >= period {
            sum -= values[i - period];
        }
        if i + 1 >= period {
            out[i] = sum / period as f64;
        }
    }
    out
}

/// Exponential moving average, seeded with the SMA of the first `period`
/// values. First valid index: period - 1.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < period {
        return out;
    }

    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = seed;

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut prev = seed;
    for i in period..n {
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        out[i] = prev;
    }
    out
}

/// Wilder RSI. First valid index: period (needs `period` changes).
///
/// Edge cases: no losses in the window → 100; no gains → 0; no movement → 50.
pub fn rsi(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < period + 1 {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = values[i] - values[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = rsi_value(avg_gain, avg_loss);

    let alpha = 1.0 / period as f64;
    for i in (period + 1)..n {
        let change = values[i] - values[i - 1];
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = alpha * gain + (1.0 - alpha) * avg_gain;
        avg_loss = alpha * loss + (1.0 - alpha) * avg_loss;
        out[i] = rsi_value(avg_gain, avg_loss);
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() < tol,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn sma_basic() {
        let out = sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert!(out[0].is_nan());
        assert!(out[1].is_nan());
        assert_approx(out[2], 2.0, 1e-10);
        assert_approx(out[3], 3.0, 1e-10);
        assert_approx(out[4], 4.0, 1e-10);
    }

    #[test]
    fn sma_too_short() {
        let out = sma(&[1.0, 2.0], 5);
        assert!(out.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn ema_seeded_with_sma() {
        let out = ema(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_approx(out[2], 2.0, 1e-10);
        // alpha = 0.5: 0.5*4 + 0.5*2 = 3.0
        assert_approx(out[3], 3.0, 1e-10);
    }

    #[test]
    fn rsi_all_gains_is_100() {
        let out = rsi(&[100.0, 101.0, 102.0, 103.0, 104.0], 3);
        assert_approx(out[3], 100.0, 1e-10);
    }

    #[test]
    fn rsi_all_losses_is_0() {
        let out = rsi(&[104.0, 103.0, 102.0, 101.0, 100.0], 3);
        assert_approx(out[3], 0.0, 1e-10);
    }

    #[test]
    fn rsi_stays_in_bounds() {
        let values = [100.0, 105.0, 98.0, 110.0, 95.0, 115.0, 90.0, 120.0];
        for v in rsi(&values, 3) {
            if !v.is_nan() {
                assert!((0.0..=100.0).contains(&v));
            }
        }
    }

    #[test]
    fn rsi_first_valid_index_is_period() {
        let out = rsi(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2);
        assert!(out[1].is_nan());
        assert!(!out[2].is_nan());
    }

    #[test]
    fn compute_dispatches_by_kind() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let s = compute(&IndicatorKind::Sma { period: 3 }, &values);
        assert_approx(s[4], 4.0, 1e-10);
        let r = compute(&IndicatorKind::Rsi { period: 2 }, &values);
        assert_approx(r[2], 100.0, 1e-10);
    }
}
