//! Ranker — penalized composite scoring over validated specs.
//!
//! Scoring reads the **test window's** metrics, not the train window: the
//! ranking exists to order strategies by evidence that survives out of
//! sample. Normalization is min–max clipping against fixed plausible bounds;
//! weights are fixed and documented here, not tunable at runtime.
//!
//! Disqualification is not a low score. A disqualified spec is removed from
//! the ordering and reported separately, so "this strategy is bad" never
//! masquerades as "this strategy scored poorly but is still a candidate".
//! Inconclusive validations are a third bucket: flagged for manual review,
//! neither ranked nor disqualified.

use crate::parser::StatsRecord;
use crate::validator::{ConsistencyVerdict, ValidationResult, WindowKind};
use serde::{Deserialize, Serialize};
use stratforge_core::SpecId;

/// Plausible bounds for min–max clipping. Values outside the bounds clip to
/// the edge rather than stretching the scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricBounds {
    pub sharpe: (f64, f64),
    pub cagr: (f64, f64),
    /// Normalized inverted: smaller drawdown scores higher.
    pub max_drawdown: (f64, f64),
    pub win_rate: (f64, f64),
    pub profit_factor: (f64, f64),
}

impl Default for MetricBounds {
    fn default() -> Self {
        Self {
            sharpe: (0.0, 3.0),
            cagr: (0.0, 0.6),
            max_drawdown: (0.0, 0.6),
            win_rate: (0.0, 1.0),
            profit_factor: (1.0, 3.0),
        }
    }
}

/// Fixed composite weights. They sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub sharpe: f64,
    pub cagr: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            sharpe: 0.35,
            cagr: 0.25,
            max_drawdown: 0.20,
            win_rate: 0.10,
            profit_factor: 0.10,
        }
    }
}

/// Multiplicative penalties and their trigger thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PenaltyConfig {
    /// Trades per year above this draw the turnover penalty.
    pub max_trades_per_year: f64,
    pub turnover_multiplier: f64,
    /// Test-window trade count below this draws the thin-sample penalty.
    pub min_trade_count: u64,
    pub thin_trades_multiplier: f64,
    pub failed_consistency_multiplier: f64,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            max_trades_per_year: 250.0,
            turnover_multiplier: 0.8,
            min_trade_count: 20,
            thin_trades_multiplier: 0.7,
            failed_consistency_multiplier: 0.5,
        }
    }
}

/// Hard disqualifiers: violating one removes the spec from the ranking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisqualifyConfig {
    /// Absolute drawdown ceiling in any window.
    pub max_drawdown_ceiling: f64,
}

impl Default for DisqualifyConfig {
    fn default() -> Self {
        Self { max_drawdown_ceiling: 0.4 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RankerConfig {
    pub bounds: MetricBounds,
    pub weights: ScoreWeights,
    pub penalties: PenaltyConfig,
    pub disqualify: DisqualifyConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyReason {
    ExcessiveTurnover,
    ThinTrades,
    FailedConsistency,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AppliedPenalty {
    pub reason: PenaltyReason,
    pub multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisqualifyReason {
    /// CAGR negative in the majority of windows.
    NegativeCagrMajority,
    /// Drawdown beyond the absolute ceiling in some window.
    DrawdownCeiling { window: WindowKind },
}

/// One ranked spec: score, the penalties that shaped it, and the metrics it
/// was scored on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub spec_id: SpecId,
    pub score: f64,
    pub penalties: Vec<AppliedPenalty>,
    /// Metrics the score was computed from (test window).
    pub metrics: StatsRecord,
    /// Metrics that were absent and scored at the bound floor.
    pub missing_metrics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disqualified {
    pub spec_id: SpecId,
    pub reasons: Vec<DisqualifyReason>,
}

/// Full ranking output. `ranked` is ordered best-first; ties broken by spec
/// id so repeated runs produce identical output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankReport {
    pub ranked: Vec<RankedEntry>,
    pub disqualified: Vec<Disqualified>,
    /// Inconclusive validations: neither promoted nor disqualified.
    pub for_review: Vec<SpecId>,
}

/// A validated spec entering the ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankCandidate {
    pub spec_id: SpecId,
    pub validation: ValidationResult,
}

fn normalize(value: f64, (lo, hi): (f64, f64)) -> f64 {
    if hi <= lo {
        return 0.0;
    }
    ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
}

fn disqualify_reasons(
    candidate: &RankCandidate,
    config: &DisqualifyConfig,
) -> Vec<DisqualifyReason> {
    let mut reasons = Vec::new();

    let windows = &candidate.validation.windows;
    let negative = windows
        .iter()
        .filter(|w| w.stats.cagr.value().is_some_and(|c| c < 0.0))
        .count();
    if negative * 2 > windows.len() {
        reasons.push(DisqualifyReason::NegativeCagrMajority);
    }

    for report in windows {
        if report
            .stats
            .max_drawdown
            .value()
            .is_some_and(|dd| dd > config.max_drawdown_ceiling)
        {
            reasons.push(DisqualifyReason::DrawdownCeiling { window: report.window.kind });
        }
    }
    reasons
}

fn score_candidate(candidate: &RankCandidate, config: &RankerConfig) -> Option<RankedEntry> {
    let test = candidate
        .validation
        .windows
        .iter()
        .find(|w| w.window.kind == WindowKind::Test)?;
    let stats = &test.stats;

    let mut missing = Vec::new();
    let mut component = |value: Option<f64>, bounds, name: &str| match value {
        Some(v) => normalize(v, bounds),
        None => {
            missing.push(name.to_string());
            0.0
        }
    };

    let weights = &config.weights;
    let bounds = &config.bounds;
    let base = weights.sharpe * component(stats.sharpe.value(), bounds.sharpe, "sharpe")
        + weights.cagr * component(stats.cagr.value(), bounds.cagr, "cagr")
        + weights.max_drawdown
            * (1.0
                - component(stats.max_drawdown.value(), bounds.max_drawdown, "max_drawdown"))
        + weights.win_rate * component(stats.win_rate.value(), bounds.win_rate, "win_rate")
        + weights.profit_factor
            * component(stats.profit_factor.value(), bounds.profit_factor, "profit_factor");

    let mut penalties = Vec::new();
    let window_years = (test.window.range.days().max(1)) as f64 / 365.25;
    if let Some(trades) = stats.trade_count {
        if trades as f64 / window_years > config.penalties.max_trades_per_year {
            penalties.push(AppliedPenalty {
                reason: PenaltyReason::ExcessiveTurnover,
                multiplier: config.penalties.turnover_multiplier,
            });
        }
        if trades < config.penalties.min_trade_count {
            penalties.push(AppliedPenalty {
                reason: PenaltyReason::ThinTrades,
                multiplier: config.penalties.thin_trades_multiplier,
            });
        }
    }
    if matches!(candidate.validation.verdict, ConsistencyVerdict::Fail { .. }) {
        penalties.push(AppliedPenalty {
            reason: PenaltyReason::FailedConsistency,
            multiplier: config.penalties.failed_consistency_multiplier,
        });
    }

    let score = penalties.iter().fold(base, |s, p| s * p.multiplier);
    Some(RankedEntry {
        spec_id: candidate.spec_id.clone(),
        score,
        penalties,
        metrics: stats.clone(),
        missing_metrics: missing,
    })
}

/// Rank validated candidates. Total order: score descending, spec id
/// ascending on ties.
pub fn rank(candidates: &[RankCandidate], config: &RankerConfig) -> RankReport {
    let mut ranked = Vec::new();
    let mut disqualified = Vec::new();
    let mut for_review = Vec::new();

    for candidate in candidates {
        if matches!(
            candidate.validation.verdict,
            ConsistencyVerdict::Inconclusive { .. }
        ) {
            for_review.push(candidate.spec_id.clone());
            continue;
        }
        let reasons = disqualify_reasons(candidate, &config.disqualify);
        if !reasons.is_empty() {
            disqualified.push(Disqualified { spec_id: candidate.spec_id.clone(), reasons });
            continue;
        }
        match score_candidate(candidate, config) {
            Some(entry) => ranked.push(entry),
            None => for_review.push(candidate.spec_id.clone()),
        }
    }

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.spec_id.cmp(&b.spec_id))
    });
    disqualified.sort_by(|a, b| a.spec_id.cmp(&b.spec_id));
    for_review.sort();

    RankReport { ranked, disqualified, for_review }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::MetricValue;
    use crate::validator::{
        split, Regime, SplitPolicy, ValidationResult, Window, WindowReport,
    };
    use chrono::NaiveDate;
    use serde_json::json;
    use stratforge_core::DateRange;

    fn windows() -> [Window; 3] {
        let full = DateRange::new(
            NaiveDate::from_ymd_opt(2018, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2022, 12, 31).unwrap(),
        );
        split(full, &SplitPolicy::default()).unwrap()
    }

    fn stats(sharpe: f64, cagr: f64, drawdown: f64, trades: u64) -> StatsRecord {
        StatsRecord {
            cagr: MetricValue::Available(cagr),
            sharpe: MetricValue::Available(sharpe),
            max_drawdown: MetricValue::Available(drawdown),
            win_rate: MetricValue::Available(0.6),
            profit_factor: MetricValue::Available(1.6),
            trade_count: Some(trades),
            avg_win: MetricValue::Available(0.01),
            avg_loss: MetricValue::Available(-0.008),
            starting_equity: MetricValue::Available(100_000.0),
            ending_equity: MetricValue::Available(130_000.0),
            raw: json!({}),
        }
    }

    fn candidate(id: &str, per_window: [StatsRecord; 3]) -> RankCandidate {
        let windows = windows();
        RankCandidate {
            spec_id: SpecId::from_content(id.as_bytes()),
            validation: ValidationResult {
                windows: windows
                    .into_iter()
                    .zip(per_window)
                    .map(|(window, stats)| WindowReport {
                        window,
                        regime: Some(Regime::Bull),
                        stats,
                    })
                    .collect(),
                verdict: ConsistencyVerdict::Pass,
            },
        }
    }

    fn healthy(id: &str, test_sharpe: f64) -> RankCandidate {
        candidate(
            id,
            [
                stats(1.2, 0.15, 0.10, 40),
                stats(1.0, 0.12, 0.12, 35),
                stats(test_sharpe, 0.10, 0.10, 30),
            ],
        )
    }

    #[test]
    fn higher_sharpe_never_ranks_below() {
        let a = healthy("spec-a", 1.5);
        let b = healthy("spec-b", 0.8);
        let report = rank(&[b, a], &RankerConfig::default());
        assert_eq!(report.ranked.len(), 2);
        assert!(report.ranked[0].score > report.ranked[1].score);
        assert_eq!(
            report.ranked[0].spec_id,
            SpecId::from_content(b"spec-a")
        );
    }

    #[test]
    fn ties_break_by_spec_id() {
        let a = healthy("aaa", 1.0);
        let b = healthy("zzz", 1.0);
        let first_run = rank(&[a.clone(), b.clone()], &RankerConfig::default());
        let second_run = rank(&[b, a], &RankerConfig::default());
        assert_eq!(first_run, second_run);
        assert!(first_run.ranked[0].spec_id < first_run.ranked[1].spec_id);
    }

    #[test]
    fn drawdown_ceiling_disqualifies_and_is_reported() {
        let mut bad = healthy("deep-dd", 2.0);
        bad.validation.windows[1].stats.max_drawdown = MetricValue::Available(0.55);
        let good = healthy("ok", 0.5);
        let report = rank(&[bad, good], &RankerConfig::default());

        assert_eq!(report.ranked.len(), 1);
        assert_eq!(report.disqualified.len(), 1);
        assert_eq!(
            report.disqualified[0].reasons,
            vec![DisqualifyReason::DrawdownCeiling { window: WindowKind::Validation }]
        );
    }

    #[test]
    fn negative_cagr_majority_disqualifies() {
        let bad = candidate(
            "loser",
            [
                stats(0.5, -0.05, 0.1, 40),
                stats(0.4, -0.08, 0.1, 35),
                stats(0.3, 0.02, 0.1, 30),
            ],
        );
        let report = rank(&[bad], &RankerConfig::default());
        assert!(report.ranked.is_empty());
        assert_eq!(
            report.disqualified[0].reasons,
            vec![DisqualifyReason::NegativeCagrMajority]
        );
    }

    #[test]
    fn failed_consistency_penalizes_but_keeps_entry() {
        let mut penalized = healthy("flagged", 1.0);
        penalized.validation.verdict = ConsistencyVerdict::Fail { flags: vec![] };
        let clean = healthy("clean", 1.0);
        let report = rank(&[penalized, clean], &RankerConfig::default());

        assert_eq!(report.ranked.len(), 2);
        let flagged = report
            .ranked
            .iter()
            .find(|e| e.spec_id == SpecId::from_content(b"flagged"))
            .unwrap();
        let clean = report
            .ranked
            .iter()
            .find(|e| e.spec_id == SpecId::from_content(b"clean"))
            .unwrap();
        assert_eq!(flagged.penalties.len(), 1);
        assert!(flagged.score < clean.score);
        assert!((flagged.score - clean.score * 0.5).abs() < 1e-12);
    }

    #[test]
    fn thin_trades_draw_a_penalty() {
        let mut thin = healthy("thin", 1.0);
        thin.validation.windows[2].stats.trade_count = Some(5);
        let report = rank(&[thin], &RankerConfig::default());
        assert!(report.ranked[0]
            .penalties
            .iter()
            .any(|p| p.reason == PenaltyReason::ThinTrades));
    }

    #[test]
    fn excessive_turnover_draws_a_penalty() {
        let mut churner = healthy("churner", 1.0);
        // Test window is ~1.25 years; 600 trades is far past 250/year.
        churner.validation.windows[2].stats.trade_count = Some(600);
        let report = rank(&[churner], &RankerConfig::default());
        assert!(report.ranked[0]
            .penalties
            .iter()
            .any(|p| p.reason == PenaltyReason::ExcessiveTurnover));
    }

    #[test]
    fn inconclusive_goes_to_review_not_ranking() {
        let mut pending = healthy("pending", 1.0);
        pending.validation.verdict =
            ConsistencyVerdict::Inconclusive { reason: "window timed out".into() };
        let report = rank(&[pending], &RankerConfig::default());
        assert!(report.ranked.is_empty());
        assert!(report.disqualified.is_empty());
        assert_eq!(report.for_review.len(), 1);
    }

    #[test]
    fn unavailable_metric_scores_at_floor_and_is_flagged() {
        let mut partial = healthy("partial", 1.0);
        partial.validation.windows[2].stats.profit_factor = MetricValue::Unavailable;
        let full = healthy("full", 1.0);
        let report = rank(&[partial, full], &RankerConfig::default());

        let partial_entry = report
            .ranked
            .iter()
            .find(|e| e.spec_id == SpecId::from_content(b"partial"))
            .unwrap();
        let full_entry = report
            .ranked
            .iter()
            .find(|e| e.spec_id == SpecId::from_content(b"full"))
            .unwrap();
        assert_eq!(partial_entry.missing_metrics, vec!["profit_factor"]);
        assert!(partial_entry.score < full_entry.score);
    }

    #[test]
    fn normalization_clips_to_bounds() {
        assert_eq!(normalize(5.0, (0.0, 3.0)), 1.0);
        assert_eq!(normalize(-1.0, (0.0, 3.0)), 0.0);
        assert_eq!(normalize(1.5, (0.0, 3.0)), 0.5);
    }
}
