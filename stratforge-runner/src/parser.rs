//! Result parser — normalizes heterogeneous statistics payloads.
//!
//! The service renames and re-nests its statistics keys between versions
//! ("SharpeRatio", "sharpe_ratio", "Sharpe Ratio" are all the same metric,
//! sometimes under a "statistics" or "tradeStatistics" wrapper). The parser
//! flattens the payload, normalizes key spelling, and resolves each metric
//! through an alias table.
//!
//! `parse` is total over recognizable payloads: a missing metric yields
//! [`MetricValue::Unavailable`], never zero, so downstream ranking can tell
//! "unknown" from "bad". Only a payload with no recognizable metric at all is
//! an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("statistics payload shape is unrecognizable: {0}")]
    Unrecognizable(String),
}

/// A metric that may be absent from a given payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum MetricValue {
    Available(f64),
    Unavailable,
}

impl MetricValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            MetricValue::Available(v) => Some(*v),
            MetricValue::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, MetricValue::Available(_))
    }
}

/// Normalized metrics record for one completed backtest. The raw payload is
/// retained for forensic replay; everything else is derived from it once and
/// immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsRecord {
    pub cagr: MetricValue,
    pub sharpe: MetricValue,
    pub max_drawdown: MetricValue,
    pub win_rate: MetricValue,
    pub profit_factor: MetricValue,
    pub trade_count: Option<u64>,
    pub avg_win: MetricValue,
    pub avg_loss: MetricValue,
    pub starting_equity: MetricValue,
    pub ending_equity: MetricValue,
    pub raw: Value,
}

// ─── Alias table ─────────────────────────────────────────────────────

/// Known spellings per metric, already normalized (lowercase, alphanumeric
/// only). Extend here when the service renames a key; nothing else changes.
const ALIASES: &[(&str, &[&str])] = &[
    ("cagr", &["compoundingannualreturn", "cagr", "annualreturn"]),
    ("sharpe", &["sharperatio", "sharpe"]),
    ("max_drawdown", &["drawdown", "maxdrawdown", "maximumdrawdown"]),
    ("win_rate", &["winrate", "winningrate"]),
    ("profit_factor", &["profitfactor"]),
    ("trade_count", &["totaltrades", "totalnumberoftrades", "tradecount"]),
    ("avg_win", &["averagewin", "avgwin", "averagewinningtrade"]),
    ("avg_loss", &["averageloss", "avgloss", "averagelosingtrade"]),
    ("starting_equity", &["startequity", "startingequity", "initialcapital"]),
    ("ending_equity", &["endequity", "endingequity", "finalequity"]),
];

/// Lowercase and strip everything non-alphanumeric, so "Sharpe Ratio",
/// "sharpe_ratio", and "SharpeRatio" collapse to one key.
fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Flatten nested objects into leaf-key → value. The wrapper level carries no
/// information ("statistics", "tradeStatistics"); the leaf name is what the
/// alias table matches. First occurrence of a key wins.
fn flatten(value: &Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match child {
                    Value::Object(_) => flatten(child, out),
                    leaf => {
                        out.entry(normalize_key(key)).or_insert_with(|| leaf.clone());
                    }
                }
            }
        }
        _ => {}
    }
}

/// Coerce a payload scalar to f64. Handles bare numbers, numeric strings,
/// percent strings ("12.5%" → 0.125), and currency strings ("$100,000.00").
fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Some(pct) = trimmed.strip_suffix('%') {
                return clean_numeric(pct).map(|v| v / 100.0);
            }
            clean_numeric(trimmed)
        }
        _ => None,
    }
}

fn clean_numeric(s: &str) -> Option<f64> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

fn lookup(flat: &BTreeMap<String, Value>, metric: &str) -> MetricValue {
    let aliases = ALIASES
        .iter()
        .find(|(name, _)| *name == metric)
        .map(|(_, aliases)| *aliases)
        .unwrap_or(&[]);
    for alias in aliases {
        if let Some(value) = flat.get(*alias) {
            if let Some(number) = coerce_number(value) {
                return MetricValue::Available(number);
            }
        }
    }
    MetricValue::Unavailable
}

/// Parse a raw statistics payload into a normalized record.
pub fn parse(payload: &Value) -> Result<StatsRecord, ParseError> {
    if !payload.is_object() {
        return Err(ParseError::Unrecognizable(format!(
            "expected an object, got {payload}"
        )));
    }

    let mut flat = BTreeMap::new();
    flatten(payload, &mut flat);

    let record = StatsRecord {
        cagr: lookup(&flat, "cagr"),
        sharpe: lookup(&flat, "sharpe"),
        max_drawdown: lookup(&flat, "max_drawdown"),
        win_rate: lookup(&flat, "win_rate"),
        profit_factor: lookup(&flat, "profit_factor"),
        trade_count: lookup(&flat, "trade_count").value().map(|v| v as u64),
        avg_win: lookup(&flat, "avg_win"),
        avg_loss: lookup(&flat, "avg_loss"),
        starting_equity: lookup(&flat, "starting_equity"),
        ending_equity: lookup(&flat, "ending_equity"),
        raw: payload.clone(),
    };

    let recognized = record.cagr.is_available()
        || record.sharpe.is_available()
        || record.max_drawdown.is_available()
        || record.win_rate.is_available()
        || record.profit_factor.is_available()
        || record.trade_count.is_some()
        || record.ending_equity.is_available();
    if !recognized {
        return Err(ParseError::Unrecognizable(
            "no known metric key found in payload".into(),
        ));
    }
    Ok(record)
}
