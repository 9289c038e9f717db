//! Reporting — Markdown ranking report, fixed-column CSV summary, and
//! per-spec JSON artifacts.
//!
//! The CSV column set is fixed regardless of which metrics a given payload
//! happened to report; unavailable metrics render as empty cells, never as
//! zeros. Disqualified and inconclusive specs appear in both the report and
//! the summary so "could not be evaluated" is always visible next to
//! "evaluated and bad".

use crate::parser::MetricValue;
use crate::ranker::{RankReport, RankedEntry};
use crate::validator::ValidationResult;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use stratforge_core::SpecId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report io: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("artifact serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv buffer is not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

fn cell(metric: MetricValue) -> String {
    match metric {
        MetricValue::Available(v) => format!("{v:.4}"),
        MetricValue::Unavailable => String::new(),
    }
}

fn penalty_list(entry: &RankedEntry) -> String {
    entry
        .penalties
        .iter()
        .map(|p| format!("{:?}", p.reason))
        .collect::<Vec<_>>()
        .join("+")
}

// ─── CSV summary ─────────────────────────────────────────────────────

/// Fixed columns: spec_id, status, rank, score, sharpe, cagr, max_drawdown,
/// win_rate, profit_factor, trade_count, penalties, notes.
pub fn summary_csv(report: &RankReport) -> Result<String, ReportError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "spec_id",
        "status",
        "rank",
        "score",
        "sharpe",
        "cagr",
        "max_drawdown",
        "win_rate",
        "profit_factor",
        "trade_count",
        "penalties",
        "notes",
    ])?;

    for (i, entry) in report.ranked.iter().enumerate() {
        wtr.write_record([
            entry.spec_id.0.as_str(),
            "ranked",
            &(i + 1).to_string(),
            &format!("{:.4}", entry.score),
            &cell(entry.metrics.sharpe),
            &cell(entry.metrics.cagr),
            &cell(entry.metrics.max_drawdown),
            &cell(entry.metrics.win_rate),
            &cell(entry.metrics.profit_factor),
            &entry
                .metrics
                .trade_count
                .map(|t| t.to_string())
                .unwrap_or_default(),
            &penalty_list(entry),
            &entry.missing_metrics.join("+"),
        ])?;
    }
    for dq in &report.disqualified {
        let reasons = dq
            .reasons
            .iter()
            .map(|r| format!("{r:?}"))
            .collect::<Vec<_>>()
            .join("+");
        wtr.write_record([
            dq.spec_id.0.as_str(),
            "disqualified",
            "",
            "",
            "",
            "",
            "",
            "",
            "",
            "",
            "",
            &reasons,
        ])?;
    }
    for id in &report.for_review {
        wtr.write_record([
            id.0.as_str(),
            "review",
            "",
            "",
            "",
            "",
            "",
            "",
            "",
            "",
            "",
            "validation inconclusive",
        ])?;
    }

    let data = wtr
        .into_inner()
        .map_err(|e| ReportError::Io(e.into_error()))?;
    Ok(String::from_utf8(data)?)
}

// ─── Markdown report ─────────────────────────────────────────────────

/// Human-readable ranking report.
pub fn markdown_report(report: &RankReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Strategy ranking\n");
    let _ = writeln!(
        out,
        "{} ranked, {} disqualified, {} for review\n",
        report.ranked.len(),
        report.disqualified.len(),
        report.for_review.len()
    );

    let _ = writeln!(out, "## Ranked\n");
    let _ = writeln!(
        out,
        "| # | spec | score | sharpe | cagr | max dd | trades | penalties |"
    );
    let _ = writeln!(out, "|---|------|-------|--------|------|--------|--------|-----------|");
    for (i, entry) in report.ranked.iter().enumerate() {
        let _ = writeln!(
            out,
            "| {} | `{}` | {:.4} | {} | {} | {} | {} | {} |",
            i + 1,
            entry.spec_id.short(),
            entry.score,
            cell(entry.metrics.sharpe),
            cell(entry.metrics.cagr),
            cell(entry.metrics.max_drawdown),
            entry
                .metrics
                .trade_count
                .map(|t| t.to_string())
                .unwrap_or_default(),
            penalty_list(entry),
        );
    }

    if !report.disqualified.is_empty() {
        let _ = writeln!(out, "\n## Disqualified\n");
        for dq in &report.disqualified {
            let reasons = dq
                .reasons
                .iter()
                .map(|r| format!("{r:?}"))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(out, "- `{}` — {}", dq.spec_id.short(), reasons);
        }
    }

    if !report.for_review.is_empty() {
        let _ = writeln!(out, "\n## For review (inconclusive)\n");
        for id in &report.for_review {
            let _ = writeln!(out, "- `{}`", id.short());
        }
    }

    out
}

// ─── Artifact bundle ─────────────────────────────────────────────────

/// Paths produced by [`save_report`].
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub markdown: PathBuf,
    pub summary_csv: PathBuf,
    pub validation_dir: PathBuf,
}

/// Write the full artifact set: `report.md`, `summary.csv`, and one
/// validation JSON per spec under `validations/`.
pub fn save_report(
    output_dir: &Path,
    report: &RankReport,
    validations: &[(SpecId, ValidationResult)],
) -> Result<ReportPaths, ReportError> {
    fs::create_dir_all(output_dir)?;
    let validation_dir = output_dir.join("validations");
    fs::create_dir_all(&validation_dir)?;

    let markdown = output_dir.join("report.md");
    fs::write(&markdown, markdown_report(report))?;

    let summary = output_dir.join("summary.csv");
    fs::write(&summary, summary_csv(report)?)?;

    for (spec_id, validation) in validations {
        let path = validation_dir.join(format!("{spec_id}.json"));
        fs::write(&path, serde_json::to_string_pretty(validation)?)?;
    }

    Ok(ReportPaths { markdown, summary_csv: summary, validation_dir })
}
