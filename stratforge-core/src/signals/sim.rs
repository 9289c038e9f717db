//! Reference backtest simulation — long-only, next-bar-open execution.
//!
//! This is not a production engine; it is the executable definition of the
//! semantics the compiler injects into generated programs:
//!
//! - signals computed on bar T's close fill at bar T+1's open (no look-ahead)
//! - fixed-dollar position sizing
//! - slippage % plus per-share commission with a minimum
//! - exit precedence when several exits fire on the same close:
//!   stop-loss, then signal exit, then take-profit, then time exit
//! - stops and targets are checked against the close (conservative, matches
//!   the generated program)
//! - bars with missing data produce no signal

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::eval::{build_indicator_table, evaluate_group};
use crate::compile::CostModel;
use crate::spec::{PriceField, StrategySpec};

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    pub fn field(&self, field: PriceField) -> f64 {
        match field {
            PriceField::Open => self.open,
            PriceField::High => self.high,
            PriceField::Low => self.low,
            PriceField::Close => self.close,
        }
    }

    /// Test helper: a bar `day_offset` days after 2020-01-01 with all price
    /// fields set to `price`.
    pub fn flat(day_offset: u32, price: f64) -> Self {
        let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
            + chrono::Days::new(day_offset as u64);
        Self { date, open: price, high: price, low: price, close: price, volume: 1_000_000 }
    }
}

/// Why a position was closed, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    Signal,
    TakeProfit,
    Time,
}

/// A completed round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimTrade {
    /// Bar index of the entry fill (the open after the signal bar).
    pub entry_bar: usize,
    pub entry_price: f64,
    /// Bar index of the exit fill.
    pub exit_bar: usize,
    pub exit_price: f64,
    pub quantity: f64,
    pub reason: ExitReason,
}

impl SimTrade {
    pub fn net_pnl(&self) -> f64 {
        (self.exit_price - self.entry_price) * self.quantity
    }
}

/// Result of a reference simulation.
#[derive(Debug, Clone)]
pub struct SimResult {
    pub trades: Vec<SimTrade>,
    /// Per-bar equity (cash + position marked at close), full series length.
    pub equity_curve: Vec<f64>,
    /// Bars where the entry condition fired (signal bars, not fill bars).
    pub entry_signal_bars: Vec<usize>,
    /// True if a position was still open when the series ended.
    pub open_at_end: bool,
}

#[derive(Debug)]
struct OpenPosition {
    entry_fill_bar: usize,
    entry_price: f64,
    quantity: f64,
}

#[derive(Debug, Clone, Copy)]
enum Pending {
    Enter,
    Exit(ExitReason),
}

/// Run the reference simulation of `spec` over `bars`.
pub fn simulate(
    spec: &StrategySpec,
    bars: &[Bar],
    cost: &CostModel,
    initial_capital: f64,
) -> SimResult {
    let table = build_indicator_table(spec, bars);
    let warmup = spec.warmup_bars();

    let mut cash = initial_capital;
    let mut position: Option<OpenPosition> = None;
    let mut pending: Option<Pending> = None;
    let mut trades = Vec::new();
    let mut entry_signal_bars = Vec::new();
    let mut equity_curve = Vec::with_capacity(bars.len());

    for (i, bar) in bars.iter().enumerate() {
        // Fill the action decided on the previous close at this bar's open.
        if let Some(action) = pending.take() {
            if bar.open.is_nan() {
                // Missing open: the fill slips to the next bar.
                pending = Some(action);
            } else {
                match action {
                    Pending::Enter => {
                        let fill = bar.open * (1.0 + cost.slippage_pct);
                        let quantity = (spec.risk.position_size_usd / fill).floor();
                        if quantity >= 1.0 {
                            cash -= quantity * fill + cost.commission(quantity);
                            position = Some(OpenPosition {
                                entry_fill_bar: i,
                                entry_price: fill,
                                quantity,
                            });
                        }
                    }
                    Pending::Exit(reason) => {
                        if let Some(pos) = position.take() {
                            let fill = bar.open * (1.0 - cost.slippage_pct);
                            cash += pos.quantity * fill - cost.commission(pos.quantity);
                            trades.push(SimTrade {
                                entry_bar: pos.entry_fill_bar,
                                entry_price: pos.entry_price,
                                exit_bar: i,
                                exit_price: fill,
                                quantity: pos.quantity,
                                reason,
                            });
                        }
                    }
                }
            }
        }

        // Decide the next action on this bar's close.
        if i >= warmup && !bar.close.is_nan() {
            match &position {
                None => {
                    if pending.is_none()
                        && evaluate_group(&spec.entry_conditions, &table, i) == Some(true)
                    {
                        entry_signal_bars.push(i);
                        pending = Some(Pending::Enter);
                    }
                }
                Some(pos) => {
                    if pending.is_none() {
                        if let Some(reason) = exit_reason(spec, &table, pos, bar, i) {
                            pending = Some(Pending::Exit(reason));
                        }
                    }
                }
            }
        }

        let marked = match &position {
            Some(pos) if !bar.close.is_nan() => pos.quantity * bar.close,
            Some(pos) => pos.quantity * pos.entry_price,
            None => 0.0,
        };
        equity_curve.push(cash + marked);
    }

    SimResult {
        trades,
        equity_curve,
        entry_signal_bars,
        open_at_end: position.is_some(),
    }
}

/// Exit checks in fixed precedence order. The first that fires wins.
fn exit_reason(
    spec: &StrategySpec,
    table: &super::eval::IndicatorTable,
    pos: &OpenPosition,
    bar: &Bar,
    i: usize,
) -> Option<ExitReason> {
    if let Some(sl) = spec.risk.stop_loss_pct {
        if bar.close <= pos.entry_price * (1.0 - sl) {
            return Some(ExitReason::StopLoss);
        }
    }
    if !spec.exit_conditions.is_empty()
        && evaluate_group(&spec.exit_conditions, table, i) == Some(true)
    {
        return Some(ExitReason::Signal);
    }
    if let Some(tp) = spec.risk.take_profit_pct {
        if bar.close >= pos.entry_price * (1.0 + tp) {
            return Some(ExitReason::TakeProfit);
        }
    }
    if let Some(max_bars) = spec.risk.max_holding_bars {
        if i - pos.entry_fill_bar >= max_bars {
            return Some(ExitReason::Time);
        }
    }
    None
}
