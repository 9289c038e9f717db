//! Program text generation.
//!
//! Emits a self-contained Python algorithm for the remote execution service.
//! Everything here is mechanical: spec fields map one-to-one onto emitted
//! lines, indicators are emitted in declaration order, and no iteration over
//! unordered collections occurs, which is what makes the output
//! byte-deterministic.

use super::{CostModel, DateRange, LiquidityFilter};
use crate::spec::{
    Combinator, Condition, ConditionGroup, IndicatorKind, Operand, StrategySpec, Universe,
};
use chrono::Datelike;

/// Line-oriented writer with indentation tracking.
struct CodeWriter {
    buf: String,
    indent: usize,
}

impl CodeWriter {
    fn new() -> Self {
        Self { buf: String::new(), indent: 0 }
    }

    fn line(&mut self, text: &str) {
        if text.is_empty() {
            self.buf.push('\n');
            return;
        }
        for _ in 0..self.indent {
            self.buf.push_str("    ");
        }
        self.buf.push_str(text);
        self.buf.push('\n');
    }

    fn open(&mut self, text: &str) {
        self.line(text);
        self.indent += 1;
    }

    fn close(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }
}

/// Render a float the same way every time. `{:?}` gives the shortest
/// round-trippable representation ("10.0", not "10" or "10.000000").
fn py_float(v: f64) -> String {
    format!("{v:?}")
}

fn operand_expr(operand: &Operand, prev: bool) -> String {
    match operand {
        Operand::Indicator { name } => {
            if prev {
                format!("prev[\"{name}\"]")
            } else {
                format!("values[\"{name}\"]")
            }
        }
        Operand::Price => {
            if prev {
                "prev[\"_price\"]".to_string()
            } else {
                "price".to_string()
            }
        }
        Operand::Const { value } => py_float(*value),
    }
}

fn condition_expr(cond: &Condition) -> String {
    match cond {
        Condition::Comparison { left, op, right } => format!(
            "({} {} {})",
            operand_expr(left, false),
            op.python_op(),
            operand_expr(right, false)
        ),
        Condition::CrossAbove { left, right } => format!(
            "({lp} <= {rp} and {ln} > {rn})",
            lp = operand_expr(left, true),
            rp = operand_expr(right, true),
            ln = operand_expr(left, false),
            rn = operand_expr(right, false)
        ),
        Condition::CrossBelow { left, right } => format!(
            "({lp} >= {rp} and {ln} < {rn})",
            lp = operand_expr(left, true),
            rp = operand_expr(right, true),
            ln = operand_expr(left, false),
            rn = operand_expr(right, false)
        ),
    }
}

fn group_expr(group: &ConditionGroup) -> String {
    if group.conditions.is_empty() {
        return "False".to_string();
    }
    let joiner = match group.combinator {
        Combinator::All => " and ",
        Combinator::Any => " or ",
    };
    group
        .conditions
        .iter()
        .map(condition_expr)
        .collect::<Vec<_>>()
        .join(joiner)
}

fn indicator_ctor(kind: &IndicatorKind) -> String {
    match kind {
        IndicatorKind::Sma { period } => format!("self.sma(symbol, {period}, Resolution.DAILY)"),
        IndicatorKind::Ema { period } => format!("self.ema(symbol, {period}, Resolution.DAILY)"),
        IndicatorKind::Rsi { period } => format!(
            "self.rsi(symbol, {period}, MovingAverageType.WILDERS, Resolution.DAILY)"
        ),
    }
}

/// Generate the full program text.
pub fn generate(
    spec: &StrategySpec,
    range: DateRange,
    cost: &CostModel,
    liquidity: &LiquidityFilter,
) -> String {
    let mut w = CodeWriter::new();

    w.line("# Auto-generated trading algorithm. Do not edit by hand.");
    w.line("from AlgorithmImports import *");
    w.line("");
    w.line("");
    emit_cost_models(&mut w);
    w.open("class GeneratedStrategy(QCAlgorithm):");
    w.line(&format!("\"\"\"{}: {}\"\"\"", spec.name, spec.description));
    w.line("");

    emit_initialize(&mut w, spec, range, cost, liquidity);
    emit_init_security(&mut w);
    emit_coarse_filter(&mut w, spec);
    emit_securities_changed(&mut w, spec);
    emit_has_data(&mut w);
    emit_place(&mut w);
    emit_on_data(&mut w, spec);

    w.close();
    w.buf
}

fn emit_cost_models(w: &mut CodeWriter) {
    w.open("class _SlippageModel:");
    w.line("\"\"\"Fixed-fraction slippage per side.\"\"\"");
    w.line("");
    w.open("def __init__(self, pct):");
    w.line("self._pct = pct");
    w.close();
    w.line("");
    w.open("def get_slippage_approximation(self, asset, order):");
    w.line("return asset.price * self._pct");
    w.close();
    w.close();
    w.line("");
    w.line("");
    w.open("class _FeeModel:");
    w.line("\"\"\"Per-share commission with a per-order minimum.\"\"\"");
    w.line("");
    w.open("def __init__(self, per_share, minimum):");
    w.line("self._per_share = per_share");
    w.line("self._minimum = minimum");
    w.close();
    w.line("");
    w.open("def get_order_fee(self, parameters):");
    w.line("quantity = parameters.order.absolute_quantity");
    w.line("fee = max(quantity * self._per_share, self._minimum)");
    w.line("return OrderFee(CashAmount(fee, \"USD\"))");
    w.close();
    w.close();
    w.line("");
    w.line("");
}

fn emit_initialize(
    w: &mut CodeWriter,
    spec: &StrategySpec,
    range: DateRange,
    cost: &CostModel,
    liquidity: &LiquidityFilter,
) {
    w.open("def initialize(self):");
    w.line(&format!(
        "self.set_start_date({}, {}, {})",
        range.start.year(),
        range.start.month(),
        range.start.day()
    ));
    w.line(&format!(
        "self.set_end_date({}, {}, {})",
        range.end.year(),
        range.end.month(),
        range.end.day()
    ));
    w.line(&format!("self.set_cash({})", py_float(super::INITIAL_CAPITAL)));
    w.line("");
    w.line("# transaction-cost model, applied to every security");
    w.line(&format!("self._slippage_pct = {}", py_float(cost.slippage_pct)));
    w.line(&format!(
        "self._commission_per_share = {}",
        py_float(cost.commission_per_share)
    ));
    w.line(&format!("self._min_commission = {}", py_float(cost.min_commission)));
    w.line("self.set_security_initializer(self._init_security)");
    w.line("");
    w.line("# liquidity floor for every traded symbol");
    w.line(&format!("self._min_price = {}", py_float(liquidity.min_price)));
    w.line(&format!(
        "self._min_dollar_volume = {}",
        py_float(liquidity.min_dollar_volume)
    ));
    w.line("");
    w.line(&format!(
        "self._position_size_usd = {}",
        py_float(spec.risk.position_size_usd)
    ));

    match &spec.universe {
        Universe::Static { symbols } => {
            let quoted: Vec<String> = symbols.iter().map(|s| format!("\"{s}\"")).collect();
            w.line(&format!("self._tickers = [{}]", quoted.join(", ")));
            w.line("self._universe_size = None");
        }
        Universe::Filtered { description, size } => {
            w.line(&format!("# dynamic universe: {description}"));
            w.line("self._tickers = None");
            w.line(&format!("self._universe_size = {size}"));
        }
    }
    w.line("self.universe_settings.resolution = Resolution.DAILY");
    w.line("self.add_universe(self._coarse_filter)");
    w.line("");
    w.line("self._indicators = {}");
    w.line("self._prev = {}");
    w.line("self._bars_held = {}");
    w.line("");
    w.line("# warm-up: longest indicator lookback plus safety margin");
    w.line(&format!("self.set_warm_up({}, Resolution.DAILY)", spec.warmup_bars()));
    w.close();
    w.line("");
}

fn emit_init_security(w: &mut CodeWriter) {
    w.open("def _init_security(self, security):");
    w.line("security.set_slippage_model(_SlippageModel(self._slippage_pct))");
    w.line("security.set_fee_model(");
    w.line("    _FeeModel(self._commission_per_share, self._min_commission)");
    w.line(")");
    w.close();
    w.line("");
}

fn emit_coarse_filter(w: &mut CodeWriter, spec: &StrategySpec) {
    w.open("def _coarse_filter(self, coarse):");
    w.line("# minimum-price and minimum-liquidity floor applied to all candidates");
    w.open("eligible = [c for c in coarse");
    w.line("if c.price >= self._min_price");
    w.line("and c.dollar_volume >= self._min_dollar_volume]");
    w.close();
    match &spec.universe {
        Universe::Static { .. } => {
            w.line("chosen = [c for c in eligible if c.symbol.value in self._tickers]");
        }
        Universe::Filtered { .. } => {
            w.line("eligible.sort(key=lambda c: c.dollar_volume, reverse=True)");
            w.line("chosen = eligible[: self._universe_size]");
        }
    }
    w.line("return [c.symbol for c in chosen]");
    w.close();
    w.line("");
}

fn emit_securities_changed(w: &mut CodeWriter, spec: &StrategySpec) {
    w.open("def on_securities_changed(self, changes):");
    w.open("for security in changes.added_securities:");
    w.line("symbol = security.symbol");
    w.open("self._indicators[symbol] = {");
    for ind in &spec.indicators {
        w.line(&format!("\"{}\": {},", ind.name, indicator_ctor(&ind.kind)));
    }
    w.close();
    w.line("}");
    w.line("self._prev[symbol] = {}");
    w.line("self._bars_held[symbol] = 0");
    w.close();
    w.open("for security in changes.removed_securities:");
    w.line("symbol = security.symbol");
    w.open("if self.portfolio[symbol].invested:");
    w.line("self.liquidate(symbol)");
    w.close();
    w.line("self._indicators.pop(symbol, None)");
    w.line("self._prev.pop(symbol, None)");
    w.line("self._bars_held.pop(symbol, None)");
    w.close();
    w.close();
    w.line("");
}

fn emit_has_data(w: &mut CodeWriter) {
    w.open("def _has_data(self, data, symbol, inds):");
    w.line("# missing-data guard: no bar or unready indicator means no signal");
    w.open("if symbol not in data or data[symbol] is None:");
    w.line("return False");
    w.close();
    w.line("return all(ind.is_ready for ind in inds.values())");
    w.close();
    w.line("");
}

fn emit_place(w: &mut CodeWriter) {
    w.open("def _place(self, symbol, quantity):");
    w.line("# signals computed on this bar's close fill at the next bar's open");
    w.line("self.market_on_open_order(symbol, quantity)");
    w.close();
    w.line("");
}

fn emit_on_data(w: &mut CodeWriter, spec: &StrategySpec) {
    w.open("def on_data(self, data):");
    w.open("for symbol, inds in self._indicators.items():");
    w.open("if not self._has_data(data, symbol, inds):");
    w.line("continue");
    w.close();
    w.line("price = data[symbol].close");
    w.line("values = {name: ind.current.value for name, ind in inds.items()}");
    w.line("");
    w.open("if self.is_warming_up or not self._prev[symbol]:");
    w.line("# seed previous values from the last warm-up bar so crossover");
    w.line("# conditions are defined on the first live bar");
    w.line("self._prev[symbol] = dict(values, _price=price)");
    w.open("if self.is_warming_up:");
    w.line("continue");
    w.close();
    w.close();
    w.line("prev = self._prev[symbol]");
    w.line("");
    w.line(&format!("entry_signal = {}", group_expr(&spec.entry_conditions)));
    w.line(&format!("exit_signal = {}", group_expr(&spec.exit_conditions)));
    w.line("");
    w.line("holding = self.portfolio[symbol]");
    w.open("if holding.invested:");
    w.line("self._bars_held[symbol] += 1");
    w.line("entry_price = holding.average_price");
    emit_exit_chain(w, spec);
    w.close();
    w.open("elif entry_signal:");
    w.line("quantity = int(self._position_size_usd // price)");
    w.open("if quantity > 0:");
    w.line("self._place(symbol, quantity)");
    w.line("self._bars_held[symbol] = 0");
    w.close();
    w.close();
    w.line("");
    w.line("self._prev[symbol] = dict(values, _price=price)");
    w.close();
    w.close();
}

/// Exit branches in fixed precedence order; absent risk rules are omitted,
/// the order of the survivors never changes.
fn emit_exit_chain(w: &mut CodeWriter, spec: &StrategySpec) {
    let mut first = true;
    let mut branch = |w: &mut CodeWriter, comment: &str, cond: &str| {
        w.line(comment);
        let kw = if first { "if" } else { "elif" };
        first = false;
        w.open(&format!("{kw} {cond}:"));
        w.line("self._place(symbol, -holding.quantity)");
        w.close();
    };

    if let Some(sl) = spec.risk.stop_loss_pct {
        branch(
            w,
            "# exit 1: stop-loss",
            &format!("price <= entry_price * (1.0 - {})", py_float(sl)),
        );
    }
    branch(w, "# exit 2: signal", "exit_signal");
    if let Some(tp) = spec.risk.take_profit_pct {
        branch(
            w,
            "# exit 3: take-profit",
            &format!("price >= entry_price * (1.0 + {})", py_float(tp)),
        );
    }
    if let Some(max_bars) = spec.risk.max_holding_bars {
        branch(
            w,
            "# exit 4: max holding period",
            &format!("self._bars_held[symbol] >= {max_bars}"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::test_fixtures::{rsi_reversion_spec, sma_cross_spec};
    use chrono::NaiveDate;

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2018, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
        )
    }

    fn gen(spec: &StrategySpec) -> String {
        generate(spec, range(), &CostModel::default(), &LiquidityFilter::default())
    }

    #[test]
    fn comparison_renders_current_values() {
        let src = gen(&rsi_reversion_spec());
        assert!(src.contains("entry_signal = (values[\"rsi_2\"] < 10.0)"));
        assert!(src.contains("exit_signal = (values[\"rsi_2\"] > 70.0)"));
    }

    #[test]
    fn crossover_renders_previous_and_current() {
        let src = gen(&sma_cross_spec());
        assert!(src.contains(
            "entry_signal = (prev[\"_price\"] <= prev[\"sma_20\"] and price > values[\"sma_20\"])"
        ));
    }

    #[test]
    fn indicators_emitted_in_declaration_order() {
        let src = gen(&rsi_reversion_spec());
        assert!(src.contains(
            "\"rsi_2\": self.rsi(symbol, 2, MovingAverageType.WILDERS, Resolution.DAILY),"
        ));
    }

    #[test]
    fn dates_rendered_without_padding() {
        let src = gen(&rsi_reversion_spec());
        assert!(src.contains("self.set_start_date(2018, 1, 1)"));
        assert!(src.contains("self.set_end_date(2023, 12, 31)"));
    }

    #[test]
    fn static_universe_lists_tickers() {
        let src = gen(&sma_cross_spec());
        assert!(src.contains("self._tickers = [\"SPY\"]"));
    }

    #[test]
    fn absent_exits_are_omitted() {
        let src = gen(&sma_cross_spec()); // no stop, no tp, no time exit
        assert!(!src.contains("# exit 1: stop-loss"));
        assert!(src.contains("# exit 2: signal"));
        assert!(!src.contains("# exit 3: take-profit"));
        assert!(!src.contains("# exit 4: max holding period"));
    }

    #[test]
    fn float_rendering_is_stable() {
        assert_eq!(py_float(10.0), "10.0");
        assert_eq!(py_float(0.0005), "0.0005");
        assert_eq!(py_float(100000.0), "100000.0");
    }
}
