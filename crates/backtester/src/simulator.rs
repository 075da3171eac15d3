use crate::error::BacktestError;
use crate::fill::{Bar, FillModel, Side};
use chrono::{DateTime, Utc};
use core_types::{Direction, Kline};
use rust_decimal::prelude::ToPrimitive;
use strategies::Strategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Signal,
    StopLoss,
    TakeProfit,
    /// Still open on the last bar of the window.
    EndOfData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosedTrade {
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    /// Return on the position's equity after both fees.
    pub net_return: f64,
    pub exit_reason: ExitReason,
}

/// The raw output of one symbol's simulation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolRun {
    pub trades: Vec<ClosedTrade>,
    /// Mark-to-market equity after every bar.
    pub equity: Vec<f64>,
}

impl SymbolRun {
    pub fn trade_returns(&self) -> Vec<f64> {
        self.trades.iter().map(|t| t.net_return).collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenPosition {
    entry_time: DateTime<Utc>,
    entry_price: f64,
    entry_equity: f64,
}

impl OpenPosition {
    fn gross_return(&self, direction: Direction, price: f64) -> f64 {
        match direction {
            Direction::Long => price / self.entry_price - 1.0,
            Direction::Short => 1.0 - price / self.entry_price,
        }
    }
}

fn to_bar(kline: &Kline) -> Result<Bar, BacktestError> {
    let conv = |v: rust_decimal::Decimal| {
        v.to_f64()
            .filter(|f| f.is_finite() && *f > 0.0)
            .ok_or_else(|| BacktestError::InvalidPrice(kline.open_time.to_rfc3339()))
    };
    Ok(Bar { open: conv(kline.open)?, high: conv(kline.high)?, low: conv(kline.low)?, close: conv(kline.close)? })
}

/// Where a stop or target touched during `bar` would fill, before slippage.
/// A gap through the level fills at the open. The stop wins when both are touched.
fn protective_exit(
    position: &OpenPosition,
    bar: &Bar,
    direction: Direction,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
) -> Option<(f64, ExitReason)> {
    let entry = position.entry_price;
    match direction {
        Direction::Long => {
            if let Some(stop) = stop_loss.map(|d| entry * (1.0 - d)) {
                if bar.low <= stop {
                    return Some((stop.min(bar.open), ExitReason::StopLoss));
                }
            }
            if let Some(target) = take_profit.map(|d| entry * (1.0 + d)) {
                if bar.high >= target {
                    return Some((target.max(bar.open), ExitReason::TakeProfit));
                }
            }
        }
        Direction::Short => {
            if let Some(stop) = stop_loss.map(|d| entry * (1.0 + d)) {
                if bar.high >= stop {
                    return Some((stop.max(bar.open), ExitReason::StopLoss));
                }
            }
            if let Some(target) = take_profit.map(|d| entry * (1.0 - d)) {
                if bar.low <= target {
                    return Some((target.min(bar.open), ExitReason::TakeProfit));
                }
            }
        }
    }
    None
}

/// Runs one strategy over one symbol's bars.
///
/// One position at a time, sized at full equity. Entries and signal exits fill at
/// the signal bar's close; stops and targets fill intrabar from the bar after entry
/// on. The strategy sees every bar, including those on which a stop fired, so its
/// indicators never skip data. A position still open on the last bar is closed there.
pub fn simulate(
    strategy: &mut dyn Strategy,
    klines: &[Kline],
    model: &FillModel,
    initial_capital: f64,
) -> Result<SymbolRun, BacktestError> {
    if klines.is_empty() {
        return Err(BacktestError::DataUnavailable);
    }

    let direction = strategy.direction();
    let (entry_side, exit_side) = match direction {
        Direction::Long => (Side::Buy, Side::Sell),
        Direction::Short => (Side::Sell, Side::Buy),
    };
    let fee = model.fee_pct();
    let (stop_loss, take_profit) = (strategy.stop_loss(), strategy.take_profit());

    let mut run = SymbolRun { trades: Vec::new(), equity: Vec::with_capacity(klines.len()) };
    let mut equity = initial_capital;
    let mut position: Option<OpenPosition> = None;
    let last = klines.len() - 1;

    let close_position = |position: OpenPosition, fill: f64, at: DateTime<Utc>, reason: ExitReason, run: &mut SymbolRun| {
        let net_return = (position.gross_return(direction, fill) - 2.0 * fee).max(-1.0);
        let trade = ClosedTrade {
            entry_time: position.entry_time,
            exit_time: at,
            entry_price: position.entry_price,
            exit_price: fill,
            net_return,
            exit_reason: reason,
        };
        run.trades.push(trade);
        position.entry_equity * (1.0 + net_return)
    };

    for (i, kline) in klines.iter().enumerate() {
        let bar = to_bar(kline)?;
        let mut exited = false;

        // --- 1. STOP-LOSS / TAKE-PROFIT CHECK ---
        if let Some(open) = position {
            if let Some((reference, reason)) = protective_exit(&open, &bar, direction, stop_loss, take_profit) {
                let fill = model.fill_price(exit_side, reference, &bar);
                equity = close_position(open, fill, kline.open_time, reason, &mut run);
                position = None;
                exited = true;
            }
        }

        // --- 2. STRATEGY EVALUATION ---
        let signal = strategy.evaluate(kline)?;

        // --- 3. SIGNAL PROCESSING ---
        if let Some(open) = position {
            if signal.exit || i == last {
                let reason = if signal.exit { ExitReason::Signal } else { ExitReason::EndOfData };
                let fill = model.fill_price(exit_side, bar.close, &bar);
                equity = close_position(open, fill, kline.open_time, reason, &mut run);
                position = None;
                exited = true;
            }
        } else if signal.entry && !exited && i < last && equity > 0.0 {
            position = Some(OpenPosition {
                entry_time: kline.open_time,
                entry_price: model.fill_price(entry_side, bar.close, &bar),
                entry_equity: equity,
            });
        }

        // --- 4. RECORD EQUITY ---
        let marked = match &position {
            Some(open) => open.entry_equity * (1.0 + open.gross_return(direction, bar.close) - fee),
            None => equity,
        };
        run.equity.push(marked.max(0.0));
    }

    tracing::trace!(trades = run.trades.len(), bars = klines.len(), "Symbol simulated");
    Ok(run)
}
