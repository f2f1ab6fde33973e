//! Bar-by-bar backtesting engine

use chrono::NaiveDateTime;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::strategy::{Signal, Strategy};
use crate::types::*;

const REQUIRED_COLUMNS: [CandleColumn; 5] = [
    CandleColumn::Timestamp,
    CandleColumn::Open,
    CandleColumn::High,
    CandleColumn::Low,
    CandleColumn::Close,
];

/// Position state during simulation
struct OpenPosition {
    entry_time: NaiveDateTime,
    entry_price: Decimal,
    entry_value: Decimal,
    entry_fee: Decimal,
    size: Decimal,
}

/// Backtesting engine that simulates long-only, bar-by-bar execution at the
/// bar close
pub struct BacktestEngine;

impl BacktestEngine {
    /// Turn a candle series into the bar feed: open interest is the constant
    /// 0 and volume is 0 when the column was not selected
    pub fn data_feed(
        series: &CandleSeries,
        from: Option<NaiveDateTime>,
    ) -> EngineResult<Vec<Bar>> {
        if let Some(missing) = REQUIRED_COLUMNS
            .into_iter()
            .find(|column| !series.has_column(*column))
        {
            return Err(EngineError::MissingColumn(missing));
        }
        let with_volume = series.has_column(CandleColumn::Volume);

        Ok(series
            .candles()
            .iter()
            .filter(|candle| from.map_or(true, |from| candle.timestamp >= from))
            .map(|candle| Bar {
                time: candle.timestamp,
                open: candle.open,
                high: candle.high,
                low: candle.low,
                close: candle.close,
                volume: if with_volume { candle.volume } else { 0.0 },
                open_interest: 0.0,
            })
            .collect())
    }

    /// Run `strategy` over `series` with the given cash and commission
    pub fn run(
        config: &BacktestConfig,
        series: &CandleSeries,
        strategy: &mut dyn Strategy,
    ) -> EngineResult<BacktestResult> {
        Self::validate(config)?;
        let bars = Self::data_feed(series, config.from)?;

        let hundred = dec!(100);
        let mut cash = config.cash;
        let mut peak_equity = cash;
        let mut max_drawdown = Decimal::ZERO;
        let mut max_drawdown_pct = Decimal::ZERO;

        let mut trades: Vec<BacktestTrade> = Vec::new();
        let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(bars.len());
        let mut position: Option<OpenPosition> = None;

        info!(
            market = %series.market(),
            interval = %series.interval(),
            strategy = strategy.name(),
            bars = bars.len(),
            cash = %config.cash,
            "Starting backtest"
        );

        strategy.start();

        for bar in &bars {
            let price = to_decimal(bar.close)?;

            match strategy.next(bar, position.is_some()) {
                Signal::Buy => {
                    if position.is_none() && price > Decimal::ZERO {
                        let allocation = cash * config.position_size_pct / hundred;
                        let affordable = cash / (Decimal::ONE + config.commission);
                        let entry_value = allocation.min(affordable);
                        let entry_fee = entry_value * config.commission;
                        let size = entry_value
                            .checked_div(price)
                            .ok_or(EngineError::Price(bar.close))?;
                        cash -= entry_value + entry_fee;

                        position = Some(OpenPosition {
                            entry_time: bar.time,
                            entry_price: price,
                            entry_value,
                            entry_fee,
                            size,
                        });

                        debug!(price = %price, size = %size, time = %bar.time, "Opened LONG position");
                    }
                }
                Signal::Sell => {
                    if let Some(pos) = position.take() {
                        let trade =
                            close_position(pos, bar.time, bar.close, config.commission, &mut cash)?;
                        debug!(
                            entry = %trade.entry_price,
                            exit = %trade.exit_price,
                            pnl = %trade.pnl,
                            "Closed position"
                        );
                        trades.push(trade);
                    }
                }
                Signal::Hold => {}
            }

            let market_value = match &position {
                Some(pos) => pos
                    .size
                    .checked_mul(price)
                    .ok_or(EngineError::Price(bar.close))?,
                None => Decimal::ZERO,
            };
            let current_equity = cash + market_value;

            equity_curve.push(EquityPoint {
                time: bar.time,
                equity: current_equity,
            });

            if current_equity > peak_equity {
                peak_equity = current_equity;
            }
            let drawdown = peak_equity - current_equity;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
                if peak_equity > Decimal::ZERO {
                    max_drawdown_pct = drawdown / peak_equity * hundred;
                }
            }
        }

        // Close any remaining open position at last bar
        if let Some(pos) = position.take() {
            if let Some(last) = bars.last() {
                trades.push(close_position(
                    pos,
                    last.time,
                    last.close,
                    config.commission,
                    &mut cash,
                )?);
            }
        }

        let final_value = cash;
        strategy.stop(final_value);

        let total_trades = trades.len() as u32;
        let winning_trades = trades.iter().filter(|t| t.pnl > Decimal::ZERO).count() as u32;
        let losing_trades = total_trades - winning_trades;

        let win_rate = if total_trades > 0 {
            Decimal::from(winning_trades) / Decimal::from(total_trades) * hundred
        } else {
            Decimal::ZERO
        };

        let total_pnl = final_value - config.cash;
        let total_pnl_pct = total_pnl / config.cash * hundred;
        let total_commission: Decimal = trades.iter().map(|t| t.commission).sum();

        // Profit factor = gross profits / gross losses
        let gross_profits: Decimal = trades
            .iter()
            .filter(|t| t.pnl > Decimal::ZERO)
            .map(|t| t.pnl)
            .sum();
        let gross_losses: Decimal = trades
            .iter()
            .filter(|t| t.pnl < Decimal::ZERO)
            .map(|t| t.pnl.abs())
            .sum();
        let profit_factor = if gross_losses > Decimal::ZERO {
            gross_profits / gross_losses
        } else if gross_profits > Decimal::ZERO {
            dec!(999.99)
        } else {
            Decimal::ZERO
        };

        info!(
            market = %series.market(),
            strategy = strategy.name(),
            total_trades,
            win_rate = %win_rate.round_dp(2),
            final_value = %final_value.round_dp(2),
            "Backtest complete"
        );

        Ok(BacktestResult {
            market: series.market().to_string(),
            interval: series.interval(),
            strategy: strategy.name().to_string(),
            start_time: bars.first().map(|b| b.time),
            end_time: bars.last().map(|b| b.time),
            bars: bars.len(),
            initial_cash: config.cash,
            final_value,
            total_pnl,
            total_pnl_pct,
            total_commission,
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            max_drawdown,
            max_drawdown_pct,
            profit_factor,
            trades,
            equity_curve,
        })
    }

    fn validate(config: &BacktestConfig) -> EngineResult<()> {
        if config.cash <= Decimal::ZERO {
            return Err(EngineError::InvalidConfig(format!(
                "starting cash must be positive, got {}",
                config.cash
            )));
        }
        if config.commission < Decimal::ZERO || config.commission >= Decimal::ONE {
            return Err(EngineError::InvalidConfig(format!(
                "commission must be in [0, 1), got {}",
                config.commission
            )));
        }
        if config.position_size_pct <= Decimal::ZERO || config.position_size_pct > dec!(100) {
            return Err(EngineError::InvalidConfig(format!(
                "position size must be in (0, 100], got {}",
                config.position_size_pct
            )));
        }
        Ok(())
    }
}

fn to_decimal(price: f64) -> EngineResult<Decimal> {
    Decimal::from_f64(price).ok_or(EngineError::Price(price))
}

fn close_position(
    pos: OpenPosition,
    exit_time: NaiveDateTime,
    close: f64,
    commission: Decimal,
    cash: &mut Decimal,
) -> EngineResult<BacktestTrade> {
    let exit_price = to_decimal(close)?;
    let proceeds = pos
        .size
        .checked_mul(exit_price)
        .ok_or(EngineError::Price(close))?;
    let exit_fee = proceeds * commission;
    *cash += proceeds - exit_fee;

    let cost = pos.entry_value + pos.entry_fee;
    let pnl = proceeds - exit_fee - cost;
    let pnl_pct = if cost > Decimal::ZERO {
        pnl / cost * dec!(100)
    } else {
        Decimal::ZERO
    };

    Ok(BacktestTrade {
        entry_time: pos.entry_time,
        exit_time,
        entry_price: pos.entry_price,
        exit_price,
        size: pos.size,
        commission: pos.entry_fee + exit_fee,
        pnl,
        pnl_pct,
    })
}
