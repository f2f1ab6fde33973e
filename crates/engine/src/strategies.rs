//! Built-in strategies
//!
//! Moving-average crossover, RSI mean reversion, a consecutive-close pattern
//! counter, Bollinger bands and MACD crossover. Indicators come from the `ta`
//! crate and are fed the bar close.

use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use ta::indicators::{
    BollingerBands, MovingAverageConvergenceDivergence, RelativeStrengthIndex,
    SimpleMovingAverage,
};
use ta::{Next, Reset};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::strategy::{Signal, Strategy};
use crate::types::Bar;

fn indicator<T, E: fmt::Debug>(built: Result<T, E>, what: &str) -> EngineResult<T> {
    built.map_err(|e| EngineError::Indicator(format!("{what}: {e:?}")))
}

// ============================================================================
// Catalog
// ============================================================================

/// Selectable built-in strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StrategyKind {
    SmaCrossover,
    RsiMeanReversion,
    ThreeSoldiersAndCrows,
    BollingerBands,
    #[default]
    Macd,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::SmaCrossover,
        StrategyKind::RsiMeanReversion,
        StrategyKind::ThreeSoldiersAndCrows,
        StrategyKind::BollingerBands,
        StrategyKind::Macd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::SmaCrossover => "sma-cross",
            StrategyKind::RsiMeanReversion => "rsi",
            StrategyKind::ThreeSoldiersAndCrows => "three-soldiers",
            StrategyKind::BollingerBands => "bbands",
            StrategyKind::Macd => "macd",
        }
    }

    /// Build the strategy with its default parameters
    pub fn build(&self) -> EngineResult<Box<dyn Strategy>> {
        Ok(match self {
            StrategyKind::SmaCrossover => Box::new(SmaCrossover::new(10, 30)?),
            StrategyKind::RsiMeanReversion => Box::new(RsiMeanReversion::new(14, 70.0, 30.0)?),
            StrategyKind::ThreeSoldiersAndCrows => Box::new(ThreeSoldiersAndCrows::new(3)),
            StrategyKind::BollingerBands => Box::new(BollingerBandsStrategy::new(20, 2.0)?),
            StrategyKind::Macd => Box::new(MacdCrossover::new(12, 26, 9)?),
        })
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        StrategyKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| EngineError::UnknownStrategy(s.to_string()))
    }
}

// ============================================================================
// 1. SMA Crossover
// ============================================================================

/// Long when the fast SMA crosses above the slow one, flat on the reverse
pub struct SmaCrossover {
    fast: SimpleMovingAverage,
    slow: SimpleMovingAverage,
    fast_period: usize,
    slow_period: usize,
    prev_fast: f64,
    prev_slow: f64,
    bars_seen: usize,
}

impl SmaCrossover {
    pub fn new(fast_period: usize, slow_period: usize) -> EngineResult<Self> {
        if fast_period >= slow_period {
            return Err(EngineError::Indicator(format!(
                "fast period {fast_period} must be shorter than slow period {slow_period}"
            )));
        }
        Ok(Self {
            fast: indicator(SimpleMovingAverage::new(fast_period), "fast SMA")?,
            slow: indicator(SimpleMovingAverage::new(slow_period), "slow SMA")?,
            fast_period,
            slow_period,
            prev_fast: 0.0,
            prev_slow: 0.0,
            bars_seen: 0,
        })
    }
}

impl Strategy for SmaCrossover {
    fn name(&self) -> &str {
        "SmaCrossover"
    }

    fn start(&mut self) {
        self.fast.reset();
        self.slow.reset();
        self.prev_fast = 0.0;
        self.prev_slow = 0.0;
        self.bars_seen = 0;
    }

    fn next(&mut self, bar: &Bar, in_position: bool) -> Signal {
        let fast = self.fast.next(bar.close);
        let slow = self.slow.next(bar.close);
        self.bars_seen += 1;

        let signal = if self.bars_seen > self.slow_period {
            if !in_position && self.prev_fast <= self.prev_slow && fast > slow {
                Signal::Buy
            } else if in_position && self.prev_fast >= self.prev_slow && fast < slow {
                Signal::Sell
            } else {
                Signal::Hold
            }
        } else {
            Signal::Hold
        };

        self.prev_fast = fast;
        self.prev_slow = slow;
        signal
    }

    fn stop(&mut self, final_value: Decimal) {
        debug!(
            fast = self.fast_period,
            slow = self.slow_period,
            final_value = %final_value.round_dp(2),
            "SMA crossover finished"
        );
    }
}

// ============================================================================
// 2. RSI Mean Reversion
// ============================================================================

/// Buy when RSI drops below `oversold`, sell when it rises above `overbought`
pub struct RsiMeanReversion {
    rsi: RelativeStrengthIndex,
    period: usize,
    overbought: f64,
    oversold: f64,
    bars_seen: usize,
}

impl RsiMeanReversion {
    pub fn new(period: usize, overbought: f64, oversold: f64) -> EngineResult<Self> {
        Ok(Self {
            rsi: indicator(RelativeStrengthIndex::new(period), "RSI")?,
            period,
            overbought,
            oversold,
            bars_seen: 0,
        })
    }
}

impl Strategy for RsiMeanReversion {
    fn name(&self) -> &str {
        "RsiMeanReversion"
    }

    fn start(&mut self) {
        self.rsi.reset();
        self.bars_seen = 0;
    }

    fn next(&mut self, bar: &Bar, in_position: bool) -> Signal {
        let value = self.rsi.next(bar.close);
        self.bars_seen += 1;

        if self.bars_seen <= self.period {
            return Signal::Hold;
        }

        if !in_position && value < self.oversold {
            Signal::Buy
        } else if in_position && value > self.overbought {
            Signal::Sell
        } else {
            Signal::Hold
        }
    }

    fn stop(&mut self, final_value: Decimal) {
        debug!(
            period = self.period,
            final_value = %final_value.round_dp(2),
            "RSI mean reversion finished"
        );
    }
}

// ============================================================================
// 3. Three Soldiers and Crows
// ============================================================================

/// Counts consecutive closes: buys after `run` falling closes, sells after
/// `run` rising closes
pub struct ThreeSoldiersAndCrows {
    run: usize,
    closes: VecDeque<f64>,
}

impl ThreeSoldiersAndCrows {
    pub fn new(run: usize) -> Self {
        let run = run.max(1);
        Self {
            run,
            closes: VecDeque::with_capacity(run + 1),
        }
    }
}

impl Strategy for ThreeSoldiersAndCrows {
    fn name(&self) -> &str {
        "ThreeSoldiersAndCrows"
    }

    fn start(&mut self) {
        self.closes.clear();
    }

    fn next(&mut self, bar: &Bar, in_position: bool) -> Signal {
        self.closes.push_back(bar.close);
        if self.closes.len() > self.run + 1 {
            self.closes.pop_front();
        }
        if self.closes.len() <= self.run {
            return Signal::Hold;
        }

        let closes = &self.closes;
        let falling = closes
            .iter()
            .zip(closes.iter().skip(1))
            .all(|(prev, cur)| cur < prev);
        let rising = closes
            .iter()
            .zip(closes.iter().skip(1))
            .all(|(prev, cur)| cur > prev);

        if !in_position && falling {
            Signal::Buy
        } else if in_position && rising {
            Signal::Sell
        } else {
            Signal::Hold
        }
    }
}

// ============================================================================
// 4. Bollinger Bands
// ============================================================================

/// Arms a buy when the close dips under the lower band and fires once the
/// close recovers above the middle band; a close above the upper band while
/// flat buys immediately. Arms a sell when the close runs above the upper
/// band while long and fires when it falls back under the middle band.
pub struct BollingerBandsStrategy {
    bb: BollingerBands,
    period: usize,
    buy_armed: bool,
    sell_armed: bool,
    bars_seen: usize,
}

impl BollingerBandsStrategy {
    pub fn new(period: usize, multiplier: f64) -> EngineResult<Self> {
        Ok(Self {
            bb: indicator(BollingerBands::new(period, multiplier), "Bollinger bands")?,
            period,
            buy_armed: false,
            sell_armed: false,
            bars_seen: 0,
        })
    }
}

impl Strategy for BollingerBandsStrategy {
    fn name(&self) -> &str {
        "BollingerBands"
    }

    fn start(&mut self) {
        self.bb.reset();
        self.buy_armed = false;
        self.sell_armed = false;
        self.bars_seen = 0;
    }

    fn next(&mut self, bar: &Bar, in_position: bool) -> Signal {
        let close = bar.close;
        let bands = self.bb.next(close);
        self.bars_seen += 1;

        if self.bars_seen < self.period {
            return Signal::Hold;
        }

        if !in_position && close < bands.lower {
            self.buy_armed = true;
        }
        if in_position && close > bands.upper {
            self.sell_armed = true;
        }

        if !in_position && ((self.buy_armed && close > bands.average) || close > bands.upper) {
            return Signal::Buy;
        }

        if in_position && self.sell_armed && close < bands.average {
            self.buy_armed = false;
            self.sell_armed = false;
            return Signal::Sell;
        }

        Signal::Hold
    }
}

// ============================================================================
// 5. MACD Crossover
// ============================================================================

/// Buys when MACD crosses above its signal line with both above zero, sells
/// when it crosses below with both under zero
pub struct MacdCrossover {
    macd: MovingAverageConvergenceDivergence,
    slow: usize,
    prev_macd: f64,
    prev_signal: f64,
    bars_seen: usize,
}

impl MacdCrossover {
    pub fn new(fast: usize, slow: usize, signal_period: usize) -> EngineResult<Self> {
        Ok(Self {
            macd: indicator(
                MovingAverageConvergenceDivergence::new(fast, slow, signal_period),
                "MACD",
            )?,
            slow,
            prev_macd: 0.0,
            prev_signal: 0.0,
            bars_seen: 0,
        })
    }
}

impl Strategy for MacdCrossover {
    fn name(&self) -> &str {
        "MACD"
    }

    fn start(&mut self) {
        self.macd.reset();
        self.prev_macd = 0.0;
        self.prev_signal = 0.0;
        self.bars_seen = 0;
    }

    fn next(&mut self, bar: &Bar, in_position: bool) -> Signal {
        let out = self.macd.next(bar.close);
        self.bars_seen += 1;

        let crossed_up = self.prev_macd <= self.prev_signal && out.macd > out.signal;
        let crossed_down = self.prev_macd >= self.prev_signal && out.macd < out.signal;
        let warm = self.bars_seen > self.slow;

        self.prev_macd = out.macd;
        self.prev_signal = out.signal;

        if !warm {
            Signal::Hold
        } else if !in_position && crossed_up && out.macd > 0.0 && out.signal > 0.0 {
            Signal::Buy
        } else if in_position && crossed_down && out.macd < 0.0 && out.signal < 0.0 {
            Signal::Sell
        } else {
            Signal::Hold
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn make_bars(prices: &[f64]) -> Vec<Bar> {
        let origin = NaiveDate::from_ymd_opt(2019, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| Bar {
                time: origin + Duration::minutes(30 * i as i64),
                open: p,
                high: p + 1.0,
                low: p - 1.0,
                close: p,
                volume: 100.0,
                open_interest: 0.0,
            })
            .collect()
    }

    /// Drive a strategy while tracking the position the way the engine does
    fn drive(strategy: &mut dyn Strategy, bars: &[Bar]) -> Vec<Signal> {
        strategy.start();
        let mut in_position = false;
        let mut taken = Vec::new();
        for bar in bars {
            match strategy.next(bar, in_position) {
                Signal::Buy if !in_position => {
                    in_position = true;
                    taken.push(Signal::Buy);
                }
                Signal::Sell if in_position => {
                    in_position = false;
                    taken.push(Signal::Sell);
                }
                _ => {}
            }
        }
        taken
    }

    fn v_shape() -> Vec<f64> {
        let mut prices: Vec<f64> = (0..40).map(|i| 200.0 - i as f64 * 3.0).collect();
        prices.extend((0..40).map(|i| 80.0 + i as f64 * 4.0));
        prices.extend((0..40).map(|i| 240.0 - i as f64 * 4.0));
        prices
    }

    #[test]
    fn test_kind_parsing() {
        for kind in StrategyKind::ALL {
            assert_eq!(kind.as_str().parse::<StrategyKind>().unwrap(), kind);
        }
        assert_eq!("MACD".parse::<StrategyKind>().unwrap(), StrategyKind::Macd);
        assert!(matches!(
            "renko".parse::<StrategyKind>(),
            Err(EngineError::UnknownStrategy(_))
        ));
        assert_eq!(StrategyKind::default(), StrategyKind::Macd);
    }

    #[test]
    fn test_every_kind_builds() {
        for kind in StrategyKind::ALL {
            let strategy = kind.build().unwrap();
            assert!(!strategy.name().is_empty());
        }
    }

    #[test]
    fn test_sma_crossover_buys_and_sells() {
        let mut strategy = SmaCrossover::new(5, 15).unwrap();
        let taken = drive(&mut strategy, &make_bars(&v_shape()));
        assert_eq!(taken.first(), Some(&Signal::Buy));
        assert!(taken.contains(&Signal::Sell));
    }

    #[test]
    fn test_sma_crossover_rejects_inverted_periods() {
        assert!(SmaCrossover::new(30, 10).is_err());
    }

    #[test]
    fn test_rsi_buys_oversold_and_sells_overbought() {
        let mut strategy = RsiMeanReversion::new(14, 70.0, 30.0).unwrap();
        let taken = drive(&mut strategy, &make_bars(&v_shape()));
        // oversold on the first leg, overbought on the second, oversold again on the third
        assert_eq!(taken, vec![Signal::Buy, Signal::Sell, Signal::Buy]);
    }

    #[test]
    fn test_three_soldiers_pattern() {
        let mut strategy = ThreeSoldiersAndCrows::new(3);
        let prices = [10.0, 9.0, 8.0, 7.0, 7.5, 8.0, 9.0, 10.0];
        let taken = drive(&mut strategy, &make_bars(&prices));
        assert_eq!(taken, vec![Signal::Buy, Signal::Sell]);
    }

    #[test]
    fn test_three_soldiers_needs_full_run() {
        let mut strategy = ThreeSoldiersAndCrows::new(3);
        let prices = [10.0, 9.0, 8.0, 8.5, 8.0, 7.0];
        assert!(drive(&mut strategy, &make_bars(&prices)).is_empty());
    }

    #[test]
    fn test_bollinger_breakout_buys() {
        let mut strategy = BollingerBandsStrategy::new(20, 2.0).unwrap();
        let mut prices: Vec<f64> = (0..30).map(|i| 100.0 + (i % 2) as f64).collect();
        prices.extend((0..10).map(|i| 110.0 + i as f64 * 5.0));
        prices.extend((0..15).map(|i| 150.0 - i as f64 * 8.0));
        let taken = drive(&mut strategy, &make_bars(&prices));
        assert_eq!(taken.first(), Some(&Signal::Buy));
    }

    #[test]
    fn test_macd_trend_buys() {
        let mut strategy = MacdCrossover::new(12, 26, 9).unwrap();
        let mut prices: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        prices.extend((0..10).map(|i| 140.0 - i as f64 * 2.0));
        prices.extend((0..30).map(|i| 120.0 + i as f64 * 3.0));
        let taken = drive(&mut strategy, &make_bars(&prices));
        assert_eq!(taken.first(), Some(&Signal::Buy));
    }

    #[test]
    fn test_start_resets_state() {
        let bars = make_bars(&v_shape());
        let mut strategy = RsiMeanReversion::new(14, 70.0, 30.0).unwrap();
        let first = drive(&mut strategy, &bars);
        let second = drive(&mut strategy, &bars);
        assert_eq!(first, second);
    }
}
