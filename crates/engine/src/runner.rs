//! Sequential fetch-and-evaluate over one or more markets

use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::api::CandleSource;
use crate::engine::BacktestEngine;
use crate::error::EngineResult;
use crate::strategies::StrategyKind;
use crate::types::{BacktestConfig, BacktestResult, TickFetch, TickInterval};

/// Markets scanned when none are given
pub const DEFAULT_MARKETS: [&str; 12] = [
    "USDT-BTC", "USDT-BCC", "USDT-ETC", "USDT-OMG", "USDT-XRP", "USDT-LTC", "USDT-ZEC", "USDT-XMR",
    "USDT-DASH", "BTC-NEO", "USD-BTC", "BTC-ETH",
];

/// Pause between two consecutive markets in a scan
pub const DEFAULT_PACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub interval: TickInterval,
    pub strategy: StrategyKind,
    pub backtest: BacktestConfig,
    /// Zero disables pacing
    pub pace: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval: TickInterval::ThirtyMin,
            strategy: StrategyKind::default(),
            backtest: BacktestConfig::default(),
            pace: DEFAULT_PACE,
        }
    }
}

/// One scanned market, reduced to what the ranking needs
#[derive(Debug, Clone, Serialize)]
pub struct MarketScore {
    pub market: String,
    pub final_value: Decimal,
    pub total_trades: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    /// Sorted by final value, lowest first
    pub ranking: Vec<MarketScore>,
    /// Markets whose fetch came back without candle data
    pub skipped: Vec<String>,
}

impl ScanReport {
    pub fn best(&self) -> Option<&MarketScore> {
        self.ranking.last()
    }
}

/// Fetch one market and backtest it. `Ok(None)` means the exchange had no
/// candle data for it.
pub async fn run_market(
    source: &dyn CandleSource,
    market: &str,
    interval: TickInterval,
    strategy: StrategyKind,
    config: &BacktestConfig,
) -> EngineResult<Option<BacktestResult>> {
    let series = match source.fetch_ticks(market, interval, None).await? {
        TickFetch::Candles(series) => series,
        TickFetch::NoData => return Ok(None),
    };

    let mut strategy = strategy.build()?;
    info!(market, strategy = strategy.name(), "Launching strategy");
    let result = BacktestEngine::run(config, &series, strategy.as_mut())?;
    Ok(Some(result))
}

/// Scan `markets` one after the other. Markets without data are skipped;
/// any other error aborts the scan.
pub async fn scan_markets(
    source: &dyn CandleSource,
    markets: &[String],
    config: &ScanConfig,
) -> EngineResult<ScanReport> {
    let mut report = ScanReport::default();

    for (i, market) in markets.iter().enumerate() {
        if i > 0 && !config.pace.is_zero() {
            tokio::time::sleep(config.pace).await;
        }

        match run_market(
            source,
            market,
            config.interval,
            config.strategy,
            &config.backtest,
        )
        .await?
        {
            Some(result) => {
                info!(market = %market, final_value = %result.final_value.round_dp(2), "Market done");
                report.ranking.push(MarketScore {
                    market: market.clone(),
                    final_value: result.final_value,
                    total_trades: result.total_trades,
                });
            }
            None => {
                warn!(market = %market, "No candle data, skipping market");
                report.skipped.push(market.clone());
            }
        }
    }

    report.ranking.sort_by(|a, b| a.final_value.cmp(&b.final_value));
    Ok(report)
}
