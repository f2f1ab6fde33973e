//! bittrex-backtest: fetch Bittrex candles and backtest simple strategies
//!
//! Usage:
//!   bittrex-backtest ticks --market BTC-ETH --interval fiveMin
//!   bittrex-backtest backtest --market USDT-BTC --strategy macd
//!   bittrex-backtest scan --interval thirtyMin --strategy rsi
//!   bittrex-backtest private --method /account/getbalances

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use engine::{
    scan_markets, BacktestConfig, BacktestEngine, BacktestResult, BittrexClient, CandleColumn,
    Credentials, HttpMethod, PrivateClient, ScanConfig, ScanReport, StrategyKind, TickFetch,
    TickInterval, DEFAULT_MARKETS,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "bittrex-backtest")]
#[command(about = "Fetch Bittrex candles and backtest simple strategies", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Broker settings shared by `backtest` and `scan`
#[derive(clap::Args, Clone)]
struct BrokerArgs {
    /// Built-in strategy: sma-cross, rsi, three-soldiers, bbands, macd
    #[arg(long, default_value = "macd")]
    strategy: StrategyKind,
    /// Starting cash
    #[arg(long, default_value = "10000")]
    cash: Decimal,
    /// Commission rate per fill (0.001 = 0.1%)
    #[arg(long, default_value = "0.001")]
    commission: Decimal,
    /// Position size as percentage of cash
    #[arg(long, default_value = "10")]
    position_pct: Decimal,
    /// Ignore candles before this date (YYYY-MM-DD)
    #[arg(long, default_value = "2019-01-01")]
    from: NaiveDate,
    /// Feed every fetched candle, ignoring `--from`
    #[arg(long)]
    all_history: bool,
}

impl BrokerArgs {
    fn config(&self) -> BacktestConfig {
        BacktestConfig {
            cash: self.cash,
            commission: self.commission,
            position_size_pct: self.position_pct,
            from: if self.all_history {
                None
            } else {
                self.from.and_hms_opt(0, 0, 0)
            },
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and print normalized candles for one market
    Ticks {
        #[arg(long, default_value = "BTC-ETH")]
        market: String,
        /// oneMin, fiveMin, thirtyMin, hour or day
        #[arg(long, default_value = "fiveMin")]
        interval: TickInterval,
        /// Columns to keep (comma-separated), default all
        #[arg(long, value_delimiter = ',')]
        columns: Vec<CandleColumn>,
        /// Optional JSON export path
        #[arg(long)]
        export: Option<String>,
    },
    /// Backtest one strategy on one market
    Backtest {
        #[arg(long, default_value = "BTC-ETH")]
        market: String,
        #[arg(long, default_value = "thirtyMin")]
        interval: TickInterval,
        #[command(flatten)]
        broker: BrokerArgs,
        /// Optional JSON export path
        #[arg(long)]
        export: Option<String>,
    },
    /// Backtest one strategy across several markets, one after the other
    Scan {
        /// Markets to scan (comma-separated), default the built-in list
        #[arg(long, value_delimiter = ',')]
        markets: Vec<String>,
        #[arg(long, default_value = "thirtyMin")]
        interval: TickInterval,
        #[command(flatten)]
        broker: BrokerArgs,
        /// Pause between markets in milliseconds (0 disables)
        #[arg(long, default_value_t = 100)]
        pace_ms: u64,
        /// Optional JSON export path
        #[arg(long)]
        export: Option<String>,
    },
    /// Call a signed private API method
    Private {
        /// Method path, e.g. /account/getbalances
        #[arg(long)]
        method: String,
        /// Extra parameter as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// Send a GET instead of a POST
        #[arg(long)]
        get: bool,
    },
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,bittrex_backtest=debug")
    } else {
        EnvFilter::new("info,engine=info,bittrex_backtest=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid key=value: no `=` found in `{s}`"))?;
    if key.is_empty() {
        return Err(format!("invalid key=value: empty key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Ticks {
            market,
            interval,
            columns,
            export,
        } => {
            cmd_ticks(&market, interval, columns, export).await?;
        }
        Commands::Backtest {
            market,
            interval,
            broker,
            export,
        } => {
            cmd_backtest(&market, interval, broker, export).await?;
        }
        Commands::Scan {
            markets,
            interval,
            broker,
            pace_ms,
            export,
        } => {
            cmd_scan(markets, interval, broker, pace_ms, export).await?;
        }
        Commands::Private {
            method,
            params,
            get,
        } => {
            cmd_private(&method, params, get).await?;
        }
    }

    Ok(())
}

fn export_json<T: Serialize>(path: &str, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    info!("Exported to {}", path);
    Ok(())
}

// ============================================================================
// Ticks command
// ============================================================================

async fn cmd_ticks(
    market: &str,
    interval: TickInterval,
    columns: Vec<CandleColumn>,
    export: Option<String>,
) -> anyhow::Result<()> {
    let client = BittrexClient::from_env()?;
    let selection = (!columns.is_empty()).then_some(columns.as_slice());

    let series = match client.get_ticks(market, interval, selection).await? {
        TickFetch::Candles(series) => series,
        TickFetch::NoData => {
            println!("No candle data for {} ({})", market, interval);
            return Ok(());
        }
    };

    info!(market, interval = %interval, rows = series.len(), "Fetched candles");

    match export {
        Some(path) => export_json(&path, &series)?,
        None => println!("{}", serde_json::to_string_pretty(&series)?),
    }
    Ok(())
}

// ============================================================================
// Backtest command
// ============================================================================

async fn cmd_backtest(
    market: &str,
    interval: TickInterval,
    broker: BrokerArgs,
    export: Option<String>,
) -> anyhow::Result<()> {
    println!("\n=== bittrex-backtest v{} ===", APP_VERSION);

    let client = BittrexClient::from_env()?;
    let series = match client.get_ticks(market, interval, None).await? {
        TickFetch::Candles(series) => series,
        TickFetch::NoData => {
            println!("No candle data for {} ({})", market, interval);
            return Ok(());
        }
    };

    let config = broker.config();
    let mut strategy = broker.strategy.build()?;
    println!("Launching strategy {}", strategy.name());
    println!("Starting portfolio ({}, {}): {:.2}", market, interval, config.cash);

    let result = BacktestEngine::run(&config, &series, strategy.as_mut())?;
    print_result(&result);

    if let Some(path) = export {
        export_json(&path, &result)?;
    }
    Ok(())
}

fn print_result(r: &BacktestResult) {
    println!(
        "Final portfolio ({}, {}): {:.2}",
        r.market, r.interval, r.final_value
    );
    println!(
        "  Bars: {} | Trades: {} | WR: {:.1}% | PnL: {:+.2} ({:+.2}%)",
        r.bars, r.total_trades, r.win_rate, r.total_pnl, r.total_pnl_pct
    );
    println!(
        "  Commission: {:.2} | Max DD: {:.2} ({:.2}%) | Profit factor: {:.2}",
        r.total_commission, r.max_drawdown, r.max_drawdown_pct, r.profit_factor
    );
}

// ============================================================================
// Scan command
// ============================================================================

async fn cmd_scan(
    markets: Vec<String>,
    interval: TickInterval,
    broker: BrokerArgs,
    pace_ms: u64,
    export: Option<String>,
) -> anyhow::Result<()> {
    println!("\n=== bittrex-backtest v{} ===", APP_VERSION);

    let markets = if markets.is_empty() {
        DEFAULT_MARKETS.iter().map(|m| m.to_string()).collect()
    } else {
        markets
    };
    println!("Markets: {}", markets.join(", "));
    println!(
        "Interval: {} | Strategy: {} | Cash: {} | Commission: {}",
        interval, broker.strategy, broker.cash, broker.commission
    );
    println!();

    let config = ScanConfig {
        interval,
        strategy: broker.strategy,
        backtest: broker.config(),
        pace: Duration::from_millis(pace_ms),
    };

    let client = BittrexClient::from_env()?;
    let report = scan_markets(&client, &markets, &config).await?;
    print_ranking(&report);

    if let Some(path) = export {
        export_json(&path, &report)?;
    }
    Ok(())
}

fn print_ranking(report: &ScanReport) {
    println!("\nFinal portfolio by market ({} ranked):", report.ranking.len());
    println!("  {:>3}  {:<12} {:>14} {:>7}", "#", "Market", "Final value", "Trades");
    println!("  {}", "-".repeat(40));
    for (i, score) in report.ranking.iter().enumerate() {
        println!(
            "  {:>3}  {:<12} {:>14.2} {:>7}",
            i + 1,
            score.market,
            score.final_value,
            score.total_trades
        );
    }
    if !report.skipped.is_empty() {
        println!("\nNo data: {}", report.skipped.join(", "));
    }
}

// ============================================================================
// Private command
// ============================================================================

async fn cmd_private(method: &str, params: Vec<(String, String)>, get: bool) -> anyhow::Result<()> {
    let credentials = Credentials::from_env()?;
    let mut client = PrivateClient::new(credentials)?;

    let host = std::env::var("BITTREX_API_HOST").ok().filter(|h| !h.is_empty());
    let version = std::env::var("BITTREX_API_VERSION").ok().filter(|v| !v.is_empty());
    if host.is_some() || version.is_some() {
        client = client.with_host(
            host.unwrap_or_else(|| engine::api::private::DEFAULT_API_HOST.to_string()),
            version.unwrap_or_else(|| engine::api::private::DEFAULT_API_VERSION.to_string()),
        );
    }

    let pairs: Vec<(&str, &str)> = params
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let http_method = if get { HttpMethod::Get } else { HttpMethod::Post };

    let payload = client.call(method, &pairs, http_method).await?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("market=BTC-ETH").unwrap(),
            ("market".to_string(), "BTC-ETH".to_string())
        );
        assert_eq!(parse_param("note=a=b").unwrap().1, "a=b");
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn test_scan_arguments() {
        let cli = Cli::try_parse_from([
            "bittrex-backtest",
            "scan",
            "--markets",
            "USDT-BTC,BTC-ETH",
            "--strategy",
            "rsi",
            "--from",
            "2019-01-01",
            "--pace-ms",
            "0",
        ])
        .unwrap();

        match cli.command {
            Commands::Scan {
                markets,
                interval,
                broker,
                pace_ms,
                ..
            } => {
                assert_eq!(markets, vec!["USDT-BTC", "BTC-ETH"]);
                assert_eq!(interval, TickInterval::ThirtyMin);
                assert_eq!(broker.strategy, StrategyKind::RsiMeanReversion);
                assert_eq!(pace_ms, 0);
                let config = broker.config();
                assert_eq!(config.commission, Decimal::new(1, 3));
                assert!(config.from.is_some());
            }
            _ => panic!("expected scan command"),
        }
    }

    #[test]
    fn test_backtest_from_defaults_to_2019() {
        let cli = Cli::try_parse_from(["bittrex-backtest", "backtest"]).unwrap();
        let Commands::Backtest { broker, .. } = cli.command else {
            panic!("expected backtest command");
        };
        let expected = NaiveDate::from_ymd_opt(2019, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(broker.config().from, Some(expected));

        let cli = Cli::try_parse_from(["bittrex-backtest", "backtest", "--all-history"]).unwrap();
        let Commands::Backtest { broker, .. } = cli.command else {
            panic!("expected backtest command");
        };
        assert_eq!(broker.config().from, None);
    }

    #[test]
    fn test_unknown_interval_is_rejected_by_parser() {
        let parsed = Cli::try_parse_from(["bittrex-backtest", "ticks", "--interval", "weekly"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_ticks_columns() {
        let cli = Cli::try_parse_from([
            "bittrex-backtest",
            "ticks",
            "--columns",
            "timestamp,close",
        ])
        .unwrap();
        match cli.command {
            Commands::Ticks { columns, .. } => {
                assert_eq!(columns, vec![CandleColumn::Timestamp, CandleColumn::Close])
            }
            _ => panic!("expected ticks command"),
        }
    }
}
