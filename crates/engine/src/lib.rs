//! Bittrex candle backtester engine
//!
//! Provides:
//! - Public GetTicks client and payload normalizer
//! - Signed private API request builder (HMAC-SHA512)
//! - Built-in strategies on top of the `ta` indicators
//! - Bar-by-bar backtest engine with cash and commission
//! - Sequential multi-market scanner

pub mod api;
pub mod engine;
pub mod error;
pub mod normalize;
pub mod runner;
pub mod strategies;
pub mod strategy;
pub mod types;

// Re-exports for convenience
pub use api::{BittrexClient, CandleSource, Credentials, HttpMethod, PrivateClient};
pub use engine::BacktestEngine;
pub use error::{EngineError, EngineResult, ExchangeError, ExchangeResult};
pub use normalize::normalize_ticks;
pub use runner::{run_market, scan_markets, MarketScore, ScanConfig, ScanReport, DEFAULT_MARKETS};
pub use strategies::StrategyKind;
pub use strategy::{Signal, Strategy};
pub use types::*;
