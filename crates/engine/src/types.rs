//! Types for the candle fetcher and the backtesting engine

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::ExchangeError;

/// Candle width accepted by the public GetTicks endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TickInterval {
    #[serde(rename = "oneMin")]
    OneMin,
    #[serde(rename = "fiveMin")]
    FiveMin,
    #[serde(rename = "thirtyMin")]
    ThirtyMin,
    #[serde(rename = "hour")]
    Hour,
    #[serde(rename = "day")]
    Day,
}

impl TickInterval {
    pub const ALL: [TickInterval; 5] = [
        TickInterval::Day,
        TickInterval::FiveMin,
        TickInterval::OneMin,
        TickInterval::Hour,
        TickInterval::ThirtyMin,
    ];

    /// Wire name used in the `tickInterval` query parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            TickInterval::OneMin => "oneMin",
            TickInterval::FiveMin => "fiveMin",
            TickInterval::ThirtyMin => "thirtyMin",
            TickInterval::Hour => "hour",
            TickInterval::Day => "day",
        }
    }
}

impl fmt::Display for TickInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TickInterval {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TickInterval::ALL
            .into_iter()
            .find(|interval| interval.as_str() == s)
            .ok_or_else(|| ExchangeError::InvalidInterval(s.to_string()))
    }
}

/// One column of a normalized candle series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandleColumn {
    BaseVolume,
    Close,
    High,
    Low,
    Open,
    Timestamp,
    Volume,
}

impl CandleColumn {
    /// Default selection, in output order
    pub const DEFAULT: [CandleColumn; 7] = [
        CandleColumn::BaseVolume,
        CandleColumn::Close,
        CandleColumn::High,
        CandleColumn::Low,
        CandleColumn::Open,
        CandleColumn::Timestamp,
        CandleColumn::Volume,
    ];

    /// Short key used by the exchange payload
    pub fn raw_key(&self) -> &'static str {
        match self {
            CandleColumn::BaseVolume => "BV",
            CandleColumn::Close => "C",
            CandleColumn::High => "H",
            CandleColumn::Low => "L",
            CandleColumn::Open => "O",
            CandleColumn::Timestamp => "T",
            CandleColumn::Volume => "V",
        }
    }

    /// Canonical column name after normalization
    pub fn name(&self) -> &'static str {
        match self {
            CandleColumn::BaseVolume => "base_volume",
            CandleColumn::Close => "close",
            CandleColumn::High => "high",
            CandleColumn::Low => "low",
            CandleColumn::Open => "open",
            CandleColumn::Timestamp => "timestamp",
            CandleColumn::Volume => "volume",
        }
    }

    pub fn from_raw_key(key: &str) -> Option<Self> {
        CandleColumn::DEFAULT
            .into_iter()
            .find(|column| column.raw_key() == key)
    }
}

impl fmt::Display for CandleColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CandleColumn {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        CandleColumn::DEFAULT
            .into_iter()
            .find(|column| column.name() == wanted)
            .ok_or_else(|| ExchangeError::UnknownColumn(s.to_string()))
    }
}

/// A single candle as delivered by GetTicks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub base_volume: f64,
}

impl Candle {
    pub fn get(&self, column: CandleColumn) -> CellValue {
        match column {
            CandleColumn::BaseVolume => CellValue::Number(self.base_volume),
            CandleColumn::Close => CellValue::Number(self.close),
            CandleColumn::High => CellValue::Number(self.high),
            CandleColumn::Low => CellValue::Number(self.low),
            CandleColumn::Open => CellValue::Number(self.open),
            CandleColumn::Timestamp => CellValue::Timestamp(self.timestamp),
            CandleColumn::Volume => CellValue::Number(self.volume),
        }
    }
}

/// A single cell of a candle series
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Timestamp(NaiveDateTime),
}

impl CellValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Timestamp(_) => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            CellValue::Timestamp(t) => Some(*t),
            CellValue::Number(_) => None,
        }
    }
}

/// Normalized candles for one market and interval, restricted to the
/// selected columns
#[derive(Debug, Clone, PartialEq)]
pub struct CandleSeries {
    market: String,
    interval: TickInterval,
    columns: Vec<CandleColumn>,
    candles: Vec<Candle>,
}

impl CandleSeries {
    /// Build a series. Duplicate columns keep their first position.
    pub fn new(
        market: impl Into<String>,
        interval: TickInterval,
        columns: &[CandleColumn],
        candles: Vec<Candle>,
    ) -> Self {
        let mut selected: Vec<CandleColumn> = Vec::with_capacity(columns.len());
        for column in columns {
            if !selected.contains(column) {
                selected.push(*column);
            }
        }

        Self {
            market: market.into(),
            interval,
            columns: selected,
            candles,
        }
    }

    pub fn market(&self) -> &str {
        &self.market
    }

    pub fn interval(&self) -> TickInterval {
        self.interval
    }

    pub fn columns(&self) -> &[CandleColumn] {
        &self.columns
    }

    pub fn has_column(&self, column: CandleColumn) -> bool {
        self.columns.contains(&column)
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Value at `row`, or `None` if the row is out of range or the column
    /// was not selected
    pub fn value(&self, row: usize, column: CandleColumn) -> Option<CellValue> {
        if !self.has_column(column) {
            return None;
        }
        self.candles.get(row).map(|candle| candle.get(column))
    }

    /// Whole column, or `None` if it was not selected
    pub fn column(&self, column: CandleColumn) -> Option<Vec<CellValue>> {
        if !self.has_column(column) {
            return None;
        }
        Some(self.candles.iter().map(|c| c.get(column)).collect())
    }

    pub(crate) fn candles(&self) -> &[Candle] {
        &self.candles
    }
}

struct SeriesRow<'a> {
    columns: &'a [CandleColumn],
    candle: &'a Candle,
}

impl Serialize for SeriesRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for column in self.columns {
            map.serialize_entry(column.name(), &self.candle.get(*column))?;
        }
        map.end()
    }
}

impl Serialize for CandleSeries {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let rows: Vec<SeriesRow<'_>> = self
            .candles
            .iter()
            .map(|candle| SeriesRow {
                columns: &self.columns,
                candle,
            })
            .collect();

        let mut state = serializer.serialize_struct("CandleSeries", 4)?;
        state.serialize_field("market", &self.market)?;
        state.serialize_field("interval", &self.interval)?;
        state.serialize_field("columns", &self.columns)?;
        state.serialize_field("rows", &rows)?;
        state.end()
    }
}

/// Outcome of a GetTicks fetch
#[derive(Debug, Clone, PartialEq)]
pub enum TickFetch {
    Candles(CandleSeries),
    /// The payload did not have the expected candle layout
    NoData,
}

impl TickFetch {
    pub fn is_no_data(&self) -> bool {
        matches!(self, TickFetch::NoData)
    }

    pub fn into_series(self) -> Option<CandleSeries> {
        match self {
            TickFetch::Candles(series) => Some(series),
            TickFetch::NoData => None,
        }
    }
}

/// One bar fed to a strategy, with the constant open-interest column the
/// engine expects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub open_interest: f64,
}

/// Configuration for a backtest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Starting cash
    pub cash: Decimal,
    /// Commission rate charged on the notional of every fill (0.001 = 0.1%)
    pub commission: Decimal,
    /// Position size as percentage of cash (e.g., 10.0 = 10%)
    pub position_size_pct: Decimal,
    /// Ignore candles before this time
    pub from: Option<NaiveDateTime>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            cash: Decimal::from(10000),
            commission: Decimal::new(1, 3),
            position_size_pct: Decimal::from(10),
            from: None,
        }
    }
}

/// A round trip executed during backtest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestTrade {
    pub entry_time: NaiveDateTime,
    pub exit_time: NaiveDateTime,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub size: Decimal,
    /// Entry and exit commission combined
    pub commission: Decimal,
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
}

/// A point on the equity curve
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub time: NaiveDateTime,
    pub equity: Decimal,
}

/// Result of a backtest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub market: String,
    pub interval: TickInterval,
    pub strategy: String,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub bars: usize,
    pub initial_cash: Decimal,
    /// Final portfolio value
    pub final_value: Decimal,
    pub total_pnl: Decimal,
    pub total_pnl_pct: Decimal,
    pub total_commission: Decimal,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub win_rate: Decimal,
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: Decimal,
    pub profit_factor: Decimal,
    pub trades: Vec<BacktestTrade>,
    pub equity_curve: Vec<EquityPoint>,
}
