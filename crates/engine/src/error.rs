//! Error types for the exchange clients and the backtesting engine

use thiserror::Error;

use crate::types::CandleColumn;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Tick interval is not defined: {0:?}")]
    InvalidInterval(String),

    #[error("Unknown candle column: {0:?}")]
    UnknownColumn(String),

    #[error("JSON decoding error: {source}: {body}")]
    Decode {
        body: String,
        #[source]
        source: serde_json::Error,
    },

    /// The exchange answered with a truthy `error` field
    #[error("Exchange error: {0}")]
    Api(String),

    #[error("Exchange returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid timestamp {value:?}: {source}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("Invalid value for field {key}: {value}")]
    InvalidField { key: String, value: String },

    #[error("Missing credential: {0} is not set")]
    MissingCredential(&'static str),

    #[error("API secret cannot be used as an HMAC key")]
    InvalidSecret,

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Candle series is missing required column {0}")]
    MissingColumn(CandleColumn),

    #[error("Price {0} cannot be represented as a decimal or overflows position sizing")]
    Price(f64),

    #[error("Indicator setup failed: {0}")]
    Indicator(String),

    #[error("Invalid backtest config: {0}")]
    InvalidConfig(String),

    #[error("Unknown strategy: {0:?}")]
    UnknownStrategy(String),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

pub type EngineResult<T> = Result<T, EngineError>;
