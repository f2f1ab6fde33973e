//! Bittrex REST clients: public candles and signed private calls

pub mod bittrex;
pub mod private;

pub use bittrex::BittrexClient;
pub use private::{Credentials, HttpMethod, PrivateClient, SignedRequest};

use async_trait::async_trait;

use crate::error::ExchangeResult;
use crate::types::{CandleColumn, TickFetch, TickInterval};

/// Anything that can produce a normalized candle series for a market
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn fetch_ticks(
        &self,
        market: &str,
        interval: TickInterval,
        columns: Option<&[CandleColumn]>,
    ) -> ExchangeResult<TickFetch>;
}
