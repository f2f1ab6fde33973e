//! Bittrex public API client for candle data (no authentication required)

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::CandleSource;
use crate::error::{ExchangeError, ExchangeResult};
use crate::normalize::normalize_ticks;
use crate::types::{CandleColumn, TickFetch, TickInterval};

pub const DEFAULT_PUBLIC_URL: &str = "https://bittrex.com";
const TRANSPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bittrex public market data client
#[derive(Clone)]
pub struct BittrexClient {
    client: Client,
    base_url: String,
}

impl BittrexClient {
    /// Create a client against the default public URL
    pub fn new() -> ExchangeResult<Self> {
        Self::with_base_url(DEFAULT_PUBLIC_URL)
    }

    /// Create a client against another base URL (scheme and host, no path)
    pub fn with_base_url(base_url: impl Into<String>) -> ExchangeResult<Self> {
        let client = Client::builder().timeout(TRANSPORT_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Create a client using `BITTREX_PUBLIC_URL` when it is set
    pub fn from_env() -> ExchangeResult<Self> {
        match std::env::var("BITTREX_PUBLIC_URL") {
            Ok(url) if !url.trim().is_empty() => Self::with_base_url(url.trim()),
            _ => Self::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn ticks_url(&self, market: &str, interval: TickInterval) -> String {
        format!(
            "{}/Api/v2.0/pub/market/GetTicks?marketName={}&tickInterval={}",
            self.base_url, market, interval
        )
    }

    /// Fetch candles for a market. `columns` defaults to
    /// [`CandleColumn::DEFAULT`].
    pub async fn get_ticks(
        &self,
        market: &str,
        interval: TickInterval,
        columns: Option<&[CandleColumn]>,
    ) -> ExchangeResult<TickFetch> {
        let url = self.ticks_url(market, interval);

        debug!(market, interval = %interval, "Fetching ticks from Bittrex");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            debug!(market, status = status.as_u16(), "GetTicks returned non-success status");
        }

        // The payload decides between candles and no data; the status only
        // matters when the body is not JSON at all
        let columns = columns.unwrap_or(&CandleColumn::DEFAULT[..]);
        match normalize_ticks(&body, market, interval, columns) {
            Err(ExchangeError::Decode { .. }) if !status.is_success() => Err(ExchangeError::Status {
                status: status.as_u16(),
                body,
            }),
            other => other,
        }
    }

    /// Same as [`get_ticks`](Self::get_ticks) for a textual interval; an
    /// unknown interval fails before any request is sent
    pub async fn get_ticks_named(
        &self,
        market: &str,
        interval: &str,
        columns: Option<&[CandleColumn]>,
    ) -> ExchangeResult<TickFetch> {
        let interval: TickInterval = interval.parse()?;
        self.get_ticks(market, interval, columns).await
    }
}

#[async_trait]
impl CandleSource for BittrexClient {
    async fn fetch_ticks(
        &self,
        market: &str,
        interval: TickInterval,
        columns: Option<&[CandleColumn]>,
    ) -> ExchangeResult<TickFetch> {
        self.get_ticks(market, interval, columns).await
    }
}
