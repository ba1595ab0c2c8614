use async_trait::async_trait;

use crate::{FetchError, Fundamentals, PriceSeries, SentimentSnapshot};

/// Source of fundamentals and daily price history.
#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    async fn fetch_fundamentals(&self, symbol: &str) -> Result<Fundamentals, FetchError>;

    /// Daily OHLCV history, at least six months deep.
    async fn fetch_history(&self, symbol: &str) -> Result<PriceSeries, FetchError>;

    async fn fetch(&self, symbol: &str) -> Result<(Fundamentals, PriceSeries), FetchError> {
        let fundamentals = self.fetch_fundamentals(symbol).await?;
        let history = self.fetch_history(symbol).await?;
        Ok((fundamentals, history))
    }
}

/// Source of the monthly-performance / institutional-ownership cross-check.
#[async_trait]
pub trait SentimentGateway: Send + Sync {
    async fn fetch_sentiment(&self, symbol: &str) -> Result<SentimentSnapshot, FetchError>;
}
