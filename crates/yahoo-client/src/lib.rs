use async_trait::async_trait;
use chrono::DateTime;
use reqwest::{header, Client, StatusCode};
use screener_core::{
    FetchError, Fundamentals, MarketDataGateway, PriceBar, PriceSeries, MIN_HISTORY_BARS,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use urlencoding::encode;

const BASE_URL: &str = "https://query1.finance.yahoo.com";
const COOKIE_URL: &str = "https://fc.yahoo.com";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const SUMMARY_MODULES: &str = "financialData,summaryDetail,defaultKeyStatistics,assetProfile,price";

/// Chart ranges deep enough for the technical stage (at least six months).
pub const SUPPORTED_RANGES: &[&str] = &["6mo", "1y", "2y", "5y", "10y", "max"];
pub const DEFAULT_RANGE: &str = "1y";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Detail view of a single stock (price, valuation, 52-week range).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockDetails {
    pub symbol: String,
    pub name: Option<String>,
    pub sector: Option<String>,
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub forward_pe: Option<f64>,
    pub beta: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub fifty_two_week_high: Option<f64>,
    pub fifty_two_week_low: Option<f64>,
    pub recommendation_key: Option<String>,
}

#[derive(Clone)]
pub struct YahooClient {
    client: Client,
    base_url: String,
    range: String,
    crumb: Arc<RwLock<Option<String>>>,
}

impl YahooClient {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: BASE_URL.to_string(),
            range: DEFAULT_RANGE.to_string(),
            crumb: Arc::new(RwLock::new(None)),
        }
    }

    /// Set the history depth. Unsupported values fall back to the default.
    pub fn with_range(mut self, range: &str) -> Self {
        if SUPPORTED_RANGES.contains(&range) {
            self.range = range.to_string();
        } else {
            tracing::warn!(
                "Unsupported history range '{}', using {}",
                range,
                DEFAULT_RANGE
            );
            self.range = DEFAULT_RANGE.to_string();
        }
        self
    }

    pub fn range(&self) -> &str {
        &self.range
    }

    /// Cookie + crumb handshake; the crumb is cached until a 401 clears it.
    async fn ensure_crumb(&self) -> Result<String, FetchError> {
        if let Some(crumb) = self.crumb.read().await.as_ref() {
            return Ok(crumb.clone());
        }

        // Sets the session cookie; the response itself is usually a 404
        let _ = self.client.get(COOKIE_URL).send().await.map_err(transient)?;

        let response = self
            .client
            .get(format!("{}/v1/test/getcrumb", self.base_url))
            .send()
            .await
            .map_err(transient)?;

        if !response.status().is_success() {
            return Err(FetchError::Transient(format!(
                "crumb request failed: HTTP {}",
                response.status()
            )));
        }

        let crumb = response.text().await.map_err(transient)?.trim().to_string();
        if crumb.is_empty() || crumb.contains('<') {
            return Err(FetchError::Transient("Yahoo returned an empty crumb".to_string()));
        }

        *self.crumb.write().await = Some(crumb.clone());
        tracing::debug!("Fetched new Yahoo crumb");
        Ok(crumb)
    }

    async fn clear_crumb(&self) {
        *self.crumb.write().await = None;
    }

    /// GET `url` and return the body, mapping HTTP failures onto `FetchError`.
    async fn get_text(&self, symbol: &str, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(transient)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            self.clear_crumb().await;
        }
        if let Some(err) = classify_status(symbol, status) {
            return Err(err);
        }

        response.text().await.map_err(transient)
    }

    async fn quote_summary(&self, symbol: &str) -> Result<QuoteSummaryResult, FetchError> {
        let crumb = self.ensure_crumb().await?;
        let url = format!(
            "{}/v10/finance/quoteSummary/{}?modules={}&crumb={}",
            self.base_url,
            encode(symbol),
            SUMMARY_MODULES,
            encode(&crumb)
        );
        let body = self.get_text(symbol, &url).await?;
        parse_quote_summary(symbol, &body)
    }

    /// Fundamentals snapshot from the quoteSummary endpoint.
    pub async fn get_fundamentals(&self, symbol: &str) -> Result<Fundamentals, FetchError> {
        let summary = self.quote_summary(symbol).await?;
        Ok(fundamentals_from_summary(symbol, &summary))
    }

    /// Daily OHLCV bars from the chart endpoint.
    pub async fn get_daily_history(&self, symbol: &str) -> Result<PriceSeries, FetchError> {
        let url = format!(
            "{}/v8/finance/chart/{}?range={}&interval=1d&includePrePost=false",
            self.base_url,
            encode(symbol),
            self.range
        );
        let body = self.get_text(symbol, &url).await?;
        let series = parse_chart(symbol, &body)?;

        if series.len() < MIN_HISTORY_BARS {
            return Err(FetchError::Incomplete {
                symbol: symbol.to_string(),
                bars: series.len(),
            });
        }

        tracing::debug!("{}: {} daily bars ({})", symbol, series.len(), self.range);
        Ok(series)
    }

    /// Price, valuation and 52-week range for a single symbol.
    pub async fn get_stock_details(&self, symbol: &str) -> Result<StockDetails, FetchError> {
        let summary = self.quote_summary(symbol).await?;
        Ok(details_from_summary(symbol, &summary))
    }
}

impl Default for YahooClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataGateway for YahooClient {
    async fn fetch_fundamentals(&self, symbol: &str) -> Result<Fundamentals, FetchError> {
        self.get_fundamentals(symbol).await
    }

    async fn fetch_history(&self, symbol: &str) -> Result<PriceSeries, FetchError> {
        self.get_daily_history(symbol).await
    }
}

fn transient(e: reqwest::Error) -> FetchError {
    if e.is_decode() {
        FetchError::ParseFailure(e.to_string())
    } else {
        FetchError::Transient(e.to_string())
    }
}

fn classify_status(symbol: &str, status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    Some(match status.as_u16() {
        400 | 404 => FetchError::NotFound(symbol.to_string()),
        401 | 403 => FetchError::Transient(format!("HTTP {}: authentication expired", status)),
        _ => FetchError::Transient(format!("HTTP {}", status)),
    })
}

fn parse_quote_summary(symbol: &str, body: &str) -> Result<QuoteSummaryResult, FetchError> {
    let response: QuoteSummaryResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::ParseFailure(format!("quoteSummary for {}: {}", symbol, e)))?;

    if let Some(err) = response.quote_summary.error {
        if err.code.eq_ignore_ascii_case("not found") {
            return Err(FetchError::NotFound(symbol.to_string()));
        }
        return Err(FetchError::Transient(format!(
            "quoteSummary error for {}: {} {}",
            symbol,
            err.code,
            err.description.unwrap_or_default()
        )));
    }

    response
        .quote_summary
        .result
        .unwrap_or_default()
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::NotFound(symbol.to_string()))
}

fn fundamentals_from_summary(symbol: &str, summary: &QuoteSummaryResult) -> Fundamentals {
    let financial = summary.financial_data.as_ref();
    let detail = summary.summary_detail.as_ref();
    let stats = summary.default_key_statistics.as_ref();
    let price = summary.price.as_ref();

    Fundamentals {
        symbol: symbol.to_string(),
        forward_pe: raw(detail.and_then(|d| d.forward_pe.as_ref()))
            .or_else(|| raw(stats.and_then(|s| s.forward_pe.as_ref()))),
        current_price: raw(financial.and_then(|f| f.current_price.as_ref()))
            .or_else(|| raw(price.and_then(|p| p.regular_market_price.as_ref()))),
        market_cap: raw(detail.and_then(|d| d.market_cap.as_ref()))
            .or_else(|| raw(price.and_then(|p| p.market_cap.as_ref()))),
        beta: raw(detail.and_then(|d| d.beta.as_ref()))
            .or_else(|| raw(stats.and_then(|s| s.beta.as_ref()))),
        recommendation_key: financial
            .and_then(|f| f.recommendation_key.clone())
            .filter(|k| !k.trim().is_empty() && k != "none"),
        sector: summary
            .asset_profile
            .as_ref()
            .and_then(|a| a.sector.clone())
            .filter(|s| !s.trim().is_empty()),
    }
}

fn details_from_summary(symbol: &str, summary: &QuoteSummaryResult) -> StockDetails {
    let fundamentals = fundamentals_from_summary(symbol, summary);
    let detail = summary.summary_detail.as_ref();

    StockDetails {
        symbol: symbol.to_string(),
        name: summary
            .price
            .as_ref()
            .and_then(|p| p.long_name.clone().or_else(|| p.short_name.clone())),
        sector: fundamentals.sector,
        current_price: fundamentals.current_price,
        market_cap: fundamentals.market_cap,
        forward_pe: fundamentals.forward_pe,
        beta: fundamentals.beta,
        dividend_yield: raw(detail.and_then(|d| d.dividend_yield.as_ref())),
        fifty_two_week_high: raw(detail.and_then(|d| d.fifty_two_week_high.as_ref())),
        fifty_two_week_low: raw(detail.and_then(|d| d.fifty_two_week_low.as_ref())),
        recommendation_key: fundamentals.recommendation_key,
    }
}

fn parse_chart(symbol: &str, body: &str) -> Result<PriceSeries, FetchError> {
    let response: ChartResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::ParseFailure(format!("chart for {}: {}", symbol, e)))?;

    if let Some(err) = response.chart.error {
        if err.code.eq_ignore_ascii_case("not found") {
            return Err(FetchError::NotFound(symbol.to_string()));
        }
        return Err(FetchError::Transient(format!(
            "chart error for {}: {} {}",
            symbol,
            err.code,
            err.description.unwrap_or_default()
        )));
    }

    let result = response
        .chart
        .result
        .unwrap_or_default()
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::NotFound(symbol.to_string()))?;

    let Some(quote) = result.indicators.quote.into_iter().next() else {
        return Ok(PriceSeries::new(symbol, Vec::new()));
    };

    let bars = result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, &ts)| {
            let timestamp = DateTime::from_timestamp(ts, 0)?;
            Some(PriceBar {
                timestamp,
                open: value_at(&quote.open, i)?,
                high: value_at(&quote.high, i)?,
                low: value_at(&quote.low, i)?,
                close: value_at(&quote.close, i)?,
                volume: value_at(&quote.volume, i)?,
            })
        })
        .collect();

    Ok(PriceSeries::new(symbol, bars))
}

fn value_at(values: &[Option<f64>], i: usize) -> Option<f64> {
    values.get(i).copied().flatten().filter(|v| v.is_finite())
}

fn raw(value: Option<&YahooValue>) -> Option<f64> {
    value.and_then(|v| v.raw).filter(|v| v.is_finite())
}

// Response structures

/// Yahoo wraps numbers as `{"raw": 1.0, "fmt": "1.00"}`, or `{}` when missing.
#[derive(Debug, Default, Deserialize)]
struct YahooValue {
    #[serde(default)]
    raw: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct YahooApiError {
    code: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteSummaryResponse {
    quote_summary: QuoteSummaryEnvelope,
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryEnvelope {
    #[serde(default)]
    result: Option<Vec<QuoteSummaryResult>>,
    #[serde(default)]
    error: Option<YahooApiError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteSummaryResult {
    #[serde(default)]
    financial_data: Option<FinancialData>,
    #[serde(default)]
    summary_detail: Option<SummaryDetail>,
    #[serde(default)]
    default_key_statistics: Option<KeyStatistics>,
    #[serde(default)]
    asset_profile: Option<AssetProfile>,
    #[serde(default)]
    price: Option<PriceModule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinancialData {
    #[serde(default)]
    current_price: Option<YahooValue>,
    #[serde(default)]
    recommendation_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryDetail {
    #[serde(default, rename = "forwardPE")]
    forward_pe: Option<YahooValue>,
    #[serde(default)]
    market_cap: Option<YahooValue>,
    #[serde(default)]
    beta: Option<YahooValue>,
    #[serde(default)]
    dividend_yield: Option<YahooValue>,
    #[serde(default)]
    fifty_two_week_high: Option<YahooValue>,
    #[serde(default)]
    fifty_two_week_low: Option<YahooValue>,
}

#[derive(Debug, Deserialize)]
struct KeyStatistics {
    #[serde(default, rename = "forwardPE")]
    forward_pe: Option<YahooValue>,
    #[serde(default)]
    beta: Option<YahooValue>,
}

#[derive(Debug, Deserialize)]
struct AssetProfile {
    #[serde(default)]
    sector: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceModule {
    #[serde(default)]
    regular_market_price: Option<YahooValue>,
    #[serde(default)]
    market_cap: Option<YahooValue>,
    #[serde(default)]
    short_name: Option<String>,
    #[serde(default)]
    long_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartEnvelope,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<YahooApiError>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}
