use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use screener_core::{FetchError, Reading, SentimentGateway, SentimentSnapshot};
use std::time::Duration;

const BASE_URL: &str = "https://finviz.com/quote.ashx";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

pub const PERF_MONTH_LABEL: &str = "Perf Month";
pub const INST_OWN_LABEL: &str = "Inst Own";

/// Scrapes the Finviz quote page for monthly performance and institutional ownership.
#[derive(Clone)]
pub struct FinvizClient {
    client: Client,
    base_url: String,
}

impl FinvizClient {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(10))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: BASE_URL.to_string(),
        }
    }

    pub async fn get_quote_page(&self, symbol: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("t", symbol)])
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(symbol.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Transient(format!(
                "Finviz returned HTTP {} for {}",
                status, symbol
            )));
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))
    }
}

impl Default for FinvizClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SentimentGateway for FinvizClient {
    async fn fetch_sentiment(&self, symbol: &str) -> Result<SentimentSnapshot, FetchError> {
        let html = self.get_quote_page(symbol).await?;
        let snapshot = parse_quote_page(&html)?;
        tracing::debug!(
            "{}: perf month {:?}, inst own {:?}",
            symbol,
            snapshot.perf_month,
            snapshot.inst_own
        );
        Ok(snapshot)
    }
}

/// Extract both sentiment readings from a quote page.
pub fn parse_quote_page(html: &str) -> Result<SentimentSnapshot, FetchError> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("td")
        .map_err(|e| FetchError::ParseFailure(format!("invalid selector: {:?}", e)))?;

    let cells: Vec<String> = document
        .select(&selector)
        .map(|td| td.text().collect::<String>())
        .collect();

    Ok(SentimentSnapshot {
        perf_month: value_after_label(&cells, PERF_MONTH_LABEL)
            .map_or(Reading::Absent, parse_perf_month),
        inst_own: value_after_label(&cells, INST_OWN_LABEL)
            .map_or(Reading::Absent, parse_inst_own),
    })
}

/// Text of the cell following the first cell whose text is exactly `label`.
fn value_after_label<'a>(cells: &'a [String], label: &str) -> Option<&'a str> {
    let pos = cells.iter().position(|c| c.trim() == label)?;
    cells.get(pos + 1).map(|c| c.trim())
}

/// Positive iff the text starts with `+`.
pub fn parse_perf_month(text: &str) -> Reading {
    if text.trim().starts_with('+') {
        Reading::Positive
    } else {
        Reading::NonPositive
    }
}

/// Positive iff the percentage parses as a number above zero.
pub fn parse_inst_own(text: &str) -> Reading {
    match text.trim().trim_end_matches('%').trim().parse::<f64>() {
        Ok(v) if v.is_nan() => Reading::Unparseable,
        Ok(v) if v > 0.0 => Reading::Positive,
        Ok(_) => Reading::NonPositive,
        Err(_) => Reading::Unparseable,
    }
}
