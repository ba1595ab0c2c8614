use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minimum number of daily bars the technical stage needs.
pub const MIN_HISTORY_BARS: usize = 50;

/// OHLCV bar data (one trading day)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Daily history for one ticker, oldest bar first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    pub symbol: String,
    pub bars: Vec<PriceBar>,
}

impl PriceSeries {
    pub fn new(symbol: impl Into<String>, mut bars: Vec<PriceBar>) -> Self {
        bars.sort_by_key(|b| b.timestamp);
        Self {
            symbol: symbol.into(),
            bars,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|b| b.close)
    }
}

/// Analyst recommendation parsed from the provider's recommendation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Hold,
    Underperform,
    Sell,
    Other,
}

impl Recommendation {
    pub fn from_key(key: &str) -> Self {
        match key.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "strong_buy" => Recommendation::StrongBuy,
            "buy" => Recommendation::Buy,
            "hold" => Recommendation::Hold,
            "underperform" => Recommendation::Underperform,
            "sell" | "strong_sell" => Recommendation::Sell,
            _ => Recommendation::Other,
        }
    }

    pub fn to_label(&self) -> &'static str {
        match self {
            Recommendation::StrongBuy => "Strong Buy",
            Recommendation::Buy => "Buy",
            Recommendation::Hold => "Hold",
            Recommendation::Underperform => "Underperform",
            Recommendation::Sell => "Sell",
            Recommendation::Other => "Other",
        }
    }
}

/// Fundamentals snapshot for one ticker.
///
/// Every field may be missing; accessors hand back `Option` so each filter
/// decides its own missing-data policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fundamentals {
    pub symbol: String,
    pub forward_pe: Option<f64>,
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub beta: Option<f64>,
    pub recommendation_key: Option<String>,
    pub sector: Option<String>,
}

impl Fundamentals {
    pub fn recommendation(&self) -> Option<Recommendation> {
        self.recommendation_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .map(Recommendation::from_key)
    }

    /// Name of the first required field that is missing, if any.
    pub fn first_missing_field(&self) -> Option<&'static str> {
        if self.current_price.is_none() {
            Some("currentPrice")
        } else if self.market_cap.is_none() {
            Some("marketCap")
        } else if self.beta.is_none() {
            Some("beta")
        } else if self.forward_pe.is_none() {
            Some("forwardPE")
        } else if self.recommendation().is_none() {
            Some("recommendationKey")
        } else {
            None
        }
    }
}

/// One scraped sentiment field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reading {
    Positive,
    NonPositive,
    /// Label present but the value could not be interpreted
    Unparseable,
    /// Label not found on the page
    Absent,
}

impl Reading {
    pub fn is_positive(&self) -> bool {
        matches!(self, Reading::Positive)
    }
}

/// Sentiment cross-check data for one ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentSnapshot {
    pub perf_month: Reading,
    pub inst_own: Reading,
}

impl SentimentSnapshot {
    pub fn absent() -> Self {
        Self {
            perf_month: Reading::Absent,
            inst_own: Reading::Absent,
        }
    }
}

/// One row per ticker that passed every active filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningResult {
    pub ticker: String,
    pub price: f64,
    pub forward_pe: f64,
    pub market_cap: f64,
    pub avg_volume: u64,
    pub rsi: f64,
    pub sector: String,
    pub beta: f64,
    pub stop_loss: f64,
    /// Momentum arrow: up when the consecutive-up-days check holds
    pub momentum: bool,
    pub near_upper_bollinger: bool,
    pub consecutive_up_days: bool,
    pub five_day_return: String,
}

impl ScreeningResult {
    pub fn momentum_label(&self) -> &'static str {
        if self.momentum {
            "↑"
        } else {
            "→"
        }
    }

    pub fn bollinger_label(&self) -> &'static str {
        if self.near_upper_bollinger {
            "✓"
        } else {
            "–"
        }
    }
}

/// Round to `places` decimal places for display.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Render a fractional return as a one-decimal percent string, e.g. `0.053` -> `"5.3%"`.
pub fn format_return(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}
