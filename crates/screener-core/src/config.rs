use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

use crate::{Recommendation, ScreenError};

/// Minimum analyst recommendation a ticker must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationFilter {
    Any,
    Buy,
    StrongBuy,
}

impl RecommendationFilter {
    pub fn accepts(&self, recommendation: Recommendation) -> bool {
        match self {
            RecommendationFilter::Any => true,
            RecommendationFilter::Buy => matches!(
                recommendation,
                Recommendation::Buy | Recommendation::StrongBuy
            ),
            RecommendationFilter::StrongBuy => recommendation == Recommendation::StrongBuy,
        }
    }

    pub fn to_label(&self) -> &'static str {
        match self {
            RecommendationFilter::Any => "Any",
            RecommendationFilter::Buy => "Buy",
            RecommendationFilter::StrongBuy => "Strong Buy",
        }
    }
}

impl FromStr for RecommendationFilter {
    type Err = ScreenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "any" => Ok(RecommendationFilter::Any),
            "buy" => Ok(RecommendationFilter::Buy),
            "strong_buy" => Ok(RecommendationFilter::StrongBuy),
            other => Err(ScreenError::ConfigInvalid(format!(
                "unknown recommendation filter '{}'",
                other
            ))),
        }
    }
}

/// How the sentiment stage treats labels missing from the scraped page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentPolicy {
    /// Both readings must be present and positive.
    #[default]
    FailClosed,
    /// A missing label is skipped; a present value must still be positive.
    Lenient,
}

impl FromStr for SentimentPolicy {
    type Err = ScreenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_closed" | "strict" => Ok(SentimentPolicy::FailClosed),
            "lenient" => Ok(SentimentPolicy::Lenient),
            other => Err(ScreenError::ConfigInvalid(format!(
                "unknown sentiment policy '{}'",
                other
            ))),
        }
    }
}

/// Screening criteria for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningConfig {
    pub max_forward_pe: f64,
    pub min_price: f64,
    pub min_market_cap: f64,
    pub min_beta: f64,
    /// Fraction, e.g. 0.05 for 5%
    pub min_5day_return: f64,
    /// Exclusive bounds
    pub rsi_range: (f64, f64),
    pub min_avg_volume: f64,
    pub enable_sentiment_check: bool,
    pub consecutive_up_days: usize,
    pub recommendation_filter: RecommendationFilter,
    #[serde(default)]
    pub sentiment_policy: SentimentPolicy,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            max_forward_pe: 15.0,
            min_price: 15.0,
            min_market_cap: 1e10,
            min_beta: 1.0,
            min_5day_return: 0.05,
            rsi_range: (30.0, 70.0),
            min_avg_volume: 2e6,
            enable_sentiment_check: true,
            consecutive_up_days: 3,
            recommendation_filter: RecommendationFilter::StrongBuy,
            sentiment_policy: SentimentPolicy::FailClosed,
        }
    }
}

/// Parse `key` from the environment, or return `default` when unset.
pub fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ScreenError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            ScreenError::ConfigInvalid(format!("{} has an unparseable value '{}'", key, raw))
        }),
        Err(_) => Ok(default),
    }
}

impl ScreeningConfig {
    /// Build from `SCREEN_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ScreenError> {
        let defaults = Self::default();
        let config = Self {
            max_forward_pe: env_or("SCREEN_MAX_FORWARD_PE", defaults.max_forward_pe)?,
            min_price: env_or("SCREEN_MIN_PRICE", defaults.min_price)?,
            min_market_cap: env_or("SCREEN_MIN_MARKET_CAP", defaults.min_market_cap)?,
            min_beta: env_or("SCREEN_MIN_BETA", defaults.min_beta)?,
            min_5day_return: env_or("SCREEN_MIN_5DAY_RETURN", defaults.min_5day_return)?,
            rsi_range: (
                env_or("SCREEN_RSI_MIN", defaults.rsi_range.0)?,
                env_or("SCREEN_RSI_MAX", defaults.rsi_range.1)?,
            ),
            min_avg_volume: env_or("SCREEN_MIN_AVG_VOLUME", defaults.min_avg_volume)?,
            enable_sentiment_check: env_or(
                "SCREEN_ENABLE_SENTIMENT",
                defaults.enable_sentiment_check,
            )?,
            consecutive_up_days: env_or(
                "SCREEN_CONSECUTIVE_UP_DAYS",
                defaults.consecutive_up_days,
            )?,
            recommendation_filter: env_or(
                "SCREEN_RECOMMENDATION",
                defaults.recommendation_filter,
            )?,
            sentiment_policy: env_or("SCREEN_SENTIMENT_POLICY", defaults.sentiment_policy)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<(), ScreenError> {
        let (rsi_min, rsi_max) = self.rsi_range;
        if !rsi_min.is_finite() || !rsi_max.is_finite() {
            return Err(ScreenError::ConfigInvalid(
                "RSI bounds must be finite".to_string(),
            ));
        }
        if rsi_min >= rsi_max {
            return Err(ScreenError::ConfigInvalid(format!(
                "RSI range is inverted or empty: ({}, {})",
                rsi_min, rsi_max
            )));
        }
        if rsi_min < 0.0 || rsi_max > 100.0 {
            return Err(ScreenError::ConfigInvalid(format!(
                "RSI range must lie within [0, 100]: ({}, {})",
                rsi_min, rsi_max
            )));
        }
        if self.consecutive_up_days == 0 {
            return Err(ScreenError::ConfigInvalid(
                "consecutive_up_days must be at least 1".to_string(),
            ));
        }

        let non_negative = [
            ("min_price", self.min_price),
            ("min_market_cap", self.min_market_cap),
            ("min_avg_volume", self.min_avg_volume),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ScreenError::ConfigInvalid(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        let finite = [
            ("max_forward_pe", self.max_forward_pe),
            ("min_beta", self.min_beta),
            ("min_5day_return", self.min_5day_return),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(ScreenError::ConfigInvalid(format!(
                    "{} must be finite, got {}",
                    name, value
                )));
            }
        }

        Ok(())
    }

    /// Human-readable list of the active criteria.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Forward P/E <= {}", self.max_forward_pe),
            format!("Price >= ${}", self.min_price),
            format!("Market Cap >= ${:.1}B", self.min_market_cap / 1e9),
            format!("Beta >= {}", self.min_beta),
            format!("Recommendation: {}", self.recommendation_filter.to_label()),
            format!("5-day return >= {:.1}%", self.min_5day_return * 100.0),
            "Price above 50-day and 200-day moving averages".to_string(),
            format!("RSI between {}-{}", self.rsi_range.0, self.rsi_range.1),
            format!("Average volume >= {:.1}M shares", self.min_avg_volume / 1e6),
        ];
        if self.enable_sentiment_check {
            lines.push("Positive monthly performance".to_string());
            lines.push("Positive institutional ownership".to_string());
        }
        lines
    }

    /// Suggestions for loosening the criteria after a run found nothing.
    pub fn relaxation_hints(&self) -> Vec<String> {
        let min_return_pct = self.min_5day_return * 100.0;
        let mut hints = vec![
            format!(
                "Increase Forward P/E limit from {} to {}",
                self.max_forward_pe,
                self.max_forward_pe + 10.0
            ),
            format!(
                "Reduce minimum return from {:.0}% to {:.0}%",
                min_return_pct,
                (min_return_pct - 2.0).max(1.0)
            ),
            format!(
                "Lower minimum market cap from ${:.0}B to a smaller value",
                self.min_market_cap / 1e9
            ),
        ];
        if self.recommendation_filter != RecommendationFilter::Any {
            hints.push(format!(
                "Change recommendation filter from '{}' to a broader setting",
                self.recommendation_filter.to_label()
            ));
        }
        hints.push(format!(
            "Reduce consecutive up days from {} to {}",
            self.consecutive_up_days,
            self.consecutive_up_days.saturating_sub(1).max(1)
        ));
        if self.enable_sentiment_check {
            hints.push("Disable the sentiment cross-check".to_string());
        }
        hints
    }
}
