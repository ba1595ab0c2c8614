use screener_core::{
    FetchError, Fundamentals, Reading, Recommendation, ScreenError, ScreeningConfig,
    SentimentPolicy, SentimentSnapshot,
};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use technical_analysis::TechnicalSnapshot;
use thiserror::Error;

/// Filter chain stages in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Stage {
    FundamentalsPresent,
    ForwardPe,
    Price,
    MarketCap,
    Beta,
    Recommendation,
    TechnicalSnapshot,
    FiveDayReturn,
    MovingAverages,
    Rsi,
    AverageVolume,
    Sentiment,
}

impl Stage {
    pub const ALL: [Stage; 12] = [
        Stage::FundamentalsPresent,
        Stage::ForwardPe,
        Stage::Price,
        Stage::MarketCap,
        Stage::Beta,
        Stage::Recommendation,
        Stage::TechnicalSnapshot,
        Stage::FiveDayReturn,
        Stage::MovingAverages,
        Stage::Rsi,
        Stage::AverageVolume,
        Stage::Sentiment,
    ];

    /// 1-based position in the chain.
    pub fn number(&self) -> usize {
        *self as usize + 1
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::FundamentalsPresent => "fundamentals present",
            Stage::ForwardPe => "forward P/E",
            Stage::Price => "price",
            Stage::MarketCap => "market cap",
            Stage::Beta => "beta",
            Stage::Recommendation => "recommendation",
            Stage::TechnicalSnapshot => "technical snapshot",
            Stage::FiveDayReturn => "5-day return",
            Stage::MovingAverages => "moving averages",
            Stage::Rsi => "RSI",
            Stage::AverageVolume => "average volume",
            Stage::Sentiment => "sentiment",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {}", self.number(), self.name())
    }
}

/// External collaborator a failed call was made to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Gateway {
    Fundamentals,
    History,
    Sentiment,
}

impl fmt::Display for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gateway::Fundamentals => write!(f, "fundamentals"),
            Gateway::History => write!(f, "price history"),
            Gateway::Sentiment => write!(f, "sentiment"),
        }
    }
}

/// Why a ticker was excluded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkipReason {
    #[error("missing fundamental field {0}")]
    MissingFundamental(&'static str),

    #[error("forward P/E {value:.1} above limit {max:.1}")]
    ForwardPeTooHigh { value: f64, max: f64 },

    #[error("price {value:.2} below minimum {min:.2}")]
    PriceTooLow { value: f64, min: f64 },

    #[error("market cap {value:.0} below minimum {min:.0}")]
    MarketCapTooLow { value: f64, min: f64 },

    #[error("beta {value:.2} below minimum {min:.2}")]
    BetaTooLow { value: f64, min: f64 },

    #[error("recommendation {actual} does not meet {required}")]
    Recommendation {
        actual: &'static str,
        required: &'static str,
    },

    #[error("technical snapshot unavailable: {0}")]
    Technical(ScreenError),

    #[error("5-day return {value:.4} below minimum {min:.4}")]
    ReturnTooLow { value: f64, min: f64 },

    #[error("price {price:.2} not above SMA50 {sma_50:.2} and SMA200 {sma_200:.2}")]
    BelowMovingAverages { price: f64, sma_50: f64, sma_200: f64 },

    #[error("RSI {value:.1} outside ({min}, {max})")]
    RsiOutOfRange { value: f64, min: f64, max: f64 },

    #[error("average volume {value:.0} below minimum {min:.0}")]
    VolumeTooLow { value: f64, min: f64 },

    #[error("sentiment field {field} not satisfied ({reading:?})")]
    Sentiment {
        field: &'static str,
        reading: Reading,
    },

    #[error("{gateway} fetch failed: {error}")]
    Fetch { gateway: Gateway, error: FetchError },

    #[error("{gateway} call timed out after {after:?}")]
    Timeout { gateway: Gateway, after: Duration },

    #[error("run cancelled before ticker was evaluated")]
    Cancelled,

    #[error("worker failed: {0}")]
    WorkerFailed(String),
}

impl SkipReason {
    /// The stage that excluded the ticker, if the exclusion was a filter decision.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            SkipReason::MissingFundamental(_) => Some(Stage::FundamentalsPresent),
            SkipReason::ForwardPeTooHigh { .. } => Some(Stage::ForwardPe),
            SkipReason::PriceTooLow { .. } => Some(Stage::Price),
            SkipReason::MarketCapTooLow { .. } => Some(Stage::MarketCap),
            SkipReason::BetaTooLow { .. } => Some(Stage::Beta),
            SkipReason::Recommendation { .. } => Some(Stage::Recommendation),
            SkipReason::Technical(_) => Some(Stage::TechnicalSnapshot),
            SkipReason::ReturnTooLow { .. } => Some(Stage::FiveDayReturn),
            SkipReason::BelowMovingAverages { .. } => Some(Stage::MovingAverages),
            SkipReason::RsiOutOfRange { .. } => Some(Stage::Rsi),
            SkipReason::VolumeTooLow { .. } => Some(Stage::AverageVolume),
            SkipReason::Sentiment { .. } => Some(Stage::Sentiment),
            SkipReason::Fetch { gateway, .. } | SkipReason::Timeout { gateway, .. } => {
                match gateway {
                    Gateway::Sentiment => Some(Stage::Sentiment),
                    _ => None,
                }
            }
            SkipReason::Cancelled | SkipReason::WorkerFailed(_) => None,
        }
    }
}

/// Fundamentals that passed stages 1-6, with every required field present.
#[derive(Debug, Clone, PartialEq)]
pub struct QualifiedFundamentals {
    pub price: f64,
    pub forward_pe: f64,
    pub market_cap: f64,
    pub beta: f64,
    pub recommendation: Recommendation,
    pub sector: Option<String>,
}

/// Stages 1-6.
pub fn check_fundamentals(
    fundamentals: &Fundamentals,
    config: &ScreeningConfig,
) -> Result<QualifiedFundamentals, SkipReason> {
    let (Some(price), Some(market_cap), Some(beta), Some(forward_pe), Some(recommendation)) = (
        fundamentals.current_price,
        fundamentals.market_cap,
        fundamentals.beta,
        fundamentals.forward_pe,
        fundamentals.recommendation(),
    ) else {
        return Err(SkipReason::MissingFundamental(
            fundamentals.first_missing_field().unwrap_or("unknown"),
        ));
    };

    if !(forward_pe <= config.max_forward_pe) {
        return Err(SkipReason::ForwardPeTooHigh {
            value: forward_pe,
            max: config.max_forward_pe,
        });
    }
    if !(price >= config.min_price) {
        return Err(SkipReason::PriceTooLow {
            value: price,
            min: config.min_price,
        });
    }
    if !(market_cap >= config.min_market_cap) {
        return Err(SkipReason::MarketCapTooLow {
            value: market_cap,
            min: config.min_market_cap,
        });
    }
    if !(beta >= config.min_beta) {
        return Err(SkipReason::BetaTooLow {
            value: beta,
            min: config.min_beta,
        });
    }
    if !config.recommendation_filter.accepts(recommendation) {
        return Err(SkipReason::Recommendation {
            actual: recommendation.to_label(),
            required: config.recommendation_filter.to_label(),
        });
    }

    Ok(QualifiedFundamentals {
        price,
        forward_pe,
        market_cap,
        beta,
        recommendation,
        sector: fundamentals.sector.clone(),
    })
}

/// Stages 8-11. `price` is the fundamentals price, not the last close.
pub fn check_technicals(
    snapshot: &TechnicalSnapshot,
    price: f64,
    config: &ScreeningConfig,
) -> Result<(), SkipReason> {
    if !(snapshot.five_day_return >= config.min_5day_return) {
        return Err(SkipReason::ReturnTooLow {
            value: snapshot.five_day_return,
            min: config.min_5day_return,
        });
    }
    if !snapshot.above_moving_averages(price) {
        return Err(SkipReason::BelowMovingAverages {
            price,
            sma_50: snapshot.sma_50,
            sma_200: snapshot.sma_200,
        });
    }
    let (rsi_min, rsi_max) = config.rsi_range;
    if !(rsi_min < snapshot.rsi && snapshot.rsi < rsi_max) {
        return Err(SkipReason::RsiOutOfRange {
            value: snapshot.rsi,
            min: rsi_min,
            max: rsi_max,
        });
    }
    if !(snapshot.avg_volume >= config.min_avg_volume) {
        return Err(SkipReason::VolumeTooLow {
            value: snapshot.avg_volume,
            min: config.min_avg_volume,
        });
    }
    Ok(())
}

/// Stage 12 on a fetched snapshot. Monthly performance is checked first.
pub fn check_sentiment(
    snapshot: &SentimentSnapshot,
    policy: SentimentPolicy,
) -> Result<(), SkipReason> {
    for (field, reading) in [
        ("Perf Month", snapshot.perf_month),
        ("Inst Own", snapshot.inst_own),
    ] {
        let satisfied = match (reading, policy) {
            (Reading::Positive, _) => true,
            (Reading::Absent, SentimentPolicy::Lenient) => true,
            _ => false,
        };
        if !satisfied {
            return Err(SkipReason::Sentiment { field, reading });
        }
    }
    Ok(())
}
