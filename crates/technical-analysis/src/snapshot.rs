use screener_core::{PriceBar, PriceSeries, ScreenError, MIN_HISTORY_BARS};
use serde::{Deserialize, Serialize};

use crate::indicators::*;

pub const RSI_PERIOD: usize = 14;
pub const SMA_SHORT: usize = 50;
pub const SMA_LONG: usize = 200;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_K: f64 = 2.0;
/// Price within 2% of the upper band counts as "near".
pub const BOLLINGER_PROXIMITY: f64 = 0.98;
pub const ATR_PERIOD: usize = 14;
pub const STOP_LOSS_ATR_MULTIPLE: f64 = 1.5;
/// Stop-loss as a fraction of price when ATR cannot be computed.
pub const STOP_LOSS_FALLBACK: f64 = 0.9;
pub const VOLUME_PERIOD: usize = 30;
pub const RETURN_PERIOD: usize = 5;

/// Latest indicator values derived from the tail of a price series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalSnapshot {
    pub rsi: f64,
    pub sma_50: f64,
    /// SMA(200), or SMA(50) when fewer than 200 bars exist
    pub sma_200: f64,
    pub sma_200_is_fallback: bool,
    pub bollinger_upper: f64,
    pub atr: Option<f64>,
    pub avg_volume: f64,
    pub consecutive_up: bool,
    pub five_day_return: f64,
    pub last_close: f64,
    pub bars: usize,
}

fn last_or_insufficient(
    values: Vec<f64>,
    indicator: &'static str,
    needed: usize,
    available: usize,
) -> Result<f64, ScreenError> {
    match values.last() {
        Some(v) if v.is_finite() => Ok(*v),
        Some(v) => Err(ScreenError::InvalidData(format!(
            "{} is not finite ({})",
            indicator, v
        ))),
        None => Err(ScreenError::InsufficientHistory {
            indicator,
            needed,
            available,
        }),
    }
}

impl TechnicalSnapshot {
    /// Compute the snapshot for `series`. `consecutive_days` is the streak
    /// length checked for the consecutive-up-days flag.
    pub fn compute(series: &PriceSeries, consecutive_days: usize) -> Result<Self, ScreenError> {
        Self::from_bars(&series.bars, consecutive_days)
    }

    pub fn from_bars(bars: &[PriceBar], consecutive_days: usize) -> Result<Self, ScreenError> {
        let n = bars.len();
        if n < MIN_HISTORY_BARS {
            return Err(ScreenError::InsufficientHistory {
                indicator: "technical snapshot",
                needed: MIN_HISTORY_BARS,
                available: n,
            });
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let last_close = closes[n - 1];
        if !last_close.is_finite() {
            return Err(ScreenError::InvalidData(format!(
                "last close is not finite ({})",
                last_close
            )));
        }

        let five_day_return = pct_change(&closes, RETURN_PERIOD).ok_or(
            ScreenError::InsufficientHistory {
                indicator: "5-day return",
                needed: RETURN_PERIOD + 1,
                available: n,
            },
        )?;

        let sma_50 = last_or_insufficient(sma(&closes, SMA_SHORT), "SMA(50)", SMA_SHORT, n)?;
        let (sma_200, sma_200_is_fallback) = if n >= SMA_LONG {
            (
                last_or_insufficient(sma(&closes, SMA_LONG), "SMA(200)", SMA_LONG, n)?,
                false,
            )
        } else {
            (sma_50, true)
        };

        let rsi = last_or_insufficient(rsi(&closes, RSI_PERIOD), "RSI(14)", RSI_PERIOD + 1, n)?;

        let bands = bollinger_bands(&closes, BOLLINGER_PERIOD, BOLLINGER_K);
        let bollinger_upper =
            last_or_insufficient(bands.upper, "Bollinger(20)", BOLLINGER_PERIOD, n)?;

        let atr = atr(bars, ATR_PERIOD).last().copied().filter(|v| v.is_finite());

        let avg_volume = last_or_insufficient(
            average_volume(bars, VOLUME_PERIOD),
            "volume(30)",
            VOLUME_PERIOD,
            n,
        )?;

        Ok(Self {
            rsi,
            sma_50,
            sma_200,
            sma_200_is_fallback,
            bollinger_upper,
            atr,
            avg_volume,
            consecutive_up: consecutive_up_days(&closes, consecutive_days),
            five_day_return,
            last_close,
            bars: n,
        })
    }

    pub fn above_moving_averages(&self, price: f64) -> bool {
        price > self.sma_50 && price > self.sma_200
    }

    pub fn near_upper_band(&self, price: f64) -> bool {
        price >= self.bollinger_upper * BOLLINGER_PROXIMITY
    }

    /// `price - 1.5 * ATR`, or 90% of price without an ATR.
    pub fn stop_loss(&self, price: f64) -> f64 {
        match self.atr {
            Some(atr) => price - STOP_LOSS_ATR_MULTIPLE * atr,
            None => price * STOP_LOSS_FALLBACK,
        }
    }
}
