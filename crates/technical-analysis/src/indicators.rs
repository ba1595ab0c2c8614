use screener_core::stats;
use screener_core::PriceBar;

/// Simple Moving Average
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }

    let mut result = Vec::with_capacity(data.len() - period + 1);
    for i in period - 1..data.len() {
        let sum: f64 = data[i + 1 - period..=i].iter().sum();
        result.push(sum / period as f64);
    }
    result
}

/// Exponentially weighted mean seeded with the first observation:
/// `y[0] = x[0]`, `y[t] = (1 - alpha) * y[t-1] + alpha * x[t]`.
pub fn ewm(data: &[f64], alpha: f64) -> Vec<f64> {
    let Some(&first) = data.first() else {
        return vec![];
    };
    if !(alpha > 0.0 && alpha <= 1.0) {
        return vec![];
    }

    let mut result = Vec::with_capacity(data.len());
    result.push(first);
    for &x in &data[1..] {
        let prev = result[result.len() - 1];
        result.push((1.0 - alpha) * prev + alpha * x);
    }
    result
}

/// Relative Strength Index with Wilder smoothing (alpha = 1/period,
/// i.e. center of mass `period - 1`).
///
/// One value per day-over-day delta. When the smoothed loss is zero the RSI
/// saturates at 100.
pub fn rsi(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period + 1 {
        return vec![];
    }

    let mut gains = Vec::with_capacity(data.len() - 1);
    let mut losses = Vec::with_capacity(data.len() - 1);

    for w in data.windows(2) {
        let change = w[1] - w[0];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let alpha = 1.0 / period as f64;
    let avg_gains = ewm(&gains, alpha);
    let avg_losses = ewm(&losses, alpha);

    avg_gains
        .iter()
        .zip(avg_losses.iter())
        .map(|(&gain, &loss)| {
            if loss <= 0.0 {
                100.0
            } else {
                100.0 - 100.0 / (1.0 + gain / loss)
            }
        })
        .collect()
}

/// Bollinger Bands
pub struct BollingerBands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

/// Bands at `middle ± k * sample std-dev` over a rolling window.
pub fn bollinger_bands(data: &[f64], period: usize, k: f64) -> BollingerBands {
    if period == 0 || data.len() < period {
        return BollingerBands {
            upper: vec![],
            middle: vec![],
            lower: vec![],
        };
    }

    let middle = sma(data, period);
    let mut upper = Vec::with_capacity(middle.len());
    let mut lower = Vec::with_capacity(middle.len());

    for i in period - 1..data.len() {
        let window = &data[i + 1 - period..=i];
        let mean = middle[i + 1 - period];
        let std = stats::std_dev(window);

        upper.push(mean + k * std);
        lower.push(mean - k * std);
    }

    BollingerBands {
        upper,
        middle,
        lower,
    }
}

/// True range for every bar that has a previous close.
pub fn true_ranges(bars: &[PriceBar]) -> Vec<f64> {
    bars.windows(2)
        .map(|w| {
            let (prev, bar) = (&w[0], &w[1]);
            let high_low = bar.high - bar.low;
            let high_close = (bar.high - prev.close).abs();
            let low_close = (bar.low - prev.close).abs();
            high_low.max(high_close).max(low_close)
        })
        .collect()
}

/// Average True Range as a plain rolling mean of the true range.
pub fn atr(bars: &[PriceBar], period: usize) -> Vec<f64> {
    if period == 0 || bars.len() < period + 1 {
        return vec![];
    }
    sma(&true_ranges(bars), period)
}

/// Rolling mean of daily volume.
pub fn average_volume(bars: &[PriceBar], period: usize) -> Vec<f64> {
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    sma(&volumes, period)
}

/// True iff each of the last `days` day-over-day close changes is strictly positive.
pub fn consecutive_up_days(data: &[f64], days: usize) -> bool {
    if days == 0 || data.len() < days + 1 {
        return false;
    }
    data[data.len() - days - 1..]
        .windows(2)
        .all(|w| w[1] - w[0] > 0.0)
}

/// Fractional change of the latest value against the one `periods` steps earlier.
pub fn pct_change(data: &[f64], periods: usize) -> Option<f64> {
    if periods == 0 || data.len() < periods + 1 {
        return None;
    }
    let last = data[data.len() - 1];
    let base = data[data.len() - 1 - periods];
    if base == 0.0 || !base.is_finite() || !last.is_finite() {
        return None;
    }
    Some(last / base - 1.0)
}
