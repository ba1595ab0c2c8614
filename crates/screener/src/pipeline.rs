use chrono::Utc;
use screener_core::{
    env_or, format_return, round_to, FetchError, MarketDataGateway, RateLimiter, ScreenError,
    ScreeningConfig, ScreeningResult, SentimentGateway, MIN_HISTORY_BARS,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use technical_analysis::TechnicalSnapshot;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;

use crate::aggregator::{Aggregator, Outcome};
use crate::filters::{check_fundamentals, check_sentiment, check_technicals, Gateway, SkipReason};
use crate::progress::ProgressReporter;
use crate::report::ScreeningReport;

/// Worker pool and outbound-call tuning, separate from the screening criteria.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Tickers evaluated at once
    pub concurrency: usize,
    /// Market data calls per second across all workers; 0 disables limiting
    pub market_rate: f64,
    /// Sentiment calls per second across all workers; 0 disables limiting
    pub sentiment_rate: f64,
    pub call_timeout: Duration,
    /// Retries after the first attempt, transient failures only
    pub max_retries: u32,
    /// First retry delay; doubles on each further attempt
    pub retry_backoff: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            market_rate: 20.0,
            sentiment_rate: 10.0,
            call_timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

impl PipelineOptions {
    pub fn from_env() -> Result<Self, ScreenError> {
        let defaults = Self::default();
        let options = Self {
            concurrency: env_or("SCREEN_CONCURRENCY", defaults.concurrency)?,
            market_rate: env_or("SCREEN_MARKET_RATE", defaults.market_rate)?,
            sentiment_rate: env_or("SCREEN_SENTIMENT_RATE", defaults.sentiment_rate)?,
            call_timeout: Duration::from_secs(env_or(
                "SCREEN_TIMEOUT_SECS",
                defaults.call_timeout.as_secs(),
            )?),
            max_retries: env_or("SCREEN_MAX_RETRIES", defaults.max_retries)?,
            retry_backoff: Duration::from_millis(env_or(
                "SCREEN_RETRY_BACKOFF_MS",
                defaults.retry_backoff.as_millis() as u64,
            )?),
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ScreenError> {
        if self.concurrency == 0 {
            return Err(ScreenError::ConfigInvalid(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(ScreenError::ConfigInvalid(
                "call timeout must be positive".to_string(),
            ));
        }
        if self.market_rate.is_nan() || self.sentiment_rate.is_nan() {
            return Err(ScreenError::ConfigInvalid(
                "rate limits must be numbers".to_string(),
            ));
        }
        Ok(())
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Requests cancellation of a running screen.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Observed by the pipeline before each ticker starts.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if the
    /// handle is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Everything a worker needs to evaluate one ticker.
struct RunContext {
    market: Arc<dyn MarketDataGateway>,
    sentiment: Option<Arc<dyn SentimentGateway>>,
    market_limiter: RateLimiter,
    sentiment_limiter: RateLimiter,
    options: PipelineOptions,
    config: ScreeningConfig,
}

impl RunContext {
    /// Rate-limited, time-bounded call with retry on transient failures.
    async fn call<T, F, Fut>(
        &self,
        gateway: Gateway,
        symbol: &str,
        limiter: &RateLimiter,
        mut op: F,
    ) -> Result<T, SkipReason>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0;
        loop {
            limiter.acquire().await;

            let failure = match tokio::time::timeout(self.options.call_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(error)) if !error.is_transient() => {
                    return Err(SkipReason::Fetch { gateway, error });
                }
                Ok(Err(error)) => SkipReason::Fetch { gateway, error },
                Err(_) => SkipReason::Timeout {
                    gateway,
                    after: self.options.call_timeout,
                },
            };

            if attempt >= self.options.max_retries {
                return Err(failure);
            }

            let delay = self.options.backoff(attempt);
            attempt += 1;
            tracing::debug!(
                "{}: {} (retry {}/{} in {:?})",
                symbol,
                failure,
                attempt,
                self.options.max_retries,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Run the filter chain for one ticker, fetching only what the next stage needs.
    async fn evaluate(&self, symbol: &str) -> Outcome {
        let market = &self.market;

        let fundamentals = self
            .call(Gateway::Fundamentals, symbol, &self.market_limiter, move || {
                market.fetch_fundamentals(symbol)
            })
            .await?;
        let qualified = check_fundamentals(&fundamentals, &self.config)?;

        let history = self
            .call(Gateway::History, symbol, &self.market_limiter, move || {
                market.fetch_history(symbol)
            })
            .await
            .map_err(|reason| match reason {
                SkipReason::Fetch {
                    error: FetchError::Incomplete { bars, .. },
                    ..
                } => SkipReason::Technical(ScreenError::InsufficientHistory {
                    indicator: "price history",
                    needed: MIN_HISTORY_BARS,
                    available: bars,
                }),
                other => other,
            })?;

        let snapshot = TechnicalSnapshot::compute(&history, self.config.consecutive_up_days)
            .map_err(SkipReason::Technical)?;
        check_technicals(&snapshot, qualified.price, &self.config)?;

        if self.config.enable_sentiment_check {
            let gateway = self.sentiment.as_ref().ok_or_else(|| SkipReason::Fetch {
                gateway: Gateway::Sentiment,
                error: FetchError::NotFound("no sentiment gateway configured".to_string()),
            })?;
            let sentiment = self
                .call(Gateway::Sentiment, symbol, &self.sentiment_limiter, move || {
                    gateway.fetch_sentiment(symbol)
                })
                .await?;
            check_sentiment(&sentiment, self.config.sentiment_policy)?;
        }

        let price = qualified.price;
        Ok(ScreeningResult {
            ticker: symbol.to_string(),
            price: round_to(price, 2),
            forward_pe: round_to(qualified.forward_pe, 1),
            market_cap: qualified.market_cap,
            avg_volume: snapshot.avg_volume as u64,
            rsi: round_to(snapshot.rsi, 1),
            sector: qualified.sector.unwrap_or_else(|| "Unknown".to_string()),
            beta: round_to(qualified.beta, 2),
            stop_loss: round_to(snapshot.stop_loss(price), 2),
            momentum: snapshot.consecutive_up,
            near_upper_bollinger: snapshot.near_upper_band(price),
            consecutive_up_days: snapshot.consecutive_up,
            five_day_return: format_return(snapshot.five_day_return),
        })
    }
}

/// Screens a ticker universe against a `ScreeningConfig`.
pub struct Screener {
    market: Arc<dyn MarketDataGateway>,
    sentiment: Option<Arc<dyn SentimentGateway>>,
    options: PipelineOptions,
    market_limiter: RateLimiter,
    sentiment_limiter: RateLimiter,
}

impl Screener {
    pub fn new(
        market: Arc<dyn MarketDataGateway>,
        sentiment: Option<Arc<dyn SentimentGateway>>,
        options: PipelineOptions,
    ) -> Self {
        let market_limiter = RateLimiter::per_second(options.market_rate);
        let sentiment_limiter = RateLimiter::per_second(options.sentiment_rate);
        Self {
            market,
            sentiment,
            options,
            market_limiter,
            sentiment_limiter,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Evaluate every ticker and return passing results in universe order.
    ///
    /// Per-ticker failures are recorded in the report and never abort the
    /// run; only an invalid configuration is returned as an error, before
    /// any ticker is touched.
    pub async fn run(
        &self,
        config: &ScreeningConfig,
        tickers: &[String],
        progress: &mut dyn ProgressReporter,
        mut cancel: CancelToken,
    ) -> Result<ScreeningReport, ScreenError> {
        config.validate()?;
        self.options.validate()?;
        if config.enable_sentiment_check && self.sentiment.is_none() {
            return Err(ScreenError::ConfigInvalid(
                "sentiment check enabled but no sentiment gateway configured".to_string(),
            ));
        }

        let started_at = Utc::now();
        let total = tickers.len();
        tracing::info!(
            "📊 Starting screen of {} symbols ({} workers)",
            total,
            self.options.concurrency
        );

        let ctx = Arc::new(RunContext {
            market: Arc::clone(&self.market),
            sentiment: self.sentiment.clone(),
            market_limiter: self.market_limiter.clone(),
            sentiment_limiter: self.sentiment_limiter.clone(),
            options: self.options.clone(),
            config: config.clone(),
        });

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency));
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Outcome)>();
        let mut tasks = JoinSet::new();
        let mut aggregator = Aggregator::new(tickers, progress);
        let mut next = 0;
        let mut cancelled = false;

        while !aggregator.is_done() {
            tokio::select! {
                biased;

                Some((index, outcome)) = rx.recv() => {
                    aggregator.record(index, outcome);
                }

                _ = cancel.cancelled(), if !cancelled && next < total => {
                    tracing::warn!("Screen cancelled with {} symbols not started", total - next);
                    cancelled = true;
                    aggregator.cancel_from(next);
                    next = total;
                }

                Ok(permit) = Arc::clone(&semaphore).acquire_owned(), if !cancelled && next < total => {
                    if cancel.is_cancelled() {
                        drop(permit);
                        continue;
                    }

                    let index = next;
                    next += 1;
                    let symbol = tickers[index].clone();
                    let ctx = Arc::clone(&ctx);
                    let tx = tx.clone();

                    tasks.spawn(async move {
                        // Inner task so a panicking evaluation still reports its index
                        let outcome = match tokio::spawn(async move {
                            ctx.evaluate(&symbol).await
                        })
                        .await
                        {
                            Ok(outcome) => outcome,
                            Err(e) => Err(SkipReason::WorkerFailed(e.to_string())),
                        };
                        // Outcome is queued before the slot frees up
                        let _ = tx.send((index, outcome));
                        drop(permit);
                    });
                }
            }
        }

        // Every ticker is accounted for; reap the finished worker tasks
        while tasks.join_next().await.is_some() {}

        let report = aggregator.finish(cancelled, started_at);
        tracing::info!(
            "✅ Screen complete: {}/{} symbols passed filters{}",
            report.results.len(),
            total,
            if cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }
}
