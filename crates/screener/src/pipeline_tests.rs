#[cfg(test)]
mod tests {
    use super::super::aggregator::{CANCELLED_MESSAGE, COMPLETION_MESSAGE};
    use super::super::filters::{Gateway, SkipReason, Stage};
    use super::super::pipeline::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use screener_core::{
        FetchError, Fundamentals, MarketDataGateway, PriceBar, PriceSeries, Reading,
        ScreenError, ScreeningConfig, SentimentGateway, SentimentPolicy, SentimentSnapshot,
    };
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    // Alternating +3 / -2.6 closes from 110 with a five-day +2 surge at the end:
    // RSI ~63.5, 5-day return ~6.3%, last close 168.8, SMA50 ~156.7
    fn uptrend_bars(n: usize) -> Vec<PriceBar> {
        let start = Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap();
        let mut close = 110.0;
        (0..n)
            .map(|i| {
                if i > 0 {
                    close += if i >= n - 5 {
                        2.0
                    } else if i % 2 == 1 {
                        3.0
                    } else {
                        -2.6
                    };
                }
                PriceBar {
                    timestamp: start + ChronoDuration::days(i as i64),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 5_000_000.0,
                }
            })
            .collect()
    }

    fn fundamentals(symbol: &str) -> Fundamentals {
        Fundamentals {
            symbol: symbol.to_string(),
            forward_pe: Some(12.0),
            current_price: Some(180.0),
            market_cap: Some(2e12),
            beta: Some(1.2),
            recommendation_key: Some("strong_buy".to_string()),
            sector: Some("Technology".to_string()),
        }
    }

    fn positive_sentiment() -> SentimentSnapshot {
        SentimentSnapshot {
            perf_month: Reading::Positive,
            inst_own: Reading::Positive,
        }
    }

    struct MockTicker {
        fundamentals: Result<Fundamentals, FetchError>,
        history: Result<PriceSeries, FetchError>,
    }

    #[derive(Default)]
    struct MockMarket {
        tickers: HashMap<String, MockTicker>,
        fundamentals_calls: AtomicUsize,
        history_calls: AtomicUsize,
        /// Transient failures to return before fundamentals succeed
        transient_failures: AtomicUsize,
        delay: Option<Duration>,
        panic_on: Option<String>,
    }

    impl MockMarket {
        fn with(mut self, symbol: &str, fundamentals: Fundamentals, bars: usize) -> Self {
            self.tickers.insert(
                symbol.to_string(),
                MockTicker {
                    fundamentals: Ok(fundamentals),
                    history: Ok(PriceSeries::new(symbol, uptrend_bars(bars))),
                },
            );
            self
        }

        fn with_result(
            mut self,
            symbol: &str,
            fundamentals: Result<Fundamentals, FetchError>,
            history: Result<PriceSeries, FetchError>,
        ) -> Self {
            self.tickers.insert(
                symbol.to_string(),
                MockTicker {
                    fundamentals,
                    history,
                },
            );
            self
        }

        fn ticker(&self, symbol: &str) -> Result<&MockTicker, FetchError> {
            self.tickers
                .get(symbol)
                .ok_or_else(|| FetchError::NotFound(symbol.to_string()))
        }
    }

    #[async_trait]
    impl MarketDataGateway for MockMarket {
        async fn fetch_fundamentals(&self, symbol: &str) -> Result<Fundamentals, FetchError> {
            self.fundamentals_calls.fetch_add(1, Ordering::SeqCst);
            if self.panic_on.as_deref() == Some(symbol) {
                panic!("mock gateway blew up on {}", symbol);
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let remaining = self.transient_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.transient_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(FetchError::Transient("HTTP 503".to_string()));
            }
            self.ticker(symbol)?.fundamentals.clone()
        }

        async fn fetch_history(&self, symbol: &str) -> Result<PriceSeries, FetchError> {
            self.history_calls.fetch_add(1, Ordering::SeqCst);
            self.ticker(symbol)?.history.clone()
        }
    }

    #[derive(Default)]
    struct MockSentiment {
        snapshots: HashMap<String, SentimentSnapshot>,
        calls: AtomicUsize,
    }

    impl MockSentiment {
        fn with(mut self, symbol: &str, snapshot: SentimentSnapshot) -> Self {
            self.snapshots.insert(symbol.to_string(), snapshot);
            self
        }
    }

    #[async_trait]
    impl SentimentGateway for MockSentiment {
        async fn fetch_sentiment(&self, symbol: &str) -> Result<SentimentSnapshot, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.snapshots
                .get(symbol)
                .copied()
                .ok_or_else(|| FetchError::NotFound(symbol.to_string()))
        }
    }

    fn fast_options() -> PipelineOptions {
        PipelineOptions {
            concurrency: 3,
            market_rate: 0.0,
            sentiment_rate: 0.0,
            call_timeout: Duration::from_secs(5),
            max_retries: 2,
            retry_backoff: Duration::from_millis(1),
        }
    }

    fn no_sentiment() -> ScreeningConfig {
        ScreeningConfig {
            enable_sentiment_check: false,
            ..ScreeningConfig::default()
        }
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn run(
        market: &Arc<MockMarket>,
        sentiment: Option<&Arc<MockSentiment>>,
        config: &ScreeningConfig,
        tickers: &[&str],
    ) -> crate::report::ScreeningReport {
        let screener = Screener::new(
            market.clone(),
            sentiment.map(|s| s.clone() as Arc<dyn SentimentGateway>),
            fast_options(),
        );
        let mut progress = |_: f64, _: &str| {};
        screener
            .run(config, &symbols(tickers), &mut progress, CancelToken::never())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_scenario_a_passes_all_stages() {
        let market = Arc::new(MockMarket::default().with("AAPL", fundamentals("AAPL"), 250));
        let report = run(&market, None, &no_sentiment(), &["AAPL"]).await;

        assert_eq!(report.results.len(), 1, "skipped: {:?}", report.skipped);
        let result = &report.results[0];
        assert_eq!(result.ticker, "AAPL");
        assert_eq!(result.price, 180.0);
        assert_eq!(result.forward_pe, 12.0);
        assert_eq!(result.sector, "Technology");
        assert_eq!(result.avg_volume, 5_000_000);
        assert!(result.rsi > 30.0 && result.rsi < 70.0);
        assert!(result.stop_loss < result.price);
        assert!(result.consecutive_up_days);
        assert_eq!(result.momentum_label(), "↑");
        assert_eq!(result.five_day_return, "6.3%");
    }

    #[tokio::test]
    async fn test_short_history_uses_sma50_fallback() {
        let market = Arc::new(MockMarket::default().with("AAPL", fundamentals("AAPL"), 60));
        let report = run(&market, None, &no_sentiment(), &["AAPL"]).await;
        assert_eq!(report.results.len(), 1, "skipped: {:?}", report.skipped);
    }

    #[tokio::test]
    async fn test_scenario_b_excluded_at_forward_pe() {
        let mut f = fundamentals("AAPL");
        f.forward_pe = Some(20.0);
        let market = Arc::new(MockMarket::default().with("AAPL", f, 250));
        let sentiment = Arc::new(MockSentiment::default().with("AAPL", positive_sentiment()));

        let report = run(&market, Some(&sentiment), &ScreeningConfig::default(), &["AAPL"]).await;

        assert!(report.results.is_empty());
        assert_eq!(report.skipped[0].reason.stage(), Some(Stage::ForwardPe));
        assert_eq!(market.fundamentals_calls.load(Ordering::SeqCst), 1);
        // later stages never run
        assert_eq!(market.history_calls.load(Ordering::SeqCst), 0);
        assert_eq!(sentiment.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_scenario_c_insufficient_history() {
        let market = Arc::new(
            MockMarket::default()
                .with("SHORT", fundamentals("SHORT"), 30)
                .with("AAPL", fundamentals("AAPL"), 250),
        );
        let report = run(&market, None, &no_sentiment(), &["SHORT", "AAPL"]).await;

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].ticker, "AAPL");
        let skipped = &report.skipped[0];
        assert_eq!(skipped.ticker, "SHORT");
        assert!(matches!(
            skipped.reason,
            SkipReason::Technical(ScreenError::InsufficientHistory { available: 30, .. })
        ));
    }

    #[tokio::test]
    async fn test_incomplete_fetch_counts_as_insufficient_history() {
        let market = Arc::new(MockMarket::default().with_result(
            "THIN",
            Ok(fundamentals("THIN")),
            Err(FetchError::Incomplete {
                symbol: "THIN".to_string(),
                bars: 12,
            }),
        ));
        let report = run(&market, None, &no_sentiment(), &["THIN"]).await;
        assert_eq!(
            report.skipped[0].reason.stage(),
            Some(Stage::TechnicalSnapshot)
        );
    }

    #[tokio::test]
    async fn test_scenario_d_unparseable_inst_own_fails_closed() {
        let market = Arc::new(
            MockMarket::default()
                .with("MSFT", fundamentals("MSFT"), 250)
                .with("AAPL", fundamentals("AAPL"), 250),
        );
        let sentiment = Arc::new(
            MockSentiment::default()
                .with(
                    "MSFT",
                    SentimentSnapshot {
                        perf_month: Reading::Positive,
                        inst_own: Reading::Unparseable,
                    },
                )
                .with("AAPL", positive_sentiment()),
        );

        let report = run(
            &market,
            Some(&sentiment),
            &ScreeningConfig::default(),
            &["MSFT", "AAPL"],
        )
        .await;

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].ticker, "AAPL");
        assert_eq!(
            report.skipped[0].reason,
            SkipReason::Sentiment {
                field: "Inst Own",
                reading: Reading::Unparseable
            }
        );
        assert_eq!(sentiment.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sentiment_gateway_failure_excludes() {
        let market = Arc::new(MockMarket::default().with("AAPL", fundamentals("AAPL"), 250));
        let sentiment = Arc::new(MockSentiment::default());
        let report = run(&market, Some(&sentiment), &ScreeningConfig::default(), &["AAPL"]).await;

        assert!(report.results.is_empty());
        assert_eq!(report.skipped[0].reason.stage(), Some(Stage::Sentiment));
    }

    #[tokio::test]
    async fn test_lenient_policy_tolerates_absent_labels() {
        let market = Arc::new(MockMarket::default().with("AAPL", fundamentals("AAPL"), 250));
        let sentiment =
            Arc::new(MockSentiment::default().with("AAPL", SentimentSnapshot::absent()));

        let strict = run(&market, Some(&sentiment), &ScreeningConfig::default(), &["AAPL"]).await;
        assert!(strict.results.is_empty());

        let lenient_config = ScreeningConfig {
            sentiment_policy: SentimentPolicy::Lenient,
            ..ScreeningConfig::default()
        };
        let lenient = run(&market, Some(&sentiment), &lenient_config, &["AAPL"]).await;
        assert_eq!(lenient.results.len(), 1);
    }

    #[tokio::test]
    async fn test_technical_failure_skips_sentiment() {
        let market = Arc::new(MockMarket::default().with("AAPL", fundamentals("AAPL"), 250));
        let sentiment = Arc::new(MockSentiment::default().with("AAPL", positive_sentiment()));
        let config = ScreeningConfig {
            rsi_range: (30.0, 50.0),
            ..ScreeningConfig::default()
        };

        let report = run(&market, Some(&sentiment), &config, &["AAPL"]).await;

        assert_eq!(report.skipped[0].reason.stage(), Some(Stage::Rsi));
        assert_eq!(market.history_calls.load(Ordering::SeqCst), 1);
        assert_eq!(sentiment.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tightening_threshold_shrinks_results() {
        let mut mid = fundamentals("MID");
        mid.market_cap = Some(5e10);
        let mut small = fundamentals("SMALL");
        small.market_cap = Some(1.5e10);
        let market = Arc::new(
            MockMarket::default()
                .with("BIG", fundamentals("BIG"), 250)
                .with("MID", mid, 250)
                .with("SMALL", small, 250),
        );
        let universe = ["BIG", "MID", "SMALL"];

        let mut previous: Option<Vec<String>> = None;
        for min_market_cap in [1e10, 2e10, 1e11, 1e13] {
            let config = ScreeningConfig {
                min_market_cap,
                ..no_sentiment()
            };
            let report = run(&market, None, &config, &universe).await;
            let found: Vec<String> = report.results.into_iter().map(|r| r.ticker).collect();
            if let Some(prev) = &previous {
                assert!(found.iter().all(|t| prev.contains(t)));
            }
            previous = Some(found);
        }
        assert!(previous.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_progress_fractions_are_exact() {
        let tickers = ["AAPL", "MSFT", "ZZZZ", "JPM"];
        let market = Arc::new(
            MockMarket::default()
                .with("AAPL", fundamentals("AAPL"), 250)
                .with("MSFT", fundamentals("MSFT"), 250)
                .with("JPM", fundamentals("JPM"), 250),
        );
        let screener = Screener::new(market, None, fast_options());

        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        let mut progress = move |f: f64, m: &str| sink.lock().unwrap().push((f, m.to_string()));

        let report = screener
            .run(
                &no_sentiment(),
                &symbols(&tickers),
                &mut progress,
                CancelToken::never(),
            )
            .await
            .unwrap();
        assert_eq!(report.total, 4);
        assert_eq!(report.results.len(), 3);

        let updates = updates.lock().unwrap();
        assert_eq!(updates.len(), 5);
        for (i, (fraction, message)) in updates[..4].iter().enumerate() {
            assert_eq!(*fraction, (i + 1) as f64 / 4.0);
            assert!(message.ends_with(&format!("({}/4)", i + 1)), "{}", message);
        }
        assert_eq!(updates[4], (1.0, COMPLETION_MESSAGE.to_string()));
    }

    #[tokio::test]
    async fn test_empty_universe_completes() {
        let market = Arc::new(MockMarket::default());
        let screener = Screener::new(market, None, fast_options());
        let mut seen = Vec::new();
        let mut progress = |f: f64, m: &str| seen.push((f, m.to_string()));

        let report = screener
            .run(&no_sentiment(), &[], &mut progress, CancelToken::never())
            .await
            .unwrap();

        assert!(report.results.is_empty());
        assert_eq!(seen, vec![(1.0, COMPLETION_MESSAGE.to_string())]);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let market = Arc::new(MockMarket {
            transient_failures: AtomicUsize::new(2),
            ..MockMarket::default().with("AAPL", fundamentals("AAPL"), 250)
        });
        let report = run(&market, None, &no_sentiment(), &["AAPL"]).await;

        assert_eq!(report.results.len(), 1);
        assert_eq!(market.fundamentals_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let market = Arc::new(MockMarket {
            transient_failures: AtomicUsize::new(10),
            ..MockMarket::default().with("AAPL", fundamentals("AAPL"), 250)
        });
        let report = run(&market, None, &no_sentiment(), &["AAPL"]).await;

        assert!(report.results.is_empty());
        assert!(matches!(
            report.skipped[0].reason,
            SkipReason::Fetch {
                gateway: Gateway::Fundamentals,
                error: FetchError::Transient(_)
            }
        ));
        // first attempt plus two retries
        assert_eq!(market.fundamentals_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let market = Arc::new(MockMarket::default());
        let report = run(&market, None, &no_sentiment(), &["NOPE"]).await;

        assert_eq!(
            report.skipped[0].reason,
            SkipReason::Fetch {
                gateway: Gateway::Fundamentals,
                error: FetchError::NotFound("NOPE".to_string())
            }
        );
        assert_eq!(market.fundamentals_calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.failures().count(), 1);
    }

    #[tokio::test]
    async fn test_slow_gateway_times_out() {
        let market = Arc::new(MockMarket {
            delay: Some(Duration::from_millis(500)),
            ..MockMarket::default().with("AAPL", fundamentals("AAPL"), 250)
        });
        let options = PipelineOptions {
            call_timeout: Duration::from_millis(20),
            max_retries: 0,
            ..fast_options()
        };
        let screener = Screener::new(market, None, options);
        let mut progress = |_: f64, _: &str| {};

        let report = screener
            .run(
                &no_sentiment(),
                &symbols(&["AAPL"]),
                &mut progress,
                CancelToken::never(),
            )
            .await
            .unwrap();

        assert!(matches!(
            report.skipped[0].reason,
            SkipReason::Timeout {
                gateway: Gateway::Fundamentals,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_panicking_worker_is_contained() {
        let market = Arc::new(MockMarket {
            panic_on: Some("BOOM".to_string()),
            ..MockMarket::default()
                .with("BOOM", fundamentals("BOOM"), 250)
                .with("AAPL", fundamentals("AAPL"), 250)
        });
        let report = run(&market, None, &no_sentiment(), &["BOOM", "AAPL"]).await;

        assert_eq!(report.results.len(), 1);
        assert!(matches!(
            report.skipped[0].reason,
            SkipReason::WorkerFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let market = Arc::new(MockMarket::default().with("AAPL", fundamentals("AAPL"), 250));
        let screener = Screener::new(market.clone(), None, fast_options());
        let handle = CancelHandle::new();
        let token = handle.token();
        handle.cancel();

        let mut seen = Vec::new();
        let mut progress = |f: f64, m: &str| seen.push((f, m.to_string()));
        let report = screener
            .run(&no_sentiment(), &symbols(&["AAPL", "MSFT"]), &mut progress, token)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert!(report.results.is_empty());
        assert!(report
            .skipped
            .iter()
            .all(|s| s.reason == SkipReason::Cancelled));
        assert_eq!(market.fundamentals_calls.load(Ordering::SeqCst), 0);
        assert_eq!(seen.last(), Some(&(1.0, CANCELLED_MESSAGE.to_string())));
        assert_eq!(seen[1].0, 1.0);
    }

    #[tokio::test]
    async fn test_cancel_mid_run() {
        let market = Arc::new(
            MockMarket::default()
                .with("AAPL", fundamentals("AAPL"), 250)
                .with("MSFT", fundamentals("MSFT"), 250)
                .with("JPM", fundamentals("JPM"), 250),
        );
        let options = PipelineOptions {
            concurrency: 1,
            ..fast_options()
        };
        let screener = Screener::new(market.clone(), None, options);
        let handle = CancelHandle::new();
        let token = handle.token();

        let mut progress = move |_: f64, _: &str| handle.cancel();
        let report = screener
            .run(
                &no_sentiment(),
                &symbols(&["AAPL", "MSFT", "JPM"]),
                &mut progress,
                token,
            )
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].ticker, "AAPL");
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(market.fundamentals_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_aborts_before_any_fetch() {
        let market = Arc::new(MockMarket::default().with("AAPL", fundamentals("AAPL"), 250));
        let screener = Screener::new(market.clone(), None, fast_options());
        let config = ScreeningConfig {
            rsi_range: (70.0, 30.0),
            ..no_sentiment()
        };
        let mut progress = |_: f64, _: &str| {};

        let err = screener
            .run(&config, &symbols(&["AAPL"]), &mut progress, CancelToken::never())
            .await
            .unwrap_err();

        assert!(matches!(err, ScreenError::ConfigInvalid(_)));
        assert_eq!(market.fundamentals_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sentiment_enabled_without_gateway_is_invalid() {
        let market = Arc::new(MockMarket::default());
        let screener = Screener::new(market, None, fast_options());
        let mut progress = |_: f64, _: &str| {};

        let err = screener
            .run(
                &ScreeningConfig::default(),
                &symbols(&["AAPL"]),
                &mut progress,
                CancelToken::never(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ScreenError::ConfigInvalid(_)));
    }

    #[test]
    fn test_pipeline_options_validation() {
        assert!(PipelineOptions::default().validate().is_ok());
        let zero = PipelineOptions {
            concurrency: 0,
            ..PipelineOptions::default()
        };
        assert!(zero.validate().is_err());
    }
}
