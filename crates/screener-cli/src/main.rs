//! stock-screener: screen a ticker universe against fundamental, technical and
//! sentiment criteria.
//!
//! Usage:
//!   cargo run -p screener-cli --                         # sp500_tickers.csv or fallback list
//!   cargo run -p screener-cli -- --symbols AAPL MSFT JPM
//!   cargo run -p screener-cli -- --no-sentiment --csv results.csv
//!   cargo run -p screener-cli -- --info AAPL
//!
//! Screening criteria come from `SCREEN_*` environment variables (or `.env`).

mod display;

use anyhow::Context;
use finviz_client::FinvizClient;
use screener::{CancelHandle, PipelineOptions, Screener, TracingProgress, Universe};
use screener_core::{ScreeningConfig, SentimentGateway, SentimentPolicy};
use std::sync::Arc;
use yahoo_client::YahooClient;

const DEFAULT_UNIVERSE: &str = "sp500_tickers.csv";

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  stock-screener [--universe PATH]          Screen tickers from a CSV (default: {})", DEFAULT_UNIVERSE);
    eprintln!("  stock-screener --symbols AAPL MSFT ...    Screen specific symbols");
    eprintln!("  stock-screener --info SYMBOL              Show details for one stock");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --concurrency N      Max symbols evaluated at once (default: {})", PipelineOptions::default().concurrency);
    eprintln!("  --range RANGE        History depth: 6mo, 1y, 2y, 5y, 10y, max (default: {})", yahoo_client::DEFAULT_RANGE);
    eprintln!("  --no-sentiment       Skip the Finviz cross-check");
    eprintln!("  --lenient-sentiment  Tolerate labels missing from the Finviz page");
    eprintln!("  --json               Print results as JSON");
    eprintln!("  --csv PATH           Also write results to a CSV file");
}

fn init_tracing() {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("screener=info,stock_screener=info")
        })
    };
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }
    let as_json = args.iter().any(|a| a == "--json");

    let mut market = YahooClient::new();
    if let Some(range) = flag_value(&args, "--range") {
        market = market.with_range(range);
    }

    if let Some(symbol) = flag_value(&args, "--info") {
        let symbol = symbol.trim().to_uppercase();
        let details = market
            .get_stock_details(&symbol)
            .await
            .with_context(|| format!("Failed to fetch details for {}", symbol))?;
        if as_json {
            println!("{}", serde_json::to_string_pretty(&details)?);
        } else {
            print!("{}", display::render_details(&details));
        }
        return Ok(());
    }

    let mut config = ScreeningConfig::from_env().context("Invalid screening configuration")?;
    if args.iter().any(|a| a == "--no-sentiment") {
        config.enable_sentiment_check = false;
    }
    if args.iter().any(|a| a == "--lenient-sentiment") {
        config.sentiment_policy = SentimentPolicy::Lenient;
    }

    let mut options = PipelineOptions::from_env().context("Invalid pipeline options")?;
    if let Some(value) = flag_value(&args, "--concurrency") {
        options.concurrency = value
            .parse()
            .with_context(|| format!("--concurrency expects a number, got '{}'", value))?;
    }

    let universe = if let Some(idx) = args.iter().position(|a| a == "--symbols") {
        Universe::Custom(
            args[idx + 1..]
                .iter()
                .take_while(|a| !a.starts_with("--"))
                .cloned()
                .collect(),
        )
    } else {
        Universe::from_path(flag_value(&args, "--universe").unwrap_or(DEFAULT_UNIVERSE))
    };
    let tickers = universe.symbols()?;
    if tickers.is_empty() {
        print_usage();
        anyhow::bail!("No tickers to screen");
    }

    tracing::info!("Screening criteria:");
    for line in config.describe() {
        tracing::info!("  {}", line);
    }

    let sentiment: Option<Arc<dyn SentimentGateway>> = if config.enable_sentiment_check {
        Some(Arc::new(FinvizClient::new()))
    } else {
        None
    };
    let screener = Screener::new(Arc::new(market), sentiment, options);

    let cancel = CancelHandle::new();
    let token = cancel.token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl-C received, finishing in-flight symbols");
            cancel.cancel();
        }
    });

    let mut progress = TracingProgress;
    let report = screener.run(&config, &tickers, &mut progress, token).await?;
    let summary = report.summary();
    let sorted = report.sorted_by_market_cap();

    if let Some(path) = flag_value(&args, "--csv") {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path))?;
        for result in &sorted {
            writer.serialize(result)?;
        }
        writer.flush()?;
        tracing::info!("Wrote {} rows to {}", sorted.len(), path);
    }

    if as_json {
        let body = serde_json::json!({
            "summary": summary,
            "cancelled": report.cancelled,
            "total": report.total,
            "results": sorted,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else if report.is_empty() {
        print!("{}", display::render_no_results(&config));
    } else {
        print!("{}", display::render_table(&sorted));
        println!();
        print!("{}", display::render_summary(&report, &summary));
    }

    Ok(())
}
