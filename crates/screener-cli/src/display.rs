use screener::{ReportSummary, ScreeningReport};
use screener_core::{ScreeningConfig, ScreeningResult};
use yahoo_client::StockDetails;

/// `$2.35T`, `$512.0B`, `$850.0M`.
pub fn format_market_cap(value: f64) -> String {
    if value >= 1e12 {
        format!("${:.2}T", value / 1e12)
    } else if value >= 1e9 {
        format!("${:.1}B", value / 1e9)
    } else if value >= 1e6 {
        format!("${:.1}M", value / 1e6)
    } else {
        format!("${:.0}", value)
    }
}

fn format_volume(value: u64) -> String {
    if value >= 1_000_000 {
        format!("{:.1}M", value as f64 / 1e6)
    } else if value >= 1_000 {
        format!("{:.1}K", value as f64 / 1e3)
    } else {
        value.to_string()
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let cut: String = text.chars().take(width.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

pub fn render_table(results: &[ScreeningResult]) -> String {
    let mut out = format!(
        "{:<7} {:>9} {:>7} {:>10} {:>8} {:>5} {:<22} {:>5} {:^3} {:^3} {:^6} {:>9} {:>7}\n",
        "Ticker",
        "Price",
        "Fwd P/E",
        "Mkt Cap",
        "Volume",
        "RSI",
        "Sector",
        "Beta",
        "Mom",
        "BB",
        "Consec",
        "Stop",
        "5d Ret"
    );
    out.push_str(&"-".repeat(out.chars().count().saturating_sub(1)));
    out.push('\n');

    for r in results {
        out.push_str(&format!(
            "{:<7} {:>9.2} {:>7.1} {:>10} {:>8} {:>5.1} {:<22} {:>5.2} {:^3} {:^3} {:^6} {:>9.2} {:>7}\n",
            r.ticker,
            r.price,
            r.forward_pe,
            format_market_cap(r.market_cap),
            format_volume(r.avg_volume),
            r.rsi,
            truncate(&r.sector, 22),
            r.beta,
            r.momentum_label(),
            r.bollinger_label(),
            if r.consecutive_up_days { "✓" } else { "" },
            r.stop_loss,
            r.five_day_return
        ));
    }
    out
}

pub fn render_summary(report: &ScreeningReport, summary: &ReportSummary) -> String {
    let mut out = format!(
        "Found {} of {} stocks in {:.1}s",
        summary.found,
        report.total,
        report.elapsed().num_milliseconds() as f64 / 1000.0
    );
    if let Some(pe) = summary.avg_forward_pe {
        out.push_str(&format!(" | Avg P/E {:.1}", pe));
    }
    if let Some(rsi) = summary.avg_rsi {
        out.push_str(&format!(" | Avg RSI {:.1}", rsi));
    }
    if report.cancelled {
        out.push_str(" | cancelled");
    }
    out.push('\n');

    if !summary.sector_counts.is_empty() {
        out.push_str("Sectors:\n");
        for (sector, count) in &summary.sector_counts {
            out.push_str(&format!("  {:<24} {}\n", sector, count));
        }
    }

    let failures = report.failures().count();
    if failures > 0 {
        out.push_str(&format!(
            "{} symbols could not be fetched (run with RUST_LOG=screener=debug for details)\n",
            failures
        ));
    }
    out
}

pub fn render_no_results(config: &ScreeningConfig) -> String {
    let mut out = String::from("No stocks matched all criteria.\n\nCurrent criteria:\n");
    for line in config.describe() {
        out.push_str(&format!("  - {}\n", line));
    }
    out.push_str("\nSuggestions to get results:\n");
    for hint in config.relaxation_hints() {
        out.push_str(&format!("  - {}\n", hint));
    }
    out
}

fn opt(value: Option<f64>, render: impl Fn(f64) -> String) -> String {
    value.map(render).unwrap_or_else(|| "N/A".to_string())
}

pub fn render_details(details: &StockDetails) -> String {
    let rows = [
        ("Name", details.name.clone().unwrap_or_else(|| "N/A".to_string())),
        ("Sector", details.sector.clone().unwrap_or_else(|| "N/A".to_string())),
        ("Price", opt(details.current_price, |v| format!("${:.2}", v))),
        ("Market Cap", opt(details.market_cap, format_market_cap)),
        ("Forward P/E", opt(details.forward_pe, |v| format!("{:.1}", v))),
        ("Beta", opt(details.beta, |v| format!("{:.2}", v))),
        (
            "Dividend Yield",
            opt(details.dividend_yield, |v| format!("{:.2}%", v * 100.0)),
        ),
        (
            "52w High",
            opt(details.fifty_two_week_high, |v| format!("${:.2}", v)),
        ),
        (
            "52w Low",
            opt(details.fifty_two_week_low, |v| format!("${:.2}", v)),
        ),
        (
            "Recommendation",
            details
                .recommendation_key
                .clone()
                .unwrap_or_else(|| "N/A".to_string()),
        ),
    ];

    let mut out = format!("{}\n", details.symbol);
    for (label, value) in rows {
        out.push_str(&format!("  {:<15} {}\n", label, value));
    }
    out
}
