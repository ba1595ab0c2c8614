use chrono::{DateTime, Utc};
use screener_core::{stats, ScreeningResult};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::filters::{SkipReason, Stage};

/// A ticker excluded from the results, with its universe position.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedTicker {
    pub index: usize,
    pub ticker: String,
    pub reason: SkipReason,
}

/// Outcome of one screening run.
#[derive(Debug, Clone)]
pub struct ScreeningReport {
    /// Passing tickers in universe order
    pub results: Vec<ScreeningResult>,
    /// Excluded tickers in universe order
    pub skipped: Vec<SkippedTicker>,
    pub total: usize,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Headline metrics over the passing tickers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub found: usize,
    pub avg_forward_pe: Option<f64>,
    pub avg_rsi: Option<f64>,
    pub sector_counts: BTreeMap<String, usize>,
}

impl ScreeningReport {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn summary(&self) -> ReportSummary {
        let pes: Vec<f64> = self.results.iter().map(|r| r.forward_pe).collect();
        let rsis: Vec<f64> = self.results.iter().map(|r| r.rsi).collect();

        let mut sector_counts = BTreeMap::new();
        for result in &self.results {
            *sector_counts.entry(result.sector.clone()).or_insert(0) += 1;
        }

        ReportSummary {
            found: self.results.len(),
            avg_forward_pe: (!pes.is_empty()).then(|| stats::mean(&pes)),
            avg_rsi: (!rsis.is_empty()).then(|| stats::mean(&rsis)),
            sector_counts,
        }
    }

    /// How many tickers each stage excluded.
    pub fn exclusions_by_stage(&self) -> BTreeMap<Stage, usize> {
        let mut counts = BTreeMap::new();
        for skipped in &self.skipped {
            if let Some(stage) = skipped.reason.stage() {
                *counts.entry(stage).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Tickers dropped because a gateway call failed, timed out or the worker died.
    pub fn failures(&self) -> impl Iterator<Item = &SkippedTicker> {
        self.skipped.iter().filter(|s| {
            matches!(
                s.reason,
                SkipReason::Fetch { .. } | SkipReason::Timeout { .. } | SkipReason::WorkerFailed(_)
            )
        })
    }

    /// Results re-sorted by market cap, largest first.
    pub fn sorted_by_market_cap(&self) -> Vec<ScreeningResult> {
        let mut results = self.results.clone();
        results.sort_by(|a, b| {
            b.market_cap
                .partial_cmp(&a.market_cap)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
