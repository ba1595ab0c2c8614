use chrono::{DateTime, Utc};
use screener_core::ScreeningResult;

use crate::filters::SkipReason;
use crate::progress::ProgressReporter;
use crate::report::{ScreeningReport, SkippedTicker};

pub const COMPLETION_MESSAGE: &str = "Screening completed!";
pub const CANCELLED_MESSAGE: &str = "Screening cancelled!";

pub type Outcome = Result<ScreeningResult, SkipReason>;

/// Collects per-ticker outcomes as they complete, in any order, and reports
/// `completed / total` after each one.
pub struct Aggregator<'t, 'p> {
    tickers: &'t [String],
    outcomes: Vec<Option<Outcome>>,
    completed: usize,
    progress: &'p mut dyn ProgressReporter,
}

impl<'t, 'p> Aggregator<'t, 'p> {
    pub fn new(tickers: &'t [String], progress: &'p mut dyn ProgressReporter) -> Self {
        Self {
            tickers,
            outcomes: vec![None; tickers.len()],
            completed: 0,
            progress,
        }
    }

    pub fn total(&self) -> usize {
        self.tickers.len()
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn is_done(&self) -> bool {
        self.completed >= self.total()
    }

    /// Record the outcome for universe position `index`. Duplicates are ignored.
    pub fn record(&mut self, index: usize, outcome: Outcome) {
        let Some(slot) = self.outcomes.get_mut(index) else {
            tracing::warn!("Ignoring outcome for out-of-range index {}", index);
            return;
        };
        if slot.is_some() {
            tracing::warn!("Ignoring duplicate outcome for index {}", index);
            return;
        }

        let ticker = &self.tickers[index];
        let verb = match &outcome {
            Ok(_) => {
                tracing::info!("✅ {} passed all filters", ticker);
                "Analyzed"
            }
            Err(SkipReason::Cancelled) => "Cancelled",
            Err(reason @ (SkipReason::Fetch { .. } | SkipReason::Timeout { .. })) => {
                tracing::warn!("Skipping {}: {}", ticker, reason);
                "Analyzed"
            }
            Err(SkipReason::WorkerFailed(e)) => {
                tracing::error!("Worker for {} failed: {}", ticker, e);
                "Analyzed"
            }
            Err(reason) => {
                tracing::debug!("Excluded {}: {}", ticker, reason);
                "Analyzed"
            }
        };

        *slot = Some(outcome);
        self.completed += 1;

        let total = self.total();
        let message = format!("{} {} ({}/{})", verb, ticker, self.completed, total);
        self.progress
            .report(self.completed as f64 / total as f64, &message);
    }

    /// Record every not-yet-started ticker from `start` on as cancelled.
    pub fn cancel_from(&mut self, start: usize) {
        for index in start..self.total() {
            if self.outcomes[index].is_none() {
                self.record(index, Err(SkipReason::Cancelled));
            }
        }
    }

    /// Emit the terminal progress update and assemble the report in universe order.
    pub fn finish(self, cancelled: bool, started_at: DateTime<Utc>) -> ScreeningReport {
        let total = self.total();
        let mut results = Vec::new();
        let mut skipped = Vec::new();

        for (index, outcome) in self.outcomes.into_iter().enumerate() {
            let ticker = self.tickers[index].clone();
            match outcome {
                Some(Ok(result)) => results.push(result),
                Some(Err(reason)) => skipped.push(SkippedTicker {
                    index,
                    ticker,
                    reason,
                }),
                None => skipped.push(SkippedTicker {
                    index,
                    ticker,
                    reason: SkipReason::Cancelled,
                }),
            }
        }

        let message = if cancelled {
            CANCELLED_MESSAGE
        } else {
            COMPLETION_MESSAGE
        };
        self.progress.report(1.0, message);

        ScreeningReport {
            results,
            skipped,
            total,
            cancelled,
            started_at,
            finished_at: Utc::now(),
        }
    }
}
