pub mod aggregator;
pub mod filters;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod universe;

#[cfg(test)]
mod pipeline_tests;

pub use aggregator::{Aggregator, Outcome, CANCELLED_MESSAGE, COMPLETION_MESSAGE};
pub use filters::{Gateway, QualifiedFundamentals, SkipReason, Stage};
pub use pipeline::{CancelHandle, CancelToken, PipelineOptions, Screener};
pub use progress::{ChannelProgress, NoProgress, ProgressReporter, ProgressUpdate, TracingProgress};
pub use report::{ReportSummary, ScreeningReport, SkippedTicker};
pub use universe::{Universe, UniverseError, FALLBACK_TICKERS};
