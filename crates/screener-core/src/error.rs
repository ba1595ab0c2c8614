use thiserror::Error;

/// Failure talking to an external data source for one ticker.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Ticker not found: {0}")]
    NotFound(String),

    #[error("Incomplete data for {symbol}: {bars} bars returned")]
    Incomplete { symbol: String, bars: usize },

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Parse failure: {0}")]
    ParseFailure(String),
}

impl FetchError {
    /// Only transient failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScreenError {
    #[error("Invalid screening config: {0}")]
    ConfigInvalid(String),

    #[error("Insufficient history for {indicator}: need {needed} bars, have {available}")]
    InsufficientHistory {
        indicator: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}
