use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Symbols screened when no universe file is available.
pub const FALLBACK_TICKERS: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "AMZN", "TSLA", "META", "NVDA", "JPM", "JNJ", "V", "UNH", "HD", "PG",
    "MA", "DIS",
];

const TICKER_HEADERS: &[&str] = &["ticker", "symbol"];

#[derive(Error, Debug)]
pub enum UniverseError {
    #[error("Failed to open universe file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read universe CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// Where the ordered ticker sequence comes from.
#[derive(Debug, Clone)]
pub enum Universe {
    Custom(Vec<String>),
    CsvFile(PathBuf),
    Fallback,
}

impl Universe {
    pub fn symbols(&self) -> Result<Vec<String>, UniverseError> {
        match self {
            Universe::Custom(symbols) => Ok(normalize(symbols.iter().map(String::as_str))),
            Universe::Fallback => Ok(fallback()),
            Universe::CsvFile(path) => match File::open(path) {
                Ok(file) => read_tickers(file),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!(
                        "Universe file {} not found, using {} fallback tickers",
                        path.display(),
                        FALLBACK_TICKERS.len()
                    );
                    Ok(fallback())
                }
                Err(source) => Err(UniverseError::Io {
                    path: path.to_path_buf(),
                    source,
                }),
            },
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Universe::CsvFile(path.as_ref().to_path_buf())
    }
}

fn fallback() -> Vec<String> {
    FALLBACK_TICKERS.iter().map(|s| s.to_string()).collect()
}

fn normalize<'a>(symbols: impl Iterator<Item = &'a str>) -> Vec<String> {
    symbols
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Read tickers from CSV: the `Ticker` (or `Symbol`) column when the first
/// row names one, otherwise the first column of every row.
pub fn read_tickers<R: io::Read>(reader: R) -> Result<Vec<String>, UniverseError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = csv_reader.records();
    let first = match records.next() {
        Some(record) => record?,
        None => return Ok(Vec::new()),
    };

    let header_column = first
        .iter()
        .position(|field| TICKER_HEADERS.contains(&field.to_ascii_lowercase().as_str()));

    let column = header_column.unwrap_or(0);
    let mut raw = Vec::new();
    if header_column.is_none() {
        raw.extend(first.get(column).map(str::to_string));
    }
    for record in records {
        let record = record?;
        raw.extend(record.get(column).map(str::to_string));
    }

    Ok(normalize(raw.iter().map(String::as_str)))
}
