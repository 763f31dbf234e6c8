use thiserror::Error;

/// Failures of a single exchange call, after the transport has given up.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("decode: {0}")]
    Decode(String),

    #[error("{symbol}: funding entries {delta_ms}ms apart, expected 4h or 8h")]
    UnknownFundingSchedule { symbol: String, delta_ms: i64 },

    #[error("{symbol}: exchange returned no funding history")]
    EmptyFundingHistory { symbol: String },
}

impl ExchangeError {
    /// Whether the retrying transport should try the call again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExchangeError::Upstream { status, .. } => {
                crate::exchange::retry::is_retryable_http_error(*status)
            }
            ExchangeError::Transport(err) => crate::exchange::retry::is_retryable_network_error(err),
            _ => false,
        }
    }
}

/// Failures of a windowed candle fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid range: start {start_ms} >= end {end_ms}")]
    InvalidRange { start_ms: i64, end_ms: i64 },

    #[error("{symbol}: exchange unavailable for window [{window_start_ms}, {window_end_ms}]: {source}")]
    ExchangeUnavailable {
        symbol: String,
        window_start_ms: i64,
        window_end_ms: i64,
        #[source]
        source: ExchangeError,
    },

    #[error("{symbol}: malformed series: {detail}")]
    MalformedSeries { symbol: String, detail: String },
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("{symbol}: no candles for {what}")]
    NoData { symbol: String, what: &'static str },
}
