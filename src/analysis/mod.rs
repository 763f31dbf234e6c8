//! Retrospective price-movement analysis of a funding-rate key moment.

use serde::{Deserialize, Serialize};
use std::fmt;

mod analyzer;
pub mod sentiment;
pub mod trend;

pub use analyzer::TrendAnalyzer;
pub use sentiment::{combine_signals, SentimentSignals};
pub use trend::{classify_daily, classify_weekly, TrendInputs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trend {
    StronglyBullish,
    Bullish,
    Neutral,
    Bearish,
    StronglyBearish,
    Sideways,
    Volatile,
    Corrective,
}

impl Trend {
    pub fn as_str(self) -> &'static str {
        match self {
            Trend::StronglyBullish => "strongly-bullish",
            Trend::Bullish => "bullish",
            Trend::Neutral => "neutral",
            Trend::Bearish => "bearish",
            Trend::StronglyBearish => "strongly-bearish",
            Trend::Sideways => "sideways",
            Trend::Volatile => "volatile",
            Trend::Corrective => "corrective",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Sentiment {
    HighlyPositive,
    Positive,
    Neutral,
    Mixed,
    Negative,
    HighlyNegative,
    Uncertain,
    Bullish,
    Bearish,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::HighlyPositive => "highly-positive",
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Mixed => "mixed",
            Sentiment::Negative => "negative",
            Sentiment::HighlyNegative => "highly-negative",
            Sentiment::Uncertain => "uncertain",
            Sentiment::Bullish => "bullish",
            Sentiment::Bearish => "bearish",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Findings for one key moment. Immutable once attached to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub descriptions: Vec<String>,
    /// Net move over the 8h after the key moment: `(open[0] - close[last]) / close[last]`.
    pub eight_hour_variation_pct: f64,
    /// Drawdown from the open within 10 minutes: `(open[0] - min(low)) / min(low)`.
    pub ten_minute_variation_pct: f64,
    pub daily_trend: Trend,
    pub weekly_trend: Trend,
    pub volatility_index: f64,
    pub average_trading_volume: f64,
    pub market_sentiment: Sentiment,
}
