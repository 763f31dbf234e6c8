use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::Config;
use crate::error::ExchangeError;

mod binance;
mod bitget;
pub mod retry;
pub mod transport;

pub use binance::Binance;
pub use bitget::Bitget;
pub use transport::{HttpTransport, TransportConfig};

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Bar width. Each variant has exactly one duration and one wire token per
/// exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "3d")]
    D3,
    #[serde(rename = "1w")]
    W1,
    #[serde(rename = "1M")]
    Mo1,
}

impl Granularity {
    pub const ALL: [Granularity; 13] = [
        Granularity::M1,
        Granularity::M3,
        Granularity::M5,
        Granularity::M15,
        Granularity::M30,
        Granularity::H1,
        Granularity::H4,
        Granularity::H6,
        Granularity::H12,
        Granularity::D1,
        Granularity::D3,
        Granularity::W1,
        Granularity::Mo1,
    ];

    pub fn duration_ms(self) -> i64 {
        match self {
            Granularity::M1 => MINUTE_MS,
            Granularity::M3 => 3 * MINUTE_MS,
            Granularity::M5 => 5 * MINUTE_MS,
            Granularity::M15 => 15 * MINUTE_MS,
            Granularity::M30 => 30 * MINUTE_MS,
            Granularity::H1 => HOUR_MS,
            Granularity::H4 => 4 * HOUR_MS,
            Granularity::H6 => 6 * HOUR_MS,
            Granularity::H12 => 12 * HOUR_MS,
            Granularity::D1 => DAY_MS,
            Granularity::D3 => 3 * DAY_MS,
            Granularity::W1 => 7 * DAY_MS,
            // Calendar months vary; the exchanges' own paging treats them as 30 days.
            Granularity::Mo1 => 30 * DAY_MS,
        }
    }

    /// Bars whose real width follows the calendar rather than `duration_ms`.
    pub fn is_calendar(self) -> bool {
        matches!(self, Granularity::Mo1)
    }

    /// Canonical lowercase token (also Binance's wire token).
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::M1 => "1m",
            Granularity::M3 => "3m",
            Granularity::M5 => "5m",
            Granularity::M15 => "15m",
            Granularity::M30 => "30m",
            Granularity::H1 => "1h",
            Granularity::H4 => "4h",
            Granularity::H6 => "6h",
            Granularity::H12 => "12h",
            Granularity::D1 => "1d",
            Granularity::D3 => "3d",
            Granularity::W1 => "1w",
            Granularity::Mo1 => "1M",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Granularity::ALL
            .iter()
            .copied()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| anyhow!("unsupported granularity: {}", s))
    }
}

/// One candlestick. `open_time_ms` is the bar's identity inside a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub notional: f64,
}

/// Order in which an exchange delivers the bars of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarOrder {
    OldestFirst,
    NewestFirst,
}

/// A raw funding-rate settlement as reported by an exchange.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FundingRateEntry {
    pub funding_time_ms: i64,
    /// Fraction, e.g. `-0.005` for -0.5%.
    pub rate: f64,
}

impl FundingRateEntry {
    /// Rate in percent rounded to 4 decimals, the unit records are stored in.
    pub fn rate_pct(&self) -> f64 {
        (self.rate * 100.0 * 10_000.0).round() / 10_000.0
    }
}

#[async_trait]
pub trait Exchange: Send + Sync {
    fn name(&self) -> &'static str;

    /// Maximum bars per candle call.
    fn page_limit(&self) -> usize {
        1000
    }

    fn bar_order(&self) -> BarOrder {
        BarOrder::OldestFirst
    }

    /// How far back the candle endpoint serves this granularity, if bounded.
    fn max_lookback_ms(&self, _granularity: Granularity) -> Option<i64> {
        None
    }

    /// One page of candles with open time in `[start_ms, end_ms]`.
    async fn fetch_candle_page(
        &self,
        symbol: &str,
        granularity: Granularity,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Funding history page `page_offset` (0 = most recent) with
    /// `page_size` entries, newest first.
    async fn fetch_funding_rate_page(
        &self,
        symbol: &str,
        page_size: usize,
        page_offset: usize,
    ) -> Result<Vec<FundingRateEntry>, ExchangeError>;

    /// USDT-margined perpetual symbols listed on the exchange.
    async fn list_symbols(&self) -> Result<Vec<String>, ExchangeError>;
}

/// Map the gap between two consecutive settlements to a cadence in hours.
pub fn classify_funding_interval(symbol: &str, newer_ms: i64, older_ms: i64) -> Result<u8, ExchangeError> {
    let delta_ms = (newer_ms - older_ms).abs();
    if delta_ms == 8 * HOUR_MS {
        Ok(8)
    } else if delta_ms == 4 * HOUR_MS {
        Ok(4)
    } else {
        Err(ExchangeError::UnknownFundingSchedule {
            symbol: symbol.to_string(),
            delta_ms,
        })
    }
}

/// Funding cadence (4 or 8 hours) sampled from the two most recent entries.
pub async fn funding_period_hours(exchange: &dyn Exchange, symbol: &str) -> Result<u8, ExchangeError> {
    let page = exchange.fetch_funding_rate_page(symbol, 2, 0).await?;
    match page.as_slice() {
        [newer, older, ..] => classify_funding_interval(symbol, newer.funding_time_ms, older.funding_time_ms),
        _ => Err(ExchangeError::EmptyFundingHistory {
            symbol: symbol.to_string(),
        }),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeKind {
    Bitget,
    Binance,
}

impl ExchangeKind {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "bitget" => Ok(ExchangeKind::Bitget),
            "binance" => Ok(ExchangeKind::Binance),
            other => Err(anyhow!("unsupported exchange: {}", other)),
        }
    }

    pub fn build(self, cfg: &Config, transport: HttpTransport) -> Arc<dyn Exchange> {
        match self {
            ExchangeKind::Bitget => Arc::new(Bitget::new(cfg.bitget_base.clone(), transport)),
            ExchangeKind::Binance => Arc::new(Binance::new(cfg.binance_fapi_base.clone(), transport)),
        }
    }
}

/// Parse a numeric field that exchanges send either as a JSON string or number.
pub(crate) fn parse_num(value: &serde_json::Value, field: &str) -> Result<f64, ExchangeError> {
    match value {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .map_err(|e| ExchangeError::Decode(format!("{}: {:?}: {}", field, s, e))),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ExchangeError::Decode(format!("{}: {}", field, n))),
        other => Err(ExchangeError::Decode(format!("{}: unexpected {}", field, other))),
    }
}

pub(crate) fn parse_ms(value: &serde_json::Value, field: &str) -> Result<i64, ExchangeError> {
    match value {
        serde_json::Value::String(s) => s
            .parse::<i64>()
            .map_err(|e| ExchangeError::Decode(format!("{}: {:?}: {}", field, s, e))),
        serde_json::Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| ExchangeError::Decode(format!("{}: {}", field, n))),
        other => Err(ExchangeError::Decode(format!("{}: unexpected {}", field, other))),
    }
}

/// Decode an array-of-arrays kline row: `[ts, open, high, low, close, volume, notional?]`.
pub(crate) fn candle_from_row(row: &[serde_json::Value], notional_idx: usize) -> Result<Candle, ExchangeError> {
    if row.len() < 6 {
        return Err(ExchangeError::Decode(format!("kline row has {} fields", row.len())));
    }
    let open_time_ms = parse_ms(&row[0], "openTime")?;
    let close = parse_num(&row[4], "close")?;
    let volume = parse_num(&row[5], "volume")?;
    let notional = match row.get(notional_idx) {
        Some(v) => parse_num(v, "notional")?,
        None => close * volume,
    };
    Ok(Candle {
        open_time_ms,
        open: parse_num(&row[1], "open")?,
        high: parse_num(&row[2], "high")?,
        low: parse_num(&row[3], "low")?,
        close,
        volume,
        notional,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_granularity_round_trips_its_token() {
        for g in Granularity::ALL {
            assert_eq!(g.as_str().parse::<Granularity>().unwrap(), g);
            assert!(g.duration_ms() > 0);
        }
        assert!("2w".parse::<Granularity>().is_err());
    }

    #[test]
    fn durations() {
        assert_eq!(Granularity::M15.duration_ms(), 900_000);
        assert_eq!(Granularity::H4.duration_ms(), 14_400_000);
        assert_eq!(Granularity::W1.duration_ms(), 604_800_000);
    }

    #[test]
    fn eight_hours_apart_is_eight() {
        let t = 1_700_000_000_000;
        assert_eq!(classify_funding_interval("X", t + 8 * HOUR_MS, t).unwrap(), 8);
        assert_eq!(classify_funding_interval("X", t + 4 * HOUR_MS, t).unwrap(), 4);
    }

    #[test]
    fn three_hours_apart_is_unknown() {
        let t = 1_700_000_000_000;
        let err = classify_funding_interval("X", t + 3 * HOUR_MS, t).unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::UnknownFundingSchedule { delta_ms, .. } if delta_ms == 3 * HOUR_MS
        ));
    }

    #[test]
    fn rate_pct_rounds_to_four_places() {
        let e = FundingRateEntry { funding_time_ms: 0, rate: -0.0051234 };
        assert_eq!(e.rate_pct(), -0.5123);
    }

    #[test]
    fn decodes_string_and_numeric_rows() {
        let row = vec![
            json!("1700000000000"),
            json!("1.5"),
            json!("2"),
            json!(1.0),
            json!("1.8"),
            json!("100"),
            json!("180"),
        ];
        let c = candle_from_row(&row, 6).unwrap();
        assert_eq!(c.open_time_ms, 1_700_000_000_000);
        assert_eq!(c.low, 1.0);
        assert_eq!(c.notional, 180.0);

        let short = vec![json!(1), json!("1")];
        assert!(candle_from_row(&short, 6).is_err());
    }
}
