//! Price metrics and trend classification over candle series.

use crate::analysis::Trend;
use crate::candles::CandleSeries;
use crate::indicators::{log_returns, pct_changes, sample_std, sma_last};

/// Relative MA spread under which a market is called sideways.
pub const SIDEWAYS_BAND: f64 = 0.01;
pub const DAILY_VOLATILITY_THRESHOLD: f64 = 1.5;
pub const WEEKLY_VOLATILITY_THRESHOLD: f64 = 2.0;
/// Weekly total change (percent) separating strong from plain trends.
pub const WEEKLY_STRONG_CHANGE_PCT: f64 = 5.0;
/// Weekly total change (percent) under which the week is neutral.
pub const WEEKLY_FLAT_CHANGE_PCT: f64 = 1.0;
/// Ten one-minute bars per sample, 1440 minutes a day, 252 trading days.
pub const VOLATILITY_PERIODS_PER_YEAR: f64 = 252.0 * (1440.0 / 10.0);

/// Everything the classifiers look at, extracted from one series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendInputs {
    pub close: f64,
    pub ma20: Option<f64>,
    pub ma50: Option<f64>,
    /// Stdev of close-to-close percent changes.
    pub pct_change_std: Option<f64>,
    /// `(close[last] - open[0]) / open[0] * 100`.
    pub total_change_pct: f64,
}

impl TrendInputs {
    pub fn from_series(series: &CandleSeries) -> Option<Self> {
        let first = series.first()?;
        let last = series.last()?;
        let closes = series.closes();
        Some(Self {
            close: last.close,
            ma20: sma_last(&closes, 20),
            ma50: sma_last(&closes, 50),
            pct_change_std: sample_std(&pct_changes(&closes)),
            total_change_pct: (last.close - first.open) / first.open * 100.0,
        })
    }

    fn ma_ladder_up(&self) -> bool {
        matches!((self.ma20, self.ma50), (Some(ma20), Some(ma50)) if self.close > ma20 && ma20 > ma50)
    }

    fn ma_ladder_down(&self) -> bool {
        matches!((self.ma20, self.ma50), (Some(ma20), Some(ma50)) if self.close < ma20 && ma20 < ma50)
    }

    fn in_sideways_band(&self) -> bool {
        matches!((self.ma20, self.ma50), (Some(ma20), Some(ma50)) if ((ma20 - ma50) / ma50).abs() < SIDEWAYS_BAND)
    }

    fn more_volatile_than(&self, threshold: f64) -> bool {
        self.pct_change_std.map_or(false, |s| s > threshold)
    }
}

/// Daily classification. The sideways override runs after the primary
/// ladder and the volatility override runs last.
pub fn classify_daily(i: &TrendInputs) -> Trend {
    let mut trend = if i.ma_ladder_up() {
        Trend::StronglyBullish
    } else if i.ma_ladder_down() {
        Trend::StronglyBearish
    } else if i.ma20.map_or(false, |ma20| i.close > ma20) {
        Trend::Bullish
    } else if i.ma20.map_or(false, |ma20| i.close < ma20) {
        Trend::Bearish
    } else {
        Trend::Neutral
    };

    if i.in_sideways_band() {
        trend = Trend::Sideways;
    }
    if i.more_volatile_than(DAILY_VOLATILITY_THRESHOLD) {
        trend = Trend::Volatile;
    }
    trend
}

/// Weekly classification, gated by the total change over the period.
pub fn classify_weekly(i: &TrendInputs) -> Trend {
    let change = i.total_change_pct;
    let mut trend = if i.ma_ladder_up() {
        if change > WEEKLY_STRONG_CHANGE_PCT {
            Trend::StronglyBullish
        } else {
            Trend::Bullish
        }
    } else if i.ma_ladder_down() {
        if change < -WEEKLY_STRONG_CHANGE_PCT {
            Trend::StronglyBearish
        } else {
            Trend::Bearish
        }
    } else if change.abs() < WEEKLY_FLAT_CHANGE_PCT {
        Trend::Neutral
    } else if i.in_sideways_band() {
        Trend::Sideways
    } else if change > 0.0 {
        // TODO: confirm with product whether "corrective" should also require
        // the MAs to be crossing; today it is the residual positive branch.
        Trend::Corrective
    } else {
        Trend::Volatile
    };

    if i.more_volatile_than(WEEKLY_VOLATILITY_THRESHOLD) {
        trend = Trend::Volatile;
    }
    trend
}

/// `(open[0] - close[last]) / close[last] * 100`
pub fn eight_hour_variation(series: &CandleSeries) -> Option<f64> {
    let open = series.first()?.open;
    let close = series.last()?.close;
    Some((open - close) / close * 100.0)
}

/// `(open[0] - min(low)) / min(low) * 100`
pub fn ten_minute_variation(series: &CandleSeries) -> Option<f64> {
    let open = series.first()?.open;
    let low = series.min_low()?;
    Some((open - low) / low * 100.0)
}

/// Annualized stdev of one-minute log returns, in percent. `None` with fewer
/// than two returns.
pub fn volatility_index(series: &CandleSeries) -> Option<f64> {
    let std = sample_std(&log_returns(&series.closes()))?;
    Some(std * VOLATILITY_PERIODS_PER_YEAR.sqrt() * 100.0)
}
