//! Aggregate market sentiment from four independent sub-signals.

use crate::analysis::{Sentiment, Trend};

pub const FUNDING_BEARISH_ABOVE_PCT: f64 = 0.1;
pub const FUNDING_BULLISH_BELOW_PCT: f64 = -0.1;
pub const VOLATILITY_UNCERTAIN_ABOVE: f64 = 50.0;
pub const VOLATILITY_STABLE_BELOW: f64 = 10.0;
pub const VOLUME_SHIFT_PCT: f64 = 20.0;

/// Direction a single sub-signal leans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lean {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolatilityRegime {
    Uncertain,
    Moderate,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeShift {
    Optimistic,
    Pessimistic,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentimentSignals {
    pub funding: Lean,
    pub price: Lean,
    pub volatility: VolatilityRegime,
    pub volume: VolumeShift,
}

/// Crowded longs pay shorts, so a high positive rate leans bearish.
pub fn funding_lean(rate_pct: f64) -> Lean {
    if rate_pct > FUNDING_BEARISH_ABOVE_PCT {
        Lean::Bearish
    } else if rate_pct < FUNDING_BULLISH_BELOW_PCT {
        Lean::Bullish
    } else {
        Lean::Neutral
    }
}

pub fn price_lean(daily: Trend) -> Lean {
    match daily {
        Trend::StronglyBullish | Trend::Bullish => Lean::Bullish,
        Trend::StronglyBearish | Trend::Bearish => Lean::Bearish,
        _ => Lean::Neutral,
    }
}

pub fn volatility_regime(index: f64) -> VolatilityRegime {
    if index > VOLATILITY_UNCERTAIN_ABOVE {
        VolatilityRegime::Uncertain
    } else if index < VOLATILITY_STABLE_BELOW {
        VolatilityRegime::Stable
    } else {
        VolatilityRegime::Moderate
    }
}

/// Compares the 24h average volume after the moment with the trailing weekly
/// average. A missing or zero baseline gives no signal.
pub fn volume_shift(recent_avg: f64, baseline_avg: Option<f64>) -> VolumeShift {
    let baseline = match baseline_avg {
        Some(b) if b > 0.0 && b.is_finite() => b,
        _ => return VolumeShift::Neutral,
    };
    let change = (recent_avg - baseline) / baseline * 100.0;
    if change > VOLUME_SHIFT_PCT {
        VolumeShift::Optimistic
    } else if change < -VOLUME_SHIFT_PCT {
        VolumeShift::Pessimistic
    } else {
        VolumeShift::Neutral
    }
}

/// Vote the signals into one label.
///
/// Volatility never votes; an uncertain regime overrides the vote outright.
/// A plain positive or negative vote that agrees with the daily price trend is
/// sharpened to bullish or bearish.
pub fn combine_signals(s: &SentimentSignals) -> Sentiment {
    let bullish = [s.funding == Lean::Bullish, s.price == Lean::Bullish, s.volume == VolumeShift::Optimistic]
        .iter()
        .filter(|v| **v)
        .count();
    let bearish = [s.funding == Lean::Bearish, s.price == Lean::Bearish, s.volume == VolumeShift::Pessimistic]
        .iter()
        .filter(|v| **v)
        .count();

    let mut sentiment = if bullish > bearish {
        if bullish >= 3 {
            Sentiment::HighlyPositive
        } else {
            Sentiment::Positive
        }
    } else if bearish > bullish {
        if bearish >= 3 {
            Sentiment::HighlyNegative
        } else {
            Sentiment::Negative
        }
    } else {
        Sentiment::Mixed
    };

    if s.volatility == VolatilityRegime::Uncertain {
        sentiment = Sentiment::Uncertain;
    }

    match (sentiment, s.price) {
        (Sentiment::Positive, Lean::Bullish) => Sentiment::Bullish,
        (Sentiment::Negative, Lean::Bearish) => Sentiment::Bearish,
        (other, _) => other,
    }
}
