//! Price-series statistics used by the trend analyzer.
//!
//! Sample statistics use the n-1 denominator. Non-finite intermediate values
//! (e.g. a change from a zero close) are skipped rather than propagated.

use std::collections::VecDeque;

// =============================================================================
// Rolling Statistics
// =============================================================================

/// Simple moving average with fixed window
#[derive(Debug, Clone)]
pub struct Sma {
    window: VecDeque<f64>,
    period: usize,
    sum: f64,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(period),
            period,
            sum: 0.0,
        }
    }

    pub fn update(&mut self, price: f64) -> f64 {
        self.sum += price;
        self.window.push_back(price);
        if self.window.len() > self.period {
            self.sum -= self.window.pop_front().unwrap_or(0.0);
        }
        self.get()
    }

    pub fn get(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            self.sum / self.window.len() as f64
        }
    }

    pub fn is_ready(&self) -> bool {
        self.period > 0 && self.window.len() >= self.period
    }
}

/// SMA of the last `period` values; `None` until `period` values exist.
pub fn sma_last(values: &[f64], period: usize) -> Option<f64> {
    let mut sma = Sma::new(period);
    for v in values {
        sma.update(*v);
    }
    sma.is_ready().then(|| sma.get())
}

// =============================================================================
// Series transforms
// =============================================================================

/// Close-to-close percent changes, `len - 1` entries at most.
pub fn pct_changes(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .map(|w| (w[1] - w[0]) / w[0] * 100.0)
        .filter(|v| v.is_finite())
        .collect()
}

pub fn log_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .map(|w| (w[1] / w[0]).ln())
        .filter(|v| v.is_finite())
        .collect()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Sample standard deviation; `None` for fewer than two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}
