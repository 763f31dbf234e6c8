//! Deterministic in-process exchange for integration tests.
//!
//! Bars are generated from a closed-form price path, so any range at any
//! granularity can be served without fixtures. Failures and contract
//! violations are switched on per test.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use fundingwatch::error::ExchangeError;
use fundingwatch::exchange::{BarOrder, Candle, Exchange, FundingRateEntry, Granularity};

pub const MINUTE: i64 = 60_000;
pub const HOUR: i64 = 60 * MINUTE;
pub const DAY: i64 = 24 * HOUR;
/// 2024-01-01T00:00:00Z
pub const EPOCH: i64 = 1_704_067_200_000;

pub struct ScriptedExchange {
    pub page_limit: usize,
    pub order: BarOrder,
    pub lookback_ms: Option<i64>,
    /// No bars exist before this time.
    pub listed_at_ms: i64,
    /// Every page also carries one bar before and one after the window.
    pub over_return: bool,
    /// Every page repeats its first bar.
    pub duplicate_first_bar: bool,
    /// Candle calls for these symbols fail with a 503.
    pub failing_candles: Mutex<HashSet<String>>,
    /// Candle calls at these granularities fail with a 503 for every symbol.
    pub failing_granularities: Mutex<HashSet<Granularity>>,
    /// Bars at a granularity opening inside `[from, to]` are not served.
    pub hidden: Mutex<Vec<(Granularity, i64, i64)>>,
    /// Newest first.
    pub funding: Mutex<HashMap<String, Vec<FundingRateEntry>>>,
    pub candle_calls: AtomicUsize,
    /// Simulated candle call latency (tokio time, so it can be paused).
    pub latency: Duration,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Default for ScriptedExchange {
    fn default() -> Self {
        Self {
            page_limit: 1000,
            order: BarOrder::OldestFirst,
            lookback_ms: None,
            listed_at_ms: 0,
            over_return: false,
            duplicate_first_bar: false,
            failing_candles: Mutex::new(HashSet::new()),
            failing_granularities: Mutex::new(HashSet::new()),
            hidden: Mutex::new(Vec::new()),
            funding: Mutex::new(HashMap::new()),
            candle_calls: AtomicUsize::new(0),
            latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl ScriptedExchange {
    pub fn with_page_limit(page_limit: usize) -> Self {
        Self {
            page_limit,
            ..Self::default()
        }
    }

    pub fn fail_candles_for(&self, symbol: &str) {
        self.failing_candles.lock().unwrap().insert(symbol.to_string());
    }

    pub fn fail_granularity(&self, granularity: Granularity) {
        self.failing_granularities.lock().unwrap().insert(granularity);
    }

    pub fn hide_bars(&self, granularity: Granularity, from_ms: i64, to_ms: i64) {
        self.hidden.lock().unwrap().push((granularity, from_ms, to_ms));
    }

    fn is_hidden(&self, granularity: Granularity, t: i64) -> bool {
        self.hidden
            .lock()
            .unwrap()
            .iter()
            .any(|(g, from, to)| *g == granularity && t >= *from && t <= *to)
    }

    /// Funding settlements every `hours`, newest at `newest_ms`, the newest
    /// one at `latest_rate` and the rest flat.
    pub fn set_funding(&self, symbol: &str, newest_ms: i64, hours: i64, latest_rate: f64) {
        let entries = (0..10)
            .map(|i| FundingRateEntry {
                funding_time_ms: newest_ms - i * hours * HOUR,
                rate: if i == 0 { latest_rate } else { 0.0001 },
            })
            .collect();
        self.funding.lock().unwrap().insert(symbol.to_string(), entries);
    }

    pub fn set_funding_times(&self, symbol: &str, times_newest_first: &[i64]) {
        let entries = times_newest_first
            .iter()
            .map(|t| FundingRateEntry { funding_time_ms: *t, rate: 0.0001 })
            .collect();
        self.funding.lock().unwrap().insert(symbol.to_string(), entries);
    }

    pub fn calls(&self) -> usize {
        self.candle_calls.load(Ordering::SeqCst)
    }
}

pub fn price_at(t: i64) -> f64 {
    let hours = (t - EPOCH) as f64 / HOUR as f64;
    100.0 + 5.0 * (hours / 9.0).sin() + 0.01 * hours
}

pub fn bar_at(t: i64, g: i64) -> Candle {
    let open = price_at(t);
    let close = price_at(t + g);
    let volume = 1_000.0 + ((t / g) % 7) as f64 * 25.0;
    Candle {
        open_time_ms: t,
        open,
        high: open.max(close) * 1.001,
        low: open.min(close) * 0.999,
        close,
        volume,
        notional: volume * close,
    }
}

#[async_trait]
impl Exchange for ScriptedExchange {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn page_limit(&self) -> usize {
        self.page_limit
    }

    fn bar_order(&self) -> BarOrder {
        self.order
    }

    fn max_lookback_ms(&self, _granularity: Granularity) -> Option<i64> {
        self.lookback_ms
    }

    async fn fetch_candle_page(
        &self,
        symbol: &str,
        granularity: Granularity,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.candle_calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        if self.failing_candles.lock().unwrap().contains(symbol)
            || self.failing_granularities.lock().unwrap().contains(&granularity)
        {
            return Err(ExchangeError::Upstream {
                status: 503,
                body: "service unavailable".into(),
            });
        }

        let g = granularity.duration_ms();
        let first = ((start_ms + g - 1).div_euclid(g)) * g;
        let mut bars: Vec<Candle> = (0..limit as i64)
            .map(|i| first + i * g)
            .take_while(|t| *t <= end_ms)
            .filter(|t| *t >= self.listed_at_ms && !self.is_hidden(granularity, *t))
            .map(|t| bar_at(t, g))
            .collect();

        if self.over_return && !bars.is_empty() {
            let before = first - g;
            if before >= self.listed_at_ms {
                bars.insert(0, bar_at(before, g));
            }
            let after = bars[bars.len() - 1].open_time_ms + g;
            bars.push(bar_at(after, g));
        }
        if self.duplicate_first_bar && !bars.is_empty() {
            bars.insert(0, bars[0]);
        }
        if self.order == BarOrder::NewestFirst {
            bars.reverse();
        }
        Ok(bars)
    }

    async fn fetch_funding_rate_page(
        &self,
        symbol: &str,
        page_size: usize,
        page_offset: usize,
    ) -> Result<Vec<FundingRateEntry>, ExchangeError> {
        let funding = self.funding.lock().unwrap();
        let entries = funding.get(symbol).cloned().unwrap_or_default();
        Ok(entries.into_iter().skip(page_offset * page_size).take(page_size).collect())
    }

    async fn list_symbols(&self) -> Result<Vec<String>, ExchangeError> {
        let mut symbols: Vec<String> = self.funding.lock().unwrap().keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }
}
