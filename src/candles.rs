//! Windowed candle fetching.
//!
//! An exchange serves at most `page_limit` bars per call, so a range is split
//! into explicit call windows `[callStart, callStart + page*g)` chained end to
//! start. Windows are computed up front rather than following a cursor from
//! the previous response, so a fetch is idempotent and can be resumed from any
//! window.

use chrono::Utc;
use std::sync::Arc;

use crate::error::FetchError;
use crate::exchange::{BarOrder, Candle, Exchange, Granularity};
use crate::logging::{log, obj, v_num, v_str, Domain, Level};

/// One planned exchange call; both bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

/// Split `[start_ms, end_ms]` into consecutive windows of at most
/// `page_size` bars of `granularity_ms`.
pub fn plan_windows(start_ms: i64, end_ms: i64, granularity_ms: i64, page_size: usize) -> Vec<CallWindow> {
    if start_ms > end_ms || granularity_ms <= 0 || page_size == 0 {
        return Vec::new();
    }
    let page = page_size as i64;
    // Both ends inclusive: a bar may open exactly at end_ms.
    let total_bars = (end_ms - start_ms) / granularity_ms + 1;
    let calls = (total_bars + page - 1) / page;
    let span = page * granularity_ms;
    (0..calls)
        .map(|i| {
            let call_start = start_ms + i * span;
            CallWindow {
                start_ms: call_start,
                end_ms: (call_start + span - 1).min(end_ms),
            }
        })
        .collect()
}

/// A chronologically ordered, gap-free series truncated to the requested range.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleSeries {
    pub symbol: String,
    pub granularity: Granularity,
    /// Effective start after any lookback clipping.
    pub start_ms: i64,
    pub end_ms: i64,
    /// Start was moved forward because the exchange does not serve older bars.
    pub clipped: bool,
    pub bars: Vec<Candle>,
}

impl CandleSeries {
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn first(&self) -> Option<&Candle> {
        self.bars.first()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.bars.last()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|c| c.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|c| c.volume).collect()
    }

    pub fn min_low(&self) -> Option<f64> {
        self.bars.iter().map(|c| c.low).reduce(f64::min)
    }
}

/// Drives one exchange across as many paginated calls as a range needs.
#[derive(Clone)]
pub struct CandleWindowFetcher {
    exchange: Arc<dyn Exchange>,
}

impl CandleWindowFetcher {
    pub fn new(exchange: Arc<dyn Exchange>) -> Self {
        Self { exchange }
    }

    pub fn exchange(&self) -> &Arc<dyn Exchange> {
        &self.exchange
    }

    pub async fn fetch(
        &self,
        symbol: &str,
        granularity: Granularity,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<CandleSeries, FetchError> {
        self.fetch_at(symbol, granularity, start_ms, end_ms, Utc::now().timestamp_millis())
            .await
    }

    /// Same as [`fetch`](Self::fetch) with an explicit "now" for the lookback clip.
    pub async fn fetch_at(
        &self,
        symbol: &str,
        granularity: Granularity,
        start_ms: i64,
        end_ms: i64,
        now_ms: i64,
    ) -> Result<CandleSeries, FetchError> {
        if start_ms >= end_ms {
            return Err(FetchError::InvalidRange { start_ms, end_ms });
        }
        let g = granularity.duration_ms();

        let mut start = start_ms;
        let mut clipped = false;
        if let Some(lookback) = self.exchange.max_lookback_ms(granularity) {
            let earliest = now_ms - lookback;
            if start < earliest {
                start = earliest;
                clipped = true;
                log(
                    Level::Info,
                    Domain::Market,
                    "lookback_clipped",
                    obj(&[
                        ("symbol", v_str(symbol)),
                        ("granularity", v_str(granularity.as_str())),
                        ("requested_start_ms", v_num(start_ms as f64)),
                        ("start_ms", v_num(start as f64)),
                    ]),
                );
            }
        }

        let mut series = CandleSeries {
            symbol: symbol.to_string(),
            granularity,
            start_ms: start,
            end_ms,
            clipped,
            bars: Vec::new(),
        };
        if start >= end_ms {
            return Ok(series);
        }

        let page_size = self.exchange.page_limit();
        let windows = plan_windows(start, end_ms, g, page_size);
        log(
            Level::Debug,
            Domain::Market,
            "candle_fetch",
            obj(&[
                ("symbol", v_str(symbol)),
                ("granularity", v_str(granularity.as_str())),
                ("windows", v_num(windows.len() as f64)),
            ]),
        );

        for window in windows {
            let mut page = self
                .exchange
                .fetch_candle_page(symbol, granularity, window.start_ms, window.end_ms, page_size)
                .await
                .map_err(|source| FetchError::ExchangeUnavailable {
                    symbol: symbol.to_string(),
                    window_start_ms: window.start_ms,
                    window_end_ms: window.end_ms,
                    source,
                })?;

            // Nothing yet means the symbol was not listed; nothing after data
            // means history is exhausted.
            if page.is_empty() {
                if series.bars.is_empty() {
                    continue;
                }
                break;
            }
            if self.exchange.bar_order() == BarOrder::NewestFirst {
                page.reverse();
            }
            let reached_end = page.last().map_or(false, |c| c.open_time_ms >= end_ms);

            page.retain(|c| c.open_time_ms >= window.start_ms && c.open_time_ms <= window.end_ms);
            for bar in page {
                push_checked(&mut series, bar, g)?;
            }
            if reached_end {
                break;
            }
        }

        Ok(series)
    }
}

/// Append `bar`, enforcing strictly increasing open times spaced by exactly one
/// granularity. Violations are reported, never repaired.
fn push_checked(series: &mut CandleSeries, bar: Candle, g: i64) -> Result<(), FetchError> {
    if let Some(prev) = series.bars.last() {
        let delta = bar.open_time_ms - prev.open_time_ms;
        let detail = if delta <= 0 {
            Some(format!(
                "bar {} not after previous bar {}",
                bar.open_time_ms, prev.open_time_ms
            ))
        } else if delta != g && !series.granularity.is_calendar() {
            Some(format!(
                "gap of {}ms between {} and {} (expected {}ms)",
                delta, prev.open_time_ms, bar.open_time_ms, g
            ))
        } else {
            None
        };
        if let Some(detail) = detail {
            return Err(FetchError::MalformedSeries {
                symbol: series.symbol.clone(),
                detail,
            });
        }
    }
    series.bars.push(bar);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: i64 = 3_600_000;

    #[test]
    fn single_window_when_range_fits_a_page() {
        let w = plan_windows(0, 8 * H, H, 1000);
        assert_eq!(w, vec![CallWindow { start_ms: 0, end_ms: 8 * H }]);
    }

    #[test]
    fn windows_chain_end_to_start() {
        // 25 bars inclusive, pages of 10 -> 3 calls
        let w = plan_windows(0, 24 * H, H, 10);
        assert_eq!(w.len(), 3);
        assert_eq!(w[0], CallWindow { start_ms: 0, end_ms: 10 * H - 1 });
        assert_eq!(w[1], CallWindow { start_ms: 10 * H, end_ms: 20 * H - 1 });
        assert_eq!(w[2], CallWindow { start_ms: 20 * H, end_ms: 24 * H });
        for pair in w.windows(2) {
            assert_eq!(pair[0].end_ms + 1, pair[1].start_ms);
        }
    }

    #[test]
    fn exact_page_multiple_still_covers_end_bar() {
        // 10 intervals = 11 inclusive bars, pages of 10 -> 2 calls
        let w = plan_windows(0, 10 * H, H, 10);
        assert_eq!(w.len(), 2);
        assert_eq!(w[1], CallWindow { start_ms: 10 * H, end_ms: 10 * H });
    }

    #[test]
    fn degenerate_inputs_plan_nothing() {
        assert!(plan_windows(10, 0, H, 10).is_empty());
        assert!(plan_windows(0, 10, 0, 10).is_empty());
        assert!(plan_windows(0, 10, H, 0).is_empty());
    }

    fn bar(t: i64) -> Candle {
        Candle { open_time_ms: t, open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: 1.0, notional: 1.0 }
    }

    fn empty_series(g: Granularity) -> CandleSeries {
        CandleSeries {
            symbol: "X".into(),
            granularity: g,
            start_ms: 0,
            end_ms: 0,
            clipped: false,
            bars: Vec::new(),
        }
    }

    #[test]
    fn push_rejects_duplicates_and_gaps() {
        let mut s = empty_series(Granularity::H1);
        push_checked(&mut s, bar(0), H).unwrap();
        push_checked(&mut s, bar(H), H).unwrap();
        assert!(matches!(push_checked(&mut s, bar(H), H), Err(FetchError::MalformedSeries { .. })));
        assert!(matches!(push_checked(&mut s, bar(3 * H), H), Err(FetchError::MalformedSeries { .. })));
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn monthly_bars_only_need_to_increase() {
        let g = Granularity::Mo1;
        let mut s = empty_series(g);
        push_checked(&mut s, bar(0), g.duration_ms()).unwrap();
        push_checked(&mut s, bar(31 * 24 * H), g.duration_ms()).unwrap();
        assert_eq!(s.len(), 2);
    }
}
