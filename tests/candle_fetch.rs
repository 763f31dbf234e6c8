//! Windowed candle fetching against a scripted exchange.

mod common;

use std::sync::Arc;

use common::{ScriptedExchange, DAY, EPOCH, HOUR, MINUTE};
use fundingwatch::candles::{plan_windows, CandleSeries, CandleWindowFetcher};
use fundingwatch::error::FetchError;
use fundingwatch::exchange::{BarOrder, Granularity};

fn fetcher(exchange: ScriptedExchange) -> (Arc<ScriptedExchange>, CandleWindowFetcher) {
    let exchange = Arc::new(exchange);
    let fetcher = CandleWindowFetcher::new(exchange.clone());
    (exchange, fetcher)
}

fn assert_contiguous(series: &CandleSeries, start: i64, end: i64) {
    let g = series.granularity.duration_ms();
    for pair in series.bars.windows(2) {
        assert_eq!(pair[1].open_time_ms - pair[0].open_time_ms, g);
    }
    if let (Some(first), Some(last)) = (series.first(), series.last()) {
        assert!(first.open_time_ms >= start && first.open_time_ms <= end);
        assert!(last.open_time_ms >= start && last.open_time_ms <= end);
    }
}

// ---------------------------------------------------------------------------
// Series shape
// ---------------------------------------------------------------------------

#[tokio::test]
async fn series_is_contiguous_and_bounded_across_granularities() {
    let (_, fetcher) = fetcher(ScriptedExchange::with_page_limit(100));
    let cases = [
        (Granularity::M1, EPOCH + 7 * MINUTE, EPOCH + 10 * HOUR),
        (Granularity::M15, EPOCH, EPOCH + DAY),
        (Granularity::H1, EPOCH + 30 * MINUTE, EPOCH + 7 * DAY),
        (Granularity::H4, EPOCH - 30 * DAY, EPOCH),
        (Granularity::D1, EPOCH, EPOCH + 400 * DAY),
    ];
    for (g, start, end) in cases {
        let series = fetcher.fetch_at("BTCUSDT", g, start, end, end).await.unwrap();
        assert!(!series.is_empty(), "{} produced no bars", g);
        assert_contiguous(&series, start, end);
    }
}

#[tokio::test]
async fn end_bar_is_included() {
    let (_, fetcher) = fetcher(ScriptedExchange::with_page_limit(10));
    // 24 hourly intervals, 25 bars inclusive
    let series = fetcher
        .fetch_at("BTCUSDT", Granularity::H1, EPOCH, EPOCH + 24 * HOUR, EPOCH)
        .await
        .unwrap();
    assert_eq!(series.len(), 25);
    assert_eq!(series.first().unwrap().open_time_ms, EPOCH);
    assert_eq!(series.last().unwrap().open_time_ms, EPOCH + 24 * HOUR);
}

#[tokio::test]
async fn one_call_per_planned_window() {
    let (exchange, fetcher) = fetcher(ScriptedExchange::with_page_limit(10));
    let start = EPOCH;
    let end = EPOCH + 95 * MINUTE;
    let planned = plan_windows(start, end, MINUTE, 10).len();
    fetcher.fetch_at("BTCUSDT", Granularity::M1, start, end, end).await.unwrap();
    assert_eq!(planned, 10);
    assert_eq!(exchange.calls(), planned);
}

#[tokio::test]
async fn identical_requests_yield_identical_series() {
    let (_, fetcher) = fetcher(ScriptedExchange::with_page_limit(50));
    let a = fetcher
        .fetch_at("ETHUSDT", Granularity::M15, EPOCH, EPOCH + 3 * DAY, EPOCH)
        .await
        .unwrap();
    let b = fetcher
        .fetch_at("ETHUSDT", Granularity::M15, EPOCH, EPOCH + 3 * DAY, EPOCH)
        .await
        .unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn newest_first_pages_are_reversed() {
    let (_, oldest_first) = fetcher(ScriptedExchange::with_page_limit(30));
    let (_, newest_first) = fetcher(ScriptedExchange {
        order: BarOrder::NewestFirst,
        ..ScriptedExchange::with_page_limit(30)
    });
    let a = oldest_first
        .fetch_at("BTCUSDT", Granularity::H1, EPOCH, EPOCH + 5 * DAY, EPOCH)
        .await
        .unwrap();
    let b = newest_first
        .fetch_at("BTCUSDT", Granularity::H1, EPOCH, EPOCH + 5 * DAY, EPOCH)
        .await
        .unwrap();
    assert_eq!(a.bars, b.bars);
}

#[tokio::test]
async fn over_returned_edge_bars_are_discarded() {
    let (_, fetcher) = fetcher(ScriptedExchange {
        over_return: true,
        ..ScriptedExchange::with_page_limit(20)
    });
    let start = EPOCH;
    let end = EPOCH + 2 * DAY;
    let series = fetcher.fetch_at("BTCUSDT", Granularity::H1, start, end, end).await.unwrap();
    assert_eq!(series.len(), 49);
    assert_contiguous(&series, start, end);
}

// ---------------------------------------------------------------------------
// Empty data and clipping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn range_before_listing_is_empty_not_an_error() {
    let (_, fetcher) = fetcher(ScriptedExchange {
        listed_at_ms: EPOCH,
        ..ScriptedExchange::default()
    });
    let series = fetcher
        .fetch_at("NEWUSDT", Granularity::H1, EPOCH - 2 * DAY, EPOCH - DAY, EPOCH)
        .await
        .unwrap();
    assert!(series.is_empty());
}

#[tokio::test]
async fn leading_unlisted_windows_are_skipped() {
    let (_, fetcher) = fetcher(ScriptedExchange {
        listed_at_ms: EPOCH,
        ..ScriptedExchange::with_page_limit(24)
    });
    let series = fetcher
        .fetch_at("NEWUSDT", Granularity::H1, EPOCH - 3 * DAY, EPOCH + DAY, EPOCH + DAY)
        .await
        .unwrap();
    assert_eq!(series.first().unwrap().open_time_ms, EPOCH);
    assert_eq!(series.len(), 25);
}

#[tokio::test]
async fn start_is_clipped_to_lookback() {
    let (_, fetcher) = fetcher(ScriptedExchange {
        lookback_ms: Some(DAY),
        ..ScriptedExchange::default()
    });
    let now = EPOCH + 10 * DAY;
    let series = fetcher
        .fetch_at("BTCUSDT", Granularity::H1, EPOCH, now, now)
        .await
        .unwrap();
    assert!(series.clipped);
    assert_eq!(series.start_ms, now - DAY);
    assert_eq!(series.first().unwrap().open_time_ms, now - DAY);

    let inside = fetcher
        .fetch_at("BTCUSDT", Granularity::H1, now - HOUR, now, now)
        .await
        .unwrap();
    assert!(!inside.clipped);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn inverted_or_empty_range_is_rejected() {
    let (exchange, fetcher) = fetcher(ScriptedExchange::default());
    for (start, end) in [(EPOCH, EPOCH), (EPOCH + HOUR, EPOCH)] {
        let err = fetcher.fetch_at("BTCUSDT", Granularity::H1, start, end, end).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidRange { .. }));
    }
    assert_eq!(exchange.calls(), 0);
}

#[tokio::test]
async fn exchange_failure_names_the_window() {
    let (exchange, fetcher) = fetcher(ScriptedExchange::with_page_limit(10));
    exchange.fail_candles_for("BTCUSDT");
    let err = fetcher
        .fetch_at("BTCUSDT", Granularity::H1, EPOCH, EPOCH + DAY, EPOCH)
        .await
        .unwrap_err();
    match err {
        FetchError::ExchangeUnavailable {
            symbol,
            window_start_ms,
            window_end_ms,
            ..
        } => {
            assert_eq!(symbol, "BTCUSDT");
            assert_eq!(window_start_ms, EPOCH);
            assert_eq!(window_end_ms, EPOCH + 10 * HOUR - 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(exchange.calls(), 1);
}

#[tokio::test]
async fn duplicate_bars_are_reported_not_repaired() {
    let (_, fetcher) = fetcher(ScriptedExchange {
        duplicate_first_bar: true,
        ..ScriptedExchange::default()
    });
    let err = fetcher
        .fetch_at("BTCUSDT", Granularity::H1, EPOCH, EPOCH + DAY, EPOCH)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::MalformedSeries { .. }));
}
