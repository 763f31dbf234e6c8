use crate::analysis::sentiment::{self, SentimentSignals};
use crate::analysis::trend::{self, TrendInputs};
use crate::analysis::Analysis;
use crate::candles::{CandleSeries, CandleWindowFetcher};
use crate::error::AnalysisError;
use crate::exchange::Granularity;
use crate::indicators::mean;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Scores the aftermath of a funding-rate key moment at `T`.
///
/// Every window starts at or ends at `T`; only the volume baseline looks
/// backwards. The sub-fetches have no data dependency on each other and are
/// issued concurrently.
#[derive(Clone)]
pub struct TrendAnalyzer {
    fetcher: CandleWindowFetcher,
}

impl TrendAnalyzer {
    pub fn new(fetcher: CandleWindowFetcher) -> Self {
        Self { fetcher }
    }

    pub async fn analyze(&self, symbol: &str, t_ms: i64, funding_rate_pct: f64) -> Result<Analysis, AnalysisError> {
        let (eight_hour, ten_minute, daily, weekly, day_volume, week_volume) = tokio::try_join!(
            self.eight_hour_variation(symbol, t_ms),
            self.required(symbol, Granularity::M1, t_ms, t_ms + 10 * MINUTE_MS, "10m window"),
            self.trend_inputs(symbol, Granularity::M15, t_ms, t_ms + DAY_MS, "daily trend"),
            self.trend_inputs(symbol, Granularity::H1, t_ms, t_ms + 7 * DAY_MS, "weekly trend"),
            self.required(symbol, Granularity::H1, t_ms, t_ms + DAY_MS, "24h volume"),
            self.trailing_volume(symbol, t_ms),
        )?;

        let ten_minute_variation_pct = trend::ten_minute_variation(&ten_minute).ok_or(AnalysisError::NoData {
            symbol: symbol.to_string(),
            what: "10m window",
        })?;
        let volatility_index = trend::volatility_index(&ten_minute).unwrap_or(0.0);
        let daily_trend = trend::classify_daily(&daily);
        let weekly_trend = trend::classify_weekly(&weekly);
        let average_trading_volume = mean(&day_volume.volumes()).unwrap_or(0.0);

        let signals = SentimentSignals {
            funding: sentiment::funding_lean(funding_rate_pct),
            price: sentiment::price_lean(daily_trend),
            volatility: sentiment::volatility_regime(volatility_index),
            volume: sentiment::volume_shift(average_trading_volume, week_volume),
        };
        let market_sentiment = sentiment::combine_signals(&signals);

        let mut analysis = Analysis {
            descriptions: Vec::new(),
            eight_hour_variation_pct: eight_hour,
            ten_minute_variation_pct,
            daily_trend,
            weekly_trend,
            volatility_index,
            average_trading_volume,
            market_sentiment,
        };
        analysis.descriptions = describe(&analysis);

        log(
            Level::Info,
            Domain::Analysis,
            "analysis_complete",
            obj(&[
                ("symbol", v_str(symbol)),
                ("period_ts_ms", v_num(t_ms as f64)),
                ("eight_hour_pct", v_num(analysis.eight_hour_variation_pct)),
                ("ten_minute_pct", v_num(analysis.ten_minute_variation_pct)),
                ("daily_trend", v_str(daily_trend.as_str())),
                ("weekly_trend", v_str(weekly_trend.as_str())),
                ("sentiment", v_str(market_sentiment.as_str())),
            ]),
        );
        Ok(analysis)
    }

    /// 1h bars over `[T, T+8h]`, falling back to 4h bars when the exchange
    /// has no hourly data for the window.
    async fn eight_hour_variation(&self, symbol: &str, t_ms: i64) -> Result<f64, AnalysisError> {
        let end = t_ms + 8 * HOUR_MS;
        let mut series = self.fetcher.fetch(symbol, Granularity::H1, t_ms, end).await?;
        if series.is_empty() {
            log(
                Level::Debug,
                Domain::Analysis,
                "eight_hour_fallback",
                obj(&[("symbol", v_str(symbol)), ("granularity", v_str(Granularity::H4.as_str()))]),
            );
            series = self.fetcher.fetch(symbol, Granularity::H4, t_ms, end).await?;
        }
        trend::eight_hour_variation(&series).ok_or(AnalysisError::NoData {
            symbol: symbol.to_string(),
            what: "8h window",
        })
    }

    async fn required(
        &self,
        symbol: &str,
        granularity: Granularity,
        start_ms: i64,
        end_ms: i64,
        what: &'static str,
    ) -> Result<CandleSeries, AnalysisError> {
        let series = self.fetcher.fetch(symbol, granularity, start_ms, end_ms).await?;
        if series.is_empty() {
            return Err(AnalysisError::NoData { symbol: symbol.to_string(), what });
        }
        Ok(series)
    }

    async fn trend_inputs(
        &self,
        symbol: &str,
        granularity: Granularity,
        start_ms: i64,
        end_ms: i64,
        what: &'static str,
    ) -> Result<TrendInputs, AnalysisError> {
        let series = self.required(symbol, granularity, start_ms, end_ms, what).await?;
        TrendInputs::from_series(&series).ok_or(AnalysisError::NoData { symbol: symbol.to_string(), what })
    }

    /// Average 4h volume over the week before `T`. An empty week is not an
    /// error; the volume signal just abstains.
    async fn trailing_volume(&self, symbol: &str, t_ms: i64) -> Result<Option<f64>, AnalysisError> {
        let series = self.fetcher.fetch(symbol, Granularity::H4, t_ms - 7 * DAY_MS, t_ms).await?;
        Ok(mean(&series.volumes()))
    }
}

/// One finding per metric, always in the same order.
fn describe(a: &Analysis) -> Vec<String> {
    vec![
        format!("Price moved {:+.2}% (open vs last close) over the 8h after funding", a.eight_hour_variation_pct),
        format!("Drawdown from open within 10 minutes: {:.2}%", a.ten_minute_variation_pct),
        format!("Daily trend: {}", a.daily_trend),
        format!("Weekly trend: {}", a.weekly_trend),
        format!("Annualized 1m volatility index: {:.2}", a.volatility_index),
        format!("Market sentiment: {}", a.market_sentiment),
    ]
}
