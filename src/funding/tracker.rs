use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::sync::Arc;

use crate::analysis::TrendAnalyzer;
use crate::candles::CandleWindowFetcher;
use crate::exchange::Granularity;
use crate::funding::record::FundingRateRecord;
use crate::funding::store::FundingRateStore;
use crate::logging::{log, log_symbol_failure, obj, v_num, v_str, Domain, Level};

const MINUTE_MS: i64 = 60_000;

#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    /// Funding rate (percent) at or below which a record is a key moment.
    pub key_moment_threshold_pct: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            key_moment_threshold_pct: -0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerState {
    NoHistory,
    HasHistory { last: FundingRateRecord },
}

/// What one tick did for one symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolOutcome {
    pub appended: bool,
    pub key_moment: bool,
    pub analyzed: usize,
    pub analysis_failures: usize,
}

/// Follow-up work that finished in a tick whose append failed. Attached as
/// context to the append error so callers can still account for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedFollowUps {
    pub analyzed: usize,
    pub analysis_failures: usize,
}

impl fmt::Display for CompletedFollowUps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "append failed after {} analyses ({} failed)",
            self.analyzed, self.analysis_failures
        )
    }
}

/// Per-symbol funding history driver: append the current period, then score
/// earlier key moments whose aftermath has elapsed.
pub struct FundingRateTracker {
    fetcher: CandleWindowFetcher,
    analyzer: TrendAnalyzer,
    store: Arc<dyn FundingRateStore>,
    cfg: TrackerConfig,
}

impl FundingRateTracker {
    pub fn new(fetcher: CandleWindowFetcher, store: Arc<dyn FundingRateStore>, cfg: TrackerConfig) -> Self {
        Self {
            analyzer: TrendAnalyzer::new(fetcher.clone()),
            fetcher,
            store,
            cfg,
        }
    }

    pub fn store(&self) -> &Arc<dyn FundingRateStore> {
        &self.store
    }

    pub async fn state(&self, symbol: &str) -> Result<TrackerState> {
        Ok(match self.store.get_last(symbol).await? {
            Some(last) => TrackerState::HasHistory { last },
            None => TrackerState::NoHistory,
        })
    }

    /// Run whichever path the symbol's state calls for.
    pub async fn process_symbol(&self, symbol: &str, exec_ms: i64) -> Result<SymbolOutcome> {
        match self.state(symbol).await? {
            TrackerState::NoHistory => self.seed(symbol, exec_ms).await,
            TrackerState::HasHistory { last } => self.advance(symbol, exec_ms, &last).await,
        }
    }

    /// First record for a symbol. Nothing earlier exists to analyze.
    pub async fn seed(&self, symbol: &str, exec_ms: i64) -> Result<SymbolOutcome> {
        let record = self.current_record(symbol, exec_ms).await?;
        let key_moment = record.key_moment;
        self.store.append(symbol, record).await?;
        log_appended(symbol, exec_ms, key_moment, "seed");
        Ok(SymbolOutcome {
            appended: true,
            key_moment,
            ..SymbolOutcome::default()
        })
    }

    /// Append the current period, then follow up on earlier key moments.
    ///
    /// The follow-up runs even when the append fails. The append error is
    /// still returned, with a [`CompletedFollowUps`] context carrying the
    /// follow-up counts.
    pub async fn advance(&self, symbol: &str, exec_ms: i64, last: &FundingRateRecord) -> Result<SymbolOutcome> {
        let mut outcome = SymbolOutcome::default();

        let appended = if last.period_ts_ms == exec_ms {
            log(
                Level::Debug,
                Domain::Funding,
                "append_skipped",
                obj(&[("symbol", v_str(symbol)), ("period_ts_ms", v_num(exec_ms as f64))]),
            );
            Ok(())
        } else {
            match self.current_record(symbol, exec_ms).await {
                Ok(record) => {
                    let key_moment = record.key_moment;
                    let res = self.store.append(symbol, record).await;
                    if res.is_ok() {
                        outcome.appended = true;
                        outcome.key_moment = key_moment;
                        log_appended(symbol, exec_ms, key_moment, "advance");
                    }
                    res
                }
                Err(err) => Err(err),
            }
        };

        let (analyzed, failures) = self.follow_up(symbol, exec_ms).await?;
        outcome.analyzed = analyzed;
        outcome.analysis_failures = failures;

        appended.map(|_| outcome).map_err(|err| {
            err.context(CompletedFollowUps {
                analyzed,
                analysis_failures: failures,
            })
        })
    }

    /// Analyze every retained key moment still awaiting analysis that
    /// belongs to an earlier period than `exec_ms`. Failures leave the record
    /// pending for a later tick; only eviction at the history cap drops it.
    async fn follow_up(&self, symbol: &str, exec_ms: i64) -> Result<(usize, usize)> {
        let pending = self.store.pending(symbol).await?;

        let mut analyzed = 0;
        let mut failures = 0;
        for (index, record) in pending {
            if record.period_ts_ms >= exec_ms {
                continue;
            }
            let result = match self
                .analyzer
                .analyze(symbol, record.period_ts_ms, record.funding_rate_pct)
                .await
            {
                Ok(analysis) => self.store.update_analysis(symbol, index, analysis).await,
                Err(err) => Err(err.into()),
            };
            match result {
                Ok(()) => analyzed += 1,
                Err(err) => {
                    failures += 1;
                    log_symbol_failure(symbol, "analysis", &format!("period {}: {:#}", record.period_ts_ms, err));
                }
            }
        }
        Ok((analyzed, failures))
    }

    /// Current funding rate plus the close of the 1m bar opening at `exec_ms`.
    async fn current_record(&self, symbol: &str, exec_ms: i64) -> Result<FundingRateRecord> {
        let page = self
            .fetcher
            .exchange()
            .fetch_funding_rate_page(symbol, 1, 0)
            .await
            .with_context(|| format!("{}: current funding rate", symbol))?;
        let entry = page
            .first()
            .ok_or_else(|| anyhow!("{}: exchange returned no funding rate", symbol))?;

        let bars = self
            .fetcher
            .fetch(symbol, Granularity::M1, exec_ms, exec_ms + MINUTE_MS - 1)
            .await
            .with_context(|| format!("{}: index price", symbol))?;
        let bar = bars
            .bars
            .iter()
            .find(|c| c.open_time_ms == exec_ms)
            .ok_or_else(|| anyhow!("{}: no 1m bar at period {}", symbol, exec_ms))?;

        Ok(FundingRateRecord::new(
            exec_ms,
            entry.rate_pct(),
            bar.close,
            self.cfg.key_moment_threshold_pct,
        ))
    }
}

fn log_appended(symbol: &str, exec_ms: i64, key_moment: bool, path: &str) {
    log(
        if key_moment { Level::Info } else { Level::Debug },
        Domain::Funding,
        "record_appended",
        obj(&[
            ("symbol", v_str(symbol)),
            ("period_ts_ms", v_num(exec_ms as f64)),
            ("key_moment", serde_json::Value::Bool(key_moment)),
            ("path", v_str(path)),
        ]),
    );
}
