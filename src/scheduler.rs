//! Drives the funding tracker over the whole symbol universe, one tick per
//! funding boundary.
//!
//! Symbols are split into a seed list (no history yet) and an advance list.
//! Each list is chunked into batches; batches run one after another with a
//! fixed pause between them, and symbols inside a batch share a semaphore.

use anyhow::{Context, Result};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::error::ExchangeError;
use crate::exchange::{funding_period_hours, Exchange};
use crate::funding::clock;
use crate::funding::{CompletedFollowUps, FundingRateTracker, SymbolOutcome, TrackerState};
use crate::logging::{log, log_symbol_failure, obj, v_num, v_str, Domain, Level};

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub batch_pause: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 40,
            max_concurrency: 5,
            batch_pause: Duration::from_secs(60),
        }
    }
}

// =============================================================================
// Symbol universe
// =============================================================================

/// Tradable symbols and their funding cadence in hours.
#[derive(Debug, Clone, Default)]
pub struct SymbolUniverse {
    cadences: BTreeMap<String, u8>,
    excluded: Vec<String>,
}

impl SymbolUniverse {
    /// Detect each symbol's cadence. Symbols whose cadence is not 4h or 8h, or
    /// whose history cannot be read, are left out.
    pub async fn discover(exchange: &dyn Exchange, symbols: Option<Vec<String>>) -> Result<Self> {
        let symbols = match symbols {
            Some(s) => s,
            None => exchange
                .list_symbols()
                .await
                .with_context(|| format!("list {} symbols", exchange.name()))?,
        };

        let mut universe = Self::default();
        for symbol in symbols {
            match funding_period_hours(exchange, &symbol).await {
                Ok(hours) => {
                    universe.cadences.insert(symbol, hours);
                }
                Err(err @ ExchangeError::UnknownFundingSchedule { .. }) => {
                    log(
                        Level::Warn,
                        Domain::Scheduler,
                        "symbol_excluded",
                        obj(&[("symbol", v_str(&symbol)), ("error", v_str(&err.to_string()))]),
                    );
                    universe.excluded.push(symbol);
                }
                Err(err) => {
                    log_symbol_failure(&symbol, "funding_period", &err);
                    universe.excluded.push(symbol);
                }
            }
        }

        log(
            Level::Info,
            Domain::Scheduler,
            "universe_discovered",
            obj(&[
                ("exchange", v_str(exchange.name())),
                ("symbols", v_num(universe.cadences.len() as f64)),
                ("excluded", v_num(universe.excluded.len() as f64)),
            ]),
        );
        Ok(universe)
    }

    pub fn from_cadences<I, S>(cadences: I) -> Self
    where
        I: IntoIterator<Item = (S, u8)>,
        S: Into<String>,
    {
        Self {
            cadences: cadences.into_iter().map(|(s, h)| (s.into(), h)).collect(),
            excluded: Vec::new(),
        }
    }

    /// Symbols that settle at `exec_ms`, in name order.
    pub fn due(&self, exec_ms: i64) -> Vec<String> {
        self.cadences
            .iter()
            .filter(|(_, h)| clock::is_due(exec_ms, **h))
            .map(|(s, _)| s.clone())
            .collect()
    }

    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    pub fn len(&self) -> usize {
        self.cadences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cadences.is_empty()
    }
}

// =============================================================================
// Tick
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub exec_ms: i64,
    pub seeded: usize,
    pub advanced: usize,
    pub key_moments: usize,
    pub analyzed: usize,
    pub analysis_failures: usize,
    pub batches: usize,
    /// Symbols whose work failed this tick; they are retried on the next one.
    pub failed: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Path {
    Seed,
    Advance,
}

impl Path {
    fn as_str(self) -> &'static str {
        match self {
            Path::Seed => "seed",
            Path::Advance => "advance",
        }
    }
}

pub struct BatchScheduler {
    tracker: Arc<FundingRateTracker>,
    cfg: SchedulerConfig,
}

impl BatchScheduler {
    pub fn new(tracker: Arc<FundingRateTracker>, cfg: SchedulerConfig) -> Self {
        Self {
            tracker,
            cfg: SchedulerConfig {
                batch_size: cfg.batch_size.max(1),
                max_concurrency: cfg.max_concurrency.max(1),
                batch_pause: cfg.batch_pause,
            },
        }
    }

    /// One tick at funding boundary `exec_ms`. Per-symbol failures are
    /// collected in the report and never abort the tick.
    pub async fn run_tick(&self, symbols: &[String], exec_ms: i64) -> TickReport {
        let mut report = TickReport {
            exec_ms,
            ..TickReport::default()
        };

        let mut seed = Vec::new();
        let mut advance = Vec::new();
        for symbol in symbols {
            match self.tracker.state(symbol).await {
                Ok(TrackerState::NoHistory) => seed.push((symbol.clone(), TrackerState::NoHistory)),
                Ok(state) => advance.push((symbol.clone(), state)),
                Err(err) => {
                    log_symbol_failure(symbol, "state", &format!("{:#}", err));
                    report.failed.push(symbol.clone());
                }
            }
        }

        log(
            Level::Info,
            Domain::Scheduler,
            "tick_start",
            obj(&[
                ("exec_ms", v_num(exec_ms as f64)),
                ("seed", v_num(seed.len() as f64)),
                ("advance", v_num(advance.len() as f64)),
            ]),
        );

        self.run_batches(Path::Seed, seed, exec_ms, &mut report).await;
        self.run_batches(Path::Advance, advance, exec_ms, &mut report).await;

        log(
            Level::Info,
            Domain::Scheduler,
            "tick_complete",
            obj(&[
                ("exec_ms", v_num(exec_ms as f64)),
                ("seeded", v_num(report.seeded as f64)),
                ("advanced", v_num(report.advanced as f64)),
                ("key_moments", v_num(report.key_moments as f64)),
                ("analyzed", v_num(report.analyzed as f64)),
                ("analysis_failures", v_num(report.analysis_failures as f64)),
                ("failed", v_num(report.failed.len() as f64)),
                ("batches", v_num(report.batches as f64)),
            ]),
        );
        report
    }

    async fn run_batches(
        &self,
        path: Path,
        work: Vec<(String, TrackerState)>,
        exec_ms: i64,
        report: &mut TickReport,
    ) {
        let batch_count = (work.len() + self.cfg.batch_size - 1) / self.cfg.batch_size;
        for (i, batch) in work.chunks(self.cfg.batch_size).enumerate() {
            log(
                Level::Info,
                Domain::Scheduler,
                "batch_start",
                obj(&[
                    ("path", v_str(path.as_str())),
                    ("batch", v_num((i + 1) as f64)),
                    ("of", v_num(batch_count as f64)),
                    ("symbols", v_num(batch.len() as f64)),
                ]),
            );

            let semaphore = Arc::new(Semaphore::new(self.cfg.max_concurrency));
            let tasks: Vec<_> = batch
                .iter()
                .map(|(symbol, state)| {
                    let semaphore = Arc::clone(&semaphore);
                    async move {
                        let result = match semaphore.acquire().await {
                            Ok(_permit) => self.run_symbol(symbol, state, exec_ms).await,
                            Err(err) => Err(err.into()),
                        };
                        (symbol, result)
                    }
                })
                .collect();
            let results = join_all(tasks).await;
            report.batches += 1;

            for (symbol, result) in results {
                match result {
                    Ok(outcome) => {
                        match path {
                            Path::Seed => report.seeded += 1,
                            Path::Advance => report.advanced += 1,
                        }
                        report.key_moments += usize::from(outcome.appended && outcome.key_moment);
                        report.analyzed += outcome.analyzed;
                        report.analysis_failures += outcome.analysis_failures;
                    }
                    Err(err) => {
                        if let Some(done) = err.downcast_ref::<CompletedFollowUps>() {
                            report.analyzed += done.analyzed;
                            report.analysis_failures += done.analysis_failures;
                        }
                        log_symbol_failure(symbol, path.as_str(), &format!("{:#}", err));
                        report.failed.push(symbol.clone());
                    }
                }
            }

            if i + 1 < batch_count && !self.cfg.batch_pause.is_zero() {
                log(
                    Level::Debug,
                    Domain::Scheduler,
                    "batch_pause",
                    obj(&[("secs", v_num(self.cfg.batch_pause.as_secs_f64()))]),
                );
                tokio::time::sleep(self.cfg.batch_pause).await;
            }
        }
    }

    async fn run_symbol(&self, symbol: &str, state: &TrackerState, exec_ms: i64) -> Result<SymbolOutcome> {
        match state {
            TrackerState::NoHistory => self.tracker.seed(symbol, exec_ms).await,
            TrackerState::HasHistory { last } => self.tracker.advance(symbol, exec_ms, last).await,
        }
    }
}
