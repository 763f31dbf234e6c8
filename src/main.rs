use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use fundingwatch::analysis::TrendAnalyzer;
use fundingwatch::candles::CandleWindowFetcher;
use fundingwatch::config::Config;
use fundingwatch::exchange::{Exchange, ExchangeKind, HttpTransport};
use fundingwatch::funding::{clock, FundingRateStore, FundingRateTracker, SqliteFundingRateStore};
use fundingwatch::logging::{log, obj, v_num, v_str, Domain, Level};
use fundingwatch::rate_limit::RateLimiter;
use fundingwatch::scheduler::{BatchScheduler, SymbolUniverse};

/// Ticks fire on the finest cadence; 8h symbols are due every other tick.
const TICK_CADENCE_HOURS: u8 = 4;

struct App {
    cfg: Config,
    exchange: Arc<dyn Exchange>,
    fetcher: CandleWindowFetcher,
    scheduler: BatchScheduler,
}

impl App {
    fn build(cfg: Config) -> Result<Self> {
        let limiter = Arc::new(RateLimiter::new(cfg.exchange_rate_per_sec, cfg.exchange_burst));
        let transport = HttpTransport::new(&cfg.transport(), limiter)?;
        let exchange = ExchangeKind::parse(&cfg.exchange)?.build(&cfg, transport);
        let fetcher = CandleWindowFetcher::new(Arc::clone(&exchange));
        let store: Arc<dyn FundingRateStore> = Arc::new(
            SqliteFundingRateStore::open(&cfg.sqlite_path, cfg.history_cap).context("open funding store")?,
        );
        let tracker = Arc::new(FundingRateTracker::new(fetcher.clone(), store, cfg.tracker()));
        let scheduler = BatchScheduler::new(tracker, cfg.scheduler());
        Ok(Self {
            cfg,
            exchange,
            fetcher,
            scheduler,
        })
    }

    async fn tick(&self, exec_ms: i64) -> Result<()> {
        let universe = SymbolUniverse::discover(self.exchange.as_ref(), self.cfg.symbols.clone()).await?;
        if universe.is_empty() {
            log(
                Level::Warn,
                Domain::Scheduler,
                "tick_skipped",
                obj(&[("exec_ms", v_num(exec_ms as f64)), ("reason", v_str("no tracked symbols"))]),
            );
            return Ok(());
        }
        let due = universe.due(exec_ms);
        let report = self.scheduler.run_tick(&due, exec_ms).await;
        if !report.failed.is_empty() {
            log(
                Level::Warn,
                Domain::Scheduler,
                "tick_partial",
                obj(&[
                    ("exec_ms", v_num(exec_ms as f64)),
                    ("failed", v_str(&report.failed.join(","))),
                ]),
            );
        }
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        loop {
            let now = Utc::now().timestamp_millis();
            let boundary = clock::next_boundary(now, TICK_CADENCE_HOURS);
            let fire_at = boundary + self.cfg.tick_delay_secs as i64 * 1000;
            log(
                Level::Info,
                Domain::System,
                "tick_scheduled",
                obj(&[
                    ("boundary_ms", v_num(boundary as f64)),
                    ("sleep_secs", v_num(((fire_at - now) / 1000) as f64)),
                ]),
            );
            sleep(Duration::from_millis((fire_at - now).max(0) as u64)).await;
            if let Err(err) = self.tick(boundary).await {
                log(
                    Level::Error,
                    Domain::Scheduler,
                    "tick_failed",
                    obj(&[("exec_ms", v_num(boundary as f64)), ("error", v_str(&format!("{:#}", err)))]),
                );
            }
        }
    }

    async fn analyze(&self, symbol: &str, ts_ms: i64) -> Result<()> {
        let page = self.exchange.fetch_funding_rate_page(symbol, 1, 0).await?;
        let rate_pct = page
            .first()
            .map(|e| e.rate_pct())
            .ok_or_else(|| anyhow!("{}: no funding rate", symbol))?;
        let analysis = TrendAnalyzer::new(self.fetcher.clone())
            .analyze(symbol, ts_ms, rate_pct)
            .await?;
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        Ok(())
    }
}

fn usage() -> &'static str {
    "usage: fundingwatch [run | tick | analyze <SYMBOL> <TS_MS>]"
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cfg = Config::from_env();
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("exchange", v_str(&cfg.exchange)),
            ("command", v_str(args.get(1).map(String::as_str).unwrap_or("run"))),
        ]),
    );
    let app = App::build(cfg)?;

    match args.get(1).map(String::as_str) {
        None | Some("run") => app.run().await,
        Some("tick") => {
            let exec_ms = clock::last_boundary(Utc::now().timestamp_millis(), TICK_CADENCE_HOURS);
            app.tick(exec_ms).await
        }
        Some("analyze") => {
            let (symbol, ts) = match (args.get(2), args.get(3)) {
                (Some(s), Some(t)) => (s.to_uppercase(), t),
                _ => bail!(usage()),
            };
            let ts_ms: i64 = ts.parse().with_context(|| format!("bad timestamp {:?}", ts))?;
            app.analyze(&symbol, ts_ms).await
        }
        Some(other) => bail!("unknown command {:?}; {}", other, usage()),
    }
}
