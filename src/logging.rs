//! Structured logging for the funding-rate watcher.
//!
//! Every record is a single JSON object on its own line:
//! `{"ts", "run_id", "seq", "lvl", "component", "event", "symbol"?, "msg", "data"}`.
//! Records go to stdout and, when `LOG_DIR` is set, to
//! `<LOG_DIR>/<run_id>/events.jsonl`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

impl std::str::FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Level::Trace,
            "debug" => Level::Debug,
            "info" => Level::Info,
            "warn" | "warning" => Level::Warn,
            "error" => Level::Error,
            "fatal" => Level::Fatal,
            other => return Err(format!("unknown log level {:?}", other)),
        })
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Market,    // Candle windows, exchange calls, retries
    Funding,   // Funding-rate records, key moments
    Analysis,  // Trend / sentiment computation
    Scheduler, // Batches, ticks, universe discovery
    Store,     // Persistence
    System,    // Startup, shutdown
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Market => "market",
            Domain::Funding => "funding",
            Domain::Analysis => "analysis",
            Domain::Scheduler => "scheduler",
            Domain::Store => "store",
            Domain::System => "system",
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    min_level: Level,
    /// `None` lets every domain through.
    domains: Option<Vec<String>>,
    events: Option<Mutex<BufWriter<File>>>,
}

impl RunContext {
    fn allows(&self, level: Level, domain: Domain) -> bool {
        level >= self.min_level
            && self
                .domains
                .as_ref()
                .map_or(true, |ds| ds.iter().any(|d| d == domain.as_str()))
    }
}

fn domains_from_env() -> Option<Vec<String>> {
    match std::env::var("LOG_DOMAINS") {
        Ok(v) if v.trim() != "all" && !v.trim().is_empty() => {
            Some(v.split(',').map(|d| d.trim().to_ascii_lowercase()).collect())
        }
        _ => None,
    }
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("fw-{}-{}", ts_epoch_ms(), process::id()));
        let events = std::env::var("LOG_DIR").ok().and_then(|base| {
            let mut run_dir = PathBuf::from(base);
            run_dir.push(&run_id);
            if let Err(err) = create_dir_all(&run_dir) {
                eprintln!("[log] failed to create run dir: {}", err);
                return None;
            }
            match File::create(run_dir.join("events.jsonl")) {
                Ok(file) => Some(Mutex::new(BufWriter::new(file))),
                Err(err) => {
                    eprintln!("[log] failed to create events log: {}", err);
                    None
                }
            }
        });
        let min_level = std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Level::Info);
        RunContext {
            run_id,
            min_level,
            domains: domains_from_env(),
            events,
        }
    })
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["symbol", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Mutex<BufWriter<File>>, line: &str) {
    if let Ok(mut w) = writer.lock() {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    if !ctx.allows(level, domain) {
        return;
    }
    emit_record(ctx, level, domain.as_str(), event, fields);
}

fn emit_record(ctx: &RunContext, level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    let line = Value::Object(entry).to_string();
    if let Some(events) = &ctx.events {
        write_line(events, &line);
    }
    println!("{}", line);
}

// =============================================================================
// Domain helpers
// =============================================================================

/// A per-symbol failure that will be retried on the next tick.
pub fn log_symbol_failure(symbol: &str, stage: &str, err: &dyn std::fmt::Display) {
    log(
        Level::Warn,
        Domain::Funding,
        "symbol_failed",
        obj(&[
            ("symbol", v_str(symbol)),
            ("stage", v_str(stage)),
            ("error", v_str(&err.to_string())),
            ("retry", v_str("next_tick")),
        ]),
    );
}

pub fn log_retry(operation: &str, attempt: u32, max_attempts: u32, delay_ms: u64, err: &str) {
    log(
        Level::Warn,
        Domain::Market,
        "retry",
        obj(&[
            ("operation", v_str(operation)),
            ("attempt", v_num(attempt as f64)),
            ("max_attempts", v_num(max_attempts as f64)),
            ("delay_ms", v_num(delay_ms as f64)),
            ("error", v_str(err)),
        ]),
    );
}

// =============================================================================
// Field builders
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
