//! Funding-rate history: records, persistence, the per-symbol tracker, and
//! funding boundary arithmetic.

pub mod clock;
pub mod record;
pub mod store;
pub mod tracker;

pub use record::{FundingRateRecord, RecordStatus};
pub use store::{FundingRateStore, MemoryFundingRateStore, SqliteFundingRateStore};
pub use tracker::{CompletedFollowUps, FundingRateTracker, SymbolOutcome, TrackerConfig, TrackerState};
