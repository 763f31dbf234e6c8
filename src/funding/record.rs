use serde::{Deserialize, Serialize};

use crate::analysis::Analysis;

/// Where a record stands in the append-now, analyze-later cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecordStatus {
    /// Not a key moment; nothing to follow up.
    Seeded,
    /// Key moment whose aftermath has not been scored yet.
    AwaitingAnalysis,
    Analyzed { analysis: Analysis },
}

/// One funding period for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingRateRecord {
    /// Funding boundary the record belongs to (UTC ms).
    pub period_ts_ms: i64,
    pub funding_rate_pct: f64,
    pub index_price: f64,
    pub key_moment: bool,
    pub status: RecordStatus,
}

impl FundingRateRecord {
    /// New record; key moments start out awaiting analysis.
    pub fn new(period_ts_ms: i64, funding_rate_pct: f64, index_price: f64, threshold_pct: f64) -> Self {
        let key_moment = funding_rate_pct <= threshold_pct;
        Self {
            period_ts_ms,
            funding_rate_pct,
            index_price,
            key_moment,
            status: if key_moment {
                RecordStatus::AwaitingAnalysis
            } else {
                RecordStatus::Seeded
            },
        }
    }

    pub fn is_awaiting_analysis(&self) -> bool {
        matches!(self.status, RecordStatus::AwaitingAnalysis)
    }

    pub fn analysis(&self) -> Option<&Analysis> {
        match &self.status {
            RecordStatus::Analyzed { analysis } => Some(analysis),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_inclusive() {
        let r = FundingRateRecord::new(0, -0.5, 100.0, -0.5);
        assert!(r.key_moment);
        assert!(r.is_awaiting_analysis());
        let r = FundingRateRecord::new(0, -0.4999, 100.0, -0.5);
        assert!(!r.key_moment);
        assert_eq!(r.status, RecordStatus::Seeded);
        assert!(r.analysis().is_none());
    }

    #[test]
    fn status_is_tagged_in_json() {
        let r = FundingRateRecord::new(8, -0.75, 1.5, -0.5);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["status"]["state"], "awaiting_analysis");
        assert_eq!(json["periodTsMs"], 8);
        let back: FundingRateRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }
}
