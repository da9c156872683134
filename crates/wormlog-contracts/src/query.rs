//! Read-side query types.
//!
//! Filters are a viewing convenience only. Integrity is always established
//! over the full chain, never over a filtered subset.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::AuditRecord;

/// Criteria for `get_history`. Every `None` field matches anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryFilter {
    /// Inclusive lower sequence bound.
    pub from_seq: Option<u64>,
    /// Inclusive upper sequence bound.
    pub to_seq: Option<u64>,
    pub action_name: Option<String>,
    pub status: Option<String>,
    pub risk_tier: Option<String>,
    pub requires_approval: Option<bool>,
    /// Inclusive lower timestamp bound.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper timestamp bound.
    pub until: Option<DateTime<Utc>>,
}

impl HistoryFilter {
    pub fn action(mut self, action_name: impl Into<String>) -> Self {
        self.action_name = Some(action_name.into());
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn risk_tier(mut self, risk_tier: impl Into<String>) -> Self {
        self.risk_tier = Some(risk_tier.into());
        self
    }

    pub fn range(mut self, from_seq: u64, to_seq: u64) -> Self {
        self.from_seq = Some(from_seq);
        self.to_seq = Some(to_seq);
        self
    }

    /// Return true if `record` satisfies every set criterion.
    pub fn matches(&self, record: &AuditRecord) -> bool {
        fn eq(want: &Option<String>, got: &str) -> bool {
            want.as_deref().map_or(true, |w| w == got)
        }

        self.from_seq.map_or(true, |s| record.sequence_number >= s)
            && self.to_seq.map_or(true, |s| record.sequence_number <= s)
            && eq(&self.action_name, &record.action_name)
            && eq(&self.status, &record.status)
            && eq(&self.risk_tier, &record.risk_tier)
            && self
                .requires_approval
                .map_or(true, |r| record.requires_approval == r)
            && self.since.map_or(true, |t| record.timestamp >= t)
            && self.until.map_or(true, |t| record.timestamp < t)
    }
}

/// Aggregate counts over the whole ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total_events: u64,
    /// Record count per `status` value.
    pub by_status: BTreeMap<String, u64>,
    /// Records with `requires_approval = true`.
    pub approval_required: u64,
}

impl AuditSummary {
    /// Fold one record into the summary.
    pub fn observe(&mut self, record: &AuditRecord) {
        self.total_events += 1;
        *self.by_status.entry(record.status.clone()).or_insert(0) += 1;
        if record.requires_approval {
            self.approval_required += 1;
        }
    }

    pub fn count(&self, status: &str) -> u64 {
        self.by_status.get(status).copied().unwrap_or(0)
    }
}
