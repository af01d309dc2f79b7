//! Event source contract: the only way engines see ledger data.
//!
//! RULE: a source is a plain filtered-row provider. It applies the uniform
//! filters (successful transactions, native denomination, inclusive date
//! bounds, action set) and scales amounts to whole tokens. All analytical
//! work happens in the engines, never in the source.

use crate::{
    error::MetricsResult,
    types::{StakingAction, StakingRecord},
};
use chrono::NaiveDate;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct EventFilter {
    /// Empty means every action.
    pub actions: Vec<StakingAction>,
    pub from:    Option<NaiveDate>,
    pub to:      Option<NaiveDate>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn actions(actions: &[StakingAction]) -> Self {
        Self { actions: actions.to_vec(), ..Self::default() }
    }

    pub fn from(mut self, date: NaiveDate) -> Self {
        self.from = Some(date);
        self
    }

    pub fn to(mut self, date: NaiveDate) -> Self {
        self.to = Some(date);
        self
    }

    pub fn between(self, start: NaiveDate, end: NaiveDate) -> Self {
        self.from(start).to(end)
    }

    /// In-process equivalent of the warehouse predicate.
    pub fn matches(&self, record: &StakingRecord) -> bool {
        let date = record.date();
        (self.actions.is_empty() || self.actions.contains(&record.action))
            && self.from.map_or(true, |from| date >= from)
            && self.to.map_or(true, |to| date <= to)
    }
}

/// A read-only provider of filtered staking records.
/// Implementations must return records ordered by timestamp, then tx id.
pub trait EventSource: Send + Sync {
    fn fetch_events(&self, filter: &EventFilter) -> MetricsResult<Vec<StakingRecord>>;

    /// Number of logical reads served so far. Cache hits never increment it.
    fn queries_issued(&self) -> u64;
}
