//! Classification & cohort engine.
//!
//! Buckets entities into ordered classes by a scalar aggregate, and tracks
//! first-seen cohorts and new-vs-returning splits per time bucket.
//!
//! Threshold sets are data (see data/thresholds/), not code: every class
//! chart uses the same `ThresholdSet::class_index` with a different set.

use crate::{
    error::{MetricsError, MetricsResult},
    query::TimeBucket,
    types::{Address, StakingRecord, Tokens},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const TXN_COUNT:       &str = "txn_count";
pub const STAKING_VOLUME:  &str = "staking_volume";
pub const STAKING_PER_TXN: &str = "staking_per_txn";
pub const REWARD_VOLUME:   &str = "reward_volume";
pub const REWARD_PER_TXN:  &str = "reward_per_txn";

// ── Threshold sets ───────────────────────────────────────────────────────────

/// An ordered partition of the non-negative reals.
///
/// `value <= breakpoints[0]` is class 0, `breakpoints[i-1] < value <= breakpoints[i]`
/// is class i, and anything above the last breakpoint is the overflow class.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ThresholdSet {
    name:        String,
    breakpoints: Vec<f64>,
    labels:      Vec<String>,
}

impl ThresholdSet {
    pub fn new(
        name: impl Into<String>,
        breakpoints: Vec<f64>,
        labels: Vec<String>,
    ) -> MetricsResult<Self> {
        let name = name.into();
        let invalid = |reason: String| MetricsError::InvalidThresholds { name: name.clone(), reason };

        if breakpoints.iter().any(|b| !b.is_finite()) {
            return Err(invalid("breakpoints must be finite".into()));
        }
        if let Some(w) = breakpoints.windows(2).find(|w| w[0] >= w[1]) {
            return Err(invalid(format!(
                "breakpoints must be strictly increasing ({} then {})",
                w[0], w[1]
            )));
        }
        if labels.len() != breakpoints.len() + 1 {
            return Err(invalid(format!(
                "{} breakpoints need {} labels, got {}",
                breakpoints.len(),
                breakpoints.len() + 1,
                labels.len()
            )));
        }
        Ok(Self { name, breakpoints, labels })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn breakpoints(&self) -> &[f64] {
        &self.breakpoints
    }

    /// Class of `value`. Upper bounds are inclusive.
    pub fn class_index(&self, value: f64) -> usize {
        self.breakpoints.partition_point(|b| *b < value)
    }

    pub fn label(&self, value: f64) -> &str {
        &self.labels[self.class_index(value)]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassCount {
    pub class_index: usize,
    pub class:       String,
    pub count:       u64,
}

/// Count values per class. Every class is present, in order, even when empty.
pub fn class_distribution(set: &ThresholdSet, values: impl IntoIterator<Item = f64>) -> Vec<ClassCount> {
    let mut counts = vec![0u64; set.labels().len()];
    for v in values {
        counts[set.class_index(v)] += 1;
    }
    counts
        .into_iter()
        .enumerate()
        .map(|(class_index, count)| ClassCount {
            class_index,
            class: set.labels()[class_index].clone(),
            count,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountBucket {
    pub txn_count: u64,
    pub entities:  u64,
}

/// Exact histogram: how many entities have exactly n transactions.
pub fn count_histogram(counts: impl IntoIterator<Item = u64>) -> Vec<CountBucket> {
    let mut hist: BTreeMap<u64, u64> = BTreeMap::new();
    for c in counts {
        *hist.entry(c).or_insert(0) += 1;
    }
    hist.into_iter()
        .map(|(txn_count, entities)| CountBucket { txn_count, entities })
        .collect()
}

// ── Per-entity aggregates ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityTotals {
    pub entity:     Address,
    /// Distinct transactions.
    pub txn_count:  u64,
    pub volume:     Tokens,
    pub first_date: NaiveDate,
}

/// One row per entity, ordered by address.
pub fn entity_totals(records: &[StakingRecord]) -> Vec<EntityTotals> {
    struct Acc<'a> {
        txs:    BTreeSet<&'a str>,
        volume: Tokens,
        first:  NaiveDate,
    }

    let mut by_entity: BTreeMap<&str, Acc> = BTreeMap::new();
    for r in records {
        let acc = by_entity.entry(r.entity.as_str()).or_insert_with(|| Acc {
            txs:    BTreeSet::new(),
            volume: 0.0,
            first:  r.date(),
        });
        acc.txs.insert(r.tx_id.as_str());
        acc.volume += r.amount;
        acc.first = acc.first.min(r.date());
    }

    by_entity
        .into_iter()
        .map(|(entity, acc)| EntityTotals {
            entity:     entity.to_string(),
            txn_count:  acc.txs.len() as u64,
            volume:     acc.volume,
            first_date: acc.first,
        })
        .collect()
}

/// Amount per distinct transaction (a transaction may carry several rows).
pub fn tx_amounts(records: &[StakingRecord]) -> Vec<Tokens> {
    let mut by_tx: BTreeMap<&str, Tokens> = BTreeMap::new();
    for r in records {
        *by_tx.entry(r.tx_id.as_str()).or_insert(0.0) += r.amount;
    }
    by_tx.into_values().collect()
}

// ── Cohorts ──────────────────────────────────────────────────────────────────

/// First qualifying activity date per entity. Later activity never moves it.
pub fn first_seen(records: &[StakingRecord]) -> BTreeMap<Address, NaiveDate> {
    let mut first: BTreeMap<Address, NaiveDate> = BTreeMap::new();
    for r in records {
        first
            .entry(r.entity.clone())
            .and_modify(|d| *d = (*d).min(r.date()))
            .or_insert_with(|| r.date());
    }
    first
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinCohort {
    pub period_start:        NaiveDate,
    pub new_entities:        u64,
    pub cumulative_entities: u64,
}

/// Cohort sizes by join period, ascending, with a running total.
pub fn join_cohorts(first_seen: &BTreeMap<Address, NaiveDate>, bucket: TimeBucket) -> Vec<JoinCohort> {
    let mut per_period: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for date in first_seen.values() {
        *per_period.entry(bucket.truncate(*date)).or_insert(0) += 1;
    }
    let mut cumulative = 0u64;
    per_period
        .into_iter()
        .map(|(period_start, new_entities)| {
            cumulative += new_entities;
            JoinCohort { period_start, new_entities, cumulative_entities: cumulative }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrowthRow {
    pub date:                NaiveDate,
    pub total_active:        u64,
    pub new_entities:        u64,
    pub returning_entities:  u64,
    pub cumulative_entities: u64,
}

/// New vs returning entities per active bucket.
///
/// `new` counts entities whose first-ever activity (from `first_seen`) falls
/// in the bucket; `returning = total_active - new`. A bucket where `new`
/// exceeds the active total means `first_seen` and `records` disagree, and is
/// reported as a `DataIntegrity` error rather than clamped.
pub fn new_vs_returning(
    records: &[StakingRecord],
    first_seen: &BTreeMap<Address, NaiveDate>,
    bucket: TimeBucket,
) -> MetricsResult<Vec<GrowthRow>> {
    let mut active: BTreeMap<NaiveDate, BTreeSet<&str>> = BTreeMap::new();
    for r in records {
        active
            .entry(bucket.truncate(r.date()))
            .or_default()
            .insert(r.entity.as_str());
    }

    let cohorts: BTreeMap<NaiveDate, JoinCohort> = join_cohorts(first_seen, bucket)
        .into_iter()
        .map(|c| (c.period_start, c))
        .collect();

    let mut rows = Vec::with_capacity(active.len());
    for (date, entities) in active {
        let total_active = entities.len() as u64;
        let new_entities = cohorts.get(&date).map_or(0, |c| c.new_entities);
        let cumulative_entities = cohorts
            .range(..=date)
            .next_back()
            .map_or(0, |(_, c)| c.cumulative_entities);

        let Some(returning_entities) = total_active.checked_sub(new_entities) else {
            let detail = format!(
                "bucket {date}: {new_entities} new entities but only {total_active} active"
            );
            log::warn!("new_vs_returning integrity violation: {detail}");
            return Err(MetricsError::DataIntegrity {
                query: "new_vs_returning".into(),
                detail,
            });
        };

        rows.push(GrowthRow {
            date,
            total_active,
            new_entities,
            returning_entities,
            cumulative_entities,
        });
    }
    Ok(rows)
}
