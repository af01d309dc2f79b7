//! Aggregation & windowing engine.
//!
//! Time-bucketed rollups (day/week/month) with running totals, per-action
//! breakdowns, whole-window summaries and fixed lookback snapshots.
//!
//! Bucket series are sparse: a bucket with no records has no row. Running
//! totals are taken over the emitted rows in ascending time order, so they
//! carry straight across a gap.

use crate::{
    cohort_engine::EntityTotals,
    query::TimeBucket,
    types::{Address, StakingAction, StakingRecord, Tokens},
};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub fn round_dp(value: f64, dp: u32) -> f64 {
    let factor = 10f64.powi(dp as i32);
    (value * factor).round() / factor
}

/// Median of `values` (mean of the middle pair for even lengths).
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

// ── Summaries ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    /// Distinct transactions.
    pub txn_count:         u64,
    /// Distinct participating entities.
    pub entity_count:      u64,
    pub volume:            Tokens,
    pub average:           Tokens,
    pub median:            Tokens,
    pub maximum:           Tokens,
    pub volume_per_entity: Tokens,
    pub txns_per_entity:   f64,
}

/// Summary over a set of records, or None when there is nothing to summarise.
pub fn summarize<'a>(records: impl IntoIterator<Item = &'a StakingRecord>) -> Option<Summary> {
    let mut txs: BTreeSet<&str> = BTreeSet::new();
    let mut entities: BTreeSet<&str> = BTreeSet::new();
    let mut amounts: Vec<f64> = Vec::new();
    for r in records {
        txs.insert(r.tx_id.as_str());
        entities.insert(r.entity.as_str());
        amounts.push(r.amount);
    }
    let med = median(&amounts)?;

    let volume: Tokens = amounts.iter().sum();
    let maximum = amounts.iter().copied().fold(f64::MIN, f64::max);
    let entity_count = entities.len() as u64;
    let txn_count = txs.len() as u64;
    Some(Summary {
        txn_count,
        entity_count,
        volume,
        average: volume / amounts.len() as f64,
        median: med,
        maximum,
        volume_per_entity: volume / entity_count as f64,
        txns_per_entity: txn_count as f64 / entity_count as f64,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityVolumeStats {
    pub median_entity_volume: Tokens,
    pub max_entity_volume:    Tokens,
}

/// Median and maximum of the per-entity totals.
pub fn entity_volume_stats(totals: &[EntityTotals]) -> Option<EntityVolumeStats> {
    let volumes: Vec<f64> = totals.iter().map(|t| t.volume).collect();
    Some(EntityVolumeStats {
        median_entity_volume: median(&volumes)?,
        max_entity_volume:    volumes.iter().copied().fold(f64::MIN, f64::max),
    })
}

// ── Bucketed rollups ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BucketStats {
    pub bucket_start:      NaiveDate,
    #[serde(flatten)]
    pub stats:             Summary,
    pub running_volume:    Tokens,
    pub running_txn_count: u64,
}

fn group_by_bucket<'a>(
    records: &'a [StakingRecord],
    bucket: TimeBucket,
) -> BTreeMap<NaiveDate, Vec<&'a StakingRecord>> {
    let mut groups: BTreeMap<NaiveDate, Vec<&StakingRecord>> = BTreeMap::new();
    for r in records {
        groups.entry(bucket.truncate(r.date())).or_default().push(r);
    }
    groups
}

/// One row per non-empty bucket, ascending, with running volume and count.
pub fn bucket_rollup(records: &[StakingRecord], bucket: TimeBucket) -> Vec<BucketStats> {
    let mut running_volume = 0.0;
    let mut running_txn_count = 0u64;
    group_by_bucket(records, bucket)
        .into_iter()
        .filter_map(|(bucket_start, rows)| {
            let stats = summarize(rows)?;
            running_volume += stats.volume;
            running_txn_count += stats.txn_count;
            Some(BucketStats { bucket_start, stats, running_volume, running_txn_count })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionBucketStats {
    pub bucket_start:     NaiveDate,
    pub action:           StakingAction,
    #[serde(flatten)]
    pub stats:            Summary,
    /// This action's share of the bucket's volume, 0..=1.
    pub volume_share:     f64,
    /// This action's share of the bucket's transactions, 0..=1.
    pub txn_count_share:  f64,
}

/// One row per (non-empty bucket, action), ordered by bucket then action.
pub fn rollup_by_action(records: &[StakingRecord], bucket: TimeBucket) -> Vec<ActionBucketStats> {
    let mut out = Vec::new();
    for (bucket_start, rows) in group_by_bucket(records, bucket) {
        let mut by_action: BTreeMap<StakingAction, Vec<&StakingRecord>> = BTreeMap::new();
        for r in rows {
            by_action.entry(r.action).or_default().push(r);
        }
        let per_action: Vec<(StakingAction, Summary)> = by_action
            .into_iter()
            .filter_map(|(action, rows)| summarize(rows).map(|s| (action, s)))
            .collect();
        let bucket_volume: f64 = per_action.iter().map(|(_, s)| s.volume).sum();
        let bucket_txns: u64 = per_action.iter().map(|(_, s)| s.txn_count).sum();

        for (action, stats) in per_action {
            let volume_share = if bucket_volume > 0.0 { stats.volume / bucket_volume } else { 0.0 };
            let txn_count_share = if bucket_txns > 0 {
                stats.txn_count as f64 / bucket_txns as f64
            } else {
                0.0
            };
            out.push(ActionBucketStats { bucket_start, action, stats, volume_share, txn_count_share });
        }
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionTotals {
    pub action: StakingAction,
    #[serde(flatten)]
    pub stats:  Summary,
}

/// Whole-window summary per action, largest volume first.
pub fn totals_by_action(records: &[StakingRecord]) -> Vec<ActionTotals> {
    let mut by_action: BTreeMap<StakingAction, Vec<&StakingRecord>> = BTreeMap::new();
    for r in records {
        by_action.entry(r.action).or_default().push(r);
    }
    let mut out: Vec<ActionTotals> = by_action
        .into_iter()
        .filter_map(|(action, rows)| summarize(rows).map(|stats| ActionTotals { action, stats }))
        .collect();
    out.sort_by(|a, b| b.stats.volume.total_cmp(&a.stats.volume).then(a.action.cmp(&b.action)));
    out
}

// ── Lookback windows ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Lookback {
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "1y")]
    Year,
}

impl Lookback {
    pub const ALL: [Lookback; 4] = [Lookback::Day, Lookback::Week, Lookback::Month, Lookback::Year];

    pub fn label(&self) -> &'static str {
        match self {
            Lookback::Day   => "24h",
            Lookback::Week  => "7d",
            Lookback::Month => "30d",
            Lookback::Year  => "1y",
        }
    }

    /// Inclusive date window relative to `today`.
    /// The 24h window is the last full day; the others end today.
    pub fn window(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            Lookback::Day   => (today - Duration::days(1), today - Duration::days(1)),
            Lookback::Week  => (today - Duration::days(6), today),
            Lookback::Month => (today - Duration::days(29), today),
            Lookback::Year  => (today - Duration::days(364), today),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LookbackSummary {
    pub window:       Lookback,
    pub start:        NaiveDate,
    pub end:          NaiveDate,
    pub txn_count:    u64,
    pub entity_count: u64,
    pub volume:       Tokens,
}

/// One snapshot row per lookback window, always four rows.
pub fn lookback_summaries(records: &[StakingRecord], today: NaiveDate) -> Vec<LookbackSummary> {
    Lookback::ALL
        .iter()
        .map(|lookback| {
            let (start, end) = lookback.window(today);
            let summary = summarize(records.iter().filter(|r| r.date() >= start && r.date() <= end));
            LookbackSummary {
                window:       *lookback,
                start,
                end,
                txn_count:    summary.as_ref().map_or(0, |s| s.txn_count),
                entity_count: summary.as_ref().map_or(0, |s| s.entity_count),
                volume:       summary.as_ref().map_or(0.0, |s| s.volume),
            }
        })
        .collect()
}

// ── Event listings ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LargeEvent {
    pub date:      NaiveDate,
    pub entity:    Address,
    pub amount:    Tokens,
    pub action:    StakingAction,
    pub validator: Address,
}

/// Individual records at or above `min_amount`, newest first.
pub fn large_events(records: &[StakingRecord], min_amount: Tokens) -> Vec<LargeEvent> {
    let mut out: Vec<&StakingRecord> = records.iter().filter(|r| r.amount >= min_amount).collect();
    out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.tx_id.cmp(&b.tx_id)));
    out.into_iter()
        .map(|r| LargeEvent {
            date:      r.date(),
            entity:    r.entity.clone(),
            amount:    r.amount,
            action:    r.action,
            validator: r.validator.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecentEvent {
    pub date:   NaiveDate,
    pub entity: Address,
    pub amount: Tokens,
}

/// The newest `limit` records.
pub fn most_recent(records: &[StakingRecord], limit: usize) -> Vec<RecentEvent> {
    let mut sorted: Vec<&StakingRecord> = records.iter().collect();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.tx_id.cmp(&b.tx_id)));
    sorted
        .into_iter()
        .take(limit)
        .map(|r| RecentEvent { date: r.date(), entity: r.entity.clone(), amount: r.amount })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedEntity {
    pub entity:     Address,
    pub volume:     Tokens,
    pub txn_count:  u64,
    pub first_date: NaiveDate,
    pub average:    Tokens,
}

/// Entities by total volume, largest first, ties by address.
pub fn top_by_volume(totals: &[EntityTotals], limit: Option<usize>) -> Vec<RankedEntity> {
    let mut sorted: Vec<&EntityTotals> = totals.iter().collect();
    sorted.sort_by(|a, b| b.volume.total_cmp(&a.volume).then_with(|| a.entity.cmp(&b.entity)));
    sorted
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|t| RankedEntity {
            entity:     t.entity.clone(),
            volume:     t.volume,
            txn_count:  t.txn_count,
            first_date: t.first_date,
            average:    if t.txn_count > 0 { t.volume / t.txn_count as f64 } else { 0.0 },
        })
        .collect()
}
