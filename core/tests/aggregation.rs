//! Aggregation & windowing tests.
//!
//! Tests cover: bucket statistics, running totals over sparse buckets,
//! per-action shares, lookback windows and event listings.

use chrono::{NaiveDate, NaiveDateTime};
use staking_metrics_core::{
    aggregation_engine::{
        bucket_rollup, large_events, lookback_summaries, median, most_recent, rollup_by_action,
        summarize, totals_by_action, Lookback,
    },
    query::TimeBucket,
    types::{StakingAction, StakingRecord},
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn at(date: NaiveDate, hour: u32) -> NaiveDateTime {
    date.and_hms_opt(hour, 0, 0).unwrap()
}

fn record(date: NaiveDate, entity: &str, tx: &str, action: StakingAction, amount: f64) -> StakingRecord {
    StakingRecord {
        timestamp: at(date, 10),
        tx_id: tx.into(),
        entity: entity.into(),
        validator: "V1".into(),
        action,
        amount,
        source_validator: None,
    }
}

fn delegate(date: NaiveDate, entity: &str, tx: &str, amount: f64) -> StakingRecord {
    record(date, entity, tx, StakingAction::Delegate, amount)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn median_handles_odd_and_even_lengths() {
    assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
    assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
    assert_eq!(median(&[]), None);
}

/// Summary statistics count distinct transactions and entities.
#[test]
fn summary_covers_counts_and_amount_statistics() {
    let d = date(2024, 2, 1);
    let records = vec![
        delegate(d, "A", "t1", 10.0),
        delegate(d, "A", "t2", 30.0),
        delegate(d, "B", "t3", 20.0),
        delegate(d, "B", "t3", 40.0),
    ];
    let s = summarize(&records).unwrap();
    assert_eq!(s.txn_count, 3);
    assert_eq!(s.entity_count, 2);
    assert_eq!(s.volume, 100.0);
    assert_eq!(s.average, 25.0);
    assert_eq!(s.median, 25.0);
    assert_eq!(s.maximum, 40.0);
    assert_eq!(s.volume_per_entity, 50.0);
    assert_eq!(s.txns_per_entity, 1.5);

    assert!(summarize(&[]).is_none());
}

/// Empty buckets are absent, and the running total carries straight across the gap.
#[test]
fn running_totals_carry_across_sparse_buckets() {
    let records = vec![
        delegate(date(2024, 1, 3), "A", "t1", 5.0),
        delegate(date(2024, 1, 4), "B", "t2", 7.0),
        // No activity in February.
        delegate(date(2024, 3, 15), "A", "t3", 8.0),
    ];
    let rows = bucket_rollup(&records, TimeBucket::Month);

    let starts: Vec<NaiveDate> = rows.iter().map(|r| r.bucket_start).collect();
    assert_eq!(starts, vec![date(2024, 1, 1), date(2024, 3, 1)]);
    assert_eq!(rows[0].running_volume, 12.0);
    assert_eq!(rows[1].stats.volume, 8.0);
    assert_eq!(rows[1].running_volume, 20.0);
    assert_eq!(rows[1].running_txn_count, 3);

    for pair in rows.windows(2) {
        assert!(pair[1].running_volume >= pair[0].running_volume);
    }
}

/// Week buckets start on Monday.
#[test]
fn weekly_buckets_group_by_monday() {
    // 2024-01-07 is a Sunday; 2024-01-08 a Monday.
    let records = vec![
        delegate(date(2024, 1, 7), "A", "t1", 1.0),
        delegate(date(2024, 1, 8), "A", "t2", 1.0),
    ];
    let rows = bucket_rollup(&records, TimeBucket::Week);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].bucket_start, date(2024, 1, 1));
    assert_eq!(rows[1].bucket_start, date(2024, 1, 8));
}

/// Per-action rows carry their share of the bucket; shares in a bucket sum to 1.
#[test]
fn action_shares_sum_to_one_per_bucket() {
    let d = date(2024, 4, 2);
    let records = vec![
        record(d, "A", "t1", StakingAction::Delegate, 60.0),
        record(d, "B", "t2", StakingAction::Undelegate, 30.0),
        record(d, "C", "t3", StakingAction::Redelegate, 10.0),
    ];
    let rows = rollup_by_action(&records, TimeBucket::Day);
    assert_eq!(rows.len(), 3);
    let volume_share: f64 = rows.iter().map(|r| r.volume_share).sum();
    let count_share: f64 = rows.iter().map(|r| r.txn_count_share).sum();
    assert!((volume_share - 1.0).abs() < 1e-12);
    assert!((count_share - 1.0).abs() < 1e-12);
    assert_eq!(rows[0].action, StakingAction::Delegate);
    assert_eq!(rows[0].volume_share, 0.6);

    let totals = totals_by_action(&records);
    assert_eq!(totals[0].action, StakingAction::Delegate);
    assert_eq!(totals[2].action, StakingAction::Redelegate);
}

/// 24h is yesterday only; 7d, 30d and 1y end today.
#[test]
fn lookback_windows_match_their_definitions() {
    let today = date(2024, 3, 31);
    assert_eq!(Lookback::Day.window(today), (date(2024, 3, 30), date(2024, 3, 30)));
    assert_eq!(Lookback::Week.window(today), (date(2024, 3, 25), today));
    assert_eq!(Lookback::Month.window(today), (date(2024, 3, 2), today));
    assert_eq!(Lookback::Year.window(today), (date(2023, 4, 2), today));

    let records = vec![
        delegate(today, "A", "t1", 1.0),
        delegate(date(2024, 3, 30), "B", "t2", 2.0),
        delegate(date(2024, 3, 20), "C", "t3", 4.0),
        delegate(date(2023, 12, 1), "D", "t4", 8.0),
        delegate(date(2022, 1, 1), "E", "t5", 16.0),
    ];
    let snapshots = lookback_summaries(&records, today);
    let volumes: Vec<f64> = snapshots.iter().map(|s| s.volume).collect();
    assert_eq!(volumes, vec![2.0, 3.0, 7.0, 15.0]);
    assert_eq!(snapshots[3].entity_count, 4);

    // No data still yields four zero rows.
    let empty = lookback_summaries(&[], today);
    assert_eq!(empty.len(), 4);
    assert!(empty.iter().all(|s| s.txn_count == 0));
}

/// Large events are filtered by amount and listed newest first.
#[test]
fn large_events_are_newest_first() {
    let records = vec![
        delegate(date(2024, 1, 1), "A", "t1", 150_000.0),
        delegate(date(2024, 1, 2), "B", "t2", 99_999.0),
        record(date(2024, 1, 3), "C", "t3", StakingAction::Undelegate, 100_000.0),
    ];
    let whales = large_events(&records, 100_000.0);
    assert_eq!(whales.len(), 2);
    assert_eq!(whales[0].entity, "C");
    assert_eq!(whales[0].action, StakingAction::Undelegate);
    assert_eq!(whales[1].entity, "A");

    let recent = most_recent(&records, 2);
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].date, date(2024, 1, 3));
}
