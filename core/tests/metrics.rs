//! Named-query facade tests.
//!
//! Tests cover: windows clamped to today, opening balances carried into a
//! late window, leaderboard as-of and change dates, window filtering of
//! staker growth and cohorts, and the reward queries.

use chrono::NaiveDate;
use staking_metrics_core::{
    config::MetricsConfig,
    metrics::StakingMetrics,
    query::{QueryParams, TimeBucket},
    source::EventSource,
    store::WarehouseStore,
    types::{StakingAction, StakingEvent},
};
use std::sync::Arc;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// `tokens` is in whole tokens; the ledger stores base units.
fn fact(on: NaiveDate, tx: &str, delegator: &str, validator: &str, action: StakingAction, tokens: f64) -> StakingEvent {
    StakingEvent {
        timestamp: on.and_hms_opt(10, 0, 0).unwrap(),
        tx_id: tx.into(),
        entity_address: delegator.into(),
        validator_address: validator.into(),
        action,
        amount: (tokens * 1_000_000.0).round() as u64,
        currency: "uaxl".into(),
        success: true,
        source_validator: None,
    }
}

fn delegate(on: NaiveDate, tx: &str, delegator: &str, validator: &str, tokens: f64) -> StakingEvent {
    fact(on, tx, delegator, validator, StakingAction::Delegate, tokens)
}

fn claim(on: NaiveDate, tx: &str, delegator: &str, tokens: f64) -> StakingEvent {
    fact(on, tx, delegator, "V1", StakingAction::ClaimReward, tokens)
}

fn metrics_with(config: MetricsConfig, events: &[StakingEvent]) -> StakingMetrics<WarehouseStore> {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = WarehouseStore::in_memory(&config).expect("open warehouse");
    store.migrate().expect("migrate");
    store.insert_events(events).expect("insert");
    StakingMetrics::new(Arc::new(store), config)
}

fn params(bucket: TimeBucket, start: NaiveDate, end: NaiveDate) -> QueryParams {
    QueryParams::new(bucket, start, end).unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// A window that opens after today yields empty series without a read.
#[test]
fn window_after_today_is_empty() {
    let metrics = metrics_with(
        MetricsConfig::default_test(),
        &[delegate(date(2024, 1, 1), "t1", "A", "V1", 100.0)],
    );
    let future = params(TimeBucket::Day, date(2024, 2, 1), date(2024, 2, 10));
    let today = date(2024, 1, 15);

    assert!(metrics.net_staked_over_time(&future, today).unwrap().is_empty());
    assert!(metrics.nakamoto_series(&future, today).unwrap().is_empty());
    assert_eq!(metrics.source().queries_issued(), 0);
}

/// Stake delegated before the window is the window's opening balance, and
/// the series stops at today even when the window runs past it.
#[test]
fn late_window_opens_with_prior_stake() {
    let metrics = metrics_with(
        MetricsConfig::default_test(),
        &[
            delegate(date(2024, 1, 1), "t1", "A", "V1", 100.0),
            delegate(date(2024, 1, 10), "t2", "B", "V1", 50.0),
            fact(date(2024, 1, 12), "t3", "A", "V1", StakingAction::Undelegate, 30.0),
        ],
    );
    let window = params(TimeBucket::Day, date(2024, 1, 9), date(2024, 1, 12));
    let series = metrics.net_staked_over_time(&window, date(2024, 1, 11)).unwrap();

    let points: Vec<(NaiveDate, f64)> = series.iter().map(|p| (p.date, p.net_staked)).collect();
    assert_eq!(
        points,
        vec![
            (date(2024, 1, 9), 100.0),
            (date(2024, 1, 10), 150.0),
            (date(2024, 1, 11), 150.0),
        ]
    );

    let current = metrics.net_staked_current(date(2024, 1, 12)).unwrap();
    let current = Option::as_ref(&current).expect("stake on the day");
    assert_eq!(current.net_staked, 120.0);
    assert_eq!(current.total_supply, 1_215_160_193.0);
}

/// Standings are as of yesterday; change compares against 30 days before that.
#[test]
fn validator_leaderboard_uses_yesterday_and_thirty_day_change() {
    let metrics = metrics_with(
        MetricsConfig::default_test(),
        &[
            delegate(date(2024, 1, 5), "t1", "A", "V1", 100.0),
            delegate(date(2024, 1, 5), "t2", "B", "V2", 200.0),
            // Day of comparison: counted in the prior balance.
            delegate(date(2024, 1, 30), "t3", "E", "V1", 50.0),
            // After it: counted as change.
            delegate(date(2024, 1, 31), "t4", "B", "V2", 100.0),
            delegate(date(2024, 2, 10), "t5", "C", "V1", 50.0),
            // Today: not yet in the standings.
            delegate(date(2024, 3, 1), "t6", "D", "V3", 1_000.0),
        ],
    );
    let board = metrics.validator_leaderboard(date(2024, 3, 1)).unwrap();

    assert_eq!(board.len(), 2);
    assert_eq!(board[0].validator, "V2");
    assert_eq!(board[0].staked, 300.0);
    assert_eq!(board[0].change_pct, Some(50.0));
    assert_eq!(board[0].stakers, 1);

    assert_eq!(board[1].validator, "V1");
    assert_eq!(board[1].staked, 200.0);
    assert_eq!(board[1].change_pct, Some(33.33));
    assert_eq!(board[1].stakers, 3);
    assert_eq!(board[1].cumulative_stake_pct, 100.0);
}

/// Rows before the window are dropped; cumulative counts still include
/// everyone who joined earlier.
#[test]
fn staker_growth_and_cohorts_filter_to_window() {
    let metrics = metrics_with(
        MetricsConfig::default_test(),
        &[
            delegate(date(2024, 1, 3), "t1", "A", "V1", 10.0),
            delegate(date(2024, 1, 4), "t2", "B", "V1", 10.0),
            delegate(date(2024, 2, 5), "t3", "A", "V1", 10.0),
            delegate(date(2024, 2, 6), "t4", "C", "V1", 10.0),
            delegate(date(2024, 3, 7), "t5", "B", "V1", 10.0),
        ],
    );
    // Mid-month start still covers February.
    let window = params(TimeBucket::Month, date(2024, 2, 15), date(2024, 3, 31));

    let growth = metrics.stakers_over_time(&window).unwrap();
    let rows: Vec<(NaiveDate, u64, u64, u64, u64)> = growth
        .iter()
        .map(|r| (r.date, r.total_active, r.new_entities, r.returning_entities, r.cumulative_entities))
        .collect();
    assert_eq!(
        rows,
        vec![
            (date(2024, 2, 1), 2, 1, 1, 3),
            (date(2024, 3, 1), 1, 0, 1, 3),
        ]
    );

    let monthly = metrics.join_cohorts(&window, TimeBucket::Month).unwrap();
    assert_eq!(monthly.len(), 1);
    assert_eq!(monthly[0].period_start, date(2024, 2, 1));
    assert_eq!((monthly[0].new_entities, monthly[0].cumulative_entities), (1, 3));

    let quarterly = metrics.join_cohorts(&window, TimeBucket::Quarter).unwrap();
    assert_eq!(quarterly.len(), 1);
    assert_eq!(quarterly[0].period_start, date(2024, 1, 1));
    assert_eq!((quarterly[0].new_entities, quarterly[0].cumulative_entities), (3, 3));
}

/// Reward queries: summary, per-transaction classes, capped leaderboard and
/// newest-first listing. Foreign-denomination claims never count.
#[test]
fn reward_queries_report_claims() {
    let mut config = MetricsConfig::default_test();
    config.network.reward_leaderboard_limit = 2;
    let mut foreign = claim(date(2024, 1, 6), "r5", "D", 900.0);
    foreign.currency = "uusdc".into();

    let metrics = metrics_with(
        config,
        &[
            claim(date(2024, 1, 2), "r1", "A", 2.0),
            claim(date(2024, 1, 3), "r3", "B", 0.5),
            claim(date(2024, 1, 4), "r4", "C", 150.0),
            claim(date(2024, 1, 5), "r2", "A", 4.0),
            foreign,
        ],
    );
    let january = params(TimeBucket::Week, date(2024, 1, 1), date(2024, 1, 31));

    let stats = metrics.reward_stats(&january).unwrap();
    let summary = stats.summary.as_ref().unwrap();
    assert_eq!((summary.txn_count, summary.entity_count), (4, 3));
    assert_eq!(summary.volume, 156.5);
    assert_eq!(summary.maximum, 150.0);
    let per_entity = stats.per_entity.as_ref().unwrap();
    assert_eq!(per_entity.median_entity_volume, 6.0);
    assert_eq!(per_entity.max_entity_volume, 150.0);

    let classes = metrics.reward_txn_distribution(&january).unwrap();
    assert_eq!(classes.len(), 9);
    let counts: Vec<u64> = classes.iter().map(|c| c.count).collect();
    assert_eq!(counts, vec![1, 2, 0, 0, 1, 0, 0, 0, 0]);
    assert_eq!(classes[1].class, "1<V<=5 AXL");

    let top = metrics.top_reward_claimers(&january).unwrap();
    let ranked: Vec<(&str, f64)> = top.iter().map(|r| (r.entity.as_str(), r.volume)).collect();
    assert_eq!(ranked, vec![("C", 150.0), ("A", 6.0)]);
    assert_eq!(top[1].txn_count, 2);

    let recent = metrics.recent_claims(2).unwrap();
    let listed: Vec<(NaiveDate, &str)> = recent.iter().map(|r| (r.date, r.entity.as_str())).collect();
    assert_eq!(listed, vec![(date(2024, 1, 5), "A"), (date(2024, 1, 4), "C")]);
}
