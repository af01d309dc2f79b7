//! Named-query facade: every dashboard table is one cached entry point here.
//!
//! RULES:
//!   - Parameters are validated before the event source is touched.
//!   - Each query fetches its own records and owns its intermediate tables.
//!   - Results are memoised under (query name, canonical parameters) for the
//!     life of the facade; a repeated call never reaches the source.
//!
//! Balance-derived queries fetch the full history up to the window end and
//! let reconstruction fold everything before the window into the opening
//! balance, so a late window still sees every prior delegation.

use crate::{
    aggregation_engine::{
        bucket_rollup, entity_volume_stats, large_events, lookback_summaries, most_recent,
        rollup_by_action, summarize, top_by_volume, totals_by_action, ActionBucketStats,
        ActionTotals, BucketStats, EntityVolumeStats, LargeEvent, Lookback, LookbackSummary,
        RankedEntity, RecentEvent, Summary,
    },
    balance_engine::{
        actor_deltas, net_staked_series, position_deltas, reconstruct, validator_deltas,
        NetStakedPoint,
    },
    calendar::Calendar,
    cohort_engine::{
        class_distribution, count_histogram, entity_totals, first_seen, join_cohorts,
        new_vs_returning, tx_amounts, ClassCount, CountBucket, GrowthRow, JoinCohort,
        REWARD_PER_TXN, REWARD_VOLUME, STAKING_PER_TXN, STAKING_VOLUME, TXN_COUNT,
    },
    concentration_engine::{
        concentration_series, validator_leaderboard, ConcentrationResult, LeaderboardSpec,
        ValidatorStanding,
    },
    config::MetricsConfig,
    error::{MetricsError, MetricsResult},
    query::{QueryParams, TimeBucket},
    result_cache::{CacheKey, CacheStats, CancelToken, ResultCache},
    source::{EventFilter, EventSource},
    types::{StakingAction, StakingRecord},
};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Whole-window summary plus per-entity median and maximum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityStats {
    pub summary:    Option<Summary>,
    pub per_entity: Option<EntityVolumeStats>,
}

pub struct StakingMetrics<S: EventSource> {
    source: Arc<S>,
    config: Arc<MetricsConfig>,
    cache:  Arc<ResultCache>,
    cancel: Option<CancelToken>,
}

impl<S: EventSource> Clone for StakingMetrics<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            config: Arc::clone(&self.config),
            cache:  Arc::clone(&self.cache),
            cancel: self.cancel.clone(),
        }
    }
}

impl<S: EventSource> StakingMetrics<S> {
    pub fn new(source: Arc<S>, config: MetricsConfig) -> Self {
        Self {
            source,
            config: Arc::new(config),
            cache: Arc::new(ResultCache::new()),
            cancel: None,
        }
    }

    /// A handle sharing this facade's source and cache whose queries stop,
    /// and never commit to the cache, once `token` is cancelled.
    pub fn cancellable(&self, token: CancelToken) -> Self {
        Self { cancel: Some(token), ..self.clone() }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn cached<T, F>(&self, key: CacheKey, compute: F) -> MetricsResult<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> MetricsResult<T>,
    {
        self.cache.get_or_compute(key, self.cancel.as_ref(), compute)
    }

    fn fetch(&self, filter: EventFilter) -> MetricsResult<Vec<StakingRecord>> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(MetricsError::Cancelled);
        }
        self.source.fetch_events(&filter)
    }

    fn fetch_window(&self, actions: &[StakingAction], params: &QueryParams) -> MetricsResult<Vec<StakingRecord>> {
        self.fetch(EventFilter::actions(actions).between(params.start_date, params.end_date))
    }

    // ── Overview ─────────────────────────────────────────────────────────────

    /// Bucketed rollup per action with each action's share of the bucket.
    pub fn staking_by_action(&self, params: &QueryParams) -> MetricsResult<Arc<Vec<ActionBucketStats>>> {
        let params = validated(params)?;
        self.cached(CacheKey::new("staking_by_action").params(&params), || {
            let records = self.fetch_window(&StakingAction::STAKE_MOVING, &params)?;
            Ok(rollup_by_action(&records, params.time_bucket))
        })
    }

    pub fn action_totals(&self, params: &QueryParams) -> MetricsResult<Arc<Vec<ActionTotals>>> {
        let params = validated(params)?;
        self.cached(CacheKey::new("action_totals").params(&params), || {
            let records = self.fetch_window(&StakingAction::STAKE_MOVING, &params)?;
            Ok(totals_by_action(&records))
        })
    }

    /// Single stake movements at or above the whale threshold, newest first.
    pub fn whale_activity(&self, params: &QueryParams) -> MetricsResult<Arc<Vec<LargeEvent>>> {
        let params = validated(params)?;
        let threshold = self.config.network.whale_threshold;
        let key = CacheKey::new("whale_activity").params(&params).param(threshold);
        self.cached(key, || {
            let records = self.fetch_window(&StakingAction::STAKE_MOVING, &params)?;
            Ok(large_events(&records, threshold))
        })
    }

    // ── Staking ──────────────────────────────────────────────────────────────

    /// Net staked total on `today`, or None when nothing is staked.
    pub fn net_staked_current(&self, today: NaiveDate) -> MetricsResult<Arc<Option<NetStakedPoint>>> {
        self.cached(CacheKey::new("net_staked_current").param(today), || {
            let records = self.fetch(
                EventFilter::actions(&[StakingAction::Delegate, StakingAction::Undelegate]).to(today),
            )?;
            let table = reconstruct(&actor_deltas(&records), Calendar::day(today));
            let network = &self.config.network;
            Ok(net_staked_series(&table, network.dust_epsilon, network.total_supply).pop())
        })
    }

    /// Daily net staked series over the window, never past `today`.
    pub fn net_staked_over_time(
        &self,
        params: &QueryParams,
        today: NaiveDate,
    ) -> MetricsResult<Arc<Vec<NetStakedPoint>>> {
        let params = validated(params)?;
        let key = CacheKey::new("net_staked_over_time").params(&params).param(today);
        self.cached(key, || {
            let Some(calendar) = clamp_to_today(&params, today) else {
                return Ok(Vec::new());
            };
            let records = self.fetch(
                EventFilter::actions(&[StakingAction::Delegate, StakingAction::Undelegate]).to(calendar.end),
            )?;
            let table = reconstruct(&actor_deltas(&records), calendar);
            let network = &self.config.network;
            Ok(net_staked_series(&table, network.dust_epsilon, network.total_supply))
        })
    }

    pub fn delegation_stats(&self, params: &QueryParams) -> MetricsResult<Arc<ActivityStats>> {
        let params = validated(params)?;
        self.cached(CacheKey::new("delegation_stats").params(&params), || {
            let records = self.fetch_window(&[StakingAction::Delegate], &params)?;
            Ok(activity_stats(&records))
        })
    }

    pub fn delegation_over_time(&self, params: &QueryParams) -> MetricsResult<Arc<Vec<BucketStats>>> {
        let params = validated(params)?;
        self.cached(CacheKey::new("delegation_over_time").params(&params), || {
            let records = self.fetch_window(&[StakingAction::Delegate], &params)?;
            Ok(bucket_rollup(&records, params.time_bucket))
        })
    }

    /// 24h, 7d, 30d and 1y delegation snapshots relative to `today`.
    pub fn delegation_lookbacks(&self, today: NaiveDate) -> MetricsResult<Arc<Vec<LookbackSummary>>> {
        self.cached(CacheKey::new("delegation_lookbacks").param(today), || {
            let (start, _) = Lookback::Year.window(today);
            let records = self.fetch(EventFilter::actions(&[StakingAction::Delegate]).between(start, today))?;
            Ok(lookback_summaries(&records, today))
        })
    }

    /// Delegation transactions per size class.
    pub fn delegation_size_distribution(&self, params: &QueryParams) -> MetricsResult<Arc<Vec<ClassCount>>> {
        let params = validated(params)?;
        self.cached(CacheKey::new("delegation_size_distribution").params(&params), || {
            let set = self.config.threshold_set(STAKING_PER_TXN)?;
            let records = self.fetch_window(&[StakingAction::Delegate], &params)?;
            Ok(class_distribution(set, tx_amounts(&records)))
        })
    }

    // ── Stakers ──────────────────────────────────────────────────────────────

    /// Total, new, returning and cumulative stakers per bucket.
    ///
    /// First-seen dates come from the whole delegation history so a staker
    /// returning inside the window is never miscounted as new.
    pub fn stakers_over_time(&self, params: &QueryParams) -> MetricsResult<Arc<Vec<GrowthRow>>> {
        let params = validated(params)?;
        self.cached(CacheKey::new("stakers_over_time").params(&params), || {
            let history = self.fetch(EventFilter::actions(&[StakingAction::Delegate]).to(params.end_date))?;
            let first = first_seen(&history);
            let window_start = params.time_bucket.truncate(params.start_date);
            let rows = new_vs_returning(&history, &first, params.time_bucket)?;
            Ok(rows.into_iter().filter(|row| row.date >= window_start).collect())
        })
    }

    /// How many stakers made exactly n delegations.
    pub fn staker_count_distribution(&self, params: &QueryParams) -> MetricsResult<Arc<Vec<CountBucket>>> {
        let params = validated(params)?;
        self.cached(CacheKey::new("staker_count_distribution").params(&params), || {
            let records = self.fetch_window(&[StakingAction::Delegate], &params)?;
            Ok(count_histogram(entity_totals(&records).iter().map(|t| t.txn_count)))
        })
    }

    pub fn staker_class_distribution(&self, params: &QueryParams) -> MetricsResult<Arc<Vec<ClassCount>>> {
        let params = validated(params)?;
        self.cached(CacheKey::new("staker_class_distribution").params(&params), || {
            let set = self.config.threshold_set(TXN_COUNT)?;
            let records = self.fetch_window(&[StakingAction::Delegate], &params)?;
            Ok(class_distribution(set, entity_totals(&records).iter().map(|t| t.txn_count as f64)))
        })
    }

    pub fn staker_volume_distribution(&self, params: &QueryParams) -> MetricsResult<Arc<Vec<ClassCount>>> {
        let params = validated(params)?;
        self.cached(CacheKey::new("staker_volume_distribution").params(&params), || {
            let set = self.config.threshold_set(STAKING_VOLUME)?;
            let records = self.fetch_window(&[StakingAction::Delegate], &params)?;
            Ok(class_distribution(set, entity_totals(&records).iter().map(|t| t.volume)))
        })
    }

    pub fn staker_leaderboard(&self, params: &QueryParams) -> MetricsResult<Arc<Vec<RankedEntity>>> {
        let params = validated(params)?;
        self.cached(CacheKey::new("staker_leaderboard").params(&params), || {
            let records = self.fetch_window(&[StakingAction::Delegate], &params)?;
            Ok(top_by_volume(&entity_totals(&records), None))
        })
    }

    /// Join-date cohorts by `period`, for periods overlapping the window.
    /// Cumulative counts include every staker who joined before it.
    pub fn join_cohorts(&self, params: &QueryParams, period: TimeBucket) -> MetricsResult<Arc<Vec<JoinCohort>>> {
        let params = validated(params)?;
        let key = CacheKey::new("join_cohorts").params(&params).param(period);
        self.cached(key, || {
            let history = self.fetch(EventFilter::actions(&[StakingAction::Delegate]).to(params.end_date))?;
            let window_start = period.truncate(params.start_date);
            Ok(join_cohorts(&first_seen(&history), period)
                .into_iter()
                .filter(|c| c.period_start >= window_start)
                .collect())
        })
    }

    // ── Rewards ──────────────────────────────────────────────────────────────

    pub fn reward_stats(&self, params: &QueryParams) -> MetricsResult<Arc<ActivityStats>> {
        let params = validated(params)?;
        self.cached(CacheKey::new("reward_stats").params(&params), || {
            let records = self.fetch_window(&[StakingAction::ClaimReward], &params)?;
            Ok(activity_stats(&records))
        })
    }

    pub fn reward_over_time(&self, params: &QueryParams) -> MetricsResult<Arc<Vec<BucketStats>>> {
        let params = validated(params)?;
        self.cached(CacheKey::new("reward_over_time").params(&params), || {
            let records = self.fetch_window(&[StakingAction::ClaimReward], &params)?;
            Ok(bucket_rollup(&records, params.time_bucket))
        })
    }

    /// The newest `limit` reward claims across all history.
    pub fn recent_claims(&self, limit: usize) -> MetricsResult<Arc<Vec<RecentEvent>>> {
        self.cached(CacheKey::new("recent_claims").param(limit), || {
            let records = self.fetch(EventFilter::actions(&[StakingAction::ClaimReward]))?;
            Ok(most_recent(&records, limit))
        })
    }

    pub fn claimer_volume_distribution(&self, params: &QueryParams) -> MetricsResult<Arc<Vec<ClassCount>>> {
        let params = validated(params)?;
        self.cached(CacheKey::new("claimer_volume_distribution").params(&params), || {
            let set = self.config.threshold_set(REWARD_VOLUME)?;
            let records = self.fetch_window(&[StakingAction::ClaimReward], &params)?;
            Ok(class_distribution(set, entity_totals(&records).iter().map(|t| t.volume)))
        })
    }

    pub fn reward_txn_distribution(&self, params: &QueryParams) -> MetricsResult<Arc<Vec<ClassCount>>> {
        let params = validated(params)?;
        self.cached(CacheKey::new("reward_txn_distribution").params(&params), || {
            let set = self.config.threshold_set(REWARD_PER_TXN)?;
            let records = self.fetch_window(&[StakingAction::ClaimReward], &params)?;
            Ok(class_distribution(set, tx_amounts(&records)))
        })
    }

    pub fn top_reward_claimers(&self, params: &QueryParams) -> MetricsResult<Arc<Vec<RankedEntity>>> {
        let params = validated(params)?;
        let limit = self.config.network.reward_leaderboard_limit;
        let key = CacheKey::new("top_reward_claimers").params(&params).param(limit);
        self.cached(key, || {
            let records = self.fetch_window(&[StakingAction::ClaimReward], &params)?;
            Ok(top_by_volume(&entity_totals(&records), Some(limit)))
        })
    }

    // ── Validators ───────────────────────────────────────────────────────────

    /// Daily Nakamoto coefficient over the window, never past `today`.
    pub fn nakamoto_series(
        &self,
        params: &QueryParams,
        today: NaiveDate,
    ) -> MetricsResult<Arc<Vec<ConcentrationResult>>> {
        let params = validated(params)?;
        let key = CacheKey::new("nakamoto_series").params(&params).param(today);
        self.cached(key, || {
            let Some(calendar) = clamp_to_today(&params, today) else {
                return Ok(Vec::new());
            };
            let records = self.fetch(EventFilter::actions(&StakingAction::STAKE_MOVING).to(calendar.end))?;
            let table = reconstruct(&validator_deltas(&records), calendar);
            let network = &self.config.network;
            Ok(concentration_series(&table, network.concentration_threshold_pct, network.power_transform))
        })
    }

    /// Validator standings as of the last full day before `today`.
    pub fn validator_leaderboard(&self, today: NaiveDate) -> MetricsResult<Arc<Vec<ValidatorStanding>>> {
        self.cached(CacheKey::new("validator_leaderboard").param(today), || {
            let network = &self.config.network;
            let as_of = today - Duration::days(1);
            let calendar = Calendar::new(as_of - Duration::days(network.validator_change_lookback_days), as_of)?;
            let records = self.fetch(EventFilter::actions(&StakingAction::STAKE_MOVING).to(as_of))?;
            let validators = reconstruct(&validator_deltas(&records), calendar);
            let positions = reconstruct(&position_deltas(&records), calendar);
            let spec = LeaderboardSpec {
                as_of,
                lookback_days: network.validator_change_lookback_days,
                transform:     network.power_transform,
                epsilon:       network.dust_epsilon,
                limit:         network.validator_leaderboard_limit,
            };
            Ok(validator_leaderboard(&validators, &positions, &spec))
        })
    }
}

/// Re-check a caller-built parameter set before any read.
fn validated(params: &QueryParams) -> MetricsResult<QueryParams> {
    QueryParams::new(params.time_bucket, params.start_date, params.end_date)
}

/// The window's calendar cut off at `today`, or None when it starts later.
fn clamp_to_today(params: &QueryParams, today: NaiveDate) -> Option<Calendar> {
    Calendar::new(params.start_date, params.end_date.min(today)).ok()
}

fn activity_stats(records: &[StakingRecord]) -> ActivityStats {
    ActivityStats {
        summary:    summarize(records),
        per_entity: entity_volume_stats(&entity_totals(records)),
    }
}
