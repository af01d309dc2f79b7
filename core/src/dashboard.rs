//! Dashboard render: a bounded, concurrent fan-out of every panel query.
//!
//! Panels are independent: a failing panel is reported as failed and the
//! rest still complete. Parameters are checked once up front, so a
//! malformed request fails before any panel issues a read.

use crate::{
    error::{MetricsError, MetricsResult},
    metrics::StakingMetrics,
    query::{QueryParams, TimeBucket},
    result_cache::CancelToken,
    source::EventSource,
};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Upper bound on panels computed at the same time.
pub const MAX_PANEL_WORKERS: usize = 4;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Panel {
    // Overview
    StakingByAction,
    ActionTotals,
    WhaleActivity,
    // Staking
    NetStakedCurrent,
    NetStakedOverTime,
    DelegationStats,
    DelegationOverTime,
    DelegationLookbacks,
    DelegationSizeDistribution,
    // Stakers
    StakersOverTime,
    StakerCountDistribution,
    StakerClassDistribution,
    StakerVolumeDistribution,
    StakerLeaderboard,
    JoinCohorts,
    // Rewards
    RewardStats,
    RewardOverTime,
    RecentClaims,
    ClaimerVolumeDistribution,
    RewardTxnDistribution,
    TopRewardClaimers,
    // Validators
    NakamotoSeries,
    ValidatorLeaderboard,
}

impl Panel {
    pub const ALL: [Panel; 23] = [
        Panel::StakingByAction,
        Panel::ActionTotals,
        Panel::WhaleActivity,
        Panel::NetStakedCurrent,
        Panel::NetStakedOverTime,
        Panel::DelegationStats,
        Panel::DelegationOverTime,
        Panel::DelegationLookbacks,
        Panel::DelegationSizeDistribution,
        Panel::StakersOverTime,
        Panel::StakerCountDistribution,
        Panel::StakerClassDistribution,
        Panel::StakerVolumeDistribution,
        Panel::StakerLeaderboard,
        Panel::JoinCohorts,
        Panel::RewardStats,
        Panel::RewardOverTime,
        Panel::RecentClaims,
        Panel::ClaimerVolumeDistribution,
        Panel::RewardTxnDistribution,
        Panel::TopRewardClaimers,
        Panel::NakamotoSeries,
        Panel::ValidatorLeaderboard,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Panel::StakingByAction            => "staking_by_action",
            Panel::ActionTotals               => "action_totals",
            Panel::WhaleActivity              => "whale_activity",
            Panel::NetStakedCurrent           => "net_staked_current",
            Panel::NetStakedOverTime          => "net_staked_over_time",
            Panel::DelegationStats            => "delegation_stats",
            Panel::DelegationOverTime         => "delegation_over_time",
            Panel::DelegationLookbacks        => "delegation_lookbacks",
            Panel::DelegationSizeDistribution => "delegation_size_distribution",
            Panel::StakersOverTime            => "stakers_over_time",
            Panel::StakerCountDistribution    => "staker_count_distribution",
            Panel::StakerClassDistribution    => "staker_class_distribution",
            Panel::StakerVolumeDistribution   => "staker_volume_distribution",
            Panel::StakerLeaderboard          => "staker_leaderboard",
            Panel::JoinCohorts                => "join_cohorts",
            Panel::RewardStats                => "reward_stats",
            Panel::RewardOverTime             => "reward_over_time",
            Panel::RecentClaims               => "recent_claims",
            Panel::ClaimerVolumeDistribution  => "claimer_volume_distribution",
            Panel::RewardTxnDistribution      => "reward_txn_distribution",
            Panel::TopRewardClaimers          => "top_reward_claimers",
            Panel::NakamotoSeries             => "nakamoto_series",
            Panel::ValidatorLeaderboard       => "validator_leaderboard",
        }
    }
}

impl fmt::Display for Panel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Panel {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Panel::ALL
            .iter()
            .find(|p| p.name() == s.trim())
            .copied()
            .ok_or_else(|| MetricsError::InvalidParameter { name: "query", value: s.to_string() })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PanelOutcome {
    Ok { data: Value },
    Failed { error: String },
}

impl PanelOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, PanelOutcome::Ok { .. })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PanelReport {
    pub panel:   Panel,
    #[serde(flatten)]
    pub outcome: PanelOutcome,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DashboardReport {
    pub params: QueryParams,
    pub today:  NaiveDate,
    /// In `Panel::ALL` order.
    pub panels: Vec<PanelReport>,
}

impl DashboardReport {
    pub fn outcome(&self, panel: Panel) -> Option<&PanelOutcome> {
        self.panels.iter().find(|r| r.panel == panel).map(|r| &r.outcome)
    }

    pub fn failed(&self) -> impl Iterator<Item = &PanelReport> {
        self.panels.iter().filter(|r| !r.outcome.is_ok())
    }
}

impl<S: EventSource> StakingMetrics<S> {
    /// Run one panel's query and serialise its table.
    pub fn run_panel(&self, panel: Panel, params: &QueryParams, today: NaiveDate) -> MetricsResult<Value> {
        let limit = self.config().network.recent_claims_limit;
        let value = match panel {
            Panel::StakingByAction            => serde_json::to_value(self.staking_by_action(params)?.as_ref())?,
            Panel::ActionTotals               => serde_json::to_value(self.action_totals(params)?.as_ref())?,
            Panel::WhaleActivity              => serde_json::to_value(self.whale_activity(params)?.as_ref())?,
            Panel::NetStakedCurrent           => serde_json::to_value(self.net_staked_current(today)?.as_ref())?,
            Panel::NetStakedOverTime          => serde_json::to_value(self.net_staked_over_time(params, today)?.as_ref())?,
            Panel::DelegationStats            => serde_json::to_value(self.delegation_stats(params)?.as_ref())?,
            Panel::DelegationOverTime         => serde_json::to_value(self.delegation_over_time(params)?.as_ref())?,
            Panel::DelegationLookbacks        => serde_json::to_value(self.delegation_lookbacks(today)?.as_ref())?,
            Panel::DelegationSizeDistribution => serde_json::to_value(self.delegation_size_distribution(params)?.as_ref())?,
            Panel::StakersOverTime            => serde_json::to_value(self.stakers_over_time(params)?.as_ref())?,
            Panel::StakerCountDistribution    => serde_json::to_value(self.staker_count_distribution(params)?.as_ref())?,
            Panel::StakerClassDistribution    => serde_json::to_value(self.staker_class_distribution(params)?.as_ref())?,
            Panel::StakerVolumeDistribution   => serde_json::to_value(self.staker_volume_distribution(params)?.as_ref())?,
            Panel::StakerLeaderboard          => serde_json::to_value(self.staker_leaderboard(params)?.as_ref())?,
            Panel::JoinCohorts                => serde_json::to_value(self.join_cohorts(params, TimeBucket::Quarter)?.as_ref())?,
            Panel::RewardStats                => serde_json::to_value(self.reward_stats(params)?.as_ref())?,
            Panel::RewardOverTime             => serde_json::to_value(self.reward_over_time(params)?.as_ref())?,
            Panel::RecentClaims               => serde_json::to_value(self.recent_claims(limit)?.as_ref())?,
            Panel::ClaimerVolumeDistribution  => serde_json::to_value(self.claimer_volume_distribution(params)?.as_ref())?,
            Panel::RewardTxnDistribution      => serde_json::to_value(self.reward_txn_distribution(params)?.as_ref())?,
            Panel::TopRewardClaimers          => serde_json::to_value(self.top_reward_claimers(params)?.as_ref())?,
            Panel::NakamotoSeries             => serde_json::to_value(self.nakamoto_series(params, today)?.as_ref())?,
            Panel::ValidatorLeaderboard       => serde_json::to_value(self.validator_leaderboard(today)?.as_ref())?,
        };
        Ok(value)
    }

    /// Render every panel concurrently.
    ///
    /// Returns `Err` only for malformed parameters. Panel failures, including
    /// cancellation, are reported per panel inside the report.
    pub fn render_dashboard(
        &self,
        params: &QueryParams,
        today: NaiveDate,
        cancel: &CancelToken,
    ) -> MetricsResult<DashboardReport> {
        let params = QueryParams::new(params.time_bucket, params.start_date, params.end_date)?;
        let handle = self.cancellable(cancel.clone());
        let started = Instant::now();

        let next = AtomicUsize::new(0);
        let slots: Mutex<Vec<Option<PanelOutcome>>> = Mutex::new(vec![None; Panel::ALL.len()]);
        let workers = MAX_PANEL_WORKERS.min(Panel::ALL.len());

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some(panel) = Panel::ALL.get(i).copied() else {
                        break;
                    };
                    let run = panic::catch_unwind(AssertUnwindSafe(|| handle.run_panel(panel, &params, today)));
                    let outcome = match run {
                        Ok(Ok(data)) => PanelOutcome::Ok { data },
                        Ok(Err(e)) => {
                            log::error!("panel {panel} failed: {e}");
                            PanelOutcome::Failed { error: e.to_string() }
                        }
                        Err(_) => {
                            log::error!("panel {panel} panicked");
                            PanelOutcome::Failed { error: "panel computation panicked".into() }
                        }
                    };
                    if let Ok(mut slots) = slots.lock() {
                        slots[i] = Some(outcome);
                    }
                });
            }
        });

        let slots = slots.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        let panels: Vec<PanelReport> = Panel::ALL
            .iter()
            .zip(slots)
            .map(|(panel, outcome)| PanelReport {
                panel:   *panel,
                outcome: outcome.unwrap_or_else(|| PanelOutcome::Failed {
                    error: "panel worker stopped before completing".into(),
                }),
            })
            .collect();

        let failed = panels.iter().filter(|p| !p.outcome.is_ok()).count();
        log::info!(
            "dashboard rendered: {} panels, {failed} failed, {:?}",
            panels.len(),
            started.elapsed()
        );
        Ok(DashboardReport { params, today, panels })
    }
}
