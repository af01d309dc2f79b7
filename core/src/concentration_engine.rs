//! Concentration metric engine: Nakamoto coefficient under dampened voting power.
//!
//! For each day, independently:
//!   1. keep validators with a strictly positive balance
//!   2. power = transform(balance) (square root for quadratic voting)
//!   3. rank by power descending; ties go to the lower address
//!   4. running cumulative share of total power, rounded to 2 decimals
//!   5. coefficient = first rank whose rounded share reaches the threshold
//!
//! A day with no qualifying validator produces no row.

use crate::{
    aggregation_engine::round_dp,
    balance_engine::{is_active, stakers_per_validator, BalanceTable},
    types::{Address, Tokens},
};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PowerTransform {
    Linear,
    SquareRoot,
}

impl PowerTransform {
    pub fn apply(&self, balance: Tokens) -> f64 {
        match self {
            PowerTransform::Linear     => balance,
            PowerTransform::SquareRoot => balance.sqrt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedPower {
    /// 1-based.
    pub rank:                 u32,
    pub validator:            Address,
    pub balance:              Tokens,
    pub power:                f64,
    pub cumulative_share_pct: f64,
}

/// Rank validators by voting power. Non-positive balances are dropped.
pub fn rank_by_power<'a>(
    balances: impl IntoIterator<Item = (&'a Address, Tokens)>,
    transform: PowerTransform,
) -> Vec<RankedPower> {
    let mut powered: Vec<(&Address, Tokens, f64)> = balances
        .into_iter()
        .filter(|(_, balance)| *balance > 0.0)
        .map(|(validator, balance)| (validator, balance, transform.apply(balance)))
        .collect();
    powered.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });

    // Total taken as the final running sum so the last share is exactly 100.
    let mut running = 0.0;
    let cumulative: Vec<f64> = powered
        .iter()
        .map(|(_, _, power)| {
            running += power;
            running
        })
        .collect();
    let total = running;

    powered
        .into_iter()
        .zip(cumulative)
        .enumerate()
        .map(|(i, ((validator, balance, power), cum))| RankedPower {
            rank: i as u32 + 1,
            validator: validator.clone(),
            balance,
            power,
            cumulative_share_pct: round_dp(100.0 * cum / total, 2),
        })
        .collect()
}

/// Minimal rank whose rounded cumulative share reaches `threshold_pct`.
pub fn nakamoto_coefficient(ranked: &[RankedPower], threshold_pct: f64) -> Option<u32> {
    ranked
        .iter()
        .find(|r| r.cumulative_share_pct >= threshold_pct)
        .map(|r| r.rank)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConcentrationResult {
    pub date:        NaiveDate,
    pub coefficient: u32,
    /// Validators with positive balance that day.
    pub validators:  u32,
}

pub fn concentration_series(
    validators: &BalanceTable<Address>,
    threshold_pct: f64,
    transform: PowerTransform,
) -> Vec<ConcentrationResult> {
    validators
        .calendar()
        .days()
        .filter_map(|date| {
            let ranked = rank_by_power(validators.on(date), transform);
            let coefficient = nakamoto_coefficient(&ranked, threshold_pct)?;
            Some(ConcentrationResult {
                date,
                coefficient,
                validators: ranked.len() as u32,
            })
        })
        .collect()
}

// ── Validator leaderboard ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidatorStanding {
    pub validator:            Address,
    pub staked:               Tokens,
    /// Change against the lookback date, in percent. None when the validator
    /// held nothing then.
    pub change_pct:           Option<f64>,
    pub voting_power:         f64,
    pub stakers:              usize,
    pub cumulative_stake_pct: f64,
    pub cumulative_power_pct: f64,
}

pub struct LeaderboardSpec {
    pub as_of:         NaiveDate,
    pub lookback_days: i64,
    pub transform:     PowerTransform,
    pub epsilon:       Tokens,
    pub limit:         usize,
}

/// Validators live on `as_of` ordered by stake, with linear and dampened
/// cumulative shares side by side. Dust holdings are left off.
pub fn validator_leaderboard(
    validators: &BalanceTable<Address>,
    positions: &BalanceTable<(Address, Address)>,
    spec: &LeaderboardSpec,
) -> Vec<ValidatorStanding> {
    let balances = validators.active_on(spec.as_of, spec.epsilon);
    let by_stake = rank_by_power(balances.iter().map(|(v, b)| (*v, *b)), PowerTransform::Linear);
    let by_power = rank_by_power(balances.iter().map(|(v, b)| (*v, *b)), spec.transform);
    let stakers = stakers_per_validator(positions, spec.as_of, spec.epsilon);
    let prior_date = spec.as_of - Duration::days(spec.lookback_days);

    by_stake
        .iter()
        .take(spec.limit)
        .map(|row| {
            let power_row = by_power.iter().find(|p| p.validator == row.validator);
            let change_pct = validators
                .balance(&row.validator, prior_date)
                .filter(|prior| is_active(*prior, spec.epsilon))
                .map(|prior| round_dp(100.0 * (row.balance - prior) / prior, 2));
            ValidatorStanding {
                validator:            row.validator.clone(),
                staked:               round_dp(row.balance, 2),
                change_pct,
                voting_power:         round_dp(power_row.map_or(0.0, |p| p.power), 2),
                stakers:              stakers.get(&row.validator).copied().unwrap_or(0),
                cumulative_stake_pct: row.cumulative_share_pct,
                cumulative_power_pct: power_row.map_or(0.0, |p| p.cumulative_share_pct),
            }
        })
        .collect()
}
