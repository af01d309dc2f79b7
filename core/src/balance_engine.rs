//! Balance reconstruction engine.
//!
//! Turns a sparse stream of signed deltas into a dense daily balance series:
//!   1. net the deltas per (entity, day)
//!   2. lay every entity onto the gap-free calendar
//!   3. running-sum the deltas in date order
//!   4. carry the last balance forward over days with no activity
//!
//! Balances persist until changed; an inactive day never resets to zero.
//! Activity before the calendar start folds into the opening balance, so a
//! window that starts late still sees the full history.
//!
//! Three delta views exist over the same records:
//!   - actor-centric: what a delegator has staked in total
//!     (redelegation moves nothing)
//!   - validator-centric: what each validator holds
//!     (redelegation debits the source and credits the destination)
//!   - positions: (validator, delegator) pairs, used for staker counts

use crate::{
    aggregation_engine::round_dp,
    calendar::Calendar,
    types::{Address, StakingAction, StakingRecord, Tokens},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceDelta<K> {
    pub date:  NaiveDate,
    pub key:   K,
    pub delta: Tokens,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyBalance<K> {
    pub date:    NaiveDate,
    pub entity:  K,
    pub balance: Tokens,
}

/// Whether a balance counts as live stake. Anything at or below the dust
/// floor is residue from repeated add/subtract and is treated as zero.
pub fn is_active(balance: Tokens, epsilon: Tokens) -> bool {
    balance > epsilon
}

// ── Delta views ──────────────────────────────────────────────────────────────

/// Delegator totals. Redelegations and reward claims do not move them.
pub fn actor_deltas(records: &[StakingRecord]) -> Vec<BalanceDelta<Address>> {
    records
        .iter()
        .filter_map(|r| {
            let delta = match r.action {
                StakingAction::Delegate   => r.amount,
                StakingAction::Undelegate => -r.amount,
                StakingAction::Redelegate | StakingAction::ClaimReward => return None,
            };
            Some(BalanceDelta { date: r.date(), key: r.entity.clone(), delta })
        })
        .collect()
}

/// Validator holdings. A redelegation is a debit on the source and an equal
/// credit on the destination, both dated at the same timestamp.
pub fn validator_deltas(records: &[StakingRecord]) -> Vec<BalanceDelta<Address>> {
    let mut out = Vec::with_capacity(records.len());
    for r in records {
        let date = r.date();
        match r.action {
            StakingAction::Delegate => {
                out.push(BalanceDelta { date, key: r.validator.clone(), delta: r.amount });
            }
            StakingAction::Undelegate => {
                out.push(BalanceDelta { date, key: r.validator.clone(), delta: -r.amount });
            }
            StakingAction::Redelegate => {
                out.push(BalanceDelta { date, key: r.validator.clone(), delta: r.amount });
                if let Some(source) = &r.source_validator {
                    out.push(BalanceDelta { date, key: source.clone(), delta: -r.amount });
                }
            }
            StakingAction::ClaimReward => {}
        }
    }
    out
}

/// Per (validator, delegator) stake positions.
pub fn position_deltas(records: &[StakingRecord]) -> Vec<BalanceDelta<(Address, Address)>> {
    let mut out = Vec::with_capacity(records.len());
    for r in records {
        let date = r.date();
        let pos = |validator: &Address| (validator.clone(), r.entity.clone());
        match r.action {
            StakingAction::Delegate => {
                out.push(BalanceDelta { date, key: pos(&r.validator), delta: r.amount });
            }
            StakingAction::Undelegate => {
                out.push(BalanceDelta { date, key: pos(&r.validator), delta: -r.amount });
            }
            StakingAction::Redelegate => {
                out.push(BalanceDelta { date, key: pos(&r.validator), delta: r.amount });
                if let Some(source) = &r.source_validator {
                    out.push(BalanceDelta { date, key: pos(source), delta: -r.amount });
                }
            }
            StakingAction::ClaimReward => {}
        }
    }
    out
}

// ── Reconstruction ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct EntitySeries {
    /// First day this entity exists on the axis.
    first:    NaiveDate,
    /// One balance per day from `first` to the calendar end.
    balances: Vec<Tokens>,
}

/// Dense daily balances for a universe of entities over one calendar.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceTable<K: Ord> {
    calendar: Calendar,
    series:   BTreeMap<K, EntitySeries>,
}

/// Reconstruct forward-filled daily balances.
///
/// The entity universe is exactly the keys with at least one delta on or
/// before the calendar end. No entity appears before its first delta.
pub fn reconstruct<K: Ord + Clone>(deltas: &[BalanceDelta<K>], calendar: Calendar) -> BalanceTable<K> {
    let mut daily: BTreeMap<K, BTreeMap<NaiveDate, Tokens>> = BTreeMap::new();
    for d in deltas.iter().filter(|d| d.date <= calendar.end) {
        *daily
            .entry(d.key.clone())
            .or_default()
            .entry(d.date)
            .or_insert(0.0) += d.delta;
    }

    let mut series = BTreeMap::new();
    for (key, days) in daily {
        let Some(first_event) = days.keys().next().copied() else {
            continue;
        };
        let first = first_event.max(calendar.start);

        let mut running: Tokens = days
            .range(..calendar.start)
            .map(|(_, delta)| *delta)
            .sum();
        let mut balances = Vec::with_capacity(calendar.len());
        for day in first.iter_days().take_while(|d| *d <= calendar.end) {
            if let Some(delta) = days.get(&day) {
                running += delta;
            }
            balances.push(running);
        }
        series.insert(key, EntitySeries { first, balances });
    }

    BalanceTable { calendar, series }
}

impl<K: Ord + Clone> BalanceTable<K> {
    pub fn calendar(&self) -> Calendar {
        self.calendar
    }

    pub fn entity_count(&self) -> usize {
        self.series.len()
    }

    /// First day `key` exists on the axis.
    pub fn first_date(&self, key: &K) -> Option<NaiveDate> {
        self.series.get(key).map(|s| s.first)
    }

    /// Balance on `date`, or None before the entity's first delta or off the calendar.
    pub fn balance(&self, key: &K, date: NaiveDate) -> Option<Tokens> {
        let s = self.series.get(key)?;
        if date < s.first || date > self.calendar.end {
            return None;
        }
        s.balances.get((date - s.first).num_days() as usize).copied()
    }

    /// Dense series over the whole calendar. Days before the entity exists read as 0.
    pub fn series(&self, key: &K) -> Vec<Tokens> {
        self.calendar
            .days()
            .map(|day| self.balance(key, day).unwrap_or(0.0))
            .collect()
    }

    /// Every (entity, date) row, entity-major then date ascending.
    pub fn rows(&self) -> Vec<DailyBalance<K>> {
        let mut out = Vec::new();
        for (key, s) in &self.series {
            for (date, balance) in s.first.iter_days().zip(s.balances.iter()) {
                out.push(DailyBalance { date, entity: key.clone(), balance: *balance });
            }
        }
        out
    }

    /// All entities that exist on `date`, with their balance.
    pub fn on(&self, date: NaiveDate) -> Vec<(&K, Tokens)> {
        self.series
            .keys()
            .filter_map(|key| self.balance(key, date).map(|b| (key, b)))
            .collect()
    }

    /// Entities whose balance on `date` is above the dust floor.
    pub fn active_on(&self, date: NaiveDate, epsilon: Tokens) -> Vec<(&K, Tokens)> {
        self.on(date)
            .into_iter()
            .filter(|(_, b)| is_active(*b, epsilon))
            .collect()
    }
}

// ── Aggregates ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetStakedPoint {
    pub date:           NaiveDate,
    pub net_staked:     Tokens,
    pub total_supply:   Tokens,
    /// Net staked as a percentage of total supply, 2 decimals.
    pub net_staked_pct: f64,
}

/// Total live stake per day. Days where nothing is above the dust floor
/// produce no row.
pub fn net_staked_series<K: Ord + Clone>(
    table: &BalanceTable<K>,
    epsilon: Tokens,
    total_supply: Tokens,
) -> Vec<NetStakedPoint> {
    table
        .calendar()
        .days()
        .filter_map(|date| {
            let active = table.active_on(date, epsilon);
            if active.is_empty() {
                return None;
            }
            let net_staked = active.iter().map(|(_, b)| *b).sum::<Tokens>().round();
            let net_staked_pct = if total_supply > 0.0 {
                round_dp(100.0 * net_staked / total_supply, 2)
            } else {
                0.0
            };
            Some(NetStakedPoint { date, net_staked, total_supply, net_staked_pct })
        })
        .collect()
}

/// Distinct delegators with live stake per validator on `date`.
pub fn stakers_per_validator(
    positions: &BalanceTable<(Address, Address)>,
    date: NaiveDate,
    epsilon: Tokens,
) -> BTreeMap<Address, usize> {
    let mut counts = BTreeMap::new();
    for ((validator, _delegator), _) in positions.active_on(date, epsilon) {
        *counts.entry(validator.clone()).or_insert(0) += 1;
    }
    counts
}
