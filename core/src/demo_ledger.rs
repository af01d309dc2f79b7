//! Deterministic synthetic staking ledger.
//!
//! Used by `metrics-runner --demo` and by tests that need volume. The same
//! seed always yields the same events. Positions are tracked while
//! generating so no undelegation or redelegation ever exceeds what the
//! delegator holds with that validator.
//!
//! A small share of facts is deliberately noisy (failed transactions and a
//! foreign denomination) so the source filters have something to remove.

use crate::{
    rng::{LedgerStream, StreamRng},
    types::{Address, StakingAction, StakingEvent},
};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::BTreeMap;
use uuid::Builder;

const BECH32_CHARSET: &[u8] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

#[derive(Debug, Clone)]
pub struct DemoLedgerSpec {
    pub seed:         u64,
    pub delegators:   usize,
    pub validators:   usize,
    pub start:        NaiveDate,
    pub days:         u32,
    pub denomination: String,
    /// Base units per whole token.
    pub scale:        f64,
}

impl DemoLedgerSpec {
    pub fn new(seed: u64, start: NaiveDate, days: u32) -> Self {
        Self {
            seed,
            delegators:   200,
            validators:   25,
            start,
            days,
            denomination: "uaxl".into(),
            scale:        1_000_000.0,
        }
    }
}

struct Generator {
    addresses:     StreamRng,
    delegations:   StreamRng,
    redelegations: StreamRng,
    rewards:       StreamRng,
    tx_ids:        StreamRng,
}

/// Generate a ledger, ordered by timestamp.
pub fn generate(spec: &DemoLedgerSpec) -> Vec<StakingEvent> {
    let mut g = Generator {
        addresses:     StreamRng::new(spec.seed, LedgerStream::Addresses),
        delegations:   StreamRng::new(spec.seed, LedgerStream::Delegations),
        redelegations: StreamRng::new(spec.seed, LedgerStream::Redelegations),
        rewards:       StreamRng::new(spec.seed, LedgerStream::Rewards),
        tx_ids:        StreamRng::new(spec.seed, LedgerStream::TxIds),
    };

    let validators: Vec<Address> = (0..spec.validators.max(1))
        .map(|_| address(&mut g.addresses, "axelarvaloper1"))
        .collect();
    let delegators: Vec<Address> = (0..spec.delegators.max(1))
        .map(|_| address(&mut g.addresses, "axelar1"))
        .collect();
    // Popular validators attract more stake.
    let weights: Vec<f64> = validators.iter().map(|_| g.addresses.pareto(1.0, 1.2)).collect();

    // (delegator index, validator index) -> base units held
    let mut positions: BTreeMap<(usize, usize), u64> = BTreeMap::new();
    let mut events = Vec::new();

    for offset in 0..spec.days {
        let day = spec.start + Duration::days(offset as i64);
        // Adoption ramps up over the first month.
        let ramp = ((offset + 1) as f64 / 30.0).min(1.0);

        for d in 0..delegators.len() {
            if g.delegations.chance(0.04 * ramp) {
                let v = weighted_pick(&mut g.delegations, &weights);
                let tokens = g.delegations.pareto(5.0, 1.1).min(5_000_000.0);
                let amount = (tokens * spec.scale).round() as u64;
                let success = !g.delegations.chance(0.02);
                if success {
                    *positions.entry((d, v)).or_insert(0) += amount;
                }
                events.push(event(
                    &mut g,
                    spec,
                    day,
                    &delegators[d],
                    &validators[v],
                    StakingAction::Delegate,
                    amount,
                    success,
                    None,
                ));
            }

            if g.delegations.chance(0.01) {
                if let Some((v, held)) = held_position(&positions, d, &mut g.delegations) {
                    let amount = partial(&mut g.delegations, held);
                    if let Some(h) = positions.get_mut(&(d, v)) {
                        *h -= amount;
                    }
                    events.push(event(
                        &mut g,
                        spec,
                        day,
                        &delegators[d],
                        &validators[v],
                        StakingAction::Undelegate,
                        amount,
                        true,
                        None,
                    ));
                }
            }

            if g.redelegations.chance(0.005) {
                if let Some((from, held)) = held_position(&positions, d, &mut g.redelegations) {
                    let to = weighted_pick(&mut g.redelegations, &weights);
                    if to != from {
                        let amount = partial(&mut g.redelegations, held);
                        if let Some(h) = positions.get_mut(&(d, from)) {
                            *h -= amount;
                        }
                        *positions.entry((d, to)).or_insert(0) += amount;
                        let source = Some(validators[from].clone());
                        events.push(event(
                            &mut g,
                            spec,
                            day,
                            &delegators[d],
                            &validators[to],
                            StakingAction::Redelegate,
                            amount,
                            true,
                            source,
                        ));
                    }
                }
            }

            if g.rewards.chance(0.02) {
                if let Some((v, held)) = held_position(&positions, d, &mut g.rewards) {
                    // Roughly a week of yield at ~10% APR.
                    let amount = ((held as f64) * 0.002 * (0.5 + g.rewards.next_f64())).round() as u64;
                    let foreign = g.rewards.chance(0.03);
                    let mut e = event(
                        &mut g,
                        spec,
                        day,
                        &delegators[d],
                        &validators[v],
                        StakingAction::ClaimReward,
                        amount,
                        true,
                        None,
                    );
                    if foreign {
                        e.currency = "uusdc".into();
                    }
                    events.push(e);
                }
            }
        }
    }

    events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.tx_id.cmp(&b.tx_id)));
    log::debug!("demo ledger: {} events over {} days (seed {})", events.len(), spec.days, spec.seed);
    events
}

#[allow(clippy::too_many_arguments)]
fn event(
    g: &mut Generator,
    spec: &DemoLedgerSpec,
    day: NaiveDate,
    delegator: &Address,
    validator: &Address,
    action: StakingAction,
    amount: u64,
    success: bool,
    source_validator: Option<Address>,
) -> StakingEvent {
    let seconds = g.tx_ids.below(86_400) as u32;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0).unwrap_or_default();
    let tx_id = Builder::from_random_bytes(g.tx_ids.bytes16())
        .into_uuid()
        .simple()
        .to_string()
        .to_uppercase();
    StakingEvent {
        timestamp: NaiveDateTime::new(day, time),
        tx_id,
        entity_address: delegator.clone(),
        validator_address: validator.clone(),
        action,
        amount,
        currency: spec.denomination.clone(),
        success,
        source_validator,
    }
}

fn address(rng: &mut StreamRng, prefix: &str) -> Address {
    let body: String = (0..38)
        .map(|_| BECH32_CHARSET[rng.below(BECH32_CHARSET.len())] as char)
        .collect();
    format!("{prefix}{body}")
}

fn weighted_pick(rng: &mut StreamRng, weights: &[f64]) -> usize {
    let total: f64 = weights.iter().sum();
    let mut target = rng.next_f64() * total;
    for (i, w) in weights.iter().enumerate() {
        if target < *w {
            return i;
        }
        target -= w;
    }
    weights.len().saturating_sub(1)
}

/// A random non-empty position held by delegator `d`.
fn held_position(
    positions: &BTreeMap<(usize, usize), u64>,
    d: usize,
    rng: &mut StreamRng,
) -> Option<(usize, u64)> {
    let held: Vec<(usize, u64)> = positions
        .range((d, 0)..=(d, usize::MAX))
        .filter(|(_, amount)| **amount > 0)
        .map(|((_, v), amount)| (*v, *amount))
        .collect();
    if held.is_empty() {
        return None;
    }
    Some(held[rng.below(held.len())])
}

/// Between a quarter of and the whole position.
fn partial(rng: &mut StreamRng, held: u64) -> u64 {
    if rng.chance(0.3) {
        return held;
    }
    let share = 0.25 + 0.75 * rng.next_f64();
    ((held as f64 * share).round() as u64).clamp(1, held)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(seed: u64) -> DemoLedgerSpec {
        let mut s = DemoLedgerSpec::new(seed, NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(), 60);
        s.delegators = 40;
        s.validators = 6;
        s
    }

    #[test]
    fn same_seed_same_ledger() {
        assert_eq!(generate(&spec(7)), generate(&spec(7)));
    }

    #[test]
    fn positions_never_go_negative() {
        let mut held: BTreeMap<(String, String), i128> = BTreeMap::new();
        for e in generate(&spec(11)).iter().filter(|e| e.success) {
            let amount = e.amount as i128;
            match e.action {
                StakingAction::Delegate => {
                    *held.entry((e.entity_address.clone(), e.validator_address.clone())).or_default() += amount;
                }
                StakingAction::Undelegate => {
                    *held.entry((e.entity_address.clone(), e.validator_address.clone())).or_default() -= amount;
                }
                StakingAction::Redelegate => {
                    let from = e.source_validator.clone().unwrap();
                    *held.entry((e.entity_address.clone(), from)).or_default() -= amount;
                    *held.entry((e.entity_address.clone(), e.validator_address.clone())).or_default() += amount;
                }
                StakingAction::ClaimReward => {}
            }
        }
        assert!(held.values().all(|v| *v >= 0));
    }
}
