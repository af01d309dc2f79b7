//! Shared primitive types used across the entire metrics layer.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A delegator or validator address as it appears on chain.
pub type Address = String;

/// A transaction hash.
pub type TxId = String;

/// An amount in whole tokens (already scaled down from the base denomination).
pub type Tokens = f64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StakingAction {
    Delegate,
    Undelegate,
    Redelegate,
    ClaimReward,
}

impl StakingAction {
    /// The three actions that move stake. Reward claims do not.
    pub const STAKE_MOVING: [StakingAction; 3] = [
        StakingAction::Delegate,
        StakingAction::Undelegate,
        StakingAction::Redelegate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StakingAction::Delegate    => "delegate",
            StakingAction::Undelegate  => "undelegate",
            StakingAction::Redelegate  => "redelegate",
            StakingAction::ClaimReward => "claim_reward",
        }
    }
}

impl fmt::Display for StakingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StakingAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delegate"     => Ok(StakingAction::Delegate),
            "undelegate"   => Ok(StakingAction::Undelegate),
            "redelegate"   => Ok(StakingAction::Redelegate),
            "claim_reward" => Ok(StakingAction::ClaimReward),
            other => Err(anyhow::anyhow!("unknown staking action '{other}'")),
        }
    }
}

/// An immutable staking fact exactly as the ledger records it.
/// `amount` is in the smallest denomination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StakingEvent {
    pub timestamp:         NaiveDateTime,
    pub tx_id:             TxId,
    pub entity_address:    Address,
    pub validator_address: Address,
    pub action:            StakingAction,
    pub amount:            u64,
    pub currency:          String,
    pub success:           bool,
    /// Set only for redelegations.
    pub source_validator:  Option<Address>,
}

/// The filtered, scaled projection of a `StakingEvent` that every engine consumes.
/// Only successful, native-denomination facts ever become records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StakingRecord {
    pub timestamp:        NaiveDateTime,
    pub tx_id:            TxId,
    pub entity:           Address,
    pub validator:        Address,
    pub action:           StakingAction,
    pub amount:           Tokens,
    pub source_validator: Option<Address>,
}

impl StakingRecord {
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }
}
