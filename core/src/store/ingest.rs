//! Fixture loading. The analytics path never writes; this exists so tests
//! and the demo runner can stand up a warehouse without an external ledger.

use super::{events::TIMESTAMP_FORMAT, WarehouseStore};
use crate::{error::MetricsResult, types::StakingEvent};
use rusqlite::params;

impl WarehouseStore {
    /// Append ledger facts in one transaction. Returns the number of rows written.
    pub fn insert_events(&self, events: &[StakingEvent]) -> MetricsResult<usize> {
        let mut conn = self.anchor()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO staking_event (
                    block_timestamp, tx_id, delegator_address, validator_address,
                    action, amount, currency, tx_succeeded,
                    redelegate_source_validator_address
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for event in events {
                stmt.execute(params![
                    event.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    event.tx_id,
                    event.entity_address,
                    event.validator_address,
                    event.action.as_str(),
                    event.amount as i64,
                    event.currency,
                    event.success,
                    event.source_validator,
                ])?;
            }
        }
        tx.commit()?;
        log::debug!("inserted {} staking events", events.len());
        Ok(events.len())
    }
}
