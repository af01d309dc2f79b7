//! Filtered reads from the staking fact table.

use super::WarehouseStore;
use crate::{
    error::{MetricsError, MetricsResult},
    source::{EventFilter, EventSource},
    types::{StakingAction, StakingRecord},
};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rusqlite::params;
use std::sync::atomic::Ordering;

pub(super) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

struct RawRow {
    block_timestamp:  String,
    tx_id:            String,
    delegator:        String,
    validator:        String,
    action:           String,
    amount:           i64,
    source_validator: Option<String>,
}

impl WarehouseStore {
    fn fetch_once(&self, filter: &EventFilter) -> MetricsResult<Vec<StakingRecord>> {
        let conn = self.session()?;

        let mut sql = String::from(
            "SELECT block_timestamp, tx_id, delegator_address, validator_address,
                    action, amount, redelegate_source_validator_address
             FROM staking_event
             WHERE tx_succeeded = 1 AND currency = ?1
               AND (?2 IS NULL OR block_timestamp >= ?2)
               AND (?3 IS NULL OR block_timestamp <  ?3)",
        );
        if !filter.actions.is_empty() {
            // Action names come from the enum, never from callers.
            let list = filter
                .actions
                .iter()
                .map(|a| format!("'{}'", a.as_str()))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" AND action IN ({list})"));
        }
        sql.push_str(" ORDER BY block_timestamp ASC, tx_id ASC, id ASC");

        let from = filter.from.map(day_start);
        let to_exclusive = filter.to.map(|d| day_start(d + Duration::days(1)));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![self.denomination, from, to_exclusive], |row| {
                Ok(RawRow {
                    block_timestamp:  row.get(0)?,
                    tx_id:            row.get(1)?,
                    delegator:        row.get(2)?,
                    validator:        row.get(3)?,
                    action:           row.get(4)?,
                    amount:           row.get(5)?,
                    source_validator: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(|raw| self.to_record(raw)).collect()
    }

    fn to_record(&self, raw: RawRow) -> MetricsResult<StakingRecord> {
        let timestamp = NaiveDateTime::parse_from_str(&raw.block_timestamp, TIMESTAMP_FORMAT)
            .map_err(|e| {
                MetricsError::Other(anyhow::anyhow!(
                    "bad block_timestamp '{}' on tx {}: {e}",
                    raw.block_timestamp,
                    raw.tx_id
                ))
            })?;
        let action: StakingAction = raw.action.parse()?;
        // Without a source the destination credit has no matching debit.
        if action == StakingAction::Redelegate && raw.source_validator.is_none() {
            let detail = format!("redelegation {} has no source validator", raw.tx_id);
            log::warn!("fetch_events integrity violation: {detail}");
            return Err(MetricsError::DataIntegrity { query: "fetch_events".into(), detail });
        }
        Ok(StakingRecord {
            timestamp,
            tx_id:            raw.tx_id,
            entity:           raw.delegator,
            validator:        raw.validator,
            action,
            amount:           raw.amount as f64 / self.scale,
            source_validator: raw.source_validator,
        })
    }

    /// Total rows in the fact table, filtered or not (for tests and the runner).
    pub fn raw_event_count(&self) -> MetricsResult<i64> {
        let count: i64 = self.anchor()?.query_row(
            "SELECT COUNT(*) FROM staking_event",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Earliest successful native-denomination activity date, if any.
    pub fn first_event_date(&self) -> MetricsResult<Option<NaiveDate>> {
        let first: Option<String> = self.anchor()?.query_row(
            "SELECT MIN(block_timestamp) FROM staking_event
             WHERE tx_succeeded = 1 AND currency = ?1",
            params![self.denomination],
            |row| row.get(0),
        )?;
        Ok(first
            .and_then(|ts| NaiveDateTime::parse_from_str(&ts, TIMESTAMP_FORMAT).ok())
            .map(|ts| ts.date()))
    }
}

impl EventSource for WarehouseStore {
    fn fetch_events(&self, filter: &EventFilter) -> MetricsResult<Vec<StakingRecord>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let started = std::time::Instant::now();
        let records = self.retry.run("fetch_events", || self.fetch_once(filter))?;
        log::debug!(
            "fetch_events {:?}: {} rows in {}ms",
            filter,
            records.len(),
            started.elapsed().as_millis()
        );
        Ok(records)
    }

    fn queries_issued(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }
}

fn day_start(date: NaiveDate) -> String {
    format!("{} 00:00:00", date.format("%Y-%m-%d"))
}
