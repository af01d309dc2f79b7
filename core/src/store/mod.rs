//! SQLite warehouse adapter.
//!
//! RULE: only store/ talks to the database.
//! Engines receive `StakingRecord`s through the `EventSource` trait; they
//! never execute SQL directly.
//!
//! Every read opens its own short-lived read-only session so concurrent
//! queries never share a connection. The anchor connection owns the schema
//! and keeps shared in-memory databases alive.

mod events;
mod ingest;

use crate::{
    config::MetricsConfig,
    error::{MetricsError, MetricsResult},
    retry::RetryPolicy,
};
use rusqlite::{Connection, OpenFlags};
use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Mutex, MutexGuard,
};
use std::time::Duration;

static MEMORY_DB_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub struct WarehouseStore {
    uri:          String,
    denomination: String,
    scale:        f64,
    busy_timeout: Duration,
    retry:        RetryPolicy,
    anchor:       Mutex<Connection>,
    queries:      AtomicU64,
}

impl WarehouseStore {
    /// Open (or create) the warehouse database at `path`.
    pub fn open(path: &str, config: &MetricsConfig) -> MetricsResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory ignores it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        Self::from_anchor(path.to_string(), conn, config)
    }

    /// Open a private in-memory warehouse (used in tests and demo runs).
    /// Uses a shared-cache URI so per-query sessions see the same data.
    pub fn in_memory(config: &MetricsConfig) -> MetricsResult<Self> {
        let n = MEMORY_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
        let uri = format!(
            "file:staking_warehouse_{}_{n}?mode=memory&cache=shared",
            std::process::id()
        );
        let conn = Connection::open_with_flags(
            &uri,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        Self::from_anchor(uri, conn, config)
    }

    fn from_anchor(uri: String, conn: Connection, config: &MetricsConfig) -> MetricsResult<Self> {
        let busy_timeout = Duration::from_millis(config.source.busy_timeout_ms);
        conn.busy_timeout(busy_timeout)?;
        Ok(Self {
            uri,
            denomination: config.network.denomination.clone(),
            scale:        config.network.denomination_scale,
            busy_timeout,
            retry:        config.source.retry.clone(),
            anchor:       Mutex::new(conn),
            queries:      AtomicU64::new(0),
        })
    }

    /// Replace the retry policy (tests use `RetryPolicy::NO_RETRY`).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> MetricsResult<()> {
        self.anchor()?
            .execute_batch(include_str!("../../../migrations/001_staking_facts.sql"))?;
        Ok(())
    }

    /// A fresh read-only session, released when dropped.
    fn session(&self) -> MetricsResult<Connection> {
        let conn = Connection::open_with_flags(
            &self.uri,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    fn anchor(&self) -> MetricsResult<MutexGuard<'_, Connection>> {
        self.anchor
            .lock()
            .map_err(|_| MetricsError::Other(anyhow::anyhow!("warehouse anchor connection poisoned")))
    }
}
