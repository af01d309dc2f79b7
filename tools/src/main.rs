//! metrics-runner: headless runner for the staking metrics layer.
//!
//! Usage:
//!   metrics-runner --db warehouse.db --start 2024-01-01 --end 2024-03-31 --bucket week
//!   metrics-runner --demo 365 --seed 42 --query nakamoto_series
//!   metrics-runner --demo 180 --today 2022-08-01
//!
//! Without --query the whole dashboard is rendered. Output is JSON on stdout.
//! Without --start the window opens on the first recorded activity.

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use staking_metrics_core::{
    config::MetricsConfig,
    dashboard::Panel,
    demo_ledger::{self, DemoLedgerSpec},
    metrics::StakingMetrics,
    query::{parse_date, QueryParams},
    result_cache::{CacheStats, CancelToken},
    source::EventSource,
    store::WarehouseStore,
};
use std::env;
use std::sync::Arc;

#[derive(Serialize)]
struct QueryOutput<'a> {
    query:  &'a str,
    params: QueryParams,
    today:  NaiveDate,
    data:   serde_json::Value,
}

#[derive(Serialize)]
struct RunSummary {
    warehouse_rows:    i64,
    warehouse_queries: u64,
    cache:             CacheStats,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let data_dir = arg_str(&args, "--data-dir").unwrap_or("./data");
    let db = arg_str(&args, "--db");
    let demo_days = parse_arg(&args, "--demo", 0u32);
    let seed = parse_arg(&args, "--seed", 42u64);
    let bucket = arg_str(&args, "--bucket").unwrap_or("day");

    let config = MetricsConfig::load(data_dir)
        .with_context(|| format!("loading configuration from {data_dir}"))?;
    let genesis = config.network.genesis_date;

    let store = match db {
        Some(path) => WarehouseStore::open(path, &config)?,
        None => WarehouseStore::in_memory(&config)?,
    };
    store.migrate()?;

    // The demo ledger starts at genesis; "today" defaults to the day after it ends.
    let default_today = if demo_days > 0 {
        let mut spec = DemoLedgerSpec::new(seed, genesis, demo_days);
        spec.denomination = config.network.denomination.clone();
        spec.scale = config.network.denomination_scale;
        let inserted = store.insert_events(&demo_ledger::generate(&spec))?;
        log::info!("loaded {inserted} demo events (seed {seed}, {demo_days} days)");
        genesis + Duration::days(demo_days as i64)
    } else {
        chrono::Local::now().date_naive()
    };

    let today = match arg_str(&args, "--today") {
        Some(s) => parse_date("today", s)?,
        None => default_today,
    };
    let start = match arg_str(&args, "--start") {
        Some(s) => s.to_string(),
        None => store
            .first_event_date()?
            .unwrap_or(genesis)
            .format("%Y-%m-%d")
            .to_string(),
    };
    let end = match arg_str(&args, "--end") {
        Some(s) => s.to_string(),
        None => today.format("%Y-%m-%d").to_string(),
    };
    let params = QueryParams::parse(bucket, &start, &end)?;
    let warehouse_rows = store.raw_event_count()?;

    let metrics = StakingMetrics::new(Arc::new(store), config);

    match arg_str(&args, "--query") {
        Some(name) => {
            let panel: Panel = name.parse()?;
            let data = metrics.run_panel(panel, &params, today)?;
            let out = QueryOutput { query: panel.name(), params, today, data };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        None => {
            let report = metrics.render_dashboard(&params, today, &CancelToken::new())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            for failed in report.failed() {
                log::warn!("panel {} did not render", failed.panel);
            }
        }
    }

    let summary = RunSummary {
        warehouse_rows,
        warehouse_queries: metrics.source().queries_issued(),
        cache:             metrics.cache_stats(),
    };
    eprintln!("{}", serde_json::to_string(&summary)?);

    Ok(())
}

fn arg_str<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
