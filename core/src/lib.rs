pub mod aggregation_engine;
pub mod balance_engine;
pub mod calendar;
pub mod cohort_engine;
pub mod concentration_engine;
pub mod config;
pub mod dashboard;
pub mod demo_ledger;
pub mod error;
pub mod metrics;
pub mod query;
pub mod result_cache;
pub mod retry;
pub mod rng;
pub mod source;
pub mod store;
pub mod types;
