use crate::{
    cohort_engine::{
        ThresholdSet, REWARD_PER_TXN, REWARD_VOLUME, STAKING_PER_TXN, STAKING_VOLUME, TXN_COUNT,
    },
    concentration_engine::PowerTransform,
    error::{MetricsError, MetricsResult},
    retry::RetryPolicy,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Network constants ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// Only facts in this currency are read.
    pub denomination: String,
    /// Base units per whole token.
    pub denomination_scale: f64,
    /// First day of staking history. Demo ledgers start here, and the runner
    /// falls back to it for the window start when the warehouse is empty.
    pub genesis_date: NaiveDate,
    pub total_supply: f64,
    /// Balances at or below this are dust.
    pub dust_epsilon: f64,
    pub concentration_threshold_pct: f64,
    pub power_transform: PowerTransform,
    pub whale_threshold: f64,
    pub validator_change_lookback_days: i64,
    pub validator_leaderboard_limit: usize,
    pub reward_leaderboard_limit: usize,
    pub recent_claims_limit: usize,
}

// ── Threshold sets ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct ThresholdSetEntry {
    name:        String,
    breakpoints: Vec<f64>,
    labels:      Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ThresholdsFile {
    threshold_sets: Vec<ThresholdSetEntry>,
}

// ── Source ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    /// How long a session waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub network:    NetworkConfig,
    pub thresholds: HashMap<String, ThresholdSet>,
    pub source:     SourceConfig,
}

impl MetricsConfig {
    /// Load from the data/ directory.
    /// In tests, use MetricsConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let network_path = format!("{data_dir}/network/network.json");
        let network_content = std::fs::read_to_string(&network_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {network_path}: {e}"))?;
        let network: NetworkConfig = serde_json::from_str(&network_content)?;

        let thresholds_path = format!("{data_dir}/thresholds/cohort_thresholds.json");
        let thresholds_content = std::fs::read_to_string(&thresholds_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {thresholds_path}: {e}"))?;
        let thresholds_file: ThresholdsFile = serde_json::from_str(&thresholds_content)?;
        let thresholds = thresholds_file
            .threshold_sets
            .into_iter()
            .map(|t| ThresholdSet::new(t.name.clone(), t.breakpoints, t.labels).map(|set| (t.name, set)))
            .collect::<MetricsResult<HashMap<_, _>>>()?;

        let source_path = format!("{data_dir}/source/warehouse.json");
        let source_content = std::fs::read_to_string(&source_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {source_path}: {e}"))?;
        let source: SourceConfig = serde_json::from_str(&source_content)?;

        let config = Self { network, thresholds, source };
        config.validate()?;
        Ok(config)
    }

    /// Every named set the query layer relies on must be present.
    pub fn validate(&self) -> MetricsResult<()> {
        for name in [TXN_COUNT, STAKING_VOLUME, STAKING_PER_TXN, REWARD_VOLUME, REWARD_PER_TXN] {
            self.threshold_set(name)?;
        }
        if self.network.denomination_scale <= 0.0 {
            return Err(MetricsError::InvalidParameter {
                name:  "denomination_scale",
                value: self.network.denomination_scale.to_string(),
            });
        }
        Ok(())
    }

    pub fn threshold_set(&self, name: &str) -> MetricsResult<&ThresholdSet> {
        self.thresholds.get(name).ok_or_else(|| MetricsError::InvalidThresholds {
            name:   name.to_string(),
            reason: "no threshold set with this name is configured".into(),
        })
    }

    /// Config with hardcoded defaults for use in unit tests.
    /// Mirrors the files under data/.
    pub fn default_test() -> Self {
        let network = NetworkConfig {
            denomination:                   "uaxl".into(),
            denomination_scale:             1_000_000.0,
            genesis_date:                   NaiveDate::from_ymd_opt(2022, 2, 10).unwrap_or_default(),
            total_supply:                   1_215_160_193.0,
            dust_epsilon:                   0.001,
            concentration_threshold_pct:    33.6,
            power_transform:                PowerTransform::SquareRoot,
            whale_threshold:                100_000.0,
            validator_change_lookback_days: 30,
            validator_leaderboard_limit:    75,
            reward_leaderboard_limit:       100,
            recent_claims_limit:            100,
        };

        let sets: [(&str, Vec<f64>, Vec<&str>); 5] = [
            (
                TXN_COUNT,
                vec![1.0, 5.0, 10.0, 20.0, 50.0, 100.0],
                vec![
                    "n=1 Txn", "1<n<=5 Txns", "5<n<=10 Txns", "10<n<=20 Txns",
                    "20<n<=50 Txns", "50<n<=100 Txns", "n>100 Txns",
                ],
            ),
            (
                STAKING_VOLUME,
                vec![10.0, 100.0, 1e3, 1e4, 1e5, 1e6, 1e7],
                vec![
                    "V<=10 AXL", "10<V<=100 AXL", "100<V<=1k AXL", "1k<V<=10k AXL",
                    "10k<V<=100k AXL", "100k<V<=1M AXL", "1M<V<=10M AXL", "V>10M AXL",
                ],
            ),
            (
                STAKING_PER_TXN,
                vec![1.0, 10.0, 100.0, 1e3, 1e4, 1e5, 1e6],
                vec![
                    "V<=1 AXL", "1<V<=10 AXL", "10<V<=100 AXL", "100<V<=1k AXL",
                    "1k<V<=10k AXL", "10k<V<=100k AXL", "100k<V<=1M AXL", "V>1M AXL",
                ],
            ),
            (
                REWARD_VOLUME,
                vec![10.0, 100.0, 1e3, 1e4, 1e5, 1e6],
                vec![
                    "V<=10 AXL", "10<V<=100 AXL", "100<V<=1k AXL", "1k<V<=10k AXL",
                    "10k<V<=100k AXL", "100k<V<=1M AXL", "V>1M AXL",
                ],
            ),
            (
                REWARD_PER_TXN,
                vec![1.0, 5.0, 10.0, 100.0, 1e3, 1e4, 1e5, 1e6],
                vec![
                    "V<=1 AXL", "1<V<=5 AXL", "5<V<=10 AXL", "10<V<=100 AXL", "100<V<=1k AXL",
                    "1k<V<=10k AXL", "10k<V<=100k AXL", "100k<V<=1M AXL", "V>1M AXL",
                ],
            ),
        ];
        let thresholds = sets
            .into_iter()
            .filter_map(|(name, breakpoints, labels)| {
                let labels = labels.into_iter().map(String::from).collect();
                ThresholdSet::new(name, breakpoints, labels)
                    .ok()
                    .map(|set| (name.to_string(), set))
            })
            .collect();

        Self {
            network,
            thresholds,
            source: SourceConfig {
                busy_timeout_ms: 1_000,
                retry: RetryPolicy {
                    initial_delay_ms:   10,
                    backoff_multiplier: 2.0,
                    max_delay_ms:       100,
                    max_attempts:       3,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_dir() -> String {
        format!("{}/../data", env!("CARGO_MANIFEST_DIR"))
    }

    #[test]
    fn shipped_data_matches_test_defaults() {
        let loaded = MetricsConfig::load(&data_dir()).unwrap();
        let defaults = MetricsConfig::default_test();
        assert_eq!(loaded.network, defaults.network);
        assert_eq!(loaded.thresholds, defaults.thresholds);
        assert_eq!(loaded.source.retry, RetryPolicy::default());
    }

    #[test]
    fn missing_threshold_set_is_reported() {
        let mut config = MetricsConfig::default_test();
        config.thresholds.remove(REWARD_PER_TXN);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, MetricsError::InvalidThresholds { ref name, .. } if name == REWARD_PER_TXN));
    }
}
